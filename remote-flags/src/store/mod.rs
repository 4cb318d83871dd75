//! Persistence for projects and environments.
//!
//! Every method addresses a single field of a single document, or one field
//! across a set of environments, so concurrent writers touching different
//! flags or keys never overwrite each other. Nothing here spans more than one
//! statement: cascades are composed by the caller.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    environments::environment_models::{Environment, KeyDescriptor, KeyScope},
    flags::flag_models::{FlagRule, FlagRulePatch},
    projects::project_models::Project,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Project,
    Environment,
    Flag,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Project => "Project",
            Entity::Environment => "Environment",
            Entity::Flag => "Flag",
        })
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(Entity),
    #[error("{0} name already exists")]
    AlreadyExists(Entity),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

/// Opaque document id: a UUIDv7 as 32 hex characters.
pub fn new_id() -> String {
    Uuid::now_v7().simple().to_string()
}

#[async_trait]
pub trait Store {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Projects sorted by name.
    async fn list_projects(&self, page: Page) -> Result<Vec<Project>, StoreError>;
    /// Fails with `AlreadyExists(Project)` when the name is taken.
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError>;
    async fn get_project(&self, name: &str) -> Result<Project, StoreError>;
    /// Removes the project document only, returning it as it was.
    async fn delete_project(&self, name: &str) -> Result<Project, StoreError>;
    /// Appends an environment id unless the project already lists it.
    async fn attach_environment(&self, project: &str, environment_id: &str)
        -> Result<(), StoreError>;
    /// Removes an environment id from every project listing it.
    async fn detach_environment(&self, environment_id: &str) -> Result<u64, StoreError>;

    /// Adds a flag that must not exist yet. Returns the project's environment ids
    /// as of the write.
    async fn insert_project_flag(
        &self,
        project: &str,
        flag_name: &str,
        rule: &FlagRule,
    ) -> Result<Vec<String>, StoreError>;
    async fn patch_project_flag(
        &self,
        project: &str,
        flag_name: &str,
        patch: &FlagRulePatch,
    ) -> Result<FlagRule, StoreError>;
    /// Removes a flag if present. Returns the project's environment ids.
    async fn remove_project_flag(
        &self,
        project: &str,
        flag_name: &str,
    ) -> Result<Vec<String>, StoreError>;

    async fn insert_environment(&self, environment: &Environment) -> Result<(), StoreError>;
    async fn get_environment(&self, id: &str) -> Result<Environment, StoreError>;
    async fn rename_environment(&self, id: &str, name: &str) -> Result<Environment, StoreError>;
    async fn delete_environment(&self, id: &str) -> Result<(), StoreError>;

    /// Writes `rule` under `flag_name` on every listed environment, replacing
    /// whatever was there. Returns how many environments were written.
    async fn set_environments_flag(
        &self,
        ids: &[String],
        flag_name: &str,
        rule: &FlagRule,
    ) -> Result<u64, StoreError>;
    async fn unset_environments_flag(
        &self,
        ids: &[String],
        flag_name: &str,
    ) -> Result<u64, StoreError>;
    async fn patch_environment_flag(
        &self,
        id: &str,
        flag_name: &str,
        patch: &FlagRulePatch,
    ) -> Result<FlagRule, StoreError>;
    async fn remove_environment_flag(&self, id: &str, flag_name: &str) -> Result<(), StoreError>;

    async fn insert_api_key(
        &self,
        id: &str,
        scope: KeyScope,
        key: &str,
        descriptor: &KeyDescriptor,
    ) -> Result<(), StoreError>;
    async fn delete_api_key(&self, id: &str, scope: KeyScope, key: &str)
        -> Result<(), StoreError>;
}
