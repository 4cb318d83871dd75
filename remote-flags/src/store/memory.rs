use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    environments::environment_models::{Environment, KeyDescriptor, KeyScope},
    flags::flag_models::{FlagRule, FlagRulePatch},
    projects::project_models::Project,
    store::{Entity, Page, Store, StoreError},
};

/// An in-process store with the same per-field semantics as [`super::PgStore`].
///
/// Projects are keyed by name, which keeps `list_projects` sorted for free.
#[derive(Default)]
pub struct MemoryStore {
    projects: RwLock<BTreeMap<String, Project>>,
    environments: RwLock<BTreeMap<String, Environment>>,
    fail_environment_writes: AtomicBool,
    fail_project_links: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes bulk environment flag writes fail, to exercise partial cascades.
    pub fn fail_environment_writes(&self, fail: bool) {
        self.fail_environment_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn environment_count(&self) -> usize {
        self.environments.read().await.len()
    }

    /// Makes attaching and detaching environments on projects fail.
    pub fn fail_project_links(&self, fail: bool) {
        self.fail_project_links.store(fail, Ordering::SeqCst);
    }

    fn check_environment_writes(&self) -> Result<(), StoreError> {
        check(&self.fail_environment_writes)
    }

    fn check_project_links(&self) -> Result<(), StoreError> {
        check(&self.fail_project_links)
    }
}

fn check(fail: &AtomicBool) -> Result<(), StoreError> {
    if fail.load(Ordering::SeqCst) {
        return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_projects(&self, page: Page) -> Result<Vec<Project>, StoreError> {
        let projects = self.projects.read().await;
        Ok(projects
            .values()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.name) {
            return Err(StoreError::AlreadyExists(Entity::Project));
        }
        projects.insert(project.name.clone(), project.clone());
        Ok(())
    }

    async fn get_project(&self, name: &str) -> Result<Project, StoreError> {
        self.projects
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Project))
    }

    async fn delete_project(&self, name: &str) -> Result<Project, StoreError> {
        self.projects
            .write()
            .await
            .remove(name)
            .ok_or(StoreError::NotFound(Entity::Project))
    }

    async fn attach_environment(
        &self,
        project: &str,
        environment_id: &str,
    ) -> Result<(), StoreError> {
        self.check_project_links()?;
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(project)
            .ok_or(StoreError::NotFound(Entity::Project))?;
        if !project.environment_ids.iter().any(|id| id == environment_id) {
            project.environment_ids.push(environment_id.to_string());
        }
        project.updated_at = Utc::now();
        Ok(())
    }

    async fn detach_environment(&self, environment_id: &str) -> Result<u64, StoreError> {
        self.check_project_links()?;
        let mut projects = self.projects.write().await;
        let mut detached = 0;
        for project in projects.values_mut() {
            let before = project.environment_ids.len();
            project.environment_ids.retain(|id| id != environment_id);
            if project.environment_ids.len() != before {
                project.updated_at = Utc::now();
                detached += 1;
            }
        }
        Ok(detached)
    }

    async fn insert_project_flag(
        &self,
        project: &str,
        flag_name: &str,
        rule: &FlagRule,
    ) -> Result<Vec<String>, StoreError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(project)
            .ok_or(StoreError::NotFound(Entity::Project))?;
        if project.flags.contains_key(flag_name) {
            return Err(StoreError::AlreadyExists(Entity::Flag));
        }
        project.flags.insert(flag_name.to_string(), rule.clone());
        project.updated_at = Utc::now();
        Ok(project.environment_ids.clone())
    }

    async fn patch_project_flag(
        &self,
        project: &str,
        flag_name: &str,
        patch: &FlagRulePatch,
    ) -> Result<FlagRule, StoreError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(project)
            .ok_or(StoreError::NotFound(Entity::Project))?;
        let rule = project
            .flags
            .get_mut(flag_name)
            .ok_or(StoreError::NotFound(Entity::Flag))?;
        patch.apply_to(rule);
        let patched = rule.clone();
        project.updated_at = Utc::now();
        Ok(patched)
    }

    async fn remove_project_flag(
        &self,
        project: &str,
        flag_name: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(project)
            .ok_or(StoreError::NotFound(Entity::Project))?;
        project.flags.remove(flag_name);
        project.updated_at = Utc::now();
        Ok(project.environment_ids.clone())
    }

    async fn insert_environment(&self, environment: &Environment) -> Result<(), StoreError> {
        let mut environments = self.environments.write().await;
        if environments.contains_key(&environment.id) {
            return Err(StoreError::AlreadyExists(Entity::Environment));
        }
        environments.insert(environment.id.clone(), environment.clone());
        Ok(())
    }

    async fn get_environment(&self, id: &str) -> Result<Environment, StoreError> {
        self.environments
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Environment))
    }

    async fn rename_environment(&self, id: &str, name: &str) -> Result<Environment, StoreError> {
        let mut environments = self.environments.write().await;
        let environment = environments
            .get_mut(id)
            .ok_or(StoreError::NotFound(Entity::Environment))?;
        environment.name = name.to_string();
        environment.updated_at = Utc::now();
        Ok(environment.clone())
    }

    async fn delete_environment(&self, id: &str) -> Result<(), StoreError> {
        self.environments
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(Entity::Environment))
    }

    async fn set_environments_flag(
        &self,
        ids: &[String],
        flag_name: &str,
        rule: &FlagRule,
    ) -> Result<u64, StoreError> {
        self.check_environment_writes()?;
        let mut environments = self.environments.write().await;
        let mut written = 0;
        for id in ids {
            if let Some(environment) = environments.get_mut(id) {
                environment.flags.insert(flag_name.to_string(), rule.clone());
                environment.updated_at = Utc::now();
                written += 1;
            }
        }
        Ok(written)
    }

    async fn unset_environments_flag(
        &self,
        ids: &[String],
        flag_name: &str,
    ) -> Result<u64, StoreError> {
        self.check_environment_writes()?;
        let mut environments = self.environments.write().await;
        let mut written = 0;
        for id in ids {
            if let Some(environment) = environments.get_mut(id) {
                environment.flags.remove(flag_name);
                environment.updated_at = Utc::now();
                written += 1;
            }
        }
        Ok(written)
    }

    async fn patch_environment_flag(
        &self,
        id: &str,
        flag_name: &str,
        patch: &FlagRulePatch,
    ) -> Result<FlagRule, StoreError> {
        let mut environments = self.environments.write().await;
        let environment = environments
            .get_mut(id)
            .ok_or(StoreError::NotFound(Entity::Environment))?;
        let rule = environment
            .flags
            .get_mut(flag_name)
            .ok_or(StoreError::NotFound(Entity::Flag))?;
        patch.apply_to(rule);
        let patched = rule.clone();
        environment.updated_at = Utc::now();
        Ok(patched)
    }

    async fn remove_environment_flag(&self, id: &str, flag_name: &str) -> Result<(), StoreError> {
        let mut environments = self.environments.write().await;
        let environment = environments
            .get_mut(id)
            .ok_or(StoreError::NotFound(Entity::Environment))?;
        environment.flags.remove(flag_name);
        environment.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_api_key(
        &self,
        id: &str,
        scope: KeyScope,
        key: &str,
        descriptor: &KeyDescriptor,
    ) -> Result<(), StoreError> {
        let mut environments = self.environments.write().await;
        let environment = environments
            .get_mut(id)
            .ok_or(StoreError::NotFound(Entity::Environment))?;
        environment
            .keys_mut(scope)
            .insert(key.to_string(), descriptor.clone());
        environment.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_api_key(
        &self,
        id: &str,
        scope: KeyScope,
        key: &str,
    ) -> Result<(), StoreError> {
        let mut environments = self.environments.write().await;
        let environment = environments
            .get_mut(id)
            .ok_or(StoreError::NotFound(Entity::Environment))?;
        environment.keys_mut(scope).remove(key);
        environment.updated_at = Utc::now();
        Ok(())
    }
}
