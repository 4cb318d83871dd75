use std::sync::Arc;

use rand::{distributions::Alphanumeric, Rng};

use crate::{
    environments::environment_models::{ApiKey, Environment, KeyScope},
    flags::flag_models::{FlagMap, FlagRule},
    projects::project_models::Project,
    store::{MemoryStore, Store},
};

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

pub fn setup_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// A project that has not been stored yet.
pub fn test_project(name: &str) -> Project {
    Project::new(name)
}

pub async fn insert_project(store: &MemoryStore) -> Project {
    let project = test_project(&random_string("proj_", 8));
    store
        .insert_project(&project)
        .await
        .expect("failed to insert project");
    project
}

/// Stores a standalone environment (not attached to any project) with the given flags.
pub async fn insert_environment(store: &MemoryStore, flags: FlagMap) -> Environment {
    let environment = Environment::new(random_string("env_", 6), flags);
    store
        .insert_environment(&environment)
        .await
        .expect("failed to insert environment");
    environment
}

pub async fn insert_api_key(store: &MemoryStore, environment_id: &str, scope: KeyScope) -> String {
    let key = ApiKey::generate(random_string("key_", 4));
    store
        .insert_api_key(environment_id, scope, &key.key, &key.descriptor())
        .await
        .expect("failed to insert api key");
    key.key
}

pub fn flag_map<I, S>(flags: I) -> FlagMap
where
    I: IntoIterator<Item = (S, FlagRule)>,
    S: Into<String>,
{
    flags
        .into_iter()
        .map(|(name, rule)| (name.into(), rule))
        .collect()
}
