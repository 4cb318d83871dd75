use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::{
    api::errors::FlagError,
    environments::environment_models::Environment,
    flags::flag_models::{Flag, FlagMap, FlagRule, FlagRulePatch},
    metrics_utils::{
        CASCADE_ENVIRONMENTS_COUNTER, CASCADE_FAILURES_COUNTER, PROJECT_LINK_FAILURES_COUNTER,
    },
    projects::project_models::{CascadeOperation, CascadeReport, Project, ProjectDeletion},
    store::{Store, StoreError},
};

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: crate::store::new_id(),
            name: name.into(),
            flags: FlagMap::new(),
            environment_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Applies project mutations and carries them over to the project's
/// environments where they must be.
///
/// | project operation | environments                                   |
/// |-------------------|------------------------------------------------|
/// | create env        | new environment starts with a copy of flags    |
/// | add flag          | flag written to every environment, replacing   |
/// | patch flag        | untouched                                      |
/// | remove flag       | flag removed from every environment            |
///
/// The project write and the environment write are separate statements. When
/// the second one fails the caller gets [`FlagError::PartialCascade`] and can
/// converge the flag with [`PropagationManager::resync_flag`].
#[derive(Clone)]
pub struct PropagationManager {
    store: Arc<dyn Store + Send + Sync>,
}

impl PropagationManager {
    pub fn new(store: Arc<dyn Store + Send + Sync>) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(project = %project_name))]
    pub async fn create_environment(
        &self,
        project_name: &str,
        environment_name: &str,
    ) -> Result<Environment, FlagError> {
        let project = self.store.get_project(project_name).await?;
        let environment = Environment::new(environment_name, project.flags);

        self.store.insert_environment(&environment).await?;
        if let Err(e) = self
            .store
            .attach_environment(project_name, &environment.id)
            .await
        {
            tracing::error!(
                "failed to attach environment {} to project {}, removing it: {}",
                environment.id,
                project_name,
                e
            );
            metrics::counter!(PROJECT_LINK_FAILURES_COUNTER, "operation" => "attach").increment(1);
            if let Err(cleanup) = self.store.delete_environment(&environment.id).await {
                tracing::error!(
                    "environment {} left without a project: {}",
                    environment.id,
                    cleanup
                );
            }
            return Err(e.into());
        }

        Ok(environment)
    }

    #[instrument(skip_all, fields(project = %project_name, flag = %flag.name))]
    pub async fn add_flag(&self, project_name: &str, flag: Flag) -> Result<Flag, FlagError> {
        let rule = flag.rule();
        let environment_ids = self
            .store
            .insert_project_flag(project_name, &flag.name, &rule)
            .await
            .map_err(|e| {
                if let StoreError::AlreadyExists(_) = e {
                    tracing::info!("fail to add flag {}: {}", flag.name, e);
                }
                e
            })?;

        self.cascade(CascadeOperation::Set, &environment_ids, &flag.name, Some(&rule))
            .await?;

        Ok(flag)
    }

    /// Patches the project's copy only. Environments keep their current value.
    #[instrument(skip_all, fields(project = %project_name, flag = %flag_name))]
    pub async fn patch_flag(
        &self,
        project_name: &str,
        flag_name: &str,
        patch: &FlagRulePatch,
    ) -> Result<Flag, FlagError> {
        let rule = self
            .store
            .patch_project_flag(project_name, flag_name, patch)
            .await?;
        Ok(Flag::new(flag_name, rule))
    }

    #[instrument(skip_all, fields(project = %project_name, flag = %flag_name))]
    pub async fn remove_flag(&self, project_name: &str, flag_name: &str) -> Result<(), FlagError> {
        let environment_ids = self
            .store
            .remove_project_flag(project_name, flag_name)
            .await?;

        self.cascade(CascadeOperation::Unset, &environment_ids, flag_name, None)
            .await?;

        Ok(())
    }

    /// Re-applies the project's current state of one flag to all of its
    /// environments: written if the project has it, removed otherwise.
    #[instrument(skip_all, fields(project = %project_name, flag = %flag_name))]
    pub async fn resync_flag(
        &self,
        project_name: &str,
        flag_name: &str,
    ) -> Result<CascadeReport, FlagError> {
        let project = self.store.get_project(project_name).await?;
        let rule = project.flags.get(flag_name);
        let operation = match rule {
            Some(_) => CascadeOperation::Set,
            None => CascadeOperation::Unset,
        };

        let environments = self
            .cascade(operation, &project.environment_ids, flag_name, rule)
            .await?;

        Ok(CascadeReport {
            flag: flag_name.to_string(),
            operation,
            environments,
        })
    }

    /// Patches a flag on one environment, leaving the project and siblings alone.
    #[instrument(skip_all, fields(environment_id = %environment_id, flag = %flag_name))]
    pub async fn patch_environment_flag(
        &self,
        environment_id: &str,
        flag_name: &str,
        patch: &FlagRulePatch,
    ) -> Result<Flag, FlagError> {
        let rule = self
            .store
            .patch_environment_flag(environment_id, flag_name, patch)
            .await?;
        Ok(Flag::new(flag_name, rule))
    }

    #[instrument(skip_all, fields(environment_id = %environment_id, flag = %flag_name))]
    pub async fn remove_environment_flag(
        &self,
        environment_id: &str,
        flag_name: &str,
    ) -> Result<(), FlagError> {
        self.store
            .remove_environment_flag(environment_id, flag_name)
            .await?;
        Ok(())
    }

    /// Deletes the project document. Its environments are left in place.
    #[instrument(skip_all, fields(project = %project_name))]
    pub async fn delete_project(&self, project_name: &str) -> Result<ProjectDeletion, FlagError> {
        let project = self.store.delete_project(project_name).await?;

        if !project.environment_ids.is_empty() {
            tracing::warn!(
                "project {} deleted, leaving {} environments behind: {:?}",
                project.name,
                project.environment_ids.len(),
                project.environment_ids
            );
        }

        Ok(ProjectDeletion {
            name: project.name,
            orphaned_environment_ids: project.environment_ids,
        })
    }

    /// Deletes an environment and removes it from any project listing it.
    #[instrument(skip_all, fields(environment_id = %environment_id))]
    pub async fn delete_environment(&self, environment_id: &str) -> Result<(), FlagError> {
        self.store.delete_environment(environment_id).await?;

        // The environment is already gone, a dangling id only costs a no-op
        // write on the next cascade.
        if let Err(e) = self.store.detach_environment(environment_id).await {
            tracing::error!(
                "failed to detach deleted environment {} from its project: {}",
                environment_id,
                e
            );
            metrics::counter!(PROJECT_LINK_FAILURES_COUNTER, "operation" => "detach").increment(1);
        }

        Ok(())
    }

    async fn cascade(
        &self,
        operation: CascadeOperation,
        environment_ids: &[String],
        flag_name: &str,
        rule: Option<&FlagRule>,
    ) -> Result<u64, FlagError> {
        if environment_ids.is_empty() {
            return Ok(0);
        }

        let result = match rule {
            Some(rule) => {
                self.store
                    .set_environments_flag(environment_ids, flag_name, rule)
                    .await
            }
            None => {
                self.store
                    .unset_environments_flag(environment_ids, flag_name)
                    .await
            }
        };

        match result {
            Ok(written) => {
                metrics::counter!(CASCADE_ENVIRONMENTS_COUNTER, "operation" => operation.as_str())
                    .increment(written);
                Ok(written)
            }
            Err(e) => {
                tracing::error!(
                    "failed to {} flag {} on {} environments: {}",
                    operation.as_str(),
                    flag_name,
                    environment_ids.len(),
                    e
                );
                metrics::counter!(CASCADE_FAILURES_COUNTER, "operation" => operation.as_str())
                    .increment(1);
                Err(FlagError::PartialCascade(flag_name.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        flags::flag_models::Scalar,
        store::{Entity, MemoryStore},
        test_utils::{insert_project, setup_store},
    };

    fn flag(name: &str, default: bool) -> Flag {
        Flag::new(name, FlagRule::new(None, Scalar::Bool(default)))
    }

    #[tokio::test]
    async fn test_new_environment_copies_project_flags() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        manager.add_flag(&project.name, flag("f1_flag", false)).await.unwrap();

        let environment = manager
            .create_environment(&project.name, "staging")
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&environment.flags).unwrap(),
            json!({"f1_flag": {"rules": null, "default": false}})
        );
        let project = store.get_project(&project.name).await.unwrap();
        assert_eq!(project.environment_ids, vec![environment.id]);
    }

    #[tokio::test]
    async fn test_environment_flags_are_a_copy() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        manager.add_flag(&project.name, flag("f1_flag", false)).await.unwrap();
        let environment = manager
            .create_environment(&project.name, "staging")
            .await
            .unwrap();

        let patch = FlagRulePatch {
            rules: None,
            default: Some(Scalar::Bool(true)),
        };
        manager
            .patch_environment_flag(&environment.id, "f1_flag", &patch)
            .await
            .unwrap();

        let project = store.get_project(&project.name).await.unwrap();
        assert_eq!(project.flags["f1_flag"].default, Scalar::Bool(false));
    }

    #[tokio::test]
    async fn test_add_cascades_and_patch_does_not() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        let dev = manager.create_environment(&project.name, "dev").await.unwrap();
        let prod = manager.create_environment(&project.name, "prod").await.unwrap();

        manager.add_flag(&project.name, flag("f2_flag", false)).await.unwrap();

        for id in [&dev.id, &prod.id] {
            let environment = store.get_environment(id).await.unwrap();
            assert_eq!(environment.flags["f2_flag"], FlagRule::new(None, Scalar::Bool(false)));
        }

        let patch = FlagRulePatch {
            rules: None,
            default: Some(Scalar::Bool(true)),
        };
        let patched = manager
            .patch_flag(&project.name, "f2_flag", &patch)
            .await
            .unwrap();
        assert_eq!(patched.default, Scalar::Bool(true));

        for id in [&dev.id, &prod.id] {
            let environment = store.get_environment(id).await.unwrap();
            assert_eq!(environment.flags["f2_flag"].default, Scalar::Bool(false));
        }
    }

    #[tokio::test]
    async fn test_add_overwrites_environment_overrides() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        let dev = manager.create_environment(&project.name, "dev").await.unwrap();
        store
            .set_environments_flag(
                &[dev.id.clone()],
                "shared",
                &FlagRule::new(None, Scalar::from("local")),
            )
            .await
            .unwrap();

        manager.add_flag(&project.name, flag("shared", true)).await.unwrap();

        let dev = store.get_environment(&dev.id).await.unwrap();
        assert_eq!(dev.flags["shared"].default, Scalar::Bool(true));
    }

    #[tokio::test]
    async fn test_duplicate_flag_is_rejected() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        manager.add_flag(&project.name, flag("f1_flag", false)).await.unwrap();

        let err = manager
            .add_flag(&project.name, flag("f1_flag", true))
            .await
            .unwrap_err();
        assert!(matches!(err, FlagError::AlreadyExists(Entity::Flag)));
    }

    #[tokio::test]
    async fn test_remove_cascades() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        manager.add_flag(&project.name, flag("f1_flag", false)).await.unwrap();
        let dev = manager.create_environment(&project.name, "dev").await.unwrap();
        let prod = manager.create_environment(&project.name, "prod").await.unwrap();

        manager.remove_flag(&project.name, "f1_flag").await.unwrap();

        let project = store.get_project(&project.name).await.unwrap();
        assert!(project.flags.is_empty());
        for id in [&dev.id, &prod.id] {
            assert!(store.get_environment(id).await.unwrap().flags.is_empty());
        }

        // removing again is not an error
        manager.remove_flag(&project.name, "f1_flag").await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_cascade_is_reported_and_resyncable() {
        let store = Arc::new(MemoryStore::new());
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        let dev = manager.create_environment(&project.name, "dev").await.unwrap();

        store.fail_environment_writes(true);
        let err = manager
            .add_flag(&project.name, flag("f1_flag", true))
            .await
            .unwrap_err();
        assert!(matches!(err, FlagError::PartialCascade(ref name) if name == "f1_flag"));

        // the project write went through, the environment write did not
        let project = store.get_project(&project.name).await.unwrap();
        assert!(project.flags.contains_key("f1_flag"));
        assert!(store.get_environment(&dev.id).await.unwrap().flags.is_empty());

        store.fail_environment_writes(false);
        let report = manager.resync_flag(&project.name, "f1_flag").await.unwrap();
        assert_eq!(report.operation, CascadeOperation::Set);
        assert_eq!(report.environments, 1);
        assert!(store
            .get_environment(&dev.id)
            .await
            .unwrap()
            .flags
            .contains_key("f1_flag"));
    }

    #[tokio::test]
    async fn test_resync_removes_flags_missing_from_project() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        let dev = manager.create_environment(&project.name, "dev").await.unwrap();
        store
            .set_environments_flag(
                &[dev.id.clone()],
                "stale",
                &FlagRule::new(None, Scalar::Bool(true)),
            )
            .await
            .unwrap();

        let report = manager.resync_flag(&project.name, "stale").await.unwrap();

        assert_eq!(report.operation, CascadeOperation::Unset);
        assert!(store.get_environment(&dev.id).await.unwrap().flags.is_empty());
    }

    #[tokio::test]
    async fn test_environment_flag_removal_is_local() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        manager.add_flag(&project.name, flag("f1_flag", false)).await.unwrap();
        let dev = manager.create_environment(&project.name, "dev").await.unwrap();
        let prod = manager.create_environment(&project.name, "prod").await.unwrap();

        manager
            .remove_environment_flag(&dev.id, "f1_flag")
            .await
            .unwrap();

        assert!(store.get_environment(&dev.id).await.unwrap().flags.is_empty());
        assert!(store
            .get_environment(&prod.id)
            .await
            .unwrap()
            .flags
            .contains_key("f1_flag"));
        let project = store.get_project(&project.name).await.unwrap();
        assert!(project.flags.contains_key("f1_flag"));
    }

    #[tokio::test]
    async fn test_delete_project_leaves_environments() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        let dev = manager.create_environment(&project.name, "dev").await.unwrap();

        let deletion = manager.delete_project(&project.name).await.unwrap();

        assert_eq!(deletion.orphaned_environment_ids, vec![dev.id.clone()]);
        assert!(store.get_environment(&dev.id).await.is_ok());
        assert!(matches!(
            store.get_project(&project.name).await,
            Err(StoreError::NotFound(Entity::Project))
        ));
    }

    #[tokio::test]
    async fn test_delete_environment_detaches_it() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        let dev = manager.create_environment(&project.name, "dev").await.unwrap();
        let prod = manager.create_environment(&project.name, "prod").await.unwrap();

        manager.delete_environment(&dev.id).await.unwrap();

        let project = store.get_project(&project.name).await.unwrap();
        assert_eq!(project.environment_ids, vec![prod.id]);
        assert!(matches!(
            manager.delete_environment(&dev.id).await,
            Err(FlagError::NotFound(Entity::Environment))
        ));
    }

    #[tokio::test]
    async fn test_failed_attach_removes_the_new_environment() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        store.fail_project_links(true);

        let result = manager.create_environment(&project.name, "staging").await;
        assert!(matches!(result, Err(FlagError::DatabaseUnavailable)));

        store.fail_project_links(false);
        let project = store.get_project(&project.name).await.unwrap();
        assert!(project.environment_ids.is_empty());
        assert_eq!(store.environment_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_detach_still_deletes_the_environment() {
        let store = setup_store();
        let manager = PropagationManager::new(store.clone());
        let project = insert_project(&store).await;
        let environment = manager
            .create_environment(&project.name, "staging")
            .await
            .unwrap();
        store.fail_project_links(true);

        manager.delete_environment(&environment.id).await.unwrap();

        assert!(matches!(
            store.get_environment(&environment.id).await,
            Err(StoreError::NotFound(Entity::Environment))
        ));
        // the stale id stays listed until the next detach
        let project = store.get_project(&project.name).await.unwrap();
        assert_eq!(project.environment_ids, vec![environment.id]);
    }
}
