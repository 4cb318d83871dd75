use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    types::Json,
};
use tracing::instrument;

use crate::{
    environments::environment_models::{Environment, KeyDescriptor, KeyMap, KeyScope},
    flags::flag_models::{FlagMap, FlagRule, FlagRulePatch},
    projects::project_models::Project,
    store::{Entity, Page, Store, StoreError},
};

const PROJECT_COLUMNS: &str = "id, name, flags, environment_ids, created_at, updated_at";
const ENVIRONMENT_COLUMNS: &str =
    "id, name, flags, server_side_keys, client_side_keys, created_at, updated_at";

// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    flags: Json<FlagMap>,
    environment_ids: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            flags: row.flags.0,
            environment_ids: row.environment_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EnvironmentRow {
    id: String,
    name: String,
    flags: Json<FlagMap>,
    server_side_keys: Json<KeyMap>,
    client_side_keys: Json<KeyMap>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EnvironmentRow> for Environment {
    fn from(row: EnvironmentRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            flags: row.flags.0,
            server_side_keys: row.server_side_keys.0,
            client_side_keys: row.client_side_keys.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

/// Projects and environments as rows in Postgres, with flag and key maps
/// held in JSONB columns.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, applying any pending migrations.
    pub async fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    async fn project_exists(&self, name: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM projects WHERE name = $1)")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn environment_exists(&self, id: &str) -> Result<bool, StoreError> {
        let exists =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM environments WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn list_projects(&self, page: Page) -> Result<Vec<Project>, StoreError> {
        let query =
            format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY name LIMIT $1 OFFSET $2");
        let rows: Vec<ProjectRow> = sqlx::query_as(&query)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Project::from).collect())
    }

    #[instrument(skip_all, fields(project = %project.name))]
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO projects ({PROJECT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        );
        sqlx::query(&query)
            .bind(&project.id)
            .bind(&project.name)
            .bind(Json(&project.flags))
            .bind(&project.environment_ids)
            .bind(project.created_at)
            .bind(project.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists(Entity::Project)
                } else {
                    StoreError::Database(e)
                }
            })?;

        Ok(())
    }

    async fn get_project(&self, name: &str) -> Result<Project, StoreError> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE name = $1");
        let row: Option<ProjectRow> = sqlx::query_as(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Project::from)
            .ok_or(StoreError::NotFound(Entity::Project))
    }

    #[instrument(skip_all, fields(project = %name))]
    async fn delete_project(&self, name: &str) -> Result<Project, StoreError> {
        let query = format!("DELETE FROM projects WHERE name = $1 RETURNING {PROJECT_COLUMNS}");
        let row: Option<ProjectRow> = sqlx::query_as(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Project::from)
            .ok_or(StoreError::NotFound(Entity::Project))
    }

    #[instrument(skip_all, fields(project = %project, environment_id = %environment_id))]
    async fn attach_environment(
        &self,
        project: &str,
        environment_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
UPDATE projects
SET
    environment_ids = CASE
        WHEN $2::text = ANY(environment_ids) THEN environment_ids
        ELSE array_append(environment_ids, $2::text)
    END,
    updated_at = NOW()
WHERE name = $1
            "#,
        )
        .bind(project)
        .bind(environment_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::Project));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(environment_id = %environment_id))]
    async fn detach_environment(&self, environment_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE projects
SET
    environment_ids = array_remove(environment_ids, $1::text),
    updated_at = NOW()
WHERE $1::text = ANY(environment_ids)
            "#,
        )
        .bind(environment_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(project = %project, flag = %flag_name))]
    async fn insert_project_flag(
        &self,
        project: &str,
        flag_name: &str,
        rule: &FlagRule,
    ) -> Result<Vec<String>, StoreError> {
        let environment_ids: Option<Vec<String>> = sqlx::query_scalar(
            r#"
UPDATE projects
SET
    flags = flags || jsonb_build_object($2::text, $3::jsonb),
    updated_at = NOW()
WHERE name = $1 AND NOT (flags ? $2::text)
RETURNING environment_ids
            "#,
        )
        .bind(project)
        .bind(flag_name)
        .bind(Json(rule))
        .fetch_optional(&self.pool)
        .await?;

        match environment_ids {
            Some(ids) => Ok(ids),
            None if self.project_exists(project).await? => {
                Err(StoreError::AlreadyExists(Entity::Flag))
            }
            None => Err(StoreError::NotFound(Entity::Project)),
        }
    }

    #[instrument(skip_all, fields(project = %project, flag = %flag_name))]
    async fn patch_project_flag(
        &self,
        project: &str,
        flag_name: &str,
        patch: &FlagRulePatch,
    ) -> Result<FlagRule, StoreError> {
        let patched: Option<Json<FlagRule>> = sqlx::query_scalar(
            r#"
UPDATE projects
SET
    flags = jsonb_set(flags, ARRAY[$2::text], (flags -> $2::text) || $3::jsonb),
    updated_at = NOW()
WHERE name = $1 AND flags ? $2::text
RETURNING flags -> $2::text
            "#,
        )
        .bind(project)
        .bind(flag_name)
        .bind(Json(patch))
        .fetch_optional(&self.pool)
        .await?;

        match patched {
            Some(Json(rule)) => Ok(rule),
            None if self.project_exists(project).await? => Err(StoreError::NotFound(Entity::Flag)),
            None => Err(StoreError::NotFound(Entity::Project)),
        }
    }

    #[instrument(skip_all, fields(project = %project, flag = %flag_name))]
    async fn remove_project_flag(
        &self,
        project: &str,
        flag_name: &str,
    ) -> Result<Vec<String>, StoreError> {
        let environment_ids: Option<Vec<String>> = sqlx::query_scalar(
            r#"
UPDATE projects
SET
    flags = flags - $2::text,
    updated_at = NOW()
WHERE name = $1
RETURNING environment_ids
            "#,
        )
        .bind(project)
        .bind(flag_name)
        .fetch_optional(&self.pool)
        .await?;

        environment_ids.ok_or(StoreError::NotFound(Entity::Project))
    }

    #[instrument(skip_all, fields(environment_id = %environment.id))]
    async fn insert_environment(&self, environment: &Environment) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO environments ({ENVIRONMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        sqlx::query(&query)
            .bind(&environment.id)
            .bind(&environment.name)
            .bind(Json(&environment.flags))
            .bind(Json(&environment.server_side_keys))
            .bind(Json(&environment.client_side_keys))
            .bind(environment.created_at)
            .bind(environment.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists(Entity::Environment)
                } else {
                    StoreError::Database(e)
                }
            })?;

        Ok(())
    }

    async fn get_environment(&self, id: &str) -> Result<Environment, StoreError> {
        let query = format!("SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE id = $1");
        let row: Option<EnvironmentRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Environment::from)
            .ok_or(StoreError::NotFound(Entity::Environment))
    }

    #[instrument(skip_all, fields(environment_id = %id))]
    async fn rename_environment(&self, id: &str, name: &str) -> Result<Environment, StoreError> {
        let query = format!(
            "UPDATE environments SET name = $2, updated_at = NOW() WHERE id = $1 RETURNING {ENVIRONMENT_COLUMNS}"
        );
        let row: Option<EnvironmentRow> = sqlx::query_as(&query)
            .bind(id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Environment::from)
            .ok_or(StoreError::NotFound(Entity::Environment))
    }

    #[instrument(skip_all, fields(environment_id = %id))]
    async fn delete_environment(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM environments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::Environment));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(flag = %flag_name, environments = ids.len()))]
    async fn set_environments_flag(
        &self,
        ids: &[String],
        flag_name: &str,
        rule: &FlagRule,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE environments
SET
    flags = flags || jsonb_build_object($2::text, $3::jsonb),
    updated_at = NOW()
WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(flag_name)
        .bind(Json(rule))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(flag = %flag_name, environments = ids.len()))]
    async fn unset_environments_flag(
        &self,
        ids: &[String],
        flag_name: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE environments
SET
    flags = flags - $2::text,
    updated_at = NOW()
WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(flag_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(environment_id = %id, flag = %flag_name))]
    async fn patch_environment_flag(
        &self,
        id: &str,
        flag_name: &str,
        patch: &FlagRulePatch,
    ) -> Result<FlagRule, StoreError> {
        let patched: Option<Json<FlagRule>> = sqlx::query_scalar(
            r#"
UPDATE environments
SET
    flags = jsonb_set(flags, ARRAY[$2::text], (flags -> $2::text) || $3::jsonb),
    updated_at = NOW()
WHERE id = $1 AND flags ? $2::text
RETURNING flags -> $2::text
            "#,
        )
        .bind(id)
        .bind(flag_name)
        .bind(Json(patch))
        .fetch_optional(&self.pool)
        .await?;

        match patched {
            Some(Json(rule)) => Ok(rule),
            None if self.environment_exists(id).await? => Err(StoreError::NotFound(Entity::Flag)),
            None => Err(StoreError::NotFound(Entity::Environment)),
        }
    }

    #[instrument(skip_all, fields(environment_id = %id, flag = %flag_name))]
    async fn remove_environment_flag(&self, id: &str, flag_name: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE environments SET flags = flags - $2::text, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(flag_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::Environment));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(environment_id = %id))]
    async fn insert_api_key(
        &self,
        id: &str,
        scope: KeyScope,
        key: &str,
        descriptor: &KeyDescriptor,
    ) -> Result<(), StoreError> {
        let query = format!(
            "UPDATE environments SET {0} = {0} || jsonb_build_object($2::text, $3::jsonb), updated_at = NOW() WHERE id = $1",
            scope.column()
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(key)
            .bind(Json(descriptor))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::Environment));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(environment_id = %id))]
    async fn delete_api_key(
        &self,
        id: &str,
        scope: KeyScope,
        key: &str,
    ) -> Result<(), StoreError> {
        let query = format!(
            "UPDATE environments SET {0} = {0} - $2::text, updated_at = NOW() WHERE id = $1",
            scope.column()
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::Environment));
        }
        Ok(())
    }
}
