//! Administrative endpoints: projects, environments, flags and API keys.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::instrument;

use crate::{
    api::errors::FlagError,
    environments::environment_models::{ApiKey, EnvironmentResponse, KeyScope},
    flags::flag_models::{Flag, FlagRulePatch},
    projects::project_models::{CascadeReport, Project, ProjectDeletion},
    router,
    store::Page,
    validation::{ENVIRONMENT_NAME, FLAG_NAME, KEY_NAME, PROJECT_NAME},
};

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page_size: Option<u32>,
    pub page_start: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct NewName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Rename {
    name: Option<String>,
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, FlagError> {
    Ok(serde_json::from_slice(body)?)
}

pub async fn list_projects(
    State(state): State<router::State>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<Project>>, FlagError> {
    let page = Page {
        offset: params.page_start.unwrap_or(0),
        limit: params.page_size.unwrap_or(state.default_page_size),
    };
    Ok(Json(state.store.list_projects(page).await?))
}

#[instrument(skip_all)]
pub async fn create_project(
    State(state): State<router::State>,
    body: Bytes,
) -> Result<(StatusCode, Json<Project>), FlagError> {
    let NewName { name } = parse_body(&body)?;
    PROJECT_NAME.check(&name)?;

    let project = Project::new(name);
    state.store.insert_project(&project).await?;
    tracing::info!("created project {}", project.name);

    Ok((StatusCode::CREATED, Json(project)))
}

#[instrument(skip_all, fields(project = %project_name))]
pub async fn get_project(
    State(state): State<router::State>,
    Path(project_name): Path<String>,
) -> Result<Json<Project>, FlagError> {
    Ok(Json(state.store.get_project(&project_name).await?))
}

#[instrument(skip_all, fields(project = %project_name))]
pub async fn delete_project(
    State(state): State<router::State>,
    Path(project_name): Path<String>,
) -> Result<Json<ProjectDeletion>, FlagError> {
    Ok(Json(state.propagation.delete_project(&project_name).await?))
}

#[instrument(skip_all, fields(project = %project_name))]
pub async fn create_environment(
    State(state): State<router::State>,
    Path(project_name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<EnvironmentResponse>), FlagError> {
    let NewName { name } = parse_body(&body)?;
    ENVIRONMENT_NAME.check(&name)?;

    let environment = state
        .propagation
        .create_environment(&project_name, &name)
        .await?;

    Ok((StatusCode::CREATED, Json(environment.into())))
}

#[instrument(skip_all, fields(project = %project_name))]
pub async fn add_flag(
    State(state): State<router::State>,
    Path(project_name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Flag>), FlagError> {
    let flag: Flag = parse_body(&body)?;
    FLAG_NAME.check(&flag.name)?;

    let flag = state.propagation.add_flag(&project_name, flag).await?;
    Ok((StatusCode::CREATED, Json(flag)))
}

#[instrument(skip_all, fields(project = %project_name, flag = %flag_name))]
pub async fn patch_flag(
    State(state): State<router::State>,
    Path((project_name, flag_name)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<Flag>), FlagError> {
    let patch: FlagRulePatch = parse_body(&body)?;
    let flag = state
        .propagation
        .patch_flag(&project_name, &flag_name, &patch)
        .await?;
    Ok((StatusCode::CREATED, Json(flag)))
}

#[instrument(skip_all, fields(project = %project_name, flag = %flag_name))]
pub async fn remove_flag(
    State(state): State<router::State>,
    Path((project_name, flag_name)): Path<(String, String)>,
) -> Result<StatusCode, FlagError> {
    state
        .propagation
        .remove_flag(&project_name, &flag_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, fields(project = %project_name, flag = %flag_name))]
pub async fn resync_flag(
    State(state): State<router::State>,
    Path((project_name, flag_name)): Path<(String, String)>,
) -> Result<Json<CascadeReport>, FlagError> {
    let report = state
        .propagation
        .resync_flag(&project_name, &flag_name)
        .await?;
    Ok(Json(report))
}

#[instrument(skip_all, fields(environment_id = %environment_id))]
pub async fn get_environment(
    State(state): State<router::State>,
    Path(environment_id): Path<String>,
) -> Result<Json<EnvironmentResponse>, FlagError> {
    let environment = state.store.get_environment(&environment_id).await?;
    Ok(Json(environment.into()))
}

#[instrument(skip_all, fields(environment_id = %environment_id))]
pub async fn rename_environment(
    State(state): State<router::State>,
    Path(environment_id): Path<String>,
    body: Bytes,
) -> Result<Json<EnvironmentResponse>, FlagError> {
    let name = if body.is_empty() {
        None
    } else {
        parse_body::<Rename>(&body)?.name
    };
    let name = name.ok_or(FlagError::MissingName)?;
    ENVIRONMENT_NAME.check(&name)?;

    let environment = state
        .store
        .rename_environment(&environment_id, &name)
        .await?;
    Ok(Json(environment.into()))
}

#[instrument(skip_all, fields(environment_id = %environment_id))]
pub async fn delete_environment(
    State(state): State<router::State>,
    Path(environment_id): Path<String>,
) -> Result<StatusCode, FlagError> {
    state.propagation.delete_environment(&environment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, fields(environment_id = %environment_id, flag = %flag_name))]
pub async fn patch_environment_flag(
    State(state): State<router::State>,
    Path((environment_id, flag_name)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<Flag>), FlagError> {
    let patch: FlagRulePatch = parse_body(&body)?;
    let flag = state
        .propagation
        .patch_environment_flag(&environment_id, &flag_name, &patch)
        .await?;
    Ok((StatusCode::CREATED, Json(flag)))
}

#[instrument(skip_all, fields(environment_id = %environment_id, flag = %flag_name))]
pub async fn remove_environment_flag(
    State(state): State<router::State>,
    Path((environment_id, flag_name)): Path<(String, String)>,
) -> Result<StatusCode, FlagError> {
    state
        .propagation
        .remove_environment_flag(&environment_id, &flag_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_server_side_key(
    state: State<router::State>,
    path: Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiKey>), FlagError> {
    create_key(state, path, body, KeyScope::ServerSide).await
}

pub async fn create_client_side_key(
    state: State<router::State>,
    path: Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiKey>), FlagError> {
    create_key(state, path, body, KeyScope::ClientSide).await
}

pub async fn delete_server_side_key(
    state: State<router::State>,
    path: Path<(String, String)>,
) -> Result<StatusCode, FlagError> {
    delete_key(state, path, KeyScope::ServerSide).await
}

pub async fn delete_client_side_key(
    state: State<router::State>,
    path: Path<(String, String)>,
) -> Result<StatusCode, FlagError> {
    delete_key(state, path, KeyScope::ClientSide).await
}

#[instrument(skip_all, fields(environment_id = %environment_id, scope = scope.column()))]
async fn create_key(
    State(state): State<router::State>,
    Path(environment_id): Path<String>,
    body: Bytes,
    scope: KeyScope,
) -> Result<(StatusCode, Json<ApiKey>), FlagError> {
    let NewName { name } = parse_body(&body)?;
    KEY_NAME.check(&name)?;

    let key = ApiKey::generate(name);
    state
        .store
        .insert_api_key(&environment_id, scope, &key.key, &key.descriptor())
        .await?;
    tracing::info!("created api key {}", key.name);

    Ok((StatusCode::CREATED, Json(key)))
}

async fn delete_key(
    State(state): State<router::State>,
    Path((environment_id, key)): Path<(String, String)>,
    scope: KeyScope,
) -> Result<StatusCode, FlagError> {
    state
        .store
        .delete_api_key(&environment_id, scope, &key)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
