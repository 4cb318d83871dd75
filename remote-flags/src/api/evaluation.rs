//! Evaluation endpoints, authenticated with an environment API key.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use serde_json::Value;
use tracing::instrument;

use crate::{
    api::{auth::AccessScope, errors::FlagError},
    environments::environment_models::Environment,
    flags::{flag_evaluation::FlagEvaluationResult, flag_models::FlagMap},
    router,
    store::Entity,
};

/// An empty body is an empty context. Anything else must be JSON.
fn parse_context(body: &Bytes) -> Result<Value, FlagError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body)?)
}

/// Resolves the environment first, so an unknown id is a 404 whatever the key.
async fn authorized_environment(
    state: &router::State,
    environment_id: &str,
    headers: &HeaderMap,
    scope: AccessScope,
) -> Result<Environment, FlagError> {
    let environment = state.store.get_environment(environment_id).await?;
    scope.authorize(&environment, headers)?;
    Ok(environment)
}

#[instrument(skip_all, fields(environment_id = %environment_id))]
pub async fn get_rules(
    State(state): State<router::State>,
    Path(environment_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FlagMap>, FlagError> {
    let environment =
        authorized_environment(&state, &environment_id, &headers, AccessScope::SERVER_SIDE_ONLY)
            .await?;
    Ok(Json(environment.flags))
}

#[instrument(skip_all, fields(environment_id = %environment_id))]
pub async fn evaluate_flags(
    State(state): State<router::State>,
    Path(environment_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BTreeMap<String, FlagEvaluationResult>>, FlagError> {
    let environment = authorized_environment(
        &state,
        &environment_id,
        &headers,
        AccessScope::SERVER_OR_CLIENT_SIDE,
    )
    .await?;
    let context = parse_context(&body)?;

    Ok(Json(environment.evaluate_flags(&context)))
}

#[instrument(skip_all, fields(environment_id = %environment_id, flag = %flag_name))]
pub async fn evaluate_flag(
    State(state): State<router::State>,
    Path((environment_id, flag_name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<FlagEvaluationResult>, FlagError> {
    evaluate_named_flag(&state, &environment_id, &flag_name, &headers, &body).await
}

/// `POST /:environment_id/get_rules` evaluates a flag named `get_rules`; only
/// `GET` on that path reads the raw rules.
#[instrument(skip_all, fields(environment_id = %environment_id, flag = GET_RULES))]
pub async fn evaluate_get_rules_flag(
    State(state): State<router::State>,
    Path(environment_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<FlagEvaluationResult>, FlagError> {
    evaluate_named_flag(&state, &environment_id, GET_RULES, &headers, &body).await
}

const GET_RULES: &str = "get_rules";

async fn evaluate_named_flag(
    state: &router::State,
    environment_id: &str,
    flag_name: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Json<FlagEvaluationResult>, FlagError> {
    let environment = authorized_environment(
        state,
        environment_id,
        headers,
        AccessScope::SERVER_OR_CLIENT_SIDE,
    )
    .await?;
    let context = parse_context(body)?;

    environment
        .evaluate_flag(flag_name, &context)
        .map(Json)
        .ok_or(FlagError::NotFound(Entity::Flag))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_context() {
        assert_eq!(parse_context(&Bytes::new()).unwrap(), Value::Null);
        assert_eq!(parse_context(&Bytes::from_static(b" \n")).unwrap(), Value::Null);
        assert_eq!(
            parse_context(&Bytes::from_static(br#"{"temp": 5}"#)).unwrap(),
            json!({"temp": 5})
        );
        assert!(matches!(
            parse_context(&Bytes::from_static(b"temp=5")),
            Err(FlagError::RequestParsingError(_))
        ));
    }
}
