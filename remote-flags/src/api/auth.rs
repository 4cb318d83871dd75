use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::{
    api::errors::FlagError,
    environments::environment_models::{Environment, KeyScope},
};

/// The key scopes an operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessScope {
    scopes: &'static [KeyScope],
}

impl AccessScope {
    /// Reading raw rules.
    pub const SERVER_SIDE_ONLY: AccessScope = AccessScope {
        scopes: &[KeyScope::ServerSide],
    };
    /// Evaluating flags.
    pub const SERVER_OR_CLIENT_SIDE: AccessScope = AccessScope {
        scopes: &[KeyScope::ServerSide, KeyScope::ClientSide],
    };

    /// Checks the request's bearer key against the environment's key maps.
    ///
    /// Missing, malformed, unknown and out of scope keys all fail the same way.
    pub fn authorize(&self, environment: &Environment, headers: &HeaderMap) -> Result<(), FlagError> {
        let key = bearer_token(headers).ok_or(FlagError::Unauthorized)?;
        if self.permits(environment, key) {
            Ok(())
        } else {
            Err(FlagError::Unauthorized)
        }
    }

    pub fn permits(&self, environment: &Environment, key: &str) -> bool {
        self.scopes
            .iter()
            .any(|scope| environment.keys(*scope).contains_key(key))
    }
}

/// The credentials of an `Authorization: Bearer <key>` header. The scheme is
/// case insensitive.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, credentials) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !credentials.is_empty() {
        Some(credentials)
    } else {
        None
    }
}
