use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flags::flag_models::FlagMap;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyDescriptor {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Keys keyed by the credential itself.
pub type KeyMap = BTreeMap<String, KeyDescriptor>;

/// The two API key namespaces of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    ServerSide,
    ClientSide,
}

impl KeyScope {
    /// Column holding this scope's key map.
    pub fn column(self) -> &'static str {
        match self {
            KeyScope::ServerSide => "server_side_keys",
            KeyScope::ClientSide => "client_side_keys",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    pub flags: FlagMap,
    pub server_side_keys: KeyMap,
    pub client_side_keys: KeyMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An environment as returned by the admin API. Keys are never listed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EnvironmentResponse {
    pub id: String,
    pub name: String,
    pub flags: FlagMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Environment> for EnvironmentResponse {
    fn from(environment: Environment) -> Self {
        Self {
            id: environment.id,
            name: environment.name,
            flags: environment.flags,
            created_at: environment.created_at,
            updated_at: environment.updated_at,
        }
    }
}

/// A newly created API key. The only time the credential is handed out.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
