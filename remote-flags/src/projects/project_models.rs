use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flags::flag_models::FlagMap;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub flags: FlagMap,
    /// Environments created under this project, in creation order. Never
    /// holds the same id twice.
    pub environment_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returned when a project is deleted. Environments outlive their project,
/// so their ids are handed back for the caller to clean up.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProjectDeletion {
    pub name: String,
    pub orphaned_environment_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeOperation {
    Set,
    Unset,
}

impl CascadeOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            CascadeOperation::Set => "set",
            CascadeOperation::Unset => "unset",
        }
    }
}

/// Outcome of pushing one project flag onto the project's environments.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CascadeReport {
    pub flag: String,
    pub operation: CascadeOperation,
    pub environments: u64,
}
