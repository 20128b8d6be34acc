//! Database models for environments.

use crate::api::models::environments::{EnvironmentCreate, EnvironmentStatus, EnvironmentUpdate};
use crate::types::{EnvironmentId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database request for creating a new environment
#[derive(Debug, Clone)]
pub struct EnvironmentCreateDBRequest {
    pub name: String,
    pub description: Option<String>,
    pub created_by: UserId,
}

impl EnvironmentCreateDBRequest {
    pub fn new(api: EnvironmentCreate, created_by: UserId) -> Self {
        Self {
            name: api.name,
            description: api.description,
            created_by,
        }
    }
}

/// Database request for updating an environment's metadata
#[derive(Debug, Clone, Default)]
pub struct EnvironmentUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl From<EnvironmentUpdate> for EnvironmentUpdateDBRequest {
    fn from(api: EnvironmentUpdate) -> Self {
        Self {
            name: api.name,
            description: api.description,
        }
    }
}

/// Database response for an environment
#[derive(Debug, Clone, FromRow)]
pub struct EnvironmentDBResponse {
    pub id: EnvironmentId,
    pub name: String,
    pub description: Option<String>,
    pub status: EnvironmentStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Result of a conditional status transition.
///
/// The caller supplies the status it expects the environment to currently
/// have; `Conflict` reports what was actually there so handlers can build
/// a useful error without a second read.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied,
    Conflict { current: EnvironmentStatus },
    NotFound,
}
