//! API models for environments.

use crate::api::models::reservations::ReservationResponse;
use crate::db::models::environments::EnvironmentDBResponse;
use crate::types::{EnvironmentId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Occupancy state of an environment.
///
/// This is an advisory projection of the reservation ledger: the ledger is
/// the source of truth for who holds what, the status column exists so that
/// reserve attempts can race on a single conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "environment_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EnvironmentStatus {
    Free,
    Reserved,
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentStatus::Free => write!(f, "FREE"),
            EnvironmentStatus::Reserved => write!(f, "RESERVED"),
        }
    }
}

/// Request to create an environment
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentCreate {
    pub name: String,
    pub description: Option<String>,
}

/// Request to update an environment's metadata. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Environment as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentResponse {
    #[schema(value_type = uuid::Uuid)]
    pub id: EnvironmentId,
    pub name: String,
    pub description: Option<String>,
    pub status: EnvironmentStatus,
    #[schema(value_type = uuid::Uuid)]
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl From<EnvironmentDBResponse> for EnvironmentResponse {
    fn from(db: EnvironmentDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            description: db.description,
            status: db.status,
            created_by: db.created_by,
            created_at: db.created_at,
            last_updated: db.last_updated,
        }
    }
}

/// Environment together with its currently active reservation, if any.
///
/// Used by the list endpoint so clients can render the pool in one call.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentWithReservation {
    #[serde(flatten)]
    pub environment: EnvironmentResponse,
    pub active_reservation: Option<ReservationResponse>,
}
