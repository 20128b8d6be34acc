//! API models for reservations.

use crate::db::models::reservations::ReservationDBResponse;
use crate::types::{EnvironmentId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Shortest hold a caller may request, in minutes.
pub const MIN_DURATION_MINS: i64 = 10;
/// Longest hold a caller may request, in minutes (72 hours).
pub const MAX_DURATION_MINS: i64 = 4320;

/// Request to reserve an environment
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReservationCreate {
    #[schema(value_type = uuid::Uuid)]
    pub environment_id: EnvironmentId,
    /// Requested hold length in minutes, 10 to 4320 inclusive
    pub duration_mins: i64,
    /// Short description of the work the environment is held for
    pub feature: String,
    pub git_branch: Option<String>,
    pub jira_url: Option<String>,
}

impl ReservationCreate {
    /// Validate the request fields, in the order clients expect the
    /// failures to be reported.
    pub fn validate(&self) -> Result<(), String> {
        if self.duration_mins < MIN_DURATION_MINS {
            return Err(format!(
                "Duration must be at least {MIN_DURATION_MINS} minutes"
            ));
        }
        if self.duration_mins > MAX_DURATION_MINS {
            return Err(format!(
                "Duration must be at most {MAX_DURATION_MINS} minutes (72 hours)"
            ));
        }
        if self.feature.trim().is_empty() {
            return Err("Feature description is required".to_string());
        }
        Ok(())
    }
}

/// Reservation as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReservationResponse {
    #[schema(value_type = uuid::Uuid)]
    pub id: ReservationId,
    #[schema(value_type = uuid::Uuid)]
    pub environment_id: EnvironmentId,
    #[schema(value_type = uuid::Uuid)]
    pub reserved_by: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub feature: String,
    pub git_branch: Option<String>,
    pub jira_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl From<ReservationDBResponse> for ReservationResponse {
    fn from(db: ReservationDBResponse) -> Self {
        Self {
            id: db.id,
            environment_id: db.environment_id,
            reserved_by: db.reserved_by,
            start_time: db.start_time,
            end_time: db.end_time,
            feature: db.feature,
            git_branch: db.git_branch,
            jira_url: db.jira_url,
            created_at: db.created_at,
            last_updated: db.last_updated,
        }
    }
}
