//! Database models for reservations.

use crate::types::{EnvironmentId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database request for creating a new reservation.
///
/// `end_time` is computed by the caller from the requested duration so the
/// same clock reading produces both `start_time` and `end_time`.
#[derive(Debug, Clone)]
pub struct ReservationCreateDBRequest {
    pub environment_id: EnvironmentId,
    pub reserved_by: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub feature: String,
    pub git_branch: Option<String>,
    pub jira_url: Option<String>,
}

/// Database response for a reservation
#[derive(Debug, Clone, FromRow)]
pub struct ReservationDBResponse {
    pub id: ReservationId,
    pub environment_id: EnvironmentId,
    pub reserved_by: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub feature: String,
    pub git_branch: Option<String>,
    pub jira_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ReservationDBResponse {
    /// A reservation is active while its end time is in the future.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.end_time > now
    }
}

/// Result of an atomic reserve attempt.
///
/// Exactly one concurrent caller gets `Created`; everyone else racing for
/// the same environment gets `EnvironmentBusy`.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Created(ReservationDBResponse),
    EnvironmentNotFound,
    EnvironmentBusy,
}
