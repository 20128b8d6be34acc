//! Database models for users.

use crate::api::models::users::{Role, UserCreate};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub username: String,
    pub password_hash: Option<String>,
    pub role: Role,
}

impl From<UserCreate> for UserCreateDBRequest {
    fn from(api: UserCreate) -> Self {
        Self {
            username: api.username,
            password_hash: None, // Hashing happens in the handler, not the conversion
            role: Role::User,    // API users cannot create admins
        }
    }
}

/// Database request for updating a user
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub role: Option<Role>,
    pub password_hash: Option<String>,
}

/// Database response for a user
#[derive(Debug, Clone, FromRow)]
pub struct UserDBResponse {
    pub id: UserId,
    pub username: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl UserDBResponse {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
