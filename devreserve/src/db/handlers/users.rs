//! Repository for user accounts.

use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::api::models::users::Role;
use crate::db::errors::Result;
use crate::db::handlers::repository::Repository;
use crate::db::models::users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest};
use crate::types::UserId;

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

/// Filter for listing users
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_username(&mut self, username: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            SELECT id, username, password_hash, role, created_at, last_updated
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user)
    }

    /// Count of admin accounts, used to guard against demoting the last one.
    #[instrument(skip(self), err)]
    pub async fn count_admins(&mut self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM users WHERE role = $1
            "#,
        )
        .bind(Role::Admin)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(count)
    }
}

#[async_trait::async_trait]
impl Repository for Users<'_> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create(&mut self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (id, username, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, password_hash, role, created_at, last_updated
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.username)
        .bind(&request.password_hash)
        .bind(request.role)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: UserId) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            SELECT id, username, password_hash, role, created_at, last_updated
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &UserFilter) -> Result<Vec<UserDBResponse>> {
        let users = sqlx::query_as::<_, UserDBResponse>(
            r#"
            SELECT id, username, password_hash, role, created_at, last_updated
            FROM users
            WHERE ($1::user_role IS NULL OR role = $1)
            ORDER BY created_at
            "#,
        )
        .bind(filter.role)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(users)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: UserId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM users WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: UserId, request: &UserUpdateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            UPDATE users
            SET role = COALESCE($2, role),
                password_hash = COALESCE($3, password_hash),
                last_updated = now()
            WHERE id = $1
            RETURNING id, username, password_hash, role, created_at, last_updated
            "#,
        )
        .bind(id)
        .bind(request.role)
        .bind(&request.password_hash)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }
}
