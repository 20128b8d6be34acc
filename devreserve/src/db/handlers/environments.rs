//! Repository for the environment pool.
//!
//! The status column is a single-row advisory lock: `transition_status` is
//! the conditional primitive that reserve attempts race on, `set_status` is
//! the unconditional convergent write used by release and the sweeper.

use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::api::models::environments::EnvironmentStatus;
use crate::db::errors::Result;
use crate::db::handlers::repository::Repository;
use crate::db::models::environments::{
    EnvironmentCreateDBRequest, EnvironmentDBResponse, EnvironmentUpdateDBRequest, TransitionOutcome,
};
use crate::types::EnvironmentId;

pub struct Environments<'c> {
    db: &'c mut PgConnection,
}

/// Filter for listing environments
#[derive(Debug, Clone, Default)]
pub struct EnvironmentFilter {
    pub status: Option<EnvironmentStatus>,
}

impl<'c> Environments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Conditionally move an environment from `expected` to `next`.
    ///
    /// Applies the transition only if the stored status still equals
    /// `expected`; on a lost race the current status is reported back.
    #[instrument(skip(self), err)]
    pub async fn transition_status(
        &mut self,
        id: EnvironmentId,
        expected: EnvironmentStatus,
        next: EnvironmentStatus,
    ) -> Result<TransitionOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE environments
            SET status = $3, last_updated = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(next)
        .execute(&mut *self.db)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(TransitionOutcome::Applied);
        }

        // Distinguish a lost race from a missing environment
        let current = sqlx::query_scalar::<_, EnvironmentStatus>(
            r#"
            SELECT status FROM environments WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        match current {
            Some(current) => Ok(TransitionOutcome::Conflict { current }),
            None => Ok(TransitionOutcome::NotFound),
        }
    }

    /// Unconditionally set the status. Returns false if the environment
    /// no longer exists, which callers treat as already-converged.
    #[instrument(skip(self), err)]
    pub async fn set_status(&mut self, id: EnvironmentId, next: EnvironmentStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE environments
            SET status = $2, last_updated = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl Repository for Environments<'_> {
    type CreateRequest = EnvironmentCreateDBRequest;
    type UpdateRequest = EnvironmentUpdateDBRequest;
    type Response = EnvironmentDBResponse;
    type Id = EnvironmentId;
    type Filter = EnvironmentFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &EnvironmentCreateDBRequest) -> Result<EnvironmentDBResponse> {
        let environment = sqlx::query_as::<_, EnvironmentDBResponse>(
            r#"
            INSERT INTO environments (id, name, description, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, status, created_by, created_at, last_updated
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.created_by)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(environment)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: EnvironmentId) -> Result<Option<EnvironmentDBResponse>> {
        let environment = sqlx::query_as::<_, EnvironmentDBResponse>(
            r#"
            SELECT id, name, description, status, created_by, created_at, last_updated
            FROM environments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(environment)
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &EnvironmentFilter) -> Result<Vec<EnvironmentDBResponse>> {
        let environments = sqlx::query_as::<_, EnvironmentDBResponse>(
            r#"
            SELECT id, name, description, status, created_by, created_at, last_updated
            FROM environments
            WHERE ($1::environment_status IS NULL OR status = $1)
            ORDER BY name, created_at
            "#,
        )
        .bind(filter.status)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(environments)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: EnvironmentId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM environments WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(
        &mut self,
        id: EnvironmentId,
        request: &EnvironmentUpdateDBRequest,
    ) -> Result<EnvironmentDBResponse> {
        let environment = sqlx::query_as::<_, EnvironmentDBResponse>(
            r#"
            UPDATE environments
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                last_updated = now()
            WHERE id = $1
            RETURNING id, name, description, status, created_by, created_at, last_updated
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(&request.description)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::test_utils::create_test_user;
    use sqlx::PgPool;

    async fn create_environment(pool: &PgPool, name: &str) -> EnvironmentDBResponse {
        let admin = create_test_user(pool, Role::Admin).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Environments::new(&mut conn);
        repo.create(&EnvironmentCreateDBRequest {
            name: name.to_string(),
            description: Some("integration pool".to_string()),
            created_by: admin.id,
        })
        .await
        .unwrap()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_new_environment_starts_free(pool: PgPool) {
        let env = create_environment(&pool, "staging-1").await;
        assert_eq!(env.status, EnvironmentStatus::Free);
        assert_eq!(env.name, "staging-1");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_transition_applies_only_from_expected_status(pool: PgPool) {
        let env = create_environment(&pool, "staging-1").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Environments::new(&mut conn);

        let outcome = repo
            .transition_status(env.id, EnvironmentStatus::Free, EnvironmentStatus::Reserved)
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Applied);

        // A second attempt from FREE must lose and report the real status
        let outcome = repo
            .transition_status(env.id, EnvironmentStatus::Free, EnvironmentStatus::Reserved)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Conflict {
                current: EnvironmentStatus::Reserved
            }
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_transition_reports_missing_environment(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Environments::new(&mut conn);

        let outcome = repo
            .transition_status(Uuid::new_v4(), EnvironmentStatus::Free, EnvironmentStatus::Reserved)
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::NotFound);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_set_status_is_unconditional(pool: PgPool) {
        let env = create_environment(&pool, "staging-1").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Environments::new(&mut conn);

        // FREE -> FREE is fine, so is repeating it
        assert!(repo.set_status(env.id, EnvironmentStatus::Free).await.unwrap());
        assert!(repo.set_status(env.id, EnvironmentStatus::Free).await.unwrap());

        assert!(!repo.set_status(Uuid::new_v4(), EnvironmentStatus::Free).await.unwrap());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_filters_by_status(pool: PgPool) {
        let env_a = create_environment(&pool, "staging-a").await;
        let _env_b = create_environment(&pool, "staging-b").await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Environments::new(&mut conn);
        repo.set_status(env_a.id, EnvironmentStatus::Reserved).await.unwrap();

        let free = repo
            .list(&EnvironmentFilter {
                status: Some(EnvironmentStatus::Free),
            })
            .await
            .unwrap();
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].name, "staging-b");

        let all = repo.list(&EnvironmentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_metadata_preserves_status(pool: PgPool) {
        let env = create_environment(&pool, "staging-1").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Environments::new(&mut conn);

        repo.set_status(env.id, EnvironmentStatus::Reserved).await.unwrap();

        let updated = repo
            .update(
                env.id,
                &EnvironmentUpdateDBRequest {
                    name: Some("staging-renamed".to_string()),
                    description: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "staging-renamed");
        assert_eq!(updated.description.as_deref(), Some("integration pool"));
        assert_eq!(updated.status, EnvironmentStatus::Reserved);
    }
}
