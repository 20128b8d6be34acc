//! Repository for the reservation ledger.
//!
//! Plain row operations live on the [`Repository`]-style inherent methods;
//! `reserve` and `release` are the two composite operations that pair a
//! ledger write with the matching environment status change inside one
//! transaction.

use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::api::models::environments::EnvironmentStatus;
use crate::db::errors::Result;
use crate::db::handlers::environments::Environments;
use crate::db::models::environments::TransitionOutcome;
use crate::db::models::reservations::{
    ReservationCreateDBRequest, ReservationDBResponse, ReserveOutcome,
};
use crate::types::{EnvironmentId, ReservationId};

pub struct Reservations<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Reservations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: ReservationId) -> Result<Option<ReservationDBResponse>> {
        let reservation = sqlx::query_as::<_, ReservationDBResponse>(
            r#"
            SELECT id, environment_id, reserved_by, start_time, end_time,
                   feature, git_branch, jira_url, created_at, last_updated
            FROM reservations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(reservation)
    }

    /// Insert a ledger row without touching the environment. Availability
    /// is the reserve transaction's concern, not the insert's.
    #[instrument(skip(self, request), fields(environment_id = %request.environment_id), err)]
    pub async fn insert(&mut self, request: &ReservationCreateDBRequest) -> Result<ReservationDBResponse> {
        insert_inner(&mut *self.db, request).await
    }

    /// All reservations whose end time is still in the future.
    #[instrument(skip(self), err)]
    pub async fn list_active(&mut self, now: DateTime<Utc>) -> Result<Vec<ReservationDBResponse>> {
        let reservations = sqlx::query_as::<_, ReservationDBResponse>(
            r#"
            SELECT id, environment_id, reserved_by, start_time, end_time,
                   feature, git_branch, jira_url, created_at, last_updated
            FROM reservations
            WHERE end_time > $1
            "#,
        )
        .bind(now)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(reservations)
    }

    /// The active reservation for one environment, if any.
    ///
    /// There should never be more than one; if the ledger is corrupted we
    /// still return a single row and flag the violation in the logs.
    #[instrument(skip(self), err)]
    pub async fn active_for_environment(
        &mut self,
        environment_id: EnvironmentId,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservationDBResponse>> {
        let mut rows = sqlx::query_as::<_, ReservationDBResponse>(
            r#"
            SELECT id, environment_id, reserved_by, start_time, end_time,
                   feature, git_branch, jira_url, created_at, last_updated
            FROM reservations
            WHERE environment_id = $1 AND end_time > $2
            ORDER BY end_time DESC
            "#,
        )
        .bind(environment_id)
        .bind(now)
        .fetch_all(&mut *self.db)
        .await?;

        if rows.len() > 1 {
            tracing::warn!(
                environment_id = %environment_id,
                count = rows.len(),
                "multiple active reservations for one environment"
            );
        }

        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    /// Cut a reservation short by moving its end time to `now`.
    #[instrument(skip(self), err)]
    pub async fn truncate_end(&mut self, id: ReservationId, now: DateTime<Utc>) -> Result<bool> {
        Ok(truncate_end_inner(&mut *self.db, id, now).await?.is_some())
    }

    /// Atomically claim an environment and record the reservation.
    ///
    /// The conditional status flip and the ledger insert commit together or
    /// not at all: of N concurrent callers racing for the same free
    /// environment exactly one observes `Created`, the rest observe
    /// `EnvironmentBusy` with no row written.
    #[instrument(skip(self, request), fields(environment_id = %request.environment_id), err)]
    pub async fn reserve(&mut self, request: &ReservationCreateDBRequest) -> Result<ReserveOutcome> {
        let mut tx = self.db.begin().await?;

        let transition = Environments::new(&mut tx)
            .transition_status(
                request.environment_id,
                EnvironmentStatus::Free,
                EnvironmentStatus::Reserved,
            )
            .await?;
        match transition {
            TransitionOutcome::Applied => {}
            TransitionOutcome::Conflict { .. } => {
                tx.rollback().await?;
                return Ok(ReserveOutcome::EnvironmentBusy);
            }
            TransitionOutcome::NotFound => {
                tx.rollback().await?;
                return Ok(ReserveOutcome::EnvironmentNotFound);
            }
        }

        let reservation = insert_inner(&mut tx, request).await?;
        tx.commit().await?;

        Ok(ReserveOutcome::Created(reservation))
    }

    /// End a reservation and free its environment, in one transaction.
    ///
    /// No precondition on current state: releasing an already-expired or
    /// already-released reservation converges to the same place. Returns
    /// `None` only when the reservation row itself does not exist.
    #[instrument(skip(self), err)]
    pub async fn release(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservationDBResponse>> {
        let mut tx = self.db.begin().await?;

        let Some(reservation) = truncate_end_inner(&mut tx, id, now).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        // Unconditional: the environment may have been deleted or already
        // freed by the sweeper, both are fine.
        Environments::new(&mut tx)
            .set_status(reservation.environment_id, EnvironmentStatus::Free)
            .await?;

        tx.commit().await?;

        Ok(Some(reservation))
    }
}

async fn insert_inner(
    db: &mut PgConnection,
    request: &ReservationCreateDBRequest,
) -> Result<ReservationDBResponse> {
    let reservation = sqlx::query_as::<_, ReservationDBResponse>(
        r#"
        INSERT INTO reservations
            (id, environment_id, reserved_by, start_time, end_time, feature, git_branch, jira_url)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, environment_id, reserved_by, start_time, end_time,
                  feature, git_branch, jira_url, created_at, last_updated
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request.environment_id)
    .bind(request.reserved_by)
    .bind(request.start_time)
    .bind(request.end_time)
    .bind(&request.feature)
    .bind(&request.git_branch)
    .bind(&request.jira_url)
    .fetch_one(db)
    .await?;

    Ok(reservation)
}

async fn truncate_end_inner(
    db: &mut PgConnection,
    id: ReservationId,
    now: DateTime<Utc>,
) -> Result<Option<ReservationDBResponse>> {
    let reservation = sqlx::query_as::<_, ReservationDBResponse>(
        r#"
        UPDATE reservations
        SET end_time = $2, last_updated = now()
        WHERE id = $1
        RETURNING id, environment_id, reserved_by, start_time, end_time,
                  feature, git_branch, jira_url, created_at, last_updated
        "#,
    )
    .bind(id)
    .bind(now)
    .fetch_optional(db)
    .await?;

    Ok(reservation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::db::handlers::environments::Environments;
    use crate::db::handlers::repository::Repository;
    use crate::db::models::environments::EnvironmentCreateDBRequest;
    use crate::db::models::users::UserDBResponse;
    use crate::test_utils::create_test_user;
    use chrono::Duration;
    use sqlx::PgPool;

    async fn setup(pool: &PgPool) -> (UserDBResponse, EnvironmentId) {
        let user = create_test_user(pool, Role::User).await;
        let mut conn = pool.acquire().await.unwrap();
        let env = Environments::new(&mut conn)
            .create(&EnvironmentCreateDBRequest {
                name: "staging-1".to_string(),
                description: None,
                created_by: user.id,
            })
            .await
            .unwrap();
        (user, env.id)
    }

    fn reserve_request(
        environment_id: EnvironmentId,
        reserved_by: Uuid,
        minutes: i64,
    ) -> ReservationCreateDBRequest {
        let now = Utc::now();
        ReservationCreateDBRequest {
            environment_id,
            reserved_by,
            start_time: now,
            end_time: now + Duration::minutes(minutes),
            feature: "checkout flow".to_string(),
            git_branch: Some("feature/checkout".to_string()),
            jira_url: None,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserve_claims_free_environment(pool: PgPool) {
        let (user, env_id) = setup(&pool).await;
        let mut conn = pool.acquire().await.unwrap();

        let outcome = Reservations::new(&mut conn)
            .reserve(&reserve_request(env_id, user.id, 60))
            .await
            .unwrap();
        let reservation = match outcome {
            ReserveOutcome::Created(r) => r,
            other => panic!("expected Created, got {other:?}"),
        };
        assert_eq!(reservation.environment_id, env_id);
        assert_eq!(reservation.reserved_by, user.id);
        assert!(reservation.is_active_at(Utc::now()));

        let env = Environments::new(&mut conn).get_by_id(env_id).await.unwrap().unwrap();
        assert_eq!(env.status, EnvironmentStatus::Reserved);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserve_busy_environment_writes_nothing(pool: PgPool) {
        let (user, env_id) = setup(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Reservations::new(&mut conn);

        let first = repo.reserve(&reserve_request(env_id, user.id, 60)).await.unwrap();
        assert!(matches!(first, ReserveOutcome::Created(_)));

        let second = repo.reserve(&reserve_request(env_id, user.id, 60)).await.unwrap();
        assert!(matches!(second, ReserveOutcome::EnvironmentBusy));

        // The loser left no ledger row behind
        let active = repo.list_active(Utc::now()).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserve_missing_environment(pool: PgPool) {
        let (user, _env_id) = setup(&pool).await;
        let mut conn = pool.acquire().await.unwrap();

        let outcome = Reservations::new(&mut conn)
            .reserve(&reserve_request(Uuid::new_v4(), user.id, 60))
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::EnvironmentNotFound));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserve_races_on_the_registry_transition(pool: PgPool) {
        let (user, env_id) = setup(&pool).await;
        let mut conn = pool.acquire().await.unwrap();

        // A hold taken through the registry primitive directly is the same
        // hold the coordinator races on
        let transition = Environments::new(&mut conn)
            .transition_status(env_id, EnvironmentStatus::Free, EnvironmentStatus::Reserved)
            .await
            .unwrap();
        assert_eq!(transition, TransitionOutcome::Applied);

        let outcome = Reservations::new(&mut conn)
            .reserve(&reserve_request(env_id, user.id, 60))
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::EnvironmentBusy));

        // Freeing through the registry makes the coordinator win again
        Environments::new(&mut conn)
            .set_status(env_id, EnvironmentStatus::Free)
            .await
            .unwrap();
        let outcome = Reservations::new(&mut conn)
            .reserve(&reserve_request(env_id, user.id, 60))
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Created(_)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_reserves_have_one_winner(pool: PgPool) {
        let (user, env_id) = setup(&pool).await;

        let attempt = |pool: PgPool, reserved_by: Uuid| async move {
            let mut conn = pool.acquire().await.unwrap();
            Reservations::new(&mut conn)
                .reserve(&reserve_request(env_id, reserved_by, 60))
                .await
                .unwrap()
        };

        let (a, b) = futures::join!(attempt(pool.clone(), user.id), attempt(pool.clone(), user.id));

        let winners = [&a, &b]
            .iter()
            .filter(|o| matches!(o, ReserveOutcome::Created(_)))
            .count();
        let losers = [&a, &b]
            .iter()
            .filter(|o| matches!(o, ReserveOutcome::EnvironmentBusy))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(losers, 1);

        let mut conn = pool.acquire().await.unwrap();
        let active = Reservations::new(&mut conn).list_active(Utc::now()).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_release_frees_environment_and_ends_reservation(pool: PgPool) {
        let (user, env_id) = setup(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Reservations::new(&mut conn);

        let ReserveOutcome::Created(reservation) =
            repo.reserve(&reserve_request(env_id, user.id, 60)).await.unwrap()
        else {
            panic!("reserve failed");
        };

        let now = Utc::now();
        let released = repo.release(reservation.id, now).await.unwrap().unwrap();
        // Postgres stores microseconds, so compare with a small tolerance
        assert!((released.end_time - now).abs() < Duration::milliseconds(1));
        assert!(!released.is_active_at(now));

        let env = Environments::new(&mut conn).get_by_id(env_id).await.unwrap().unwrap();
        assert_eq!(env.status, EnvironmentStatus::Free);

        // Environment is immediately reservable again
        let again = Reservations::new(&mut conn)
            .reserve(&reserve_request(env_id, user.id, 30))
            .await
            .unwrap();
        assert!(matches!(again, ReserveOutcome::Created(_)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_release_is_idempotent(pool: PgPool) {
        let (user, env_id) = setup(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Reservations::new(&mut conn);

        let ReserveOutcome::Created(reservation) =
            repo.reserve(&reserve_request(env_id, user.id, 60)).await.unwrap()
        else {
            panic!("reserve failed");
        };

        repo.release(reservation.id, Utc::now()).await.unwrap().unwrap();
        // Second release converges, it does not error
        let second = repo.release(reservation.id, Utc::now()).await.unwrap();
        assert!(second.is_some());

        assert!(repo.release(Uuid::new_v4(), Utc::now()).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_active_projection(pool: PgPool) {
        let (user, env_id) = setup(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Reservations::new(&mut conn);

        let now = Utc::now();
        // One lapsed, one live
        repo.insert(&ReservationCreateDBRequest {
            environment_id: env_id,
            reserved_by: user.id,
            start_time: now - Duration::hours(2),
            end_time: now - Duration::hours(1),
            feature: "old work".to_string(),
            git_branch: None,
            jira_url: None,
        })
        .await
        .unwrap();
        let live = repo.insert(&reserve_request(env_id, user.id, 45)).await.unwrap();

        let active = repo.list_active(now).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);

        let found = repo.active_for_environment(env_id, now).await.unwrap().unwrap();
        assert_eq!(found.id, live.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_active_for_environment_survives_duplicate_rows(pool: PgPool) {
        let (user, env_id) = setup(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Reservations::new(&mut conn);

        // Two active rows should never happen, but a corrupted ledger must
        // still produce a single deterministic answer
        let _short = repo.insert(&reserve_request(env_id, user.id, 30)).await.unwrap();
        let long = repo.insert(&reserve_request(env_id, user.id, 90)).await.unwrap();

        let found = repo.active_for_environment(env_id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(found.id, long.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_truncate_end(pool: PgPool) {
        let (user, env_id) = setup(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Reservations::new(&mut conn);

        let reservation = repo.insert(&reserve_request(env_id, user.id, 60)).await.unwrap();
        let now = Utc::now();
        assert!(repo.truncate_end(reservation.id, now).await.unwrap());

        let fetched = repo.get_by_id(reservation.id).await.unwrap().unwrap();
        assert!((fetched.end_time - now).abs() < Duration::milliseconds(1));

        assert!(!repo.truncate_end(Uuid::new_v4(), now).await.unwrap());
    }
}
