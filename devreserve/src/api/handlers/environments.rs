use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Utc;

use crate::{
    AppState,
    api::models::environments::{EnvironmentCreate, EnvironmentResponse, EnvironmentUpdate, EnvironmentWithReservation},
    api::models::reservations::ReservationResponse,
    api::models::users::CurrentUser,
    db::handlers::{Environments, Repository, Reservations, environments::EnvironmentFilter},
    db::models::environments::{EnvironmentCreateDBRequest, EnvironmentUpdateDBRequest},
    errors::Error,
    types::EnvironmentId,
};

fn require_admin(user: &CurrentUser) -> Result<(), Error> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(Error::Forbidden {
            message: "Administrator access required".to_string(),
        })
    }
}

/// List environments, each paired with its active reservation
#[utoipa::path(
    get,
    path = "/api/v1/environments",
    tag = "environments",
    responses(
        (status = 200, description = "Environment pool", body = Vec<EnvironmentWithReservation>),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn list_environments(
    _current_user: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<EnvironmentWithReservation>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let environments = Environments::new(&mut conn).list(&EnvironmentFilter::default()).await?;
    let now = Utc::now();

    let mut result = Vec::with_capacity(environments.len());
    for environment in environments {
        let active = Reservations::new(&mut conn).active_for_environment(environment.id, now).await?;
        result.push(EnvironmentWithReservation {
            environment: EnvironmentResponse::from(environment),
            active_reservation: active.map(ReservationResponse::from),
        });
    }

    Ok(Json(result))
}

/// Get one environment with its active reservation
#[utoipa::path(
    get,
    path = "/api/v1/environments/{id}",
    params(("id" = uuid::Uuid, Path, description = "Environment ID")),
    tag = "environments",
    responses(
        (status = 200, description = "Environment", body = EnvironmentWithReservation),
        (status = 404, description = "Environment not found"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_environment(
    _current_user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<EnvironmentId>,
) -> Result<Json<EnvironmentWithReservation>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let environment = Environments::new(&mut conn).get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Environment".to_string(),
        id: id.to_string(),
    })?;

    let active = Reservations::new(&mut conn).active_for_environment(environment.id, Utc::now()).await?;

    Ok(Json(EnvironmentWithReservation {
        environment: EnvironmentResponse::from(environment),
        active_reservation: active.map(ReservationResponse::from),
    }))
}

/// Create an environment
#[utoipa::path(
    post,
    path = "/api/v1/environments",
    request_body = EnvironmentCreate,
    tag = "environments",
    responses(
        (status = 201, description = "Environment created", body = EnvironmentResponse),
        (status = 403, description = "Not an administrator"),
    )
)]
#[tracing::instrument(skip(state, request))]
pub async fn create_environment(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Json(request): Json<EnvironmentCreate>,
) -> Result<(axum::http::StatusCode, Json<EnvironmentResponse>), Error> {
    require_admin(&current_user)?;

    if request.name.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Environment name is required".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let environment = Environments::new(&mut conn)
        .create(&EnvironmentCreateDBRequest::new(request, current_user.id))
        .await?;

    Ok((axum::http::StatusCode::CREATED, Json(EnvironmentResponse::from(environment))))
}

/// Update an environment's metadata
#[utoipa::path(
    put,
    path = "/api/v1/environments/{id}",
    params(("id" = uuid::Uuid, Path, description = "Environment ID")),
    request_body = EnvironmentUpdate,
    tag = "environments",
    responses(
        (status = 200, description = "Environment updated", body = EnvironmentResponse),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "Environment not found"),
    )
)]
#[tracing::instrument(skip(state, request))]
pub async fn update_environment(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<EnvironmentId>,
    Json(request): Json<EnvironmentUpdate>,
) -> Result<Json<EnvironmentResponse>, Error> {
    require_admin(&current_user)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Environments::new(&mut conn);

    if repo.get_by_id(id).await?.is_none() {
        return Err(Error::NotFound {
            resource: "Environment".to_string(),
            id: id.to_string(),
        });
    }

    let environment = repo.update(id, &EnvironmentUpdateDBRequest::from(request)).await?;

    Ok(Json(EnvironmentResponse::from(environment)))
}

/// Delete an environment
///
/// Reservation history referencing the environment is preserved.
#[utoipa::path(
    delete,
    path = "/api/v1/environments/{id}",
    params(("id" = uuid::Uuid, Path, description = "Environment ID")),
    tag = "environments",
    responses(
        (status = 204, description = "Environment deleted"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "Environment not found"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn delete_environment(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<EnvironmentId>,
) -> Result<axum::http::StatusCode, Error> {
    require_admin(&current_user)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let deleted = Environments::new(&mut conn).delete(id).await?;
    if !deleted {
        return Err(Error::NotFound {
            resource: "Environment".to_string(),
            id: id.to_string(),
        });
    }

    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::test_utils::{authenticate_as, create_test_app, create_test_environment, create_test_user};
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_environment_crud_requires_admin(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::User).await;
        let token = authenticate_as(&server, &user).await;

        let response = server
            .post("/api/v1/environments")
            .add_header("authorization", format!("Bearer {token}"))
            .json(&json!({"name": "staging-1"}))
            .await;
        response.assert_status(axum::http::StatusCode::FORBIDDEN);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_and_list_environments(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let admin = create_test_user(&pool, Role::Admin).await;
        let token = authenticate_as(&server, &admin).await;

        let response = server
            .post("/api/v1/environments")
            .add_header("authorization", format!("Bearer {token}"))
            .json(&json!({"name": "staging-1", "description": "integration pool"}))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        let created: EnvironmentResponse = response.json();
        assert_eq!(created.name, "staging-1");

        let response = server
            .get("/api/v1/environments")
            .add_header("authorization", format!("Bearer {token}"))
            .await;
        response.assert_status_ok();
        let pool_view: Vec<EnvironmentWithReservation> = response.json();
        assert_eq!(pool_view.len(), 1);
        assert!(pool_view[0].active_reservation.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_environment_includes_active_reservation(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let admin = create_test_user(&pool, Role::Admin).await;
        let env_id = create_test_environment(&pool, admin.id).await;
        let token = authenticate_as(&server, &admin).await;

        let response = server
            .post("/api/v1/reservations")
            .add_header("authorization", format!("Bearer {token}"))
            .json(&json!({
                "environment_id": env_id,
                "duration_mins": 60,
                "feature": "checkout flow"
            }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);

        let response = server
            .get(&format!("/api/v1/environments/{env_id}"))
            .add_header("authorization", format!("Bearer {token}"))
            .await;
        response.assert_status_ok();
        let view: EnvironmentWithReservation = response.json();
        let active = view.active_reservation.expect("reservation should be attached");
        assert_eq!(active.reserved_by, admin.id);
        assert_eq!(active.feature, "checkout flow");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_environment_is_404(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let admin = create_test_user(&pool, Role::Admin).await;
        let token = authenticate_as(&server, &admin).await;

        let response = server
            .get(&format!("/api/v1/environments/{}", uuid::Uuid::new_v4()))
            .add_header("authorization", format!("Bearer {token}"))
            .await;
        response.assert_status(axum::http::StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_and_delete_environment(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let admin = create_test_user(&pool, Role::Admin).await;
        let env_id = create_test_environment(&pool, admin.id).await;
        let token = authenticate_as(&server, &admin).await;

        let response = server
            .put(&format!("/api/v1/environments/{env_id}"))
            .add_header("authorization", format!("Bearer {token}"))
            .json(&json!({"description": "renamed pool"}))
            .await;
        response.assert_status_ok();
        let updated: EnvironmentResponse = response.json();
        assert_eq!(updated.description.as_deref(), Some("renamed pool"));

        let response = server
            .delete(&format!("/api/v1/environments/{env_id}"))
            .add_header("authorization", format!("Bearer {token}"))
            .await;
        response.assert_status(axum::http::StatusCode::NO_CONTENT);
    }
}
