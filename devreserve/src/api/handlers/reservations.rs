use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{Duration, Utc};

use crate::{
    AppState,
    api::models::reservations::{ReservationCreate, ReservationResponse},
    api::models::users::CurrentUser,
    db::handlers::Reservations,
    db::models::reservations::{ReservationCreateDBRequest, ReserveOutcome},
    errors::Error,
    types::ReservationId,
};

/// Reserve an environment
///
/// Atomic: of any number of concurrent attempts on the same free
/// environment, exactly one succeeds and the rest get a conflict.
#[utoipa::path(
    post,
    path = "/api/v1/reservations",
    request_body = ReservationCreate,
    tag = "reservations",
    responses(
        (status = 201, description = "Reservation created", body = ReservationResponse),
        (status = 400, description = "Invalid duration or missing feature"),
        (status = 404, description = "Environment not found"),
        (status = 409, description = "Environment already reserved"),
    )
)]
#[tracing::instrument(skip(state, request), fields(environment_id = %request.environment_id))]
pub async fn create_reservation(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Json(request): Json<ReservationCreate>,
) -> Result<(axum::http::StatusCode, Json<ReservationResponse>), Error> {
    request.validate().map_err(|message| Error::BadRequest { message })?;

    // One clock reading produces both ends of the hold
    let now = Utc::now();
    let db_request = ReservationCreateDBRequest {
        environment_id: request.environment_id,
        reserved_by: current_user.id,
        start_time: now,
        end_time: now + Duration::minutes(request.duration_mins),
        feature: request.feature,
        git_branch: request.git_branch,
        jira_url: request.jira_url,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let outcome = Reservations::new(&mut conn).reserve(&db_request).await?;

    match outcome {
        ReserveOutcome::Created(reservation) => Ok((
            axum::http::StatusCode::CREATED,
            Json(ReservationResponse::from(reservation)),
        )),
        ReserveOutcome::EnvironmentNotFound => Err(Error::NotFound {
            resource: "Environment".to_string(),
            id: request.environment_id.to_string(),
        }),
        ReserveOutcome::EnvironmentBusy => Err(Error::Conflict {
            message: "Environment is already reserved".to_string(),
        }),
    }
}

/// List active reservations
#[utoipa::path(
    get,
    path = "/api/v1/reservations",
    tag = "reservations",
    responses(
        (status = 200, description = "Currently active reservations", body = Vec<ReservationResponse>),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn list_active_reservations(
    _current_user: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ReservationResponse>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let reservations = Reservations::new(&mut conn).list_active(Utc::now()).await?;

    Ok(Json(reservations.into_iter().map(ReservationResponse::from).collect()))
}

/// Get a reservation by ID
#[utoipa::path(
    get,
    path = "/api/v1/reservations/{id}",
    params(("id" = uuid::Uuid, Path, description = "Reservation ID")),
    tag = "reservations",
    responses(
        (status = 200, description = "Reservation", body = ReservationResponse),
        (status = 404, description = "Reservation not found"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_reservation(
    _current_user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
) -> Result<Json<ReservationResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let reservation = Reservations::new(&mut conn).get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Reservation".to_string(),
        id: id.to_string(),
    })?;

    Ok(Json(ReservationResponse::from(reservation)))
}

/// Release a reservation
///
/// Only the holder may release their own reservation. Releasing an
/// already-expired or already-released reservation is accepted: the
/// operation converges the environment to free rather than erroring.
#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/release",
    params(("id" = uuid::Uuid, Path, description = "Reservation ID")),
    tag = "reservations",
    responses(
        (status = 200, description = "Reservation released", body = ReservationResponse),
        (status = 403, description = "Not the holder of this reservation"),
        (status = 404, description = "Reservation not found"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn release_reservation(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
) -> Result<Json<ReservationResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Reservations::new(&mut conn);

    let reservation = repo.get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Reservation".to_string(),
        id: id.to_string(),
    })?;

    // Holder-only; the holder never changes, so this check cannot race
    // with the transaction below
    if reservation.reserved_by != current_user.id {
        return Err(Error::Forbidden {
            message: "Only the holder may release this reservation".to_string(),
        });
    }

    let released = repo.release(id, Utc::now()).await?.ok_or_else(|| Error::NotFound {
        resource: "Reservation".to_string(),
        id: id.to_string(),
    })?;

    Ok(Json(ReservationResponse::from(released)))
}
