use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    AppState,
    api::models::users::{CurrentUser, Role, UserCreate, UserResponse, UserUpdate},
    auth::password,
    db::handlers::{Repository, Users, users::UserFilter},
    db::models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    errors::Error,
    types::UserId,
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

/// List all users
#[utoipa::path(
    get,
    path = "/api/v1/users",
    tag = "users",
    responses(
        (status = 200, description = "List of users", body = Vec<UserResponse>),
        (status = 403, description = "Not an administrator"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn list_users(current_user: CurrentUser, State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>, Error> {
    require_admin(&current_user)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let users = Users::new(&mut conn).list(&UserFilter::default()).await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Create a user
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = UserCreate,
    tag = "users",
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 403, description = "Not an administrator"),
        (status = 409, description = "Username already taken"),
    )
)]
#[tracing::instrument(skip(state, request))]
pub async fn create_user(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Json(request): Json<UserCreate>,
) -> Result<(axum::http::StatusCode, Json<UserResponse>), Error> {
    require_admin(&current_user)?;

    if request.username.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Username is required".to_string(),
        });
    }

    let argon2 = state.config.auth.argon2.into();
    let password = request.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password_with_params(&password, Some(argon2)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })??;

    let mut db_request = UserCreateDBRequest::from(request);
    db_request.password_hash = Some(password_hash);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).create(&db_request).await?;

    Ok((axum::http::StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Get the currently authenticated user
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    tag = "users",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_current_user(current_user: CurrentUser, State(state): State<AppState>) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .get_by_id(current_user.id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: current_user.id.to_string(),
        })?;

    Ok(Json(UserResponse::from(user)))
}

/// Get a user by ID
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    tag = "users",
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Not yourself or an administrator"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_user(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<UserResponse>, Error> {
    // Users may look themselves up, everything else is admin-only
    if current_user.id != id {
        require_admin(&current_user)?;
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: id.to_string(),
    })?;

    Ok(Json(UserResponse::from(user)))
}

/// Update a user's role or password
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    request_body = UserUpdate,
    tag = "users",
    responses(
        (status = 200, description = "User updated", body = UserResponse),
        (status = 400, description = "Cannot demote the last administrator"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip(state, request))]
pub async fn update_user(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(request): Json<UserUpdate>,
) -> Result<Json<UserResponse>, Error> {
    require_admin(&current_user)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut conn);

    let existing = repo.get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: id.to_string(),
    })?;

    // The pool must always keep at least one admin
    if existing.is_admin() && request.role == Some(Role::User) && repo.count_admins().await? <= 1 {
        return Err(Error::BadRequest {
            message: "Cannot demote the last administrator".to_string(),
        });
    }

    let password_hash = match request.password {
        Some(new_password) => {
            let argon2 = state.config.auth.argon2.into();
            Some(
                tokio::task::spawn_blocking(move || password::hash_password_with_params(&new_password, Some(argon2)))
                    .await
                    .map_err(|e| Error::Internal {
                        operation: format!("spawn password hashing task: {e}"),
                    })??,
            )
        }
        None => None,
    };

    let user = repo
        .update(
            id,
            &UserUpdateDBRequest {
                role: request.role,
                password_hash,
            },
        )
        .await?;

    Ok(Json(UserResponse::from(user)))
}

/// Delete a user
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    tag = "users",
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Cannot delete yourself"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn delete_user(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<axum::http::StatusCode, Error> {
    require_admin(&current_user)?;

    if current_user.id == id {
        return Err(Error::BadRequest {
            message: "Cannot delete your own account".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let deleted = Users::new(&mut conn).delete(id).await?;
    if !deleted {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: id.to_string(),
        });
    }

    Ok(axum::http::StatusCode::NO_CONTENT)
}
