use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::{
        auth::{LoginRequest, LoginResponse, LogoutResponse, MessageResponse, RegisterRequest, RegisterResponse, SessionResponse},
        users::{CurrentUser, Role, UserResponse},
    },
    auth::{password, session},
    db::handlers::{Repository, Users},
    db::models::users::UserCreateDBRequest,
    errors::Error,
};

const MIN_PASSWORD_LENGTH: usize = 8;

/// Register a new user account
#[utoipa::path(
    post,
    path = "/authentication/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "User registered successfully", body = SessionResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Username already taken"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<RegisterResponse, Error> {
    if !state.config.auth.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    if request.username.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Username is required".to_string(),
        });
    }
    if request.password.len() < MIN_PASSWORD_LENGTH {
        return Err(Error::BadRequest {
            message: format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
        });
    }

    // Hash the password on a blocking thread to avoid stalling the runtime
    let password = request.password.clone();
    let argon2 = state.config.auth.argon2.into();
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password_with_params(&password, Some(argon2)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })??;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let created_user = Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            username: request.username,
            password_hash: Some(password_hash),
            role: Role::User,
        })
        .await?;

    let user_response = UserResponse::from(created_user);
    let current_user = CurrentUser {
        id: user_response.id,
        username: user_response.username.clone(),
        role: user_response.role,
    };
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    Ok(RegisterResponse {
        session: SessionResponse {
            token,
            user: user_response,
        },
        cookie,
    })
}

/// Login with username and password
#[utoipa::path(
    post,
    path = "/authentication/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = SessionResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let invalid_credentials = || Error::Unauthenticated {
        message: Some("Invalid username or password".to_string()),
    };

    let user = Users::new(&mut conn)
        .get_by_username(&request.username)
        .await?
        .ok_or_else(invalid_credentials)?;

    let password_hash = user.password_hash.clone().ok_or_else(invalid_credentials)?;

    // Verify on a blocking thread, argon2 is deliberately slow
    let password = request.password.clone();
    let is_valid = tokio::task::spawn_blocking(move || password::verify_password(&password, &password_hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })??;

    if !is_valid {
        return Err(invalid_credentials());
    }

    let user_response = UserResponse::from(user);
    let current_user = CurrentUser {
        id: user_response.id,
        username: user_response.username.clone(),
        role: user_response.role,
    };
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    Ok(LoginResponse {
        session: SessionResponse {
            token,
            user: user_response,
        },
        cookie,
    })
}

/// Logout (clear session cookie)
#[utoipa::path(
    post,
    path = "/authentication/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> Result<LogoutResponse, Error> {
    // Expired cookie clears the session client-side; JWTs themselves are
    // stateless and simply age out
    let cookie = format!(
        "{}=; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age=0",
        state.config.auth.cookie_name
    );

    Ok(LogoutResponse {
        message: MessageResponse {
            message: "Logout successful".to_string(),
        },
        cookie,
    })
}

/// Helper function to create a session cookie
fn create_session_cookie(token: &str, config: &crate::config::Config) -> String {
    let max_age = config.auth.jwt_expiry.as_secs();

    format!(
        "{}={}; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age={}",
        config.auth.cookie_name, token, max_age
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_app, create_test_user};
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_login_logout_roundtrip(pool: PgPool) {
        let server = create_test_app(pool).await;

        let response = server
            .post("/authentication/register")
            .json(&json!({"username": "alice", "password": "correct-horse-battery"}))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        let session: SessionResponse = response.json();
        assert_eq!(session.user.username, "alice");
        assert_eq!(session.user.role, Role::User);
        assert!(!session.token.is_empty());
        assert!(response.header("set-cookie").to_str().unwrap().contains("devreserve_session="));

        let response = server
            .post("/authentication/login")
            .json(&json!({"username": "alice", "password": "correct-horse-battery"}))
            .await;
        response.assert_status_ok();

        let response = server.post("/authentication/logout").await;
        response.assert_status_ok();
        assert!(response.header("set-cookie").to_str().unwrap().contains("Max-Age=0"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_rejects_bad_credentials(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::User).await;

        let response = server
            .post("/authentication/login")
            .json(&json!({"username": user.username, "password": "wrong-password"}))
            .await;
        response.assert_status(axum::http::StatusCode::UNAUTHORIZED);

        let response = server
            .post("/authentication/login")
            .json(&json!({"username": "ghost", "password": "whatever-here"}))
            .await;
        response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_validation(pool: PgPool) {
        let server = create_test_app(pool).await;

        let response = server
            .post("/authentication/register")
            .json(&json!({"username": "", "password": "long-enough-pass"}))
            .await;
        response.assert_status(axum::http::StatusCode::BAD_REQUEST);

        let response = server
            .post("/authentication/register")
            .json(&json!({"username": "bob", "password": "short"}))
            .await;
        response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_duplicate_username_conflicts(pool: PgPool) {
        let server = create_test_app(pool).await;

        let body = json!({"username": "carol", "password": "correct-horse-battery"});
        server.post("/authentication/register").json(&body).await.assert_status(axum::http::StatusCode::CREATED);

        let response = server.post("/authentication/register").json(&body).await;
        response.assert_status(axum::http::StatusCode::CONFLICT);
    }
}
