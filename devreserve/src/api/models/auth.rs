//! API models for authentication.

use axum::{
    Json,
    http::{StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::models::users::UserResponse;

/// Request to register a new account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

/// Request to log in with username and password
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Successful login or registration. The session token is also set as an
/// HTTP-only cookie on the response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub token: String,
    pub user: UserResponse,
}

/// Login response body plus the Set-Cookie header carrying the session
pub struct LoginResponse {
    pub session: SessionResponse,
    pub cookie: String,
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        ([(SET_COOKIE, self.cookie)], Json(self.session)).into_response()
    }
}

/// Registration response: same shape as login but created status
pub struct RegisterResponse {
    pub session: SessionResponse,
    pub cookie: String,
}

impl IntoResponse for RegisterResponse {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, [(SET_COOKIE, self.cookie)], Json(self.session)).into_response()
    }
}

/// Simple acknowledgement body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Logout response clears the session cookie
pub struct LogoutResponse {
    pub message: MessageResponse,
    pub cookie: String,
}

impl IntoResponse for LogoutResponse {
    fn into_response(self) -> Response {
        ([(SET_COOKIE, self.cookie)], Json(self.message)).into_response()
    }
}
