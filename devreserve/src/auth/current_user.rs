//! Extractor for the authenticated user.

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, instrument};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    errors::{Error, Result},
};

/// Extract user from a Bearer token in the Authorization header.
/// Returns:
/// - None: No Authorization header or not a Bearer token
/// - Some(Ok(user)): Valid session token
/// - Some(Err(error)): Bearer token present but invalid
#[instrument(skip(parts, config))]
fn try_bearer_auth(parts: &Parts, config: &crate::config::Config) -> Option<Result<CurrentUser>> {
    let auth_header = parts.headers.get(axum::http::header::AUTHORIZATION)?;

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    let token = auth_str.strip_prefix("Bearer ")?;
    Some(session::verify_session_token(token, config))
}

/// Extract user from the JWT session cookie.
/// Returns:
/// - None: No session cookie present, or the cookie did not verify
/// - Some(Err(error)): Cookie header was malformed
#[instrument(skip(parts, config))]
fn try_cookie_auth(parts: &Parts, config: &crate::config::Config) -> Option<Result<CurrentUser>> {
    let cookie_header = parts.headers.get(axum::http::header::COOKIE)?;

    let cookie_str = match cookie_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid cookie header: {e}"),
            }));
        }
    };
    let cookie_name = &config.auth.cookie_name;

    for cookie in cookie_str.split(';') {
        let cookie = cookie.trim();
        if let Some((name, value)) = cookie.split_once('=') {
            if name == cookie_name {
                match session::verify_session_token(value, config) {
                    Ok(user) => return Some(Ok(user)),
                    // Expired or stale cookies are expected, keep looking
                    Err(_) => continue,
                }
            }
        }
    }
    None
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Bearer token first, then the session cookie. A method returning
        // None is simply not applicable to this request.
        if let Some(result) = try_bearer_auth(parts, &state.config) {
            debug!("authenticated via bearer token");
            return result;
        }

        if let Some(result) = try_cookie_auth(parts, &state.config) {
            debug!("authenticated via session cookie");
            return result;
        }

        Err(Error::Unauthenticated { message: None })
    }
}
