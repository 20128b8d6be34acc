//! Shared helpers for integration tests.

use axum_test::TestServer;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    AppState,
    api::models::auth::SessionResponse,
    api::models::users::Role,
    auth::password::{Argon2Params, hash_password_with_params},
    config::{Argon2Config, Config},
    db::handlers::{Environments, Repository, Users},
    db::models::environments::EnvironmentCreateDBRequest,
    db::models::users::{UserCreateDBRequest, UserDBResponse},
    types::{EnvironmentId, UserId},
};

/// Password shared by every user created through [`create_test_user`].
pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Weak argon2 parameters so hashing doesn't dominate test runtime.
fn test_argon2() -> Argon2Config {
    Argon2Config {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        auth: crate::config::AuthConfig {
            argon2: test_argon2(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Build a test server around the full router, sharing the given pool.
pub async fn create_test_app(pool: PgPool) -> TestServer {
    let state = AppState::builder().db(pool).config(create_test_config()).build();
    let router = crate::build_router(state);
    TestServer::new(router).expect("Failed to create test server")
}

/// Create a user with a unique username and [`TEST_PASSWORD`] as password.
pub async fn create_test_user(pool: &PgPool, role: Role) -> UserDBResponse {
    let username = format!("user-{}", &Uuid::new_v4().to_string()[..8]);
    let password_hash =
        hash_password_with_params(TEST_PASSWORD, Some(Argon2Params::from(test_argon2()))).expect("Failed to hash test password");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            username,
            password_hash: Some(password_hash),
            role,
        })
        .await
        .expect("Failed to create test user")
}

/// Log in through the real login endpoint and return the session token.
pub async fn authenticate_as(server: &TestServer, user: &UserDBResponse) -> String {
    let response = server
        .post("/authentication/login")
        .json(&serde_json::json!({
            "username": user.username,
            "password": TEST_PASSWORD,
        }))
        .await;
    response.assert_status_ok();
    let session: SessionResponse = response.json();
    session.token
}

/// Create an environment with a unique name, returning its id.
pub async fn create_test_environment(pool: &PgPool, created_by: UserId) -> EnvironmentId {
    let name = format!("env-{}", &Uuid::new_v4().to_string()[..8]);
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let environment = Environments::new(&mut conn)
        .create(&EnvironmentCreateDBRequest {
            name,
            description: None,
            created_by,
        })
        .await
        .expect("Failed to create test environment");
    environment.id
}
