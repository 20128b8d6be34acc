//! devreserve - exclusive, time-bounded reservations for shared development
//! and testing environments.
//!
//! Teams that share a small pool of staging boxes use this service as the
//! single source of truth for who holds which environment, for what, and
//! until when. Reservations are taken atomically (one winner per
//! environment), released by their holder, and lapsed holds are reclaimed by
//! a background sweeper so the pool never stays stuck.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod openapi;
pub mod sweeper;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::models::users::Role,
    auth::password,
    db::handlers::{Repository, Users},
    db::models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    openapi::ApiDoc,
};
use axum::{
    Router,
    routing::{delete, get, post, put},
};
use bon::Builder;
pub use config::Config;
pub use errors::Error;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::{EnvironmentId, ReservationId, UserId};

/// Application state shared across all request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
}

/// Get the devreserve database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial admin user if it doesn't exist.
///
/// Idempotent: creates the admin account on first startup, and on later
/// startups updates the password if one is configured. Always returns the
/// admin's user id.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(username: &str, password: Option<&str>, db: &PgPool) -> Result<UserId, Error> {
    let password_hash = match password {
        Some(pwd) => Some(password::hash_password(pwd).map_err(|e| Error::Internal {
            operation: format!("Failed to hash admin password: {e}"),
        })?),
        None => None,
    };

    let mut tx = db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut users = Users::new(&mut tx);

    if let Some(existing) = users.get_by_username(username).await? {
        if password_hash.is_some() {
            users
                .update(
                    existing.id,
                    &UserUpdateDBRequest {
                        role: Some(Role::Admin),
                        password_hash,
                    },
                )
                .await?;
        }
        tx.commit().await.map_err(|e| Error::Database(e.into()))?;
        return Ok(existing.id);
    }

    let created = users
        .create(&UserCreateDBRequest {
            username: username.to_string(),
            password_hash,
            role: Role::Admin,
        })
        .await?;

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!("Created initial admin user '{}'", username);
    Ok(created.id)
}

/// Build the application router with all endpoints and middleware.
pub fn build_router(state: AppState) -> Router {
    // Authentication routes at root level
    let auth_routes = Router::new()
        .route("/authentication/register", post(api::handlers::auth::register))
        .route("/authentication/login", post(api::handlers::auth::login))
        .route("/authentication/logout", post(api::handlers::auth::logout))
        .with_state(state.clone());

    let api_routes = Router::new()
        // User management
        .route("/users", get(api::handlers::users::list_users))
        .route("/users", post(api::handlers::users::create_user))
        .route("/users/me", get(api::handlers::users::get_current_user))
        .route("/users/{id}", get(api::handlers::users::get_user))
        .route("/users/{id}", put(api::handlers::users::update_user))
        .route("/users/{id}", delete(api::handlers::users::delete_user))
        // Environment pool management
        .route("/environments", get(api::handlers::environments::list_environments))
        .route("/environments", post(api::handlers::environments::create_environment))
        .route("/environments/{id}", get(api::handlers::environments::get_environment))
        .route("/environments/{id}", put(api::handlers::environments::update_environment))
        .route("/environments/{id}", delete(api::handlers::environments::delete_environment))
        // Reserving and releasing
        .route("/reservations", post(api::handlers::reservations::create_reservation))
        .route("/reservations", get(api::handlers::reservations::list_active_reservations))
        .route("/reservations/{id}", get(api::handlers::reservations::get_reservation))
        .route("/reservations/{id}/release", post(api::handlers::reservations::release_reservation))
        .with_state(state);

    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(auth_routes)
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Container for background tasks and their lifecycle management.
///
/// Currently holds only the expiry sweeper. The drop guard cancels the
/// shutdown token if the struct is dropped without an explicit
/// [`shutdown`](BackgroundServices::shutdown).
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    _drop_guard: tokio_util::sync::DropGuard,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(pool: PgPool, config: &Config, shutdown_token: tokio_util::sync::CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    if config.sweeper.enabled {
        let sweeper_config = config.sweeper.clone();
        let sweeper_shutdown = shutdown_token.clone();
        background_tasks.push(tokio::spawn(async move {
            sweeper::sweeper_task(pool, sweeper_config, sweeper_shutdown).await;
        }));
    } else {
        info!("Expiry sweeper disabled by configuration");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        _drop_guard: drop_guard,
    }
}

/// The assembled application: database pool, router and background services.
///
/// # Lifecycle
///
/// 1. [`Application::new`] connects to the database, runs migrations, ensures
///    the admin user exists and starts the sweeper
/// 2. [`Application::serve`] binds a TCP listener and handles requests until
///    the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting devreserve with configuration: {:#?}", config);

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.pool.acquire_timeout_secs))
            .connect(&config.database_url)
            .await?;
        migrator().run(&pool).await?;

        create_initial_admin_user(&config.admin_username, config.admin_password.as_deref(), &pool).await?;

        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let bg_services = setup_background_services(pool.clone(), &config, shutdown_token);

        let state = AppState::builder().db(pool.clone()).config(config.clone()).build();
        let router = build_router(state);

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("devreserve listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}
