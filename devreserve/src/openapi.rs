//! OpenAPI documentation for the reservation API.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Security scheme: the JWT session token as a bearer header (the same
/// token also works as a session cookie for browsers).
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Session token from `/authentication/login`, passed as \
                             `Authorization: Bearer <token>`.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "devreserve",
        description = "Exclusive time-bounded reservations for shared development and testing environments."
    ),
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::users::list_users,
        api::handlers::users::create_user,
        api::handlers::users::get_current_user,
        api::handlers::users::get_user,
        api::handlers::users::update_user,
        api::handlers::users::delete_user,
        api::handlers::environments::list_environments,
        api::handlers::environments::get_environment,
        api::handlers::environments::create_environment,
        api::handlers::environments::update_environment,
        api::handlers::environments::delete_environment,
        api::handlers::reservations::create_reservation,
        api::handlers::reservations::list_active_reservations,
        api::handlers::reservations::get_reservation,
        api::handlers::reservations::release_reservation,
    ),
    components(schemas(
        api::models::auth::RegisterRequest,
        api::models::auth::LoginRequest,
        api::models::auth::SessionResponse,
        api::models::auth::MessageResponse,
        api::models::users::Role,
        api::models::users::UserCreate,
        api::models::users::UserUpdate,
        api::models::users::UserResponse,
        api::models::environments::EnvironmentStatus,
        api::models::environments::EnvironmentCreate,
        api::models::environments::EnvironmentUpdate,
        api::models::environments::EnvironmentResponse,
        api::models::environments::EnvironmentWithReservation,
        api::models::reservations::ReservationCreate,
        api::models::reservations::ReservationResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "authentication", description = "Login, logout and registration"),
        (name = "users", description = "User account management"),
        (name = "environments", description = "Environment pool management"),
        (name = "reservations", description = "Reserving and releasing environments"),
    )
)]
pub struct ApiDoc;
