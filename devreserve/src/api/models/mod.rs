pub mod auth;
pub mod environments;
pub mod reservations;
pub mod users;
