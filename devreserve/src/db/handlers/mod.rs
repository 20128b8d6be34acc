pub mod environments;
pub mod repository;
pub mod reservations;
pub mod users;

pub use environments::Environments;
pub use repository::Repository;
pub use reservations::Reservations;
pub use users::Users;
