//! Authentication and authorization.
//!
//! Two ways to authenticate a request:
//!
//! 1. **Session cookie** — browsers log in via `/authentication/login` and
//!    get a JWT in a secure, HTTP-only cookie.
//! 2. **Bearer token** — the same JWT passed as `Authorization: Bearer`
//!    for programmatic access.
//!
//! Authorization is role-based: admins manage the environment pool and
//! user accounts, everyone else reserves and releases. Holder-only checks
//! (only the reserver may release early) live in the handlers.
//!
//! # Modules
//!
//! - [`current_user`]: extractor for the authenticated user in handlers
//! - [`password`]: password hashing and verification using Argon2
//! - [`session`]: JWT session token creation and verification

pub mod current_user;
pub mod password;
pub mod session;
