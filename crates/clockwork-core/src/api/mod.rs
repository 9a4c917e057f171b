//! Remote identity service module.
//!
//! `IdentityService` is the contract the session manager depends on:
//! login, registration, logout and current-user lookup. `ApiClient` is the
//! HTTP implementation, using bearer tokens issued by the login and
//! registration endpoints.

pub mod client;
pub mod error;
pub mod identity;

pub use client::ApiClient;
pub use error::ApiError;
pub use identity::{AuthResponse, IdentityService, LoginRequest, RegisterRequest};
