//! Core library for clockwork.
//!
//! - `auth`: the `SessionManager` that tracks the signed-in user
//! - `api`: the identity service contract and its HTTP client
//! - `store`: persisted key-value stores for the session token and user
//! - `notify`: success/error notification sinks
//! - `config`: application configuration
//! - `utils`: presentation formatting helpers

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod notify;
pub mod store;
pub mod utils;
