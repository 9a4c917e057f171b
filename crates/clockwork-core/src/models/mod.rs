//! Data models shared between the identity API and the session cache.

pub mod user;

pub use user::User;
