use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::User;

use super::ApiError;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

/// Successful login or registration payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

/// Server-side authentication operations.
///
/// Any `Err` from `current_user` means the presented token is no longer
/// usable, whatever the underlying cause.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError>;

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError>;

    async fn logout(&self, token: &str) -> Result<(), ApiError>;

    async fn current_user(&self, token: &str) -> Result<User, ApiError>;
}
