//! Authentication module for tracking the signed-in user.
//!
//! This module provides:
//! - `SessionManager`: owns the current `SessionState`, restores it on
//!   startup, validates it against the server and runs login/register/logout
//! - `SessionStore`: writes and clears the persisted token and user together
//! - `SessionState`: `Initializing`, `Authenticated` or `Unauthenticated`

pub mod manager;
pub mod session;
pub mod state;

pub use manager::{AuthFailure, AuthResult, SessionManager};
pub use session::{SessionData, SessionStore};
pub use state::SessionState;
