use serde::Serialize;

use crate::models::User;

/// What the client currently believes about who is signed in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionState {
    /// Startup has not read the persisted session yet
    Initializing,
    /// `confirmed` is false while a cached identity awaits server validation
    Authenticated { user: User, confirmed: bool },
    Unauthenticated,
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }

    pub fn is_initializing(&self) -> bool {
        matches!(self, SessionState::Initializing)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    /// True once the server has vouched for the current user
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SessionState::Authenticated { confirmed: true, .. })
    }
}
