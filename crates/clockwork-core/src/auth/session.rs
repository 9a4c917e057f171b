use std::sync::Arc;

use tracing::warn;

use crate::models::User;
use crate::store::{KeyValueStore, StoreError};

/// Store key for the bearer token
pub const TOKEN_KEY: &str = "token";

/// Store key for the JSON-serialized user record
pub const USER_KEY: &str = "user";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub token: String,
    pub user: User,
}

/// Reads and writes the persisted session.
///
/// This is the only writer of the `token` and `user` keys, and it always
/// writes or clears them as a pair.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the cached session.
    ///
    /// Returns `Ok(None)` unless both a non-empty token and a user are
    /// stored, and `Err(StoreError::Corrupt)` if the user does not parse.
    pub fn load(&self) -> Result<Option<SessionData>, StoreError> {
        let token = self.store.get(TOKEN_KEY)?.filter(|t| !t.is_empty());
        let user = self.store.get(USER_KEY)?.filter(|u| !u.is_empty());

        match (token, user) {
            (Some(token), Some(user)) => {
                let user: User = serde_json::from_str(&user)?;
                Ok(Some(SessionData { token, user }))
            }
            _ => Ok(None),
        }
    }

    /// Persist token and user. If the second write fails the first is undone.
    pub fn save(&self, data: &SessionData) -> Result<(), StoreError> {
        let user = serde_json::to_string(&data.user)?;
        self.store.set(TOKEN_KEY, &data.token)?;
        if let Err(e) = self.store.set(USER_KEY, &user) {
            if let Err(clear_err) = self.clear() {
                warn!(error = %clear_err, "Failed to roll back partial session write");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove token and user. Both removals are attempted even if one fails.
    pub fn clear(&self) -> Result<(), StoreError> {
        let token = self.store.remove(TOKEN_KEY);
        let user = self.store.remove(USER_KEY);
        token.and(user)
    }

    pub fn token(&self) -> Result<Option<String>, StoreError> {
        Ok(self.store.get(TOKEN_KEY)?.filter(|t| !t.is_empty()))
    }
}
