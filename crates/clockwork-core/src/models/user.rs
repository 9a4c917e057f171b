use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user record as returned by the identity service.
///
/// Only `id` is required. Fields the client does not know about are kept in
/// `extra` so a record survives a trip through the persisted store intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            name: None,
            email: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Name for display: the user's name, then email, then `User #<id>`.
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.email.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("User #{}", self.id))
    }
}
