//! User-facing notification sinks.
//!
//! The session manager announces the outcome of login, registration and
//! logout through a `Notifier` so front ends do not need to render their
//! own messages for those operations.

use tracing::{error, info};

/// Fire-and-forget success/error announcements.
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);

    fn error(&self, message: &str);
}

/// Notifier that writes announcements to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn success(&self, message: &str) {
        info!(target: "clockwork::notify", "{}", message);
    }

    fn error(&self, message: &str) {
        error!(target: "clockwork::notify", "{}", message);
    }
}
