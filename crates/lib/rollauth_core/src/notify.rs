//! User notifications emitted by the auth flows.

use tracing::info;

/// Fire-and-forget notification sink.
///
/// Implementations must not fail the calling flow; delivery problems are
/// theirs to log.
pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: &str, message: &str);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, user_id: &str, message: &str) {
        info!(user_id = %user_id, message = %message, "User notification");
    }
}

/// Message sent after an account is created.
pub fn welcome_message(first_name: &str) -> String {
    if first_name.trim().is_empty() {
        "Welcome aboard! Your account is ready.".to_string()
    } else {
        format!("Welcome aboard, {}! Your account is ready.", first_name.trim())
    }
}
