//! Per-request options.

use std::fmt;
use std::time::Duration;

use sockline_core::MessageStatus;

/// Observer invoked on every delivery status a request passes through.
pub type StatusCallback = Box<dyn FnMut(MessageStatus) + Send>;

/// Optional parameters for `send_with` / `end_with` / `reply_with`.
///
/// ```ignore
/// let opts = SendOptions::new()
///     .timeout(Duration::from_secs(5))
///     .on_status(|status| tracing::debug!(%status, "delivery"));
/// ```
#[derive(Default)]
pub struct SendOptions {
    /// Reply timeout; the connection's `requestMs` setting when `None`.
    pub timeout: Option<Duration>,
    /// Status observer.
    pub on_status: Option<StatusCallback>,
}

impl SendOptions {
    /// Options with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reply timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the status observer.
    #[must_use]
    pub fn on_status<F>(mut self, callback: F) -> Self
    where
        F: FnMut(MessageStatus) + Send + 'static,
    {
        self.on_status = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOptions")
            .field("timeout", &self.timeout)
            .field("on_status", &self.on_status.is_some())
            .finish()
    }
}
