//! The capability interface the connection manager consumes from its host.
//!
//! Modeled as a trait injected at construction rather than a dynamic event
//! emitter, so the state machine's side effects stay explicit and testable
//! with simple recording fakes.

use async_trait::async_trait;
use docsync_core::CloseReason;

/// A fresh short-lived realtime endpoint and auth token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlAndToken {
    /// Base realtime endpoint URL.
    pub url: String,
    /// Short-lived auth token.
    pub token: String,
}

/// Host-provided callbacks for one document session's connection.
///
/// The sink methods are fired from the manager's event-handling tasks and
/// must not block.
#[async_trait]
pub trait ConnectionCallbacks: Send + Sync {
    /// Supply a fresh realtime endpoint and auth token.
    async fn get_url_and_token(&self) -> Result<UrlAndToken, String>;

    /// The resume-point commit id to include in the connection URL, if any.
    fn latest_commit_id(&self) -> Option<String>;

    /// A connection attempt has started opening a socket.
    fn on_connecting(&self);

    /// The socket is established and the heartbeat is armed.
    fn on_open(&self);

    /// A raw inbound frame, delivered in transport order for decoding and
    /// application by the document merge layer.
    fn on_message(&self, payload: Vec<u8>);

    /// A connection that had reached open has closed.
    fn on_close(&self, reason: &CloseReason);

    /// A connection attempt failed before ever reaching open.
    fn on_fail_to_connect(&self, reason: &CloseReason);

    /// An outbound payload could not be encrypted; `message` is suitable for
    /// direct display to the user.
    fn on_encryption_error(&self, message: &str);
}
