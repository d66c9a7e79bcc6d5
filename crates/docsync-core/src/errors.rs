//! Error hierarchy for the realtime transport.
//!
//! Provides a structured error type system built on [`thiserror`]:
//!
//! - [`TransportError`]: Top-level enum covering all transport error domains
//! - [`EncryptionError`]: Failure of the injected encryption primitive
//!
//! Only two failures are ever meant to reach the end user directly: an
//! encryption failure during broadcast (surfaced with
//! [`ENCRYPTION_FAILURE_USER_MESSAGE`]) and an unauthorized session requiring
//! host-driven re-authentication. Everything else self-heals via backoff.

use thiserror::Error;

/// User-facing message surfaced through the host's encryption-error sink when
/// an outbound update cannot be encrypted.
pub const ENCRYPTION_FAILURE_USER_MESSAGE: &str =
    "A data integrity error occurred while sending your changes. \
     Your latest edits were not transmitted.";

/// Top-level error type for the realtime transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// `connect()` was called after `destroy()`. Programming error;
    /// fails immediately rather than silently queuing.
    #[error("connection manager has been destroyed")]
    Destroyed,

    /// The host callback could not supply a realtime URL and token.
    ///
    /// Recovered locally: the connection manager treats this like a close
    /// for backoff purposes and retries indefinitely.
    #[error("failed to fetch realtime url and token: {0}")]
    TokenFetch(String),

    /// The injected encryption primitive rejected an outbound payload.
    ///
    /// Fatal for the broadcast attempt that triggered it; the socket stays
    /// open.
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    /// The outbound envelope could not be serialized.
    #[error("failed to encode message envelope: {0}")]
    Encode(String),

    /// The socket send channel was closed or full.
    #[error("failed to send frame on socket: {0}")]
    Send(String),
}

/// Failure of the injected encryption primitive (e.g. key unavailable).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("encryption failed: {message}")]
pub struct EncryptionError {
    /// Reason reported by the underlying primitive.
    pub message: String,
}

impl EncryptionError {
    /// Create an encryption error from any displayable reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
