//! # docsync-core
//!
//! Foundation types for the docsync realtime collaboration transport.
//!
//! This crate provides the portable, sync-only building blocks that the
//! tokio-side transport crate depends on:
//!
//! - **Backoff math**: exponential reconnect delays with jitter
//! - **Close reasons**: the close-code taxonomy and its telemetry categories
//! - **Wire protocol**: the binary message envelope for document updates and
//!   collaborative events
//! - **URL building**: realtime endpoint URLs with token and resume point
//! - **Errors**: `TransportError` hierarchy via `thiserror`
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod backoff;
pub mod close_reason;
pub mod errors;
pub mod logging;
pub mod protocol;
pub mod url;

pub use close_reason::{CloseCategory, CloseCode, CloseReason};
pub use errors::{EncryptionError, TransportError};
pub use protocol::{ClientMessage, DocumentUpdate, EventType, RealtimeEvent};
pub use url::build_connection_url;
