//! # docsync-transport
//!
//! The tokio side of the docsync realtime collaboration transport: a
//! reconnecting WebSocket connection manager for a client participating in a
//! collaborative editing session.
//!
//! - [`ConnectionManager`]: owns one logical connection's full lifecycle,
//!   from connect through heartbeat, broadcast, and close/reconnect decisions
//! - [`BackoffState`]: attempt counting, jittered reconnect delays, and the
//!   stability window that forgives old failures
//! - [`MessageEncryptor`]: per-item encryption of outbound payloads over an
//!   injected [`UpdateCipher`]
//! - [`ConnectionCallbacks`]: the capability interface the host implements
//!
//! The manager deliberately separates *when to retry* ([`BackoffState`],
//! testable without I/O) from *how to retry* (the manager's timers and socket
//! handling), and treats any observed inbound traffic as the liveness signal
//! instead of explicit ping/pong.

#![deny(unsafe_code)]

pub mod backoff;
pub mod callbacks;
pub mod config;
pub mod connection;
pub mod encryptor;

pub use backoff::BackoffState;
pub use callbacks::{ConnectionCallbacks, UrlAndToken};
pub use config::TransportConfig;
pub use connection::{BroadcastSource, ConnectionManager, OutgoingMessage, Phase};
pub use encryptor::{MessageEncryptor, UpdateCipher};
