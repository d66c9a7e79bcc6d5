//! Binary wire protocol for outbound realtime messages.
//!
//! The top-level frame is a [`ClientMessage`] envelope holding exactly one of
//! a document-update batch or a collaborative-event batch. Each item inside a
//! batch carries opaque ciphertext plus the clear routing metadata (update id,
//! sequence marker, commit id) the server needs for ordered application.
//! Ciphertext is produced per item, never per envelope.
//!
//! Frames are bincode-encoded and sent as binary WebSocket messages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::TransportError;

/// Collaborative event kinds a client can broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Cursor/selection presence state.
    Presence,
    /// A comment thread message.
    Comment,
    /// Ask other clients to re-broadcast their presence state.
    RequestPresenceBroadcast,
}

impl EventType {
    /// Label used for logging and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Presence => "presence",
            Self::Comment => "comment",
            Self::RequestPresenceBroadcast => "request_presence_broadcast",
        }
    }
}

/// One document update.
///
/// `content` is plaintext while the update sits in the host's hands and
/// ciphertext once it crosses the wire; the transport's broadcast path swaps
/// one for the other before framing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    /// Unique id for this update.
    pub id: Uuid,
    /// Position of this update within the author's stream.
    pub sequence: u64,
    /// Commit the update applies on top of, when known.
    pub commit_id: Option<String>,
    /// Update payload.
    pub content: Vec<u8>,
}

impl DocumentUpdate {
    /// Create an update with a fresh time-ordered id.
    #[must_use]
    pub fn new(sequence: u64, commit_id: Option<String>, content: Vec<u8>) -> Self {
        Self {
            id: Uuid::now_v7(),
            sequence,
            commit_id,
            content,
        }
    }
}

/// One collaborative event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// What kind of event this is.
    pub event_type: EventType,
    /// Event payload.
    pub content: Vec<u8>,
}

/// A batch of document updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpdateBatch {
    /// Updates in application order.
    pub updates: Vec<DocumentUpdate>,
}

/// A batch of collaborative events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Events in emission order.
    pub events: Vec<RealtimeEvent>,
}

/// The outermost wire container. Exactly one batch kind per frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// A document-update batch.
    DocumentUpdates(DocumentUpdateBatch),
    /// A collaborative-event batch.
    Events(EventBatch),
}

impl ClientMessage {
    /// Serialize the envelope for a binary WebSocket frame.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransportError::Encode(e.to_string()))
    }

    /// Deserialize an envelope from a binary frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(message, _)| message)
            .map_err(|e| TransportError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn update_envelope_roundtrips() {
        let update = DocumentUpdate::new(7, Some("commit-456".into()), vec![0xDE, 0xAD]);
        let message = ClientMessage::DocumentUpdates(DocumentUpdateBatch {
            updates: vec![update.clone()],
        });

        let bytes = message.encode().unwrap();
        let decoded = ClientMessage::decode(&bytes).unwrap();
        assert_matches!(decoded, ClientMessage::DocumentUpdates(batch) => {
            assert_eq!(batch.updates, vec![update]);
        });
    }

    #[test]
    fn event_envelope_keeps_order() {
        let events = vec![
            RealtimeEvent {
                event_type: EventType::Comment,
                content: vec![1],
            },
            RealtimeEvent {
                event_type: EventType::Presence,
                content: vec![2],
            },
        ];
        let message = ClientMessage::Events(EventBatch {
            events: events.clone(),
        });

        let bytes = message.encode().unwrap();
        let decoded = ClientMessage::decode(&bytes).unwrap();
        assert_matches!(decoded, ClientMessage::Events(batch) => {
            assert_eq!(batch.events, events);
        });
    }

    #[test]
    fn envelope_kinds_are_distinguishable() {
        let updates = ClientMessage::DocumentUpdates(DocumentUpdateBatch { updates: vec![] })
            .encode()
            .unwrap();
        let events = ClientMessage::Events(EventBatch { events: vec![] })
            .encode()
            .unwrap();
        assert_ne!(updates, events);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result = ClientMessage::decode(&[0xFF; 16]);
        assert_matches!(result, Err(TransportError::Encode(_)));
    }

    #[test]
    fn fresh_updates_get_distinct_ids() {
        let a = DocumentUpdate::new(0, None, vec![]);
        let b = DocumentUpdate::new(0, None, vec![]);
        assert_ne!(a.id, b.id);
    }
}
