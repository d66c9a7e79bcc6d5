//! Per-item encryption of outbound message payloads.
//!
//! [`MessageEncryptor`] wraps an injected [`UpdateCipher`] and binds each
//! ciphertext to the specific message slot it is attached to, by deriving the
//! authenticated associated data from the item's routing metadata. Ciphertext
//! lifted out of one update cannot be replayed into a different update or
//! into an event.

use std::sync::Arc;

use async_trait::async_trait;
use docsync_core::EncryptionError;
use docsync_core::protocol::{DocumentUpdate, RealtimeEvent};

/// The injected cryptographic primitive.
///
/// Key derivation and management are the host's concern; the transport only
/// ever sees this seam.
#[async_trait]
pub trait UpdateCipher: Send + Sync {
    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    async fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError>;
}

/// Encrypts outbound update and event payloads item by item.
#[derive(Clone)]
pub struct MessageEncryptor {
    cipher: Arc<dyn UpdateCipher>,
}

impl MessageEncryptor {
    /// Wrap an injected cipher.
    #[must_use]
    pub fn new(cipher: Arc<dyn UpdateCipher>) -> Self {
        Self { cipher }
    }

    /// Encrypt a document update's content, bound to its id and ordering
    /// metadata.
    pub async fn encrypt_update(
        &self,
        update: &DocumentUpdate,
    ) -> Result<Vec<u8>, EncryptionError> {
        self.cipher
            .encrypt(&update.content, &update_aad(update))
            .await
    }

    /// Encrypt an event's content, bound to its event type.
    pub async fn encrypt_event(&self, event: &RealtimeEvent) -> Result<Vec<u8>, EncryptionError> {
        self.cipher.encrypt(&event.content, &event_aad(event)).await
    }
}

/// Associated data binding a ciphertext to one update slot.
fn update_aad(update: &DocumentUpdate) -> Vec<u8> {
    let commit = update.commit_id.as_deref().unwrap_or("");
    format!("du:{}:{}:{commit}", update.id, update.sequence).into_bytes()
}

/// Associated data binding a ciphertext to one event slot.
fn event_aad(event: &RealtimeEvent) -> Vec<u8> {
    format!("ev:{}", event.event_type.as_str()).into_bytes()
}
