//! Connection lifecycle management for one document session.
//!
//! `ConnectionManager` owns the full socket lifecycle: it fetches a fresh
//! URL and token from the host, opens the socket, arms a heartbeat that any
//! inbound traffic rearms, forwards frames to the host, and decides on every
//! close whether to schedule a reconnect. The only close that suppresses
//! reconnection is an unauthorized one; everything else self-heals with
//! backoff.
//!
//! Every timer (heartbeat, scheduled reconnect) is a spawned task holding a
//! `CancellationToken` stored alongside the state it protects, and every
//! teardown path cancels them explicitly.

use std::sync::Arc;
use std::time::Duration;

use docsync_core::close_reason::{CODE_TIMEOUT, CloseReason};
use docsync_core::errors::ENCRYPTION_FAILURE_USER_MESSAGE;
use docsync_core::protocol::{
    ClientMessage, DocumentUpdate, DocumentUpdateBatch, EventBatch, RealtimeEvent,
};
use docsync_core::{EncryptionError, TransportError, build_connection_url};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffState;
use crate::callbacks::{ConnectionCallbacks, UrlAndToken};
use crate::config::TransportConfig;
use crate::encryptor::{MessageEncryptor, UpdateCipher};

/// Capacity of the outbound frame channel feeding the socket writer task.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Where the state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No socket, not destroyed. `connect()` may be called.
    Idle,
    /// Fetching a token or waiting for the handshake.
    Connecting,
    /// Socket established, heartbeat armed.
    Open,
    /// Terminal. No further transitions permitted.
    Destroyed,
}

/// Which part of the host initiated a broadcast. Used as a metrics label
/// when a broadcast fails to encrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastSource {
    /// The document editor propagating an update.
    Editor,
    /// The comments layer.
    Comments,
    /// Presence/cursor state.
    Presence,
}

impl BroadcastSource {
    /// Metrics label for this source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Editor => "editor",
            Self::Comments => "comments",
            Self::Presence => "presence",
        }
    }
}

/// An outbound message with plaintext item contents.
///
/// The broadcast path encrypts each item and frames the results into the
/// matching envelope kind.
#[derive(Debug, Clone)]
pub enum OutgoingMessage {
    /// Document updates to transmit.
    DocumentUpdates(Vec<DocumentUpdate>),
    /// Collaborative events to transmit.
    Events(Vec<RealtimeEvent>),
}

/// Mutable connection state. One instance per logical document session,
/// guarded by a single mutex; individual lifecycle steps never hold the
/// lock across an await point.
struct ConnState {
    phase: Phase,
    /// Incremented per connection attempt; socket events carrying a stale
    /// epoch are ignored.
    epoch: u64,
    /// Whether the current attempt ever reached `Open`. Deliberately
    /// distinct from `BackoffState`'s connected flag: it selects between the
    /// `on_close` and `on_fail_to_connect` callbacks.
    ever_opened: bool,
    sender: Option<mpsc::Sender<Message>>,
    heartbeat: Option<CancellationToken>,
    reconnect: Option<CancellationToken>,
    socket: Option<CancellationToken>,
}

/// Owns one logical connection's full lifecycle.
pub struct ConnectionManager {
    callbacks: Arc<dyn ConnectionCallbacks>,
    encryptor: MessageEncryptor,
    backoff: Arc<BackoffState>,
    config: TransportConfig,
    state: Mutex<ConnState>,
}

impl ConnectionManager {
    /// Create a manager for one document session.
    pub fn new(
        callbacks: Arc<dyn ConnectionCallbacks>,
        cipher: Arc<dyn UpdateCipher>,
        config: TransportConfig,
    ) -> Arc<Self> {
        let backoff = BackoffState::new(&config);
        Arc::new(Self {
            callbacks,
            encryptor: MessageEncryptor::new(cipher),
            backoff,
            config,
            state: Mutex::new(ConnState {
                phase: Phase::Idle,
                epoch: 0,
                ever_opened: false,
                sender: None,
                heartbeat: None,
                reconnect: None,
                socket: None,
            }),
        })
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// The backoff state owned by this manager. Exposed so the host can
    /// reset attempts on an explicit user-triggered reconnect.
    #[must_use]
    pub fn backoff(&self) -> &Arc<BackoffState> {
        &self.backoff
    }

    /// Open a connection.
    ///
    /// Idempotent: a no-op while a socket attempt is in flight or open, so
    /// rapid repeated calls never create duplicate sockets. Fails only when
    /// the manager is destroyed. A token-fetch failure is absorbed and
    /// retried indefinitely with backoff.
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        let epoch = {
            let mut st = self.state.lock();
            match st.phase {
                Phase::Destroyed => return Err(TransportError::Destroyed),
                Phase::Connecting | Phase::Open => {
                    debug!(phase = ?st.phase, "connect ignored, attempt already in flight");
                    return Ok(());
                }
                Phase::Idle => {
                    st.phase = Phase::Connecting;
                    st.epoch += 1;
                    st.ever_opened = false;
                    st.epoch
                }
            }
        };

        counter!("docsync_connect_attempts_total").increment(1);

        let UrlAndToken { url, token } = match self.callbacks.get_url_and_token().await {
            Ok(v) => v,
            Err(error) => {
                warn!(error = %error, "failed to fetch realtime url and token");
                counter!("docsync_token_fetch_failures_total").increment(1);
                self.backoff.did_fail_to_fetch_token();
                self.abandon_attempt(epoch);
                self.schedule_reconnect(self.backoff.reconnect_delay(false));
                return Ok(());
            }
        };

        if !self.still_connecting(epoch) {
            // Destroyed or superseded while the token fetch was pending.
            return Ok(());
        }

        let commit_id = self.callbacks.latest_commit_id();
        let connection_url = build_connection_url(&url, &token, commit_id.as_deref());

        self.callbacks.on_connecting();

        match connect_async(connection_url.as_str()).await {
            Ok((stream, _response)) => {
                self.handle_socket_opened(epoch, stream);
                Ok(())
            }
            Err(error) => {
                self.handle_connect_failure(epoch, &error);
                Ok(())
            }
        }
    }

    /// Close the socket if present without destroying the manager.
    ///
    /// Cancels any pending reconnect; `connect()` may be called again later.
    /// No lifecycle callbacks fire for a host-initiated disconnect.
    pub fn disconnect(&self) {
        let mut st = self.state.lock();
        if st.phase == Phase::Destroyed {
            return;
        }
        Self::teardown_locked(&mut st);
        st.phase = Phase::Idle;
        info!("realtime socket disconnected by host");
    }

    /// Permanently tear down the manager. After this call `connect()` fails.
    pub fn destroy(&self) {
        {
            let mut st = self.state.lock();
            if st.phase == Phase::Destroyed {
                return;
            }
            Self::teardown_locked(&mut st);
            st.phase = Phase::Destroyed;
        }
        self.backoff.destroy();
        info!("connection manager destroyed");
    }

    /// The host's OS-level offline signal: close the socket now instead of
    /// waiting for the heartbeat to notice.
    pub fn handle_network_offline(&self) {
        info!("network offline signal, closing realtime socket");
        self.disconnect();
    }

    /// The host's OS-level online signal: previous failures are stale, so
    /// reset backoff and reconnect immediately.
    pub async fn handle_network_online(self: &Arc<Self>) -> Result<(), TransportError> {
        info!("network online signal, reconnecting");
        self.backoff.reset_attempts();
        self.connect().await
    }

    /// Encrypt and transmit an outbound message.
    ///
    /// Silently drops the message when the connection is not open. If any
    /// item fails to encrypt the whole broadcast is aborted with nothing
    /// sent, the host's encryption-error sink fires with a user-facing
    /// message, and the error propagates to the caller; the socket stays
    /// open.
    ///
    /// Concurrent broadcasts are not ordered relative to each other; callers
    /// that need strict ordering must serialize their own calls.
    pub async fn broadcast_message(
        &self,
        message: OutgoingMessage,
        source: BroadcastSource,
    ) -> Result<(), TransportError> {
        let sender = {
            let st = self.state.lock();
            if st.phase != Phase::Open {
                debug!(
                    phase = ?st.phase,
                    source = source.as_str(),
                    "dropping broadcast, connection not open"
                );
                return Ok(());
            }
            st.sender.clone()
        };
        let Some(sender) = sender else {
            return Ok(());
        };

        let envelope = match self.encrypt_into_envelope(message).await {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(
                    error = %error,
                    source = source.as_str(),
                    "aborting broadcast, encryption failed"
                );
                counter!("docsync_encryption_errors_total", "source" => source.as_str())
                    .increment(1);
                self.callbacks
                    .on_encryption_error(ENCRYPTION_FAILURE_USER_MESSAGE);
                return Err(error.into());
            }
        };

        let bytes = envelope.encode()?;
        sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        counter!("docsync_broadcasts_total", "source" => source.as_str()).increment(1);
        Ok(())
    }

    /// Encrypt every item of a message and frame the ciphertexts into the
    /// envelope kind matching the message. Aborts on the first failure.
    async fn encrypt_into_envelope(
        &self,
        message: OutgoingMessage,
    ) -> Result<ClientMessage, EncryptionError> {
        match message {
            OutgoingMessage::DocumentUpdates(updates) => {
                let mut encrypted = Vec::with_capacity(updates.len());
                for update in updates {
                    let content = self.encryptor.encrypt_update(&update).await?;
                    encrypted.push(DocumentUpdate { content, ..update });
                }
                Ok(ClientMessage::DocumentUpdates(DocumentUpdateBatch {
                    updates: encrypted,
                }))
            }
            OutgoingMessage::Events(events) => {
                let mut encrypted = Vec::with_capacity(events.len());
                for event in events {
                    let content = self.encryptor.encrypt_event(&event).await?;
                    encrypted.push(RealtimeEvent { content, ..event });
                }
                Ok(ClientMessage::Events(EventBatch { events: encrypted }))
            }
        }
    }

    /// Wire up reader/writer tasks for a freshly opened socket.
    fn handle_socket_opened(
        self: &Arc<Self>,
        epoch: u64,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut ws_tx, mut ws_rx) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_CHANNEL_CAPACITY);
        let socket_token = CancellationToken::new();

        {
            let mut st = self.state.lock();
            if st.epoch != epoch || st.phase != Phase::Connecting {
                debug!("socket opened for a superseded attempt, dropping it");
                return;
            }
            st.phase = Phase::Open;
            st.ever_opened = true;
            st.sender = Some(out_tx);
            if let Some(old) = st.socket.replace(socket_token.clone()) {
                old.cancel();
            }
        }

        info!("realtime socket open");
        counter!("docsync_connects_total").increment(1);

        // Writer task: forwards the outbound channel to the socket.
        let writer_token = socket_token.clone();
        let _ = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_token.cancelled() => break,
                    frame = out_rx.recv() => match frame {
                        Some(frame) => {
                            if ws_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        // Reader task: any traffic rearms the heartbeat; binary frames go to
        // the host in transport order; the close event drives the state
        // machine.
        let manager = Arc::clone(self);
        let _ = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = socket_token.cancelled() => return,
                    frame = ws_rx.next() => match frame {
                        Some(Ok(Message::Binary(data))) => {
                            manager.arm_heartbeat(epoch);
                            manager.callbacks.on_message(data.to_vec());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map_or_else(CloseReason::stream_ended, |f| {
                                CloseReason::from_wire(
                                    u16::from(f.code),
                                    Some(f.reason.to_string()),
                                )
                            });
                            manager.handle_socket_closed(epoch, &reason);
                            return;
                        }
                        Some(Ok(_)) => {
                            // Ping, pong, and text frames all count as traffic.
                            manager.arm_heartbeat(epoch);
                        }
                        Some(Err(error)) => {
                            // Logged only; the subsequent close or stream end
                            // drives the state machine.
                            warn!(error = %error, "realtime socket error");
                        }
                        None => {
                            manager.handle_socket_closed(epoch, &CloseReason::stream_ended());
                            return;
                        }
                    }
                }
            }
        });

        self.arm_heartbeat(epoch);
        self.backoff.did_open();
        self.callbacks.on_open();
    }

    /// A connection attempt failed during the handshake.
    fn handle_connect_failure(self: &Arc<Self>, epoch: u64, error: &WsError) {
        let reason = match error {
            WsError::Http(response)
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                CloseReason::unauthorized(format!(
                    "handshake rejected with status {}",
                    response.status()
                ))
            }
            other => CloseReason::connect_failure(other.to_string()),
        };

        {
            let mut st = self.state.lock();
            if st.epoch != epoch || st.phase != Phase::Connecting {
                return;
            }
            st.phase = Phase::Idle;
        }

        warn!(%reason, "failed to open realtime socket");
        counter!("docsync_connect_failures_total").increment(1);
        self.callbacks.on_fail_to_connect(&reason);
        self.backoff.did_close();

        if reason.code.is_unauthorized() {
            warn!("unauthorized handshake, awaiting host re-authentication");
            return;
        }
        self.schedule_reconnect(self.backoff.reconnect_delay(false));
    }

    /// The socket closed (server close frame, stream end, or local
    /// heartbeat expiry). Classifies the reason, notifies the host, and
    /// schedules a reconnect unless the close was unauthorized.
    fn handle_socket_closed(self: &Arc<Self>, epoch: u64, reason: &CloseReason) {
        let ever_opened = {
            let mut st = self.state.lock();
            if st.epoch != epoch || st.phase == Phase::Destroyed || st.phase == Phase::Idle {
                return;
            }
            Self::teardown_locked(&mut st);
            st.phase = Phase::Idle;
            st.ever_opened
        };

        info!(
            %reason,
            category = reason.code.category().as_str(),
            "realtime socket closed"
        );
        counter!(
            "docsync_disconnects_total",
            "category" => reason.code.category().as_str()
        )
        .increment(1);

        if ever_opened {
            self.callbacks.on_close(reason);
        } else {
            self.callbacks.on_fail_to_connect(reason);
        }

        self.backoff.did_close();

        if reason.code.is_unauthorized() {
            warn!("unauthorized close, awaiting host re-authentication");
            return;
        }
        self.schedule_reconnect(self.backoff.reconnect_delay(false));
    }

    /// Rearm the dead-connection timer. Called on open and on every inbound
    /// frame; if it ever fires, the manager closes the socket itself. This
    /// catches silently-dead connections (NAT timeout, sleeping machine)
    /// that never deliver a close event.
    fn arm_heartbeat(self: &Arc<Self>, epoch: u64) {
        let token = CancellationToken::new();
        {
            let mut st = self.state.lock();
            if st.epoch != epoch || st.phase != Phase::Open {
                return;
            }
            if let Some(old) = st.heartbeat.replace(token.clone()) {
                old.cancel();
            }
        }

        let manager = Arc::clone(self);
        let window = self.config.heartbeat_window();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = time::sleep(window) => manager.handle_heartbeat_timeout(epoch),
                () = token.cancelled() => {}
            }
        });
    }

    /// No traffic for a full heartbeat window: actively close the socket.
    fn handle_heartbeat_timeout(self: &Arc<Self>, epoch: u64) {
        let sender = {
            let st = self.state.lock();
            if st.epoch != epoch || st.phase != Phase::Open {
                return;
            }
            st.sender.clone()
        };

        warn!("no traffic within heartbeat window, closing socket");
        counter!("docsync_heartbeat_timeouts_total").increment(1);

        if let Some(sender) = sender {
            let frame = CloseFrame {
                code: WsCloseCode::from(CODE_TIMEOUT),
                reason: "heartbeat timeout".into(),
            };
            let _ = sender.try_send(Message::Close(Some(frame)));
        }
        self.handle_socket_closed(epoch, &CloseReason::heartbeat_timeout());
    }

    /// Arm a one-shot reconnect timer, replacing any pending one. The timer
    /// survives `destroy()` being called after it is armed, but the
    /// `connect()` it fires checks the destroyed flag and fails fast.
    fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        let token = CancellationToken::new();
        {
            let mut st = self.state.lock();
            if st.phase == Phase::Destroyed {
                return;
            }
            if let Some(old) = st.reconnect.replace(token.clone()) {
                old.cancel();
            }
        }

        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempts = self.backoff.attempts(),
            "reconnect scheduled"
        );

        let manager = Arc::clone(self);
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = time::sleep(delay) => {
                    if let Err(error) = manager.connect().await {
                        debug!(error = %error, "scheduled reconnect aborted");
                    }
                }
                () = token.cancelled() => {}
            }
        });
    }

    /// Revert `Connecting` back to `Idle` after an aborted attempt.
    fn abandon_attempt(&self, epoch: u64) {
        let mut st = self.state.lock();
        if st.epoch == epoch && st.phase == Phase::Connecting {
            st.phase = Phase::Idle;
        }
    }

    fn still_connecting(&self, epoch: u64) -> bool {
        let st = self.state.lock();
        st.epoch == epoch && st.phase == Phase::Connecting
    }

    /// Cancel every timer and task tied to the current socket and drop the
    /// sender. The caller decides the next phase.
    fn teardown_locked(st: &mut ConnState) {
        if let Some(sender) = st.sender.take() {
            let _ = sender.try_send(Message::Close(None));
        }
        if let Some(token) = st.heartbeat.take() {
            token.cancel();
        }
        if let Some(token) = st.reconnect.take() {
            token.cancel();
        }
        if let Some(token) = st.socket.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;

    /// Callback fake that always fails the token fetch and counts the calls.
    struct FailingTokenCallbacks {
        fetches: AtomicU32,
    }

    #[async_trait]
    impl ConnectionCallbacks for FailingTokenCallbacks {
        async fn get_url_and_token(&self) -> Result<UrlAndToken, String> {
            let _ = self.fetches.fetch_add(1, Ordering::Relaxed);
            Err("api unavailable".into())
        }
        fn latest_commit_id(&self) -> Option<String> {
            None
        }
        fn on_connecting(&self) {}
        fn on_open(&self) {}
        fn on_message(&self, _payload: Vec<u8>) {}
        fn on_close(&self, _reason: &CloseReason) {}
        fn on_fail_to_connect(&self, _reason: &CloseReason) {}
        fn on_encryption_error(&self, _message: &str) {}
    }

    struct NoopCipher;

    #[async_trait]
    impl crate::encryptor::UpdateCipher for NoopCipher {
        async fn encrypt(
            &self,
            plaintext: &[u8],
            _aad: &[u8],
        ) -> Result<Vec<u8>, EncryptionError> {
            Ok(plaintext.to_vec())
        }
    }

    fn manager_with_failing_token(base_delay_ms: u64) -> Arc<ConnectionManager> {
        let config = TransportConfig {
            base_delay_ms,
            ..TransportConfig::default()
        };
        ConnectionManager::new(
            Arc::new(FailingTokenCallbacks {
                fetches: AtomicU32::new(0),
            }),
            Arc::new(NoopCipher),
            config,
        )
    }

    #[tokio::test]
    async fn starts_idle() {
        let manager = manager_with_failing_token(1);
        assert_eq!(manager.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn connect_after_destroy_fails() {
        let manager = manager_with_failing_token(1);
        manager.destroy();
        assert_eq!(manager.phase(), Phase::Destroyed);
        assert_matches!(manager.connect().await, Err(TransportError::Destroyed));
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let manager = manager_with_failing_token(1);
        manager.destroy();
        manager.destroy();
        assert_eq!(manager.phase(), Phase::Destroyed);
    }

    #[tokio::test]
    async fn broadcast_while_idle_is_silently_dropped() {
        let manager = manager_with_failing_token(1);
        let message =
            OutgoingMessage::DocumentUpdates(vec![DocumentUpdate::new(0, None, vec![1])]);
        let result = manager
            .broadcast_message(message, BroadcastSource::Editor)
            .await;
        assert_matches!(result, Ok(()));
    }

    #[tokio::test]
    async fn token_fetch_failure_retries_with_backoff_until_destroyed() {
        let manager = manager_with_failing_token(1);
        manager.connect().await.unwrap();

        // Base delay of 1 ms keeps the retry loop fast; let a few cycles run.
        time::sleep(Duration::from_millis(100)).await;
        let retried = manager.backoff().attempts();
        assert!(retried > 1, "expected repeated retries, saw {retried}");

        manager.destroy();
        // A fetch already in flight at destroy time may still count once.
        time::sleep(Duration::from_millis(20)).await;
        let settled = manager.backoff().attempts();
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.backoff().attempts(), settled);
    }

    #[tokio::test]
    async fn disconnect_while_idle_is_a_noop() {
        let manager = manager_with_failing_token(1);
        manager.disconnect();
        assert_eq!(manager.phase(), Phase::Idle);
    }
}
