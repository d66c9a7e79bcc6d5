//! Reconnection timing state for one logical connection.
//!
//! Pure bookkeeping plus one timer: attempts go up on every close or
//! token-fetch failure, and a one-shot stability timer forgives them all once
//! a connection has stayed open for the configured window. Delay math lives
//! in [`docsync_core::backoff`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use docsync_core::backoff::{apply_jitter, reconnect_delay_ms};
use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TransportConfig;

/// Tracks connection attempt count and computes reconnect delays.
///
/// Owned exclusively by one `ConnectionManager`; never shared across
/// document sessions, so concurrent sessions cannot pollute each other's
/// reconnection state.
pub struct BackoffState {
    attempts: AtomicU32,
    connected: AtomicBool,
    /// Cancels the pending stability timer, if one is armed.
    stability: Mutex<Option<CancellationToken>>,
    base_delay_ms: u64,
    max_delay_ms: u64,
    stability_window: Duration,
}

impl BackoffState {
    /// Create backoff state with the given timing config.
    pub fn new(config: &TransportConfig) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            stability: Mutex::new(None),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            stability_window: Duration::from_millis(config.stability_window_ms),
        })
    }

    /// Mark connected and arm the one-shot stability timer.
    ///
    /// If the connection is still up when the window elapses, the attempt
    /// count resets to zero. An earlier pending timer is cancelled and
    /// replaced.
    pub fn did_open(self: &Arc<Self>) {
        self.connected.store(true, Ordering::Relaxed);

        let token = CancellationToken::new();
        if let Some(previous) = self.stability.lock().replace(token.clone()) {
            previous.cancel();
        }

        let state = Arc::clone(self);
        let window = self.stability_window;
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = time::sleep(window) => {
                    if state.connected.load(Ordering::Relaxed) {
                        state.attempts.store(0, Ordering::Relaxed);
                        debug!("connection stable, reconnect attempts reset");
                    }
                }
                () = token.cancelled() => {}
            }
        });
    }

    /// Mark disconnected and count the failure.
    pub fn did_close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        let _ = self.attempts.fetch_add(1, Ordering::Relaxed);
        self.cancel_stability_timer();
    }

    /// Count a token-fetch failure. Happens pre-socket, so the connected
    /// flag is left alone.
    pub fn did_fail_to_fetch_token(&self) {
        let _ = self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// The jittered delay to wait before the next reconnect attempt.
    #[must_use]
    pub fn reconnect_delay(&self, skip_delay: bool) -> Duration {
        if skip_delay {
            return Duration::ZERO;
        }
        let base = self.unjittered_ms();
        Duration::from_millis(apply_jitter(base, rand::random::<f64>()))
    }

    /// The delay floor for the next reconnect attempt, without jitter.
    #[must_use]
    pub fn reconnect_delay_without_jitter(&self, skip_delay: bool) -> Duration {
        if skip_delay {
            return Duration::ZERO;
        }
        Duration::from_millis(self.unjittered_ms())
    }

    /// Forget all recorded failures.
    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::Relaxed);
    }

    /// Number of failures since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Whether the owning connection is currently marked connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Cancel the stability timer. Must be called when the owning connection
    /// is torn down so the timer task does not outlive it.
    pub fn destroy(&self) {
        self.cancel_stability_timer();
    }

    fn unjittered_ms(&self) -> u64 {
        reconnect_delay_ms(self.attempts(), self.base_delay_ms, self.max_delay_ms)
    }

    fn cancel_stability_timer(&self) {
        if let Some(token) = self.stability.lock().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<BackoffState> {
        BackoffState::new(&TransportConfig::default())
    }

    #[test]
    fn consecutive_closes_double_the_delay_to_the_ceiling() {
        // No timer is armed by did_close, so no runtime is needed here.
        let state = state();
        let mut delays = Vec::new();
        for _ in 0..6 {
            state.did_close();
            delays.push(state.reconnect_delay_without_jitter(false).as_millis());
        }
        assert_eq!(delays, vec![2000, 4000, 8000, 16_000, 32_000, 32_000]);
    }

    #[tokio::test]
    async fn skip_delay_always_returns_zero() {
        let state = state();
        for _ in 0..5 {
            state.did_close();
            assert_eq!(state.reconnect_delay(true), Duration::ZERO);
            assert_eq!(state.reconnect_delay_without_jitter(true), Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn jittered_delay_stays_in_band() {
        let state = state();
        state.did_close();
        state.did_close();
        let base = state.reconnect_delay_without_jitter(false).as_millis();
        assert_eq!(base, 4000);
        for _ in 0..100 {
            let jittered = state.reconnect_delay(false).as_millis();
            assert!(jittered >= base);
            assert!((jittered as f64) < (base as f64) * 1.5);
        }
    }

    #[tokio::test]
    async fn reset_restores_the_fresh_instance_floor() {
        let state = state();
        for _ in 0..4 {
            state.did_close();
        }
        state.reset_attempts();
        let fresh = BackoffState::new(&TransportConfig::default());
        assert_eq!(
            state.reconnect_delay_without_jitter(false),
            fresh.reconnect_delay_without_jitter(false)
        );
        assert_eq!(state.reconnect_delay_without_jitter(false).as_millis(), 2000);
    }

    #[tokio::test]
    async fn token_fetch_failure_counts_without_touching_connected() {
        let state = state();
        state.did_fail_to_fetch_token();
        assert_eq!(state.attempts(), 1);
        assert!(!state.is_connected());

        state.did_open();
        state.did_fail_to_fetch_token();
        assert_eq!(state.attempts(), 2);
        assert!(state.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn stable_connection_resets_attempts_after_the_window() {
        let state = state();
        state.did_close();
        state.did_close();
        assert_eq!(state.attempts(), 2);

        state.did_open();
        time::sleep(Duration::from_millis(10_001)).await;
        assert_eq!(state.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_before_the_window_keeps_attempts() {
        let state = state();
        state.did_close();
        state.did_open();
        time::sleep(Duration::from_millis(5000)).await;
        state.did_close();
        time::sleep(Duration::from_millis(10_000)).await;
        // The stability timer was cancelled by the close; only the closes count.
        assert_eq!(state.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_rearms_the_window() {
        let state = state();
        state.did_close();
        state.did_open();
        time::sleep(Duration::from_millis(5000)).await;
        state.did_close();
        state.did_open();
        time::sleep(Duration::from_millis(10_001)).await;
        assert_eq!(state.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_cancels_the_stability_timer() {
        let state = state();
        state.did_close();
        state.did_close();
        state.did_open();
        state.destroy();
        time::sleep(Duration::from_millis(20_000)).await;
        assert_eq!(state.attempts(), 2);
    }
}
