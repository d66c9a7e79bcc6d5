//! Transport timing configuration.

use serde::{Deserialize, Serialize};

/// Default base delay for reconnect backoff in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = docsync_core::backoff::DEFAULT_BASE_DELAY_MS;
/// Default reconnect delay ceiling in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = docsync_core::backoff::DEFAULT_MAX_DELAY_MS;
/// Default stability window in milliseconds: how long a connection must stay
/// open before prior failures are forgotten.
pub const DEFAULT_STABILITY_WINDOW_MS: u64 = 10_000;
/// Default server heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Default grace period added on top of the heartbeat interval.
pub const DEFAULT_HEARTBEAT_GRACE_MS: u64 = 2500;

/// Timing parameters for the connection manager.
///
/// Defaults match production behavior; tests shrink them to keep runtimes
/// reasonable. The backoff formula itself (exponent floor, jitter band) is
/// fixed and not configurable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Base delay for exponential backoff in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling for the reconnect delay in ms (default: 32000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Connected time before attempts reset, in ms (default: 10000).
    #[serde(default = "default_stability_window_ms")]
    pub stability_window_ms: u64,
    /// Expected server heartbeat interval in ms (default: 30000).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Grace period past the heartbeat interval before the connection is
    /// declared dead, in ms (default: 2500).
    #[serde(default = "default_heartbeat_grace_ms")]
    pub heartbeat_grace_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_stability_window_ms() -> u64 {
    DEFAULT_STABILITY_WINDOW_MS
}
fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}
fn default_heartbeat_grace_ms() -> u64 {
    DEFAULT_HEARTBEAT_GRACE_MS
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            stability_window_ms: DEFAULT_STABILITY_WINDOW_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_grace_ms: DEFAULT_HEARTBEAT_GRACE_MS,
        }
    }
}

impl TransportConfig {
    /// Duration the heartbeat timer waits before declaring the connection
    /// dead: interval plus grace.
    #[must_use]
    pub fn heartbeat_window(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval_ms + self.heartbeat_grace_ms)
    }
}
