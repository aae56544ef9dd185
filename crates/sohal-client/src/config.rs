//! Client configuration and reconnect backoff policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Default per-call timeout in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
/// Default maximum reconnect attempts after an unexpected drop.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default maximum inbound message size in bytes. Depth-camera frames are
/// large, so this is generous.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512 * 1024 * 1024;

/// Configuration for one client connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Connect timeout in ms (default: 10000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Reconnect automatically after an unexpected drop (default: false).
    #[serde(default)]
    pub auto_reconnect: bool,
    /// Maximum reconnect attempts before giving up (default: 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Backoff policy between reconnect attempts.
    #[serde(default)]
    pub reconnect_backoff: BackoffConfig,
    /// Per-call timeout in ms used when the caller passes none
    /// (default: 30000).
    #[serde(default = "default_call_timeout_ms")]
    pub default_call_timeout_ms: u64,
    /// Maximum inbound WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}
fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}
fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            auto_reconnect: false,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff: BackoffConfig::default(),
            default_call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Default per-call timeout as a [`Duration`].
    #[must_use]
    pub fn default_call_timeout(&self) -> Duration {
        Duration::from_millis(self.default_call_timeout_ms)
    }
}

/// Exponential backoff with symmetric jitter for reconnection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Base delay for exponential backoff in ms (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0.2).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter_factor() -> f64 {
    0.2
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl BackoffConfig {
    /// Delay before reconnect attempt `attempt` (zero-based).
    ///
    /// Formula: `min(max_delay, base_delay * 2^attempt)` scaled by
    /// `1 + (random * 2 - 1) * jitter_factor`, so a jitter factor of 0.2
    /// varies the delay by up to ±20%. `random` must be in `[0.0, 1.0)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32, random: f64) -> Duration {
        let exponential = self.base_delay_ms.saturating_mul(1u64 << attempt.min(31));
        let capped = exponential.min(self.max_delay_ms);

        let jitter = 1.0 + (random * 2.0 - 1.0) * self.jitter_factor;
        let with_jitter = (capped as f64) * jitter;

        Duration::from_millis(with_jitter.round().max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── ClientConfig ────────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.connect_timeout_ms, 10_000);
        assert!(!cfg.auto_reconnect);
        assert_eq!(cfg.max_reconnect_attempts, 5);
        assert_eq!(cfg.default_call_timeout_ms, 30_000);
        assert_eq!(cfg.max_message_size, 512 * 1024 * 1024);
    }

    #[test]
    fn config_durations() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.default_call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn config_serde_defaults() {
        let cfg: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.connect_timeout_ms, 10_000);
        assert!(!cfg.auto_reconnect);
        assert_eq!(cfg.reconnect_backoff.base_delay_ms, 500);
    }

    #[test]
    fn config_backoff_key_is_reconnect_backoff() {
        let cfg: ClientConfig =
            serde_json::from_str(r#"{"reconnectBackoff":{"baseDelayMs":100}}"#).unwrap();
        assert_eq!(cfg.reconnect_backoff.base_delay_ms, 100);

        let json = serde_json::to_string(&ClientConfig::default()).unwrap();
        assert!(json.contains("\"reconnectBackoff\""));
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = ClientConfig {
            auto_reconnect: true,
            max_reconnect_attempts: 2,
            ..ClientConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert!(back.auto_reconnect);
        assert_eq!(back.max_reconnect_attempts, 2);
    }

    // ── BackoffConfig ───────────────────────────────────────────────

    #[test]
    fn backoff_exponential_growth() {
        let backoff = BackoffConfig {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.0,
        };
        // random is irrelevant at jitter 0
        assert_eq!(backoff.delay_for_attempt(0, 0.5), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_attempt(1, 0.5), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for_attempt(2, 0.5), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_caps_at_max() {
        let backoff = BackoffConfig {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.0,
        };
        assert_eq!(
            backoff.delay_for_attempt(20, 0.5),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn backoff_jitter_bounds() {
        let backoff = BackoffConfig::default();
        // random = 0.0 → -20%, random = 1.0 → +20%
        assert_eq!(backoff.delay_for_attempt(0, 0.0), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_attempt(0, 0.5), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_attempt(0, 1.0), Duration::from_millis(600));
    }

    #[test]
    fn backoff_high_attempt_no_overflow() {
        let backoff = BackoffConfig::default();
        let delay = backoff.delay_for_attempt(100, 0.5);
        assert!(delay <= Duration::from_millis(36_000));
    }
}
