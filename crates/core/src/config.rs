use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Queue / scheduler ─────────────────────────────────────────

/// Admission and scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum pending + running tasks. Submissions beyond this are
    /// rejected outright, not blocked.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Consecutive failures that open the circuit breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Milliseconds the breaker stays open before auto-closing.
    #[serde(default = "default_cooldown_ms")]
    pub breaker_cooldown_ms: u64,
    /// Milliseconds between resource-gate re-checks.
    #[serde(default = "default_gate_retry_ms")]
    pub gate_retry_ms: u64,
}

fn default_capacity() -> usize { 50 }
fn default_failure_threshold() -> u32 { 3 }
fn default_cooldown_ms() -> u64 { 30_000 }
fn default_gate_retry_ms() -> u64 { 5_000 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            failure_threshold: default_failure_threshold(),
            breaker_cooldown_ms: default_cooldown_ms(),
            gate_retry_ms: default_gate_retry_ms(),
        }
    }
}

impl QueueConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            capacity: env_usize("KILN_QUEUE_CAPACITY", default_capacity()),
            failure_threshold: env_u32("KILN_FAILURE_THRESHOLD", default_failure_threshold()),
            breaker_cooldown_ms: env_u64("KILN_BREAKER_COOLDOWN_MS", default_cooldown_ms()),
            gate_retry_ms: env_u64("KILN_GATE_RETRY_MS", default_gate_retry_ms()),
        }
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    pub fn gate_retry_delay(&self) -> Duration {
        Duration::from_millis(self.gate_retry_ms)
    }
}

// ── Metrics ───────────────────────────────────────────────────

/// Metrics window and snapshot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Maximum events held in the rolling window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Milliseconds between queue-state snapshots while polling is active.
    #[serde(default = "default_snapshot_ms")]
    pub snapshot_interval_ms: u64,
}

fn default_window_size() -> usize { 500 }
fn default_snapshot_ms() -> u64 { 5_000 }

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            snapshot_interval_ms: default_snapshot_ms(),
        }
    }
}

impl MetricsConfig {
    pub fn from_env() -> Self {
        Self {
            window_size: env_usize("KILN_METRICS_WINDOW", default_window_size()),
            snapshot_interval_ms: env_u64("KILN_SNAPSHOT_INTERVAL_MS", default_snapshot_ms()),
        }
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, 50);
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.breaker_cooldown_ms, 30_000);
        assert_eq!(config.gate_retry_ms, 5_000);
    }

    #[test]
    fn metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert_eq!(config.window_size, 500);
        assert_eq!(config.snapshot_interval(), Duration::from_secs(5));
    }

    #[test]
    fn queue_config_durations() {
        let config = QueueConfig::default();
        assert_eq!(config.breaker_cooldown(), Duration::from_secs(30));
        assert_eq!(config.gate_retry_delay(), Duration::from_secs(5));
    }

    #[test]
    fn serde_fills_missing_fields_with_defaults() {
        let config: QueueConfig = serde_json::from_str(r#"{ "capacity": 10 }"#).unwrap();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.failure_threshold, 3);
    }
}
