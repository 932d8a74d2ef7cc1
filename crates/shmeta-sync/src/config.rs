use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing of the bounded wait loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pause between attempts while waiting for an entry.
    pub retry_interval_ms: u64,
    /// How long `wait` keeps trying when the caller gives no timeout.
    pub wait_timeout_ms: u64,
    /// Longest a single round-trip may block on the instance; 0 disables
    /// the limit. Waiting calls are further bounded by their own budget.
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 50,
            wait_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = SyncConfig::default();
        assert_eq!(c.retry_interval(), Duration::from_millis(50));
        assert_eq!(c.wait_timeout(), Duration::from_secs(10));
        assert_eq!(c.request_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_request_timeout_means_unbounded() {
        let c = SyncConfig {
            request_timeout_ms: 0,
            ..SyncConfig::default()
        };
        assert_eq!(c.request_timeout(), None);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let c = SyncConfig {
            retry_interval_ms: 0,
            ..SyncConfig::default()
        };
        assert_eq!(c.retry_interval(), Duration::from_millis(1));
    }

    #[test]
    fn from_toml() {
        let c: SyncConfig = toml::from_str("retry_interval_ms = 20").unwrap();
        assert_eq!(c.retry_interval_ms, 20);
        assert_eq!(c.wait_timeout_ms, 10_000);
    }
}
