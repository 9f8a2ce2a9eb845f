use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for an editor session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Max characters of a template preview, ellipsis included.
    #[serde(default = "default_preview_max_chars")]
    pub preview_max_chars: usize,
    /// Max undo entries kept; oldest dropped first. 0 keeps everything.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// How long to wait for the runner stream to come back after it drops.
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Fixed auto-refresh interval for execution lists.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_preview_max_chars() -> usize {
    120
}

const fn default_history_limit() -> usize {
    50
}

const fn default_disconnect_grace_ms() -> u64 {
    10_000
}

const fn default_max_reconnect_attempts() -> u32 {
    3
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preview_max_chars: default_preview_max_chars(),
            history_limit: default_history_limit(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `BLOCKFLOW_*` environment variables.
    ///
    /// - `BLOCKFLOW_PREVIEW_MAX_CHARS`
    /// - `BLOCKFLOW_HISTORY_LIMIT`
    /// - `BLOCKFLOW_DISCONNECT_GRACE_MS`
    /// - `BLOCKFLOW_MAX_RECONNECT_ATTEMPTS`
    /// - `BLOCKFLOW_POLL_INTERVAL_MS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        overlay(&lookup, "BLOCKFLOW_PREVIEW_MAX_CHARS", &mut config.preview_max_chars);
        overlay(&lookup, "BLOCKFLOW_HISTORY_LIMIT", &mut config.history_limit);
        overlay(&lookup, "BLOCKFLOW_DISCONNECT_GRACE_MS", &mut config.disconnect_grace_ms);
        overlay(
            &lookup,
            "BLOCKFLOW_MAX_RECONNECT_ATTEMPTS",
            &mut config.max_reconnect_attempts,
        );
        overlay(&lookup, "BLOCKFLOW_POLL_INTERVAL_MS", &mut config.poll_interval_ms);
        config
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn with_preview_max_chars(mut self, max_chars: usize) -> Self {
        self.preview_max_chars = max_chars;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_disconnect_grace_ms(mut self, grace_ms: u64) -> Self {
        self.disconnect_grace_ms = grace_ms;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}

fn overlay<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::error!("Error parsing {}", key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_preview_contract() {
        let c = SessionConfig::default();
        assert_eq!(c.preview_max_chars, 120);
        assert_eq!(c.history_limit, 50);
        assert_eq!(c.disconnect_grace(), Duration::from_secs(10));
    }

    #[test]
    fn lookup_overlays_and_ignores_garbage() {
        let env = HashMap::from([
            ("BLOCKFLOW_HISTORY_LIMIT", "5"),
            ("BLOCKFLOW_POLL_INTERVAL_MS", "not-a-number"),
            ("BLOCKFLOW_MAX_RECONNECT_ATTEMPTS", " 7 "),
        ]);
        let c = SessionConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.history_limit, 5);
        assert_eq!(c.poll_interval_ms, 5_000);
        assert_eq!(c.max_reconnect_attempts, 7);
    }

    #[test]
    fn serde_fills_missing_fields() {
        let c: SessionConfig = serde_json::from_str(r#"{"history_limit": 3}"#).unwrap();
        assert_eq!(c.history_limit, 3);
        assert_eq!(c.preview_max_chars, 120);
    }
}
