use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "blockflow.logs.jsonl";

/// Logging settings resolved from `BLOCKFLOW_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// Filter directive; `None` falls back to `RUST_LOG`, then `info`.
    pub level: Option<String>,
    /// JSONL output file; `None` logs compact lines to stderr.
    pub json_log_path: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ["BLOCKFLOW_OBSERVABILITY_ENABLED", "BLOCKFLOW_OBSERVABILITY"]
            .iter()
            .find_map(|key| lookup(key))
            .map(|raw| parse_bool(&raw).unwrap_or(true))
            .unwrap_or(true);
        Self {
            enabled,
            level: lookup("BLOCKFLOW_LOG_LEVEL").filter(|l| !l.trim().is_empty()),
            json_log_path: lookup("BLOCKFLOW_JSON_LOG_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Install the global subscriber once per process from [`LogSettings::from_env`].
///
/// - `BLOCKFLOW_OBSERVABILITY_ENABLED` / `BLOCKFLOW_OBSERVABILITY`: on/off (default on).
/// - `BLOCKFLOW_LOG_LEVEL`: filter override (`info`, `blockflow_core=debug`, ...).
/// - `BLOCKFLOW_JSON_LOG_PATH`: write JSONL to this file instead of stderr.
/// - `RUST_LOG`: used when no level override is set.
pub fn init_observability() {
    init_with(LogSettings::from_env());
}

pub fn init_with(settings: LogSettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let filter = settings.env_filter();
        match &settings.json_log_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    let _ = std::fs::create_dir_all(parent);
                }
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_LOG_FILE);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                // stdout carries command output (e.g. replayed events), so logs go to stderr.
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> LogSettings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_to_enabled_console() {
        let s = settings(&[]);
        assert!(s.enabled);
        assert_eq!(s.level, None);
        assert_eq!(s.json_log_path, None);
    }

    #[test]
    fn reads_overrides() {
        let s = settings(&[
            ("BLOCKFLOW_OBSERVABILITY", "off"),
            ("BLOCKFLOW_LOG_LEVEL", "debug"),
            ("BLOCKFLOW_JSON_LOG_PATH", "logs/run.jsonl"),
        ]);
        assert!(!s.enabled);
        assert_eq!(s.level.as_deref(), Some("debug"));
        assert_eq!(s.json_log_path, Some(PathBuf::from("logs/run.jsonl")));
    }

    #[test]
    fn unrecognised_flag_keeps_logging_on() {
        assert!(settings(&[("BLOCKFLOW_OBSERVABILITY_ENABLED", "maybe")]).enabled);
        assert_eq!(parse_bool(" Disabled "), Some(false));
    }
}
