//! JSON trace log for engine sessions.

use crate::config::EngineConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<Option<PathBuf>> = OnceLock::new();

const TRACE_LOG_ENV: &str = "SIGNAL_HUNTER_TRACE_LOG";
const TRACE_LOG_FILE: &str = "signal_hunter_trace.jsonl";

pub fn tracing_log_path() -> PathBuf {
    env::var_os(TRACE_LOG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join(TRACE_LOG_FILE))
}

/// Install the global JSON subscriber once per process. Returns the log path
/// when tracing is active.
pub fn init_tracing(config: &EngineConfig) -> Option<PathBuf> {
    if !config.logging_enabled() {
        return None;
    }

    TRACING_INIT
        .get_or_init(|| {
            let path = tracing_log_path();
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .ok()?;
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_writer(file)
                .with_current_span(false)
                .with_span_list(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber).ok()?;
            tracing::info!(path = %path.display(), "trace logging enabled");
            Some(path)
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn disabled_without_logs_flag() {
        let cfg = EngineConfig::parse_from(["test-app", "--no-logs"]);
        assert!(init_tracing(&cfg).is_none());
    }

    #[test]
    fn log_path_lands_in_temp_dir_by_default() {
        if env::var_os(TRACE_LOG_ENV).is_some() {
            return;
        }
        assert_eq!(tracing_log_path(), env::temp_dir().join(TRACE_LOG_FILE));
    }
}
