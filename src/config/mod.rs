use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4310;
const DEFAULT_MAX_PARALLEL: i64 = 1;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── QueuesConfig ─────────────────────────────────────────────────────────────

/// Queue domain tunables (`[queues]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueuesConfig {
    /// `max_parallel_items` applied when queue creation omits a cap.
    /// Default: 1 (strictly serial queues).
    pub default_max_parallel: i64,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            default_max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }
}

// ─── ObservabilityConfig ──────────────────────────────────────────────────────

/// Observability tunables (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// SQLite queries slower than this are logged at WARN level
    /// (milliseconds). 0 disables slow-query logging.
    pub slow_query_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { slow_query_ms: 0 }
    }
}

// ─── TOML layer ───────────────────────────────────────────────────────────────

/// Raw `config.toml` contents. Every field optional; CLI/env wins.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    port: Option<u16>,
    log: Option<String>,
    log_format: Option<String>,
    bind_address: Option<String>,
    queues: Option<QueuesConfig>,
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local/share/workqd")
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

/// Resolved daemon configuration.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json" (structured).
    pub log_format: String,
    /// Bind address for the REST server (default: "127.0.0.1").
    pub bind_address: String,
    pub queues: QueuesConfig,
    pub observability: ObservabilityConfig,
}

impl DaemonConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = std::env::var("WORKQD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let bind_address = bind_address
            .or(std::env::var("WORKQD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let queues = toml.queues.unwrap_or_default();
        let observability = toml.observability.unwrap_or_default();

        Self {
            port,
            data_dir,
            log,
            log_format,
            bind_address,
            queues,
            observability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_given() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DaemonConfig::new(None, Some(dir.path().to_path_buf()), None, None);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.log, "info");
        assert_eq!(cfg.log_format, "pretty");
        assert_eq!(cfg.bind_address, "127.0.0.1");
        assert_eq!(cfg.queues.default_max_parallel, 1);
        assert_eq!(cfg.observability.slow_query_ms, 0);
    }

    #[test]
    fn toml_layer_fills_in_under_cli() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "port = 9999\nlog = \"debug\"\n\n[queues]\ndefault_max_parallel = 4\n",
        )
        .unwrap();
        // CLI port wins; TOML fills log and queue defaults.
        let cfg = DaemonConfig::new(
            Some(4000),
            Some(dir.path().to_path_buf()),
            None,
            None,
        );
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.log, "debug");
        assert_eq!(cfg.queues.default_max_parallel, 4);
    }

    #[test]
    fn bad_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "port = \"not a number").unwrap();
        let cfg = DaemonConfig::new(None, Some(dir.path().to_path_buf()), None, None);
        assert_eq!(cfg.port, DEFAULT_PORT);
    }
}
