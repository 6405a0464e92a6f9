//! Application-level configuration (spec §6.3; defaults resolved from
//! `examples/original_source/include/application.h`'s `ApplicationConfig`,
//! per `SPEC_FULL.md` §3).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crux_logger::LoggerConfig;

fn default_worker_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Daemonization settings (spec §4.F "Daemonization").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub enabled: bool,
    pub pid_file: PathBuf,
    pub work_dir: PathBuf,
    pub umask: u32,
    pub close_inherited_fds: bool,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pid_file: PathBuf::from("/var/run/crux.pid"),
            work_dir: PathBuf::from("/"),
            umask: 0o022,
            close_inherited_fds: true,
            user: None,
            group: None,
        }
    }
}

/// Network/CLI-facing settings (spec §6.3 "network" subsection; defaults
/// from `ApplicationConfig::cli_bind_address`/`cli_port`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub cli_enabled: bool,
    pub cli_bind_address: String,
    pub cli_port: u16,
    pub cli_enable_stdin: bool,
    pub cli_enable_tcp: bool,
    pub cli_command_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cli_enabled: true,
            cli_bind_address: "127.0.0.1".to_string(),
            cli_port: 8080,
            cli_enable_stdin: true,
            cli_enable_tcp: false,
            cli_command_timeout_ms: 5000,
        }
    }
}

/// Top-level application settings (spec §6.3 "app" subsection).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    pub startup_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub health_check_enabled: bool,
    pub health_check_interval_ms: u64,
    pub signals: Vec<i32>,
    pub logging: LoggerConfig,
    pub network: NetworkConfig,
    pub daemon: DaemonConfig,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "crux-app".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: String::new(),
            worker_threads: default_worker_threads(),
            startup_timeout_ms: 30_000,
            shutdown_timeout_ms: 10_000,
            health_check_enabled: true,
            health_check_interval_ms: 5_000,
            signals: default_signals(),
            logging: LoggerConfig::default(),
            network: NetworkConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

/// {SIGINT, SIGTERM, SIGUSR1, SIGUSR2} (spec §6.2).
pub fn default_signals() -> Vec<i32> {
    #[cfg(unix)]
    {
        vec![
            signal_numbers::SIGINT,
            signal_numbers::SIGTERM,
            signal_numbers::SIGUSR1,
            signal_numbers::SIGUSR2,
        ]
    }
    #[cfg(not(unix))]
    {
        Vec::new()
    }
}

/// Raw signal numbers shared with [`crate::application`]'s dispatch match
/// arms, so the two stay in sync by construction instead of by convention.
pub(crate) mod signal_numbers {
    pub const SIGINT: i32 = 2;
    pub const SIGTERM: i32 = 15;
    pub const SIGUSR1: i32 = 10;
    pub const SIGUSR2: i32 = 12;
}

impl ApplicationConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Loads from a TOML file's `app`/`logging`/`network`/`daemon`
    /// subsections under the `app_name` top-level section (spec §6.3).
    pub fn from_config(cfg: &crux_config::Config) -> anyhow::Result<Self> {
        let mut result = ApplicationConfig::default();
        if let Ok(app) = cfg.section_as::<AppSection>("app") {
            if !app.name.is_empty() {
                result.name = app.name;
            }
            if !app.version.is_empty() {
                result.version = app.version;
            }
            result.description = app.description;
            if let Some(n) = app.worker_threads {
                result.worker_threads = n;
            }
            if let Some(ms) = app.startup_timeout_ms {
                result.startup_timeout_ms = ms;
            }
            if let Some(ms) = app.shutdown_timeout_ms {
                result.shutdown_timeout_ms = ms;
            }
            if let Some(b) = app.health_check_enabled {
                result.health_check_enabled = b;
            }
            if let Some(ms) = app.health_check_interval_ms {
                result.health_check_interval_ms = ms;
            }
        }
        result.logging = cfg.section_as("logging")?;
        result.network = cfg.section_as("network")?;
        result.daemon = cfg.section_as("daemon")?;
        Ok(result)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AppSection {
    name: String,
    version: String,
    description: String,
    worker_threads: Option<usize>,
    startup_timeout_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
    health_check_enabled: Option<bool>,
    health_check_interval_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_full_resolutions() {
        let cfg = ApplicationConfig::default();
        assert_eq!(cfg.startup_timeout_ms, 30_000);
        assert_eq!(cfg.shutdown_timeout_ms, 10_000);
        assert_eq!(cfg.health_check_interval_ms, 5_000);
        assert_eq!(cfg.network.cli_bind_address, "127.0.0.1");
        assert_eq!(cfg.network.cli_port, 8080);
        assert_eq!(cfg.network.cli_command_timeout_ms, 5000);
    }

    #[test]
    fn loads_overrides_from_toml() {
        let toml = r#"
[myapp.app]
name = "myapp"
worker_threads = 3

[myapp.network]
cli_port = 9090
"#;
        let loaded = crux_config::Config::from_str(toml, "myapp").unwrap();
        let cfg = ApplicationConfig::from_config(&loaded).unwrap();
        assert_eq!(cfg.name, "myapp");
        assert_eq!(cfg.worker_threads, 3);
        assert_eq!(cfg.network.cli_port, 9090);
    }
}
