//! Structured logging setup for the crux application framework.
//!
//! The actual logging back end (the sink that turns events into bytes on a
//! console or in a file) is an external concern; this crate only wires
//! `tracing`/`tracing-subscriber` into the shape the framework's
//! configuration format (spec §6.3) expects, including the original
//! source's per-component enable/disable filtering.

use std::fmt::Write as _;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Logging configuration, matching the `logging` TOML section (spec §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
    pub pattern: Option<String>,
    pub file_path: Option<PathBuf>,
    pub enable_console: bool,
    pub enable_file: bool,
    pub max_file_size: u64,
    pub max_files: u32,
    pub flush_immediately: bool,
    pub enable_component_logging: bool,
    pub enabled_components: Vec<String>,
    pub disabled_components: Vec<String>,
    pub component_pattern: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            pattern: None,
            file_path: None,
            enable_console: true,
            enable_file: false,
            max_file_size: 10 * 1024 * 1024,
            max_files: 5,
            flush_immediately: false,
            enable_component_logging: false,
            enabled_components: Vec::new(),
            disabled_components: Vec::new(),
            component_pattern: None,
        }
    }
}

/// Parses the six levels accepted by `--log-level` / `log-level` (spec §6.1/§4.H).
pub fn parse_level(s: &str) -> anyhow::Result<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        // The framework's taxonomy has a fifth "critical" level with no
        // direct tracing equivalent; map it onto ERROR, the closest severity.
        "critical" => Ok(Level::ERROR),
        other => anyhow::bail!("unknown log level '{other}'"),
    }
}

/// Builds an `EnvFilter` directive string for a base level plus the
/// original source's per-component enable/disable/pattern rules.
fn build_directives(level: Level, cfg: &LoggerConfig) -> String {
    let mut directives = level.to_string();
    if !cfg.enable_component_logging {
        return directives;
    }
    // An explicit allow-list takes the base level to "off" and re-enables
    // only the named targets, matching `enabled_components` semantics.
    if !cfg.enabled_components.is_empty() {
        directives = "off".to_string();
        for component in &cfg.enabled_components {
            let _ = write!(directives, ",{component}={level}");
        }
    }
    for component in &cfg.disabled_components {
        let _ = write!(directives, ",{component}=off");
    }
    if let Some(pattern) = &cfg.component_pattern {
        let _ = write!(directives, ",{pattern}={level}");
    }
    directives
}

/// Live handle returned by [`init`]; holds resources the subscriber borrows
/// (the non-blocking file appender guard) and the current filter level so
/// `log-level` CLI commands can change it at runtime.
pub struct LoggerHandle {
    current_level: RwLock<Level>,
    base_cfg: LoggerConfig,
    reload_handle: reload::Handle<EnvFilter, Registry>,
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl LoggerHandle {
    pub fn current_level(&self) -> Level {
        *self.current_level.read()
    }

    /// Implements the `log-level` CLI built-in's write path (spec §4.H).
    pub fn set_level(&self, level: Level) -> anyhow::Result<()> {
        let directives = build_directives(level, &self.base_cfg);
        let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(level.to_string()));
        self.reload_handle
            .reload(filter)
            .map_err(|e| anyhow::anyhow!("failed to reload log filter: {e}"))?;
        *self.current_level.write() = level;
        Ok(())
    }
}

/// Initializes the global `tracing` subscriber from a [`LoggerConfig`].
///
/// Mirrors `mqk-daemon::main::init_tracing`, generalized to support an
/// optional rotating file sink and component-scoped filtering.
pub fn init(cfg: &LoggerConfig) -> anyhow::Result<LoggerHandle> {
    let level = parse_level(&cfg.level)?;
    let directives = build_directives(level, cfg);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let (filter_layer, reload_handle) = reload::Layer::new(env_filter);

    let mut file_guard = None;
    let file_layer = if cfg.enable_file {
        let path = cfg
            .file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("crux.log"));
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("crux.log")
            .to_string();
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking.with_max_level(level)),
        )
    } else {
        None
    };

    let console_layer = cfg
        .enable_console
        .then(|| tracing_subscriber::fmt::layer().with_target(true));

    Registry::default()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logger already initialized: {e}"))?;

    Ok(LoggerHandle {
        current_level: RwLock::new(level),
        base_cfg: cfg.clone(),
        reload_handle,
        _file_guard: file_guard,
    })
}
