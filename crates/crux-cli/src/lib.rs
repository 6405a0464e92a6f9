//! Operator-inspection CLI shell (spec §4.H): a stdin/TCP command
//! shell for inspecting and controlling a running application —
//! status, managed threads, configuration, health, messaging,
//! log level, and graceful/forced shutdown — plus user-registrable
//! custom commands.

mod builtins;
mod command;
mod context;
mod host;
mod net;

pub use command::{CliCommand, CliConfig, CommandHandler};
pub use context::{CliContext, CliResult};
pub use host::CliHost;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use context::parse_command_line;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("CLI is already running")]
    AlreadyRunning,
    #[error("failed to start TCP server: {0}")]
    TcpBind(#[from] std::io::Error),
}

/// The operator CLI shell. Construct with [`Cli::new`], configure,
/// optionally attach a [`CliHost`] and a [`crux_logger::LoggerHandle`],
/// register any custom commands, then [`Cli::start`].
pub struct Cli {
    config: RwLock<CliConfig>,
    commands: Mutex<HashMap<String, CliCommand>>,
    host: RwLock<Option<Arc<dyn CliHost>>>,
    logger: RwLock<Option<Arc<crux_logger::LoggerHandle>>>,
    running: AtomicBool,
    shutdown_requested: AtomicBool,
    stdin_thread: Mutex<Option<JoinHandle<()>>>,
    tcp_thread: Mutex<Option<JoinHandle<()>>>,
    bound_addr: RwLock<Option<std::net::SocketAddr>>,
}

impl Cli {
    pub fn new() -> Arc<Self> {
        let cli = Arc::new(Self {
            config: RwLock::new(CliConfig::default()),
            commands: Mutex::new(HashMap::new()),
            host: RwLock::new(None),
            logger: RwLock::new(None),
            running: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            stdin_thread: Mutex::new(None),
            tcp_thread: Mutex::new(None),
            bound_addr: RwLock::new(None),
        });
        builtins::register_all(&cli);
        cli
    }

    /// Reconfigures the CLI; refused while running, matching the
    /// original's "cannot reconfigure while running" behavior.
    pub fn configure(&self, config: CliConfig) {
        if self.running.load(Ordering::Acquire) {
            tracing::warn!("cannot reconfigure CLI while running");
            return;
        }
        *self.config.write() = config;
    }

    pub fn config(&self) -> CliConfig {
        self.config.read().clone()
    }

    pub fn set_host(&self, host: Arc<dyn CliHost>) {
        *self.host.write() = Some(host);
    }

    pub fn set_logger_handle(&self, handle: Arc<crux_logger::LoggerHandle>) {
        *self.logger.write() = Some(handle);
    }

    fn host(&self) -> Option<Arc<dyn CliHost>> {
        self.host.read().clone()
    }

    fn logger_handle(&self) -> Option<Arc<crux_logger::LoggerHandle>> {
        self.logger.read().clone()
    }

    pub fn register_command(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        usage: impl Into<String>,
        handler: impl Fn(&CliContext) -> CliResult + Send + Sync + 'static,
        requires_app: bool,
    ) {
        let name = name.into();
        tracing::debug!(command = %name, "registering CLI command");
        self.commands.lock().insert(
            name.clone(),
            CliCommand {
                name,
                description: description.into(),
                usage: usage.into(),
                handler: Arc::new(handler),
                requires_app,
            },
        );
    }

    fn command(&self, name: &str) -> Option<CliCommand> {
        self.commands.lock().get(name).cloned()
    }

    fn command_names(&self) -> Vec<String> {
        self.commands.lock().keys().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    /// The address the TCP server actually bound, once started
    /// (useful when `port` was configured as `0`).
    pub fn bound_address(&self) -> Option<std::net::SocketAddr> {
        *self.bound_addr.read()
    }

    /// Starts the stdin reader and/or TCP acceptor per configuration
    /// (spec §4.H "start(app)").
    pub fn start(self: &Arc<Self>) -> Result<(), CliError> {
        if self.running.load(Ordering::Acquire) {
            return Err(CliError::AlreadyRunning);
        }
        if !self.config().enable {
            tracing::debug!("CLI disabled in configuration");
            return Ok(());
        }

        self.shutdown_requested.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);

        let config = self.config();
        if config.enable_stdin {
            *self.stdin_thread.lock() = Some(net::spawn_stdin_reader(self.clone()));
        }
        if config.enable_tcp_server {
            match net::spawn_tcp_server(self.clone()) {
                Ok((handle, addr)) => {
                    *self.tcp_thread.lock() = Some(handle);
                    *self.bound_addr.write() = Some(addr);
                }
                Err(e) => {
                    self.running.store(false, Ordering::Release);
                    return Err(CliError::TcpBind(e));
                }
            }
        }

        tracing::info!(stdin = config.enable_stdin, tcp = config.enable_tcp_server, "CLI started");
        Ok(())
    }

    /// Stops the CLI: closes the TCP acceptor and joins both reader
    /// threads (spec §4.H "stop()"). As in the design this was ported
    /// from, a stdin reader blocked in a line read cannot be woken
    /// portably, so this call returns only once the stdin thread next
    /// observes `shutdown_requested` — i.e. after its current read
    /// returns (a line, EOF, or process exit).
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!("stopping CLI");
        self.shutdown_requested.store(true, Ordering::Release);

        let config = self.config();
        if let Some(addr) = *self.bound_addr.read() {
            net::wake_acceptor(&addr.ip().to_string(), addr.port());
        } else if config.enable_tcp_server {
            net::wake_acceptor(&config.bind_address, config.port);
        }
        if let Some(handle) = self.tcp_thread.lock().take() {
            let _ = handle.join();
        }
        *self.bound_addr.write() = None;

        if let Some(handle) = self.stdin_thread.lock().take() {
            let _ = handle.join();
        }

        tracing::info!("CLI stopped");
    }

    fn execute_parsed(&self, context: &CliContext) -> CliResult {
        let Some(name) = context.command_name() else {
            return CliResult::ok("");
        };
        let Some(command) = self.command(name) else {
            return CliResult::error(format!("Unknown command: {name}. Type 'help' for available commands."));
        };
        if command.requires_app && self.host().is_none() {
            return CliResult::error("Command requires application context but none available");
        }
        (command.handler)(context)
    }

    /// Parses and runs one command line, enforcing `command_timeout`
    /// cooperatively: a handler that outlives the timeout keeps running
    /// in the background on its own thread, but its result is discarded
    /// (spec §4.H "command-level timeout").
    pub fn execute_command(self: &Arc<Self>, line: &str) -> CliResult {
        if line.trim().is_empty() {
            return CliResult::ok("");
        }
        let context = parse_command_line(line);
        let timeout = self.config().command_timeout;
        let cli = self.clone();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(cli.execute_parsed(&context));
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => CliResult::error(format!("Command timed out after {}ms", timeout.as_millis())),
        }
    }
}
