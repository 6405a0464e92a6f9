use std::sync::Arc;
use std::time::Duration;

use crate::context::{CliContext, CliResult};

pub type CommandHandler = Arc<dyn Fn(&CliContext) -> CliResult + Send + Sync>;

/// A registered command (spec §4.H "CLICommand").
#[derive(Clone)]
pub struct CliCommand {
    pub name: String,
    pub description: String,
    pub usage: String,
    pub handler: CommandHandler,
    /// Whether the command requires an application context to run; a
    /// handful of built-ins (`help`, `log-level`, `exit`) don't.
    pub requires_app: bool,
}

/// CLI server configuration (spec §4.H "CLIConfig").
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub enable: bool,
    pub bind_address: String,
    pub port: u16,
    pub enable_stdin: bool,
    pub enable_tcp_server: bool,
    pub prompt: String,
    pub command_timeout: Duration,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            enable: true,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            enable_stdin: true,
            enable_tcp_server: false,
            prompt: "> ".to_string(),
            command_timeout: Duration::from_millis(5000),
        }
    }
}
