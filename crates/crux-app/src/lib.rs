//! The application core (spec §4.F): wires the reactor, messaging,
//! scheduling, managed-thread, component, and CLI crates into a single
//! process lifecycle, plus this program's own command-line flags,
//! configuration loading, and POSIX daemonization.

mod application;
mod args;
mod config;
mod daemonize;
mod state;

pub use application::Application;
pub use args::Args;
pub use config::{ApplicationConfig, DaemonConfig, NetworkConfig};
pub use daemonize::{daemonize, remove_pid_file, DaemonizeError};
pub use state::{ApplicationState, StateCell};

pub use crux_cli::{CliCommand, CliConfig, CliContext, CliHost, CliResult};
pub use crux_component::{Component, ComponentError, ComponentRegistry};
pub use crux_messaging::{MessagePriority, SendOutcome};
pub use crux_scheduler::TaskPriority;
pub use crux_thread::{ManagedThread, Setup, ThreadError};
