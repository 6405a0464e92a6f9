//! The program's own command-line flags (spec §6.1), parsed with `clap`'s
//! derive API (matching `mqk-cli::main`'s `#[derive(Parser)]` style,
//! generalized from quant-domain subcommands to these framework flags).

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "crux",
    about = "crux application framework",
    long_about = None,
    version = env!("CARGO_PKG_VERSION"),
    disable_version_flag = true,
    disable_help_flag = true
)]
pub struct Args {
    /// Print help; exit 0 (spec §6.1 "-h/--help").
    #[arg(short = 'h', long = "help", action = clap::ArgAction::Help)]
    pub help: Option<bool>,

    /// Print version; exit 0 (spec §6.1 "-v/--version").
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    pub version: Option<bool>,

    /// Run in the foreground regardless of what the config file says.
    #[arg(short = 'd', long = "daemon", conflicts_with = "no_daemon")]
    pub daemon: bool,

    /// Force foreground; overrides config (spec §6.1 "--no-daemon").
    #[arg(short = 'f', long = "no-daemon")]
    pub no_daemon: bool,

    /// Override the config file path.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// One of trace/debug/info/warn/error/critical.
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Override the log file path.
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Daemon PID file path.
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,

    /// Daemon working directory.
    #[arg(long = "work-dir")]
    pub work_dir: Option<PathBuf>,

    /// Daemon user name.
    #[arg(long = "user")]
    pub user: Option<String>,

    /// Daemon group name.
    #[arg(long = "group")]
    pub group: Option<String>,
}

impl Args {
    /// Parses from an explicit argv (spec §4.F "run(argv)"), returning a
    /// clap error for `--help`/`--version`/unknown-flag/missing-argument
    /// cases so the caller can map them onto the documented exit codes
    /// (spec §6.1 "Exit codes").
    pub fn try_parse_from_argv<I, T>(argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Args::try_parse_from(argv)
    }

    /// Applies this CLI override onto an [`crate::ApplicationConfig`],
    /// matching spec §4.F's "apply overrides" lifecycle step.
    pub fn apply_overrides(&self, config: &mut crate::ApplicationConfig) {
        if self.no_daemon {
            config.daemon.enabled = false;
        } else if self.daemon {
            config.daemon.enabled = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(path) = &self.log_file {
            config.logging.file_path = Some(path.clone());
            config.logging.enable_file = true;
        }
        if let Some(path) = &self.pid_file {
            config.daemon.pid_file = path.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.daemon.work_dir = dir.clone();
        }
        if let Some(user) = &self.user {
            config.daemon.user = Some(user.clone());
        }
        if let Some(group) = &self.group {
            config.daemon.group = Some(group.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ApplicationConfig;

    #[test]
    fn no_daemon_overrides_config_enabled_flag() {
        let args = Args::try_parse_from_argv(["crux", "--no-daemon"]).unwrap();
        let mut cfg = ApplicationConfig {
            daemon: crate::config::DaemonConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        args.apply_overrides(&mut cfg);
        assert!(!cfg.daemon.enabled);
    }

    #[test]
    fn unknown_flag_is_a_parse_error() {
        let err = Args::try_parse_from_argv(["crux", "--bogus-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn missing_required_argument_is_a_parse_error() {
        let err = Args::try_parse_from_argv(["crux", "--config"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn help_and_version_are_recognized_as_display_requests() {
        let err = Args::try_parse_from_argv(["crux", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
