use std::sync::Arc;

use crate::context::{CliContext, CliResult};
use crate::Cli;

/// Registers the built-in commands (spec §4.H "Built-in commands").
pub(crate) fn register_all(cli: &Arc<Cli>) {
    {
        let cli = cli.clone();
        cli.register_command(
            "help",
            "Show available commands",
            "help [command]",
            move |ctx| cmd_help(&cli, ctx),
            false,
        );
    }
    {
        let cli = cli.clone();
        cli.register_command("status", "Show application status", "status", move |ctx| cmd_status(&cli, ctx), true);
    }
    {
        let cli = cli.clone();
        cli.register_command(
            "threads",
            "List and inspect managed threads",
            "threads [--detail]",
            move |ctx| cmd_threads(&cli, ctx),
            true,
        );
    }
    {
        let cli = cli.clone();
        cli.register_command(
            "config",
            "Show configuration",
            "config [--section <name>]",
            move |ctx| cmd_config(&cli, ctx),
            true,
        );
    }
    {
        let cli = cli.clone();
        cli.register_command("health", "Run health checks", "health", move |ctx| cmd_health(&cli, ctx), true);
    }
    {
        let cli = cli.clone();
        cli.register_command(
            "messaging",
            "Show messaging statistics",
            "messaging [--detail]",
            move |ctx| cmd_messaging(&cli, ctx),
            true,
        );
    }
    {
        let cli = cli.clone();
        cli.register_command(
            "log-level",
            "Change log level",
            "log-level [level]",
            move |ctx| cmd_log_level(&cli, ctx),
            false,
        );
    }
    {
        let cli = cli.clone();
        cli.register_command("shutdown", "Graceful shutdown", "shutdown", move |ctx| cmd_shutdown(&cli, ctx), true);
    }
    {
        let cli = cli.clone();
        cli.register_command(
            "force-shutdown",
            "Immediate shutdown",
            "force-shutdown",
            move |ctx| cmd_force_shutdown(&cli, ctx),
            true,
        );
    }
    {
        let cli = cli.clone();
        cli.register_command(
            "exit",
            "Exit CLI (does not shutdown app)",
            "exit",
            move |ctx| cmd_exit(&cli, ctx),
            false,
        );
    }
}

fn cmd_help(cli: &Arc<Cli>, ctx: &CliContext) -> CliResult {
    if ctx.args.len() > 1 {
        let name = &ctx.args[1];
        return match cli.command(name) {
            Some(command) => CliResult::ok(format!(
                "Command: {}\nDescription: {}\nUsage: {}",
                command.name, command.description, command.usage
            )),
            None => CliResult::error(format!("Unknown command: {name}")),
        };
    }

    let mut names = cli.command_names();
    names.sort();
    let mut out = String::from("Available commands:\n\n");
    for name in names {
        let command = cli.command(&name).expect("just listed");
        out.push_str(&format!("{:<15} - {}\n", command.name, command.description));
    }
    out.push_str("\nType 'help <command>' for detailed usage information.");
    CliResult::ok(out)
}

fn cmd_status(cli: &Arc<Cli>, _ctx: &CliContext) -> CliResult {
    let Some(host) = cli.host() else {
        return CliResult::error("No application context available");
    };
    CliResult::ok(format!(
        "Application Status\n\
         =================\n\
         Name: {}\n\
         Version: {}\n\
         Description: {}\n\
         State: {}\n\
         Running: {}\n\
         Worker Threads: {}\n\
         Managed Threads: {}\n\
         Dedicated IO Thread: {}\n",
        host.app_name(),
        host.app_version(),
        host.app_description(),
        host.state_name(),
        if host.is_running() { "Yes" } else { "No" },
        host.worker_threads(),
        host.managed_thread_count(),
        if host.uses_dedicated_io_thread() { "Yes" } else { "No" },
    ))
}

fn cmd_threads(cli: &Arc<Cli>, ctx: &CliContext) -> CliResult {
    let Some(host) = cli.host() else {
        return CliResult::error("No application context available");
    };
    let mut out = format!(
        "Thread Information\n\
         ==================\n\
         Total Managed Threads: {}\n\
         Hardware Concurrency: {}\n",
        host.managed_thread_count(),
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    );
    if ctx.has_option("detail") {
        out.push_str("\nNote: detailed per-thread inspection requires additional instrumentation.\n");
    }
    CliResult::ok(out)
}

fn cmd_config(cli: &Arc<Cli>, ctx: &CliContext) -> CliResult {
    let section = ctx.get_option("section", "");
    let mut out = String::from("Configuration\n=============\n");
    if !section.is_empty() {
        out.push_str(&format!("Section: {section}\nNote: section-specific display requires a config schema extension.\n"));
    }
    if let Some(host) = cli.host() {
        out.push_str(&format!(
            "\nApplication Configuration:\n\
             Name: {}\n\
             Version: {}\n\
             Config file: {}\n\
             Worker threads: {}\n\
             Health checks: {}\n\
             Health check interval: {}ms\n",
            host.app_name(),
            host.app_version(),
            host.config_file(),
            host.worker_threads(),
            if host.health_check_enabled() { "Enabled" } else { "Disabled" },
            host.health_check_interval_ms(),
        ));
    }
    CliResult::ok(out)
}

fn cmd_health(cli: &Arc<Cli>, _ctx: &CliContext) -> CliResult {
    let Some(host) = cli.host() else {
        return CliResult::error("No application context available");
    };
    CliResult::ok(format!(
        "Health Check Results\n\
         ===================\n\
         Application State: {}\n\
         Running: {}\n\
         Components healthy: {}\n",
        host.state_name(),
        if host.is_running() { "Healthy" } else { "Not Running" },
        if host.health_check() { "Yes" } else { "No" },
    ))
}

fn cmd_messaging(cli: &Arc<Cli>, ctx: &CliContext) -> CliResult {
    let Some(host) = cli.host() else {
        return CliResult::error("No application context available");
    };
    let mut out = format!("Messaging Statistics\n===================\n{}\n", host.messaging_summary());
    if ctx.has_option("detail") {
        out.push_str("\nNote: per-type subscriber breakdowns require additional instrumentation.\n");
    }
    CliResult::ok(out)
}

fn cmd_log_level(cli: &Arc<Cli>, ctx: &CliContext) -> CliResult {
    let Some(handle) = cli.logger_handle() else {
        return CliResult::error("No logger handle configured");
    };
    if ctx.args.len() < 2 {
        return CliResult::ok(format!(
            "Current log level: {}\nAvailable levels: trace, debug, info, warn, error, critical",
            handle.current_level()
        ));
    }
    let requested = &ctx.args[1];
    match crux_logger::parse_level(requested) {
        Ok(level) => match handle.set_level(level) {
            Ok(()) => CliResult::ok(format!("Log level changed to: {requested}")),
            Err(e) => CliResult::error(format!("Failed to set log level: {e}")),
        },
        Err(_) => CliResult::error("Invalid log level. Available: trace, debug, info, warn, error, critical"),
    }
}

fn cmd_shutdown(cli: &Arc<Cli>, _ctx: &CliContext) -> CliResult {
    let Some(host) = cli.host() else {
        return CliResult::error("No application context available");
    };
    tracing::info!("graceful shutdown requested via CLI");
    host.shutdown();
    CliResult::ok("Graceful shutdown initiated")
}

fn cmd_force_shutdown(cli: &Arc<Cli>, _ctx: &CliContext) -> CliResult {
    let Some(host) = cli.host() else {
        return CliResult::error("No application context available");
    };
    tracing::warn!("force shutdown requested via CLI");
    host.force_shutdown();
    CliResult::ok("Force shutdown initiated")
}

fn cmd_exit(cli: &Arc<Cli>, _ctx: &CliContext) -> CliResult {
    cli.request_shutdown();
    CliResult::ok("Exiting CLI (application continues running)")
}
