//! Scenario: command-line flags and the single-instance-per-process rule.
//!
//! # Invariants under test
//!
//! - `--no-daemon` always wins over a config file that requests
//!   daemonization (spec §4.F "apply overrides", CLI-over-file precedence
//!   resolved in DESIGN.md).
//! - Only one live [`Application`] may exist in a process at a time
//!   (spec §4.F).
//! - An unknown flag is a parse error that maps onto exit code 2
//!   (spec §6.1 "Exit codes").

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use crux_app::{Application, ApplicationConfig};
use crux_daemon::build_application_with_config;

/// `Application::new` enforces a single live instance per process; this
/// binary's tests all construct one, so they must not run concurrently on
/// `cargo test`'s shared thread pool.
static SINGLETON_TEST_LOCK: Mutex<()> = Mutex::new(());

fn test_config() -> ApplicationConfig {
    let mut cfg = ApplicationConfig::default();
    cfg.network.cli_enabled = false;
    cfg.health_check_enabled = false;
    cfg.worker_threads = 1;
    cfg
}

#[test]
fn no_daemon_flag_overrides_config_file_daemon_request() {
    let _guard = SINGLETON_TEST_LOCK.lock().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[test-app.app]
name = "test-app"

[test-app.daemon]
enabled = true
"#
    )
    .unwrap();

    let mut cfg = test_config();
    cfg.name = "test-app".to_string();
    let app = build_application_with_config(cfg).unwrap();

    let app_for_run = app.clone();
    let path = file.path().to_path_buf();
    let handle = std::thread::spawn(move || {
        app_for_run.run_with_argv([
            "crux-daemon".to_string(),
            "--no-daemon".to_string(),
            "--config".to_string(),
            path.display().to_string(),
        ])
    });

    std::thread::sleep(Duration::from_millis(30));
    app.shutdown();
    let code = handle.join().unwrap();
    assert_eq!(code, 0);
    // If --no-daemon had lost to the config file, daemonize() would have
    // forked this test process — which would hang/crash the test harness
    // rather than return cleanly here.
}

#[test]
fn second_application_instance_is_refused_while_first_is_alive() {
    let _guard = SINGLETON_TEST_LOCK.lock().unwrap();
    let first = Application::new(test_config()).unwrap();
    let second = Application::new(test_config());
    assert!(second.is_err(), "a second live Application must be refused");
    drop(first);
}

#[test]
fn unknown_flag_maps_to_exit_code_two() {
    let _guard = SINGLETON_TEST_LOCK.lock().unwrap();
    let app = build_application_with_config(test_config()).unwrap();
    let code = app.run_with_argv(["crux-daemon", "--this-flag-does-not-exist"]);
    assert_eq!(code, 2);
}

#[test]
fn help_flag_maps_to_exit_code_zero() {
    let _guard = SINGLETON_TEST_LOCK.lock().unwrap();
    let app = build_application_with_config(test_config()).unwrap();
    let code = app.run_with_argv(["crux-daemon", "--help"]);
    assert_eq!(code, 0);
}
