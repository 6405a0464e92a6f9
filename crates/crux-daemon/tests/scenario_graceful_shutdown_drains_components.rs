//! Scenario: graceful shutdown drains components in reverse order.
//!
//! # Invariant under test
//!
//! `Application::shutdown()` followed by the ten-step stop sequence
//! (spec §4.F "Shutdown sequence") always reaches `ApplicationState::Stopped`
//! and stops every registered component, even when more than one component
//! is registered.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crux_app::{ApplicationConfig, ApplicationState, Component};
use crux_daemon::build_application_with_config;

/// `Application::new` enforces a single live instance per process; this
/// binary's tests all construct one, so they must not run concurrently on
/// `cargo test`'s shared thread pool.
static SINGLETON_TEST_LOCK: StdMutex<()> = StdMutex::new(());

struct CountingComponent {
    name: &'static str,
    stop_order: Arc<std::sync::Mutex<Vec<&'static str>>>,
}

impl Component for CountingComponent {
    fn name(&self) -> &str {
        self.name
    }

    fn stop(&self) -> anyhow::Result<()> {
        self.stop_order.lock().unwrap().push(self.name);
        Ok(())
    }
}

fn test_config() -> ApplicationConfig {
    let mut cfg = ApplicationConfig::default();
    cfg.network.cli_enabled = false;
    cfg.health_check_enabled = false;
    cfg.daemon.enabled = false;
    cfg.worker_threads = 1;
    cfg
}

#[test]
fn shutdown_reaches_stopped_and_stops_components_in_reverse_order() {
    let _guard = SINGLETON_TEST_LOCK.lock().unwrap();
    let app = build_application_with_config(test_config()).unwrap();

    let stop_order = Arc::new(std::sync::Mutex::new(Vec::new()));
    app.add_component(Arc::new(CountingComponent {
        name: "first",
        stop_order: stop_order.clone(),
    }))
    .unwrap();
    app.add_component(Arc::new(CountingComponent {
        name: "second",
        stop_order: stop_order.clone(),
    }))
    .unwrap();

    let app_for_run = app.clone();
    let handle = std::thread::spawn(move || app_for_run.run_with_argv(["crux-daemon", "--no-daemon"]));

    std::thread::sleep(Duration::from_millis(30));
    app.shutdown();
    let code = handle.join().unwrap();

    assert_eq!(code, 0);
    assert_eq!(app.state(), ApplicationState::Stopped);

    // build_application_with_config also registers its own heartbeat
    // component first; only the two CountingComponents record into
    // stop_order, in reverse insertion order.
    let order = stop_order.lock().unwrap();
    assert_eq!(*order, vec!["second", "first"]);
}

#[test]
fn shutdown_is_idempotent_across_repeated_calls() {
    let _guard = SINGLETON_TEST_LOCK.lock().unwrap();
    let app = build_application_with_config(test_config()).unwrap();
    let app_for_run = app.clone();
    let handle = std::thread::spawn(move || app_for_run.run_with_argv(["crux-daemon", "--no-daemon"]));

    std::thread::sleep(Duration::from_millis(20));
    app.shutdown();
    app.shutdown();
    app.shutdown();
    let code = handle.join().unwrap();

    assert_eq!(code, 0);
    assert_eq!(app.state(), ApplicationState::Stopped);
}

#[test]
fn managed_thread_work_survives_until_shutdown() {
    let _guard = SINGLETON_TEST_LOCK.lock().unwrap();
    let app = build_application_with_config(test_config()).unwrap();
    let app_for_run = app.clone();
    let handle = std::thread::spawn(move || app_for_run.run_with_argv(["crux-daemon", "--no-daemon"]));

    // Give start() a moment to run before creating a managed thread against
    // the now-running application.
    std::thread::sleep(Duration::from_millis(20));
    let counter = Arc::new(AtomicUsize::new(0));
    let counter2 = counter.clone();
    let thread = app
        .create_worker_thread("scenario-worker")
        .expect("managed thread should spawn on a running application");
    thread.post_task(Box::new(move || {
        counter2.fetch_add(1, Ordering::SeqCst);
    }));

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    app.shutdown();
    let code = handle.join().unwrap();
    assert_eq!(code, 0);
}
