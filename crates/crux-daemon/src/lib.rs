//! Example wiring for the `crux-daemon` binary (spec §4.F): one
//! reference [`Component`] built on [`Application::schedule_recurring_task`]
//! and a single `build_application` entry point main.rs calls into.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crux_app::{Application, ApplicationConfig, Component, TaskPriority};

/// Logs a heartbeat on a fixed interval while the application is running,
/// demonstrating a [`Component`] driving work through
/// [`Application::schedule_recurring_task`] (spec §4.D/§4.E working
/// together).
pub struct HeartbeatComponent {
    app: Arc<Application>,
    interval: Duration,
    ticks: Arc<AtomicU64>,
    task_id: Mutex<Option<u64>>,
}

impl HeartbeatComponent {
    pub fn new(app: Arc<Application>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            app,
            interval,
            ticks: Arc::new(AtomicU64::new(0)),
            task_id: Mutex::new(None),
        })
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Component for HeartbeatComponent {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn start(&self) -> anyhow::Result<()> {
        let ticks = self.ticks.clone();
        let id = self.app.schedule_recurring_task(self.interval, TaskPriority::Low, move || {
            let n = ticks.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(tick = n, "heartbeat");
        });
        *self.task_id.lock() = Some(id);
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        if let Some(id) = self.task_id.lock().take() {
            self.app.cancel_recurring_task(id);
        }
        Ok(())
    }

    fn health_check(&self) -> bool {
        true
    }
}

/// Builds the default `crux-daemon` application: default configuration plus
/// the heartbeat component. `main.rs` and the scenario tests both go
/// through this one entry point so they exercise identical wiring.
pub fn build_application() -> anyhow::Result<Arc<Application>> {
    build_application_with_config(ApplicationConfig::default())
}

pub fn build_application_with_config(config: ApplicationConfig) -> anyhow::Result<Arc<Application>> {
    let app = Application::new(config)?;
    let heartbeat = HeartbeatComponent::new(app.clone(), Duration::from_secs(5));
    app.add_component(heartbeat)?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_ticks_while_running() {
        let mut config = ApplicationConfig::default();
        config.network.cli_enabled = false;
        config.health_check_enabled = false;
        config.daemon.enabled = false;
        config.worker_threads = 1;

        let app = Application::new(config).unwrap();
        let heartbeat = HeartbeatComponent::new(app.clone(), Duration::from_millis(5));
        app.add_component(heartbeat.clone()).unwrap();

        let app_for_run = app.clone();
        let handle = std::thread::spawn(move || app_for_run.run_with_argv(["crux-daemon", "--no-daemon"]));

        std::thread::sleep(Duration::from_millis(60));
        app.shutdown();
        let code = handle.join().unwrap();

        assert_eq!(code, 0);
        assert!(heartbeat.ticks() > 0);
    }
}
