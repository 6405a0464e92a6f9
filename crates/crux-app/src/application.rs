//! The application core (spec §4.F): the top-level lifecycle state machine
//! that wires the reactor, messaging, managed-thread, component, and CLI
//! layers together, plus signal handling and the worker pool.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crux_cli::{Cli, CliConfig, CliHost};
use crux_component::{Component, ComponentError, ComponentRegistry};
use crux_config::Config as ConfigDocument;
use crux_logger::LoggerHandle;
use crux_messaging::{AddressBook, MessagePriority, SendOutcome};
use crux_reactor::{BoxTask, Reactor, SignalSetHandle, TimerHandle, TokioReactor, WorkGuard};
use crux_scheduler::{RecurringTask, TaskPriority};
use crux_thread::{ManagedThread, Setup, ThreadError};

use crate::args::Args;
use crate::config::ApplicationConfig;
use crate::state::{ApplicationState, StateCell};

/// Enforces spec §4.F's "only one live Application instance per process"
/// invariant; a second [`Application::new`] call is refused while this is
/// held.
static INSTANCE_ALIVE: AtomicBool = AtomicBool::new(false);

use crate::config::signal_numbers::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};

type VoidHook = Box<dyn Fn() + Send + Sync>;
type SignalHook = Box<dyn Fn(i32) + Send + Sync>;

/// Top-level application lifecycle core (spec §4.F). Construct with
/// [`Application::new`], register components/signal handlers, then call
/// [`Application::run`].
pub struct Application {
    config: RwLock<ApplicationConfig>,
    config_path: Mutex<Option<PathBuf>>,
    config_doc: Mutex<Option<ConfigDocument>>,

    state: StateCell,
    wait_lock: Mutex<()>,
    wait_cv: Condvar,

    bus: Arc<AddressBook>,
    main_reactor: Arc<TokioReactor>,
    main_reactor_work_guard: Mutex<Option<WorkGuard>>,
    worker_joins: Mutex<Vec<JoinHandle<()>>>,
    signal_set_handle: Mutex<Option<SignalSetHandle>>,

    components: ComponentRegistry,
    managed_threads: Mutex<HashMap<String, Arc<ManagedThread>>>,

    recurring_tasks: Mutex<HashMap<u64, RecurringTask>>,
    next_task_id: AtomicU64,
    health_task_id: Mutex<Option<u64>>,

    signal_handlers: Mutex<HashMap<i32, Arc<dyn Fn() + Send + Sync>>>,
    error_handler: Mutex<Option<Arc<dyn Fn(anyhow::Error) + Send + Sync>>>,
    on_stop: Mutex<Option<VoidHook>>,
    on_cleanup: Mutex<Option<VoidHook>>,
    on_signal: Mutex<Option<SignalHook>>,

    cli: Arc<Cli>,
    cli_enabled: AtomicBool,
    logger_handle: Mutex<Option<Arc<LoggerHandle>>>,
}

impl Application {
    /// Builds a new application core. Fails if another [`Application`]
    /// instance is already alive in this process.
    pub fn new(config: ApplicationConfig) -> anyhow::Result<Arc<Self>> {
        if INSTANCE_ALIVE.swap(true, Ordering::AcqRel) {
            anyhow::bail!("only one live Application instance is permitted per process");
        }

        let bus = Arc::new(AddressBook::new());
        let main_reactor = match TokioReactor::new() {
            Ok(r) => r,
            Err(err) => {
                INSTANCE_ALIVE.store(false, Ordering::Release);
                return Err(err);
            }
        };

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            config_path: Mutex::new(None),
            config_doc: Mutex::new(None),
            state: StateCell::new(ApplicationState::Created),
            wait_lock: Mutex::new(()),
            wait_cv: Condvar::new(),
            bus,
            main_reactor,
            main_reactor_work_guard: Mutex::new(None),
            worker_joins: Mutex::new(Vec::new()),
            signal_set_handle: Mutex::new(None),
            components: ComponentRegistry::new(),
            managed_threads: Mutex::new(HashMap::new()),
            recurring_tasks: Mutex::new(HashMap::new()),
            next_task_id: AtomicU64::new(1),
            health_task_id: Mutex::new(None),
            signal_handlers: Mutex::new(HashMap::new()),
            error_handler: Mutex::new(None),
            on_stop: Mutex::new(None),
            on_cleanup: Mutex::new(None),
            on_signal: Mutex::new(None),
            cli: Cli::new(),
            cli_enabled: AtomicBool::new(true),
            logger_handle: Mutex::new(None),
        }))
    }

    pub fn state(&self) -> ApplicationState {
        self.state.get()
    }

    pub fn config(&self) -> ApplicationConfig {
        self.config.read().clone()
    }

    fn main_reactor_dyn(&self) -> Arc<dyn Reactor> {
        self.main_reactor.clone()
    }

    // -- Lifecycle hooks (spec §4.F "on_stop"/"on_cleanup"/"on_signal") --

    pub fn set_on_stop(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_stop.lock() = Some(Box::new(hook));
    }

    pub fn set_on_cleanup(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_cleanup.lock() = Some(Box::new(hook));
    }

    pub fn set_on_signal(&self, hook: impl Fn(i32) + Send + Sync + 'static) {
        *self.on_signal.lock() = Some(Box::new(hook));
    }

    /// Registers a per-signal handler; it runs before the default action
    /// (spec §6.2 "User-registered handlers run before the default action").
    pub fn set_signal_handler(&self, signal: i32, handler: impl Fn() + Send + Sync + 'static) {
        self.signal_handlers.lock().insert(signal, Arc::new(handler));
    }

    pub fn set_error_handler(&self, handler: impl Fn(anyhow::Error) + Send + Sync + 'static) {
        *self.error_handler.lock() = Some(Arc::new(handler));
    }

    fn report_error(&self, err: anyhow::Error) {
        if let Some(handler) = self.error_handler.lock().clone() {
            handler(err);
        } else {
            tracing::error!(error = %err, "unhandled application error");
        }
    }

    // -- Run pipeline (spec §4.F "run()/run(argv)") --

    pub fn run(self: &Arc<Self>) -> i32 {
        let argv: Vec<OsString> = std::env::args_os().collect();
        self.run_with_argv(argv)
    }

    pub fn run_with_argv<I, T>(self: &Arc<Self>, argv: I) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = match Args::try_parse_from_argv(argv) {
            Ok(args) => args,
            Err(err) => {
                let _ = err.print();
                return match err.kind() {
                    clap::error::ErrorKind::DisplayHelp
                    | clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                    | clap::error::ErrorKind::DisplayVersion => 0,
                    _ => 2,
                };
            }
        };

        {
            let mut cfg = self.config.write();
            args.apply_overrides(&mut cfg);
        }
        if let Some(path) = &args.config {
            *self.config_path.lock() = Some(path.clone());
        }

        if self.config.read().daemon.enabled {
            let daemon_cfg = self.config.read().daemon.clone();
            if let Err(err) = crate::daemonize::daemonize(&daemon_cfg) {
                tracing::error!(error = %err, "daemonization failed");
                self.state.set(ApplicationState::Failed);
                return 1;
            }
            // Signal waits registered through the reactor are invalidated by
            // fork; nothing has armed them yet at this point in the
            // pipeline, so there is nothing to rearm here — arming happens
            // later in `start()`, after the fork has already happened.
        }

        if let Some(path) = self.config_path.lock().clone() {
            let app_name = self.config.read().name.clone();
            let doc = match ConfigDocument::load(&path, &app_name) {
                Ok(doc) => doc,
                Err(err) => {
                    tracing::error!(error = %err, path = %path.display(), "failed to load configuration file");
                    self.state.set(ApplicationState::Failed);
                    return 1;
                }
            };
            match ApplicationConfig::from_config(&doc) {
                Ok(mut loaded) => {
                    // CLI flags always win over the config file.
                    args.apply_overrides(&mut loaded);
                    *self.config.write() = loaded;
                    *self.config_doc.lock() = Some(doc);
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to interpret configuration file");
                    self.state.set(ApplicationState::Failed);
                    return 1;
                }
            }
        }

        if let Err(err) = self.initialize() {
            tracing::error!(error = %err, "initialization failed");
            self.state.set(ApplicationState::Failed);
            return 1;
        }

        if let Err(err) = self.start() {
            tracing::error!(error = %err, "start failed");
            self.state.set(ApplicationState::Failed);
            self.stop_sequence();
            return 1;
        }

        self.wait();
        self.stop_sequence();

        if self.state.is(ApplicationState::Failed) {
            1
        } else {
            0
        }
    }

    fn initialize(self: &Arc<Self>) -> anyhow::Result<()> {
        let cfg = self.config.read().clone();

        let handle = Arc::new(crux_logger::init(&cfg.logging)?);
        *self.logger_handle.lock() = Some(handle.clone());
        self.cli.set_logger_handle(handle);
        self.cli.set_host(self.clone());
        self.cli.configure(CliConfig {
            enable: cfg.network.cli_enabled,
            bind_address: cfg.network.cli_bind_address.clone(),
            port: cfg.network.cli_port,
            enable_stdin: cfg.network.cli_enable_stdin,
            enable_tcp_server: cfg.network.cli_enable_tcp,
            prompt: "> ".to_string(),
            command_timeout: Duration::from_millis(cfg.network.cli_command_timeout_ms),
        });
        self.cli_enabled.store(cfg.network.cli_enabled, Ordering::Release);

        self.components.initialize_all()?;

        self.state.set(ApplicationState::Initialized);
        Ok(())
    }

    fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        self.state.set(ApplicationState::Starting);
        let cfg = self.config.read().clone();

        self.components.start_all()?;

        self.arm_signals(&cfg);

        if cfg.health_check_enabled {
            self.start_health_monitor(cfg.health_check_interval());
        }

        *self.main_reactor_work_guard.lock() = Some(self.main_reactor.clone().acquire_work_guard());

        let worker_count = cfg.worker_threads.max(1);
        let mut joins = self.worker_joins.lock();
        for i in 0..worker_count {
            let reactor = self.main_reactor.clone();
            let weak = Arc::downgrade(self);
            let join = std::thread::Builder::new()
                .name(format!("crux-worker-{i}"))
                .spawn(move || {
                    reactor.run();
                    if let Some(app) = weak.upgrade() {
                        tracing::debug!("main reactor worker thread exiting");
                        let _ = app; // kept alive only for symmetry with managed threads
                    }
                })?;
            joins.push(join);
        }
        drop(joins);

        if self.cli_enabled.load(Ordering::Acquire) {
            self.cli.start()?;
        }

        self.state.set(ApplicationState::Running);
        Ok(())
    }

    fn arm_signals(self: &Arc<Self>, cfg: &ApplicationConfig) {
        if cfg.signals.is_empty() {
            return;
        }
        let weak = Arc::downgrade(self);
        let handle = self
            .main_reactor
            .clone()
            .signal_set(cfg.signals.clone(), Arc::new(move |sig| {
                if let Some(app) = weak.upgrade() {
                    app.handle_signal(sig);
                }
            }));
        *self.signal_set_handle.lock() = Some(handle);
    }

    fn handle_signal(self: &Arc<Self>, sig: i32) {
        if let Some(handler) = self.signal_handlers.lock().get(&sig).cloned() {
            handler();
        }
        if let Some(hook) = self.on_signal.lock().as_ref() {
            hook(sig);
        }
        match sig {
            SIGINT | SIGTERM => {
                tracing::info!(signal = sig, "shutdown signal received");
                self.shutdown();
            }
            SIGUSR1 => {
                tracing::info!("SIGUSR1 received: running immediate health check");
                let healthy = self.components.health_all();
                if !healthy {
                    tracing::warn!("health check triggered by SIGUSR1 reports unhealthy components");
                }
            }
            SIGUSR2 => {
                tracing::info!("SIGUSR2 received: reloading configuration");
                self.reload_config();
            }
            _ => {}
        }
    }

    /// Reloads the configuration file (if one was given) and applies any
    /// change to the logger's level at runtime. Full subscriber
    /// reconstruction is out of reach here — `tracing`'s global subscriber
    /// is set exactly once per process — so "reconfigure the logger" is
    /// implemented at the granularity `LoggerHandle::set_level` supports
    /// (see DESIGN.md's resolution of this open question).
    fn reload_config(&self) {
        let Some(path) = self.config_path.lock().clone() else {
            tracing::warn!("SIGUSR2 reload requested but no config file path is set");
            return;
        };
        let app_name = self.config.read().name.clone();
        let doc = match ConfigDocument::load(&path, &app_name) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::error!(error = %err, "config reload failed");
                return;
            }
        };
        match ApplicationConfig::from_config(&doc) {
            Ok(loaded) => {
                let new_level = loaded.logging.level.clone();
                *self.config.write() = loaded;
                *self.config_doc.lock() = Some(doc);
                if let Some(handle) = self.logger_handle.lock().clone() {
                    match crux_logger::parse_level(&new_level) {
                        Ok(level) => {
                            if let Err(err) = handle.set_level(level) {
                                tracing::error!(error = %err, "failed to apply reloaded log level");
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, "reloaded config has an invalid log level"),
                    }
                }
                tracing::info!("configuration reloaded");
            }
            Err(err) => tracing::error!(error = %err, "reloaded configuration is invalid"),
        }
    }

    fn start_health_monitor(self: &Arc<Self>, interval: Duration) {
        let weak_for_should_run = Arc::downgrade(self);
        let weak_for_task = Arc::downgrade(self);
        let id = crux_scheduler::schedule_recurring(
            self.main_reactor_dyn(),
            interval,
            TaskPriority::Low,
            move || {
                weak_for_should_run
                    .upgrade()
                    .map(|app| app.state.is(ApplicationState::Running))
                    .unwrap_or(false)
            },
            move || {
                if let Some(app) = weak_for_task.upgrade() {
                    if !app.components.health_all() {
                        tracing::warn!("periodic health check reports one or more unhealthy components");
                    }
                }
            },
        );
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.recurring_tasks.lock().insert(task_id, id);
        *self.health_task_id.lock() = Some(task_id);
    }

    /// Blocks until the state reaches Stopping/Stopped/Failed (spec §4.F
    /// "Worker pool ... `run()` blocks on a condition variable until state
    /// reaches Stopping/Stopped/Failed").
    fn wait(&self) {
        let mut guard = self.wait_lock.lock();
        while !self.state.is_terminal() {
            self.wait_cv.wait(&mut guard);
        }
    }

    /// Requests graceful shutdown (spec §4.F "shutdown()").
    pub fn shutdown(&self) {
        if self.state.is_terminal() {
            return;
        }
        self.state.set(ApplicationState::Stopping);
        let _guard = self.wait_lock.lock();
        self.wait_cv.notify_all();
    }

    /// Like [`Application::shutdown`] but also stops the main reactor
    /// immediately (spec §4.F "force_shutdown()").
    pub fn force_shutdown(&self) {
        self.shutdown();
        self.main_reactor.stop();
    }

    /// Runs the ten-step shutdown sequence (spec §4.F "Shutdown sequence").
    /// Safe to call more than once: every step is individually idempotent.
    fn stop_sequence(self: &Arc<Self>) {
        // 1. Disable the CLI.
        self.cli.stop();

        // 2. Stop health monitoring.
        if let Some(id) = self.health_task_id.lock().take() {
            if let Some(task) = self.recurring_tasks.lock().remove(&id) {
                task.cancel();
            }
        }

        // 3. Cancel and clear all recurring tasks.
        let tasks: Vec<RecurringTask> = self.recurring_tasks.lock().drain().map(|(_, t)| t).collect();
        for task in tasks {
            task.cancel();
        }

        // 4. Call on_stop.
        if let Some(hook) = self.on_stop.lock().as_ref() {
            hook();
        }

        // 5. Stop components in reverse insertion order.
        self.components.stop_all();

        // 6. Stop and join all managed threads.
        self.stop_all_managed_threads();
        self.join_all_managed_threads();

        // 7. Release the main reactor's work-guard; stop the main reactor;
        //    join worker threads.
        self.main_reactor_work_guard.lock().take();
        if let Some(handle) = self.signal_set_handle.lock().take() {
            handle.cancel();
        }
        self.main_reactor.stop();
        let joins: Vec<JoinHandle<()>> = self.worker_joins.lock().drain(..).collect();
        for join in joins {
            let _ = join.join();
        }

        // 8. Call on_cleanup.
        if let Some(hook) = self.on_cleanup.lock().as_ref() {
            hook();
        }

        // 9. Remove PID file if daemonized.
        if self.config.read().daemon.enabled {
            crate::daemonize::remove_pid_file(&self.config.read().daemon.pid_file);
        }

        // 10. Transition to Stopped (unless a failure already marked Failed).
        if !self.state.is(ApplicationState::Failed) {
            self.state.set(ApplicationState::Stopped);
        }
    }

    // -- Scheduling delegation (spec §4.F, delegating to §4.D) --

    pub fn post_task(&self, task: BoxTask) {
        self.post_task_with_priority(task, TaskPriority::Normal);
    }

    pub fn post_task_with_priority(&self, task: BoxTask, priority: TaskPriority) {
        crux_scheduler::post(&self.main_reactor_dyn(), task, priority);
    }

    pub fn post_delayed_task(&self, task: BoxTask, delay: Duration, priority: TaskPriority) -> TimerHandle {
        crux_scheduler::post_delayed(&self.main_reactor_dyn(), task, delay, priority)
    }

    /// Registers a recurring task driven by `self.state == Running`, returning
    /// an id usable with [`Application::cancel_recurring_task`].
    pub fn schedule_recurring_task<F>(self: &Arc<Self>, interval: Duration, priority: TaskPriority, task: F) -> u64
    where
        F: FnMut() + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let handle = crux_scheduler::schedule_recurring(
            self.main_reactor_dyn(),
            interval,
            priority,
            move || weak.upgrade().map(|app| app.state.is(ApplicationState::Running)).unwrap_or(false),
            task,
        );
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.recurring_tasks.lock().insert(id, handle);
        id
    }

    pub fn cancel_recurring_task(&self, id: u64) -> bool {
        match self.recurring_tasks.lock().remove(&id) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    // -- Managed threads (spec §4.F) --

    pub fn create_thread(&self, name: impl Into<String>, setup: Option<Setup>) -> Result<Arc<ManagedThread>, ThreadError> {
        let name = name.into();
        let thread = ManagedThread::spawn(name.clone(), self.bus.clone(), setup)?;
        self.managed_threads.lock().insert(name, thread.clone());
        Ok(thread)
    }

    /// A managed thread with no setup hook, purely driven by posted tasks
    /// and its own mailbox drain.
    pub fn create_worker_thread(&self, name: impl Into<String>) -> Result<Arc<ManagedThread>, ThreadError> {
        self.create_thread(name, None)
    }

    /// Equivalent to [`Application::create_worker_thread`] in this design:
    /// every managed thread already drains its mailbox on a fixed interval
    /// (spec §4.C), so there is no separate poll-vs-event-driven
    /// implementation to choose between — the name is kept for symmetry
    /// with the original's two thread-creation entry points.
    pub fn create_event_driven_thread(&self, name: impl Into<String>) -> Result<Arc<ManagedThread>, ThreadError> {
        self.create_thread(name, None)
    }

    pub fn managed_thread_count(&self) -> usize {
        self.managed_threads.lock().len()
    }

    pub fn get_managed_thread(&self, name: &str) -> Option<Arc<ManagedThread>> {
        self.managed_threads.lock().get(name).cloned()
    }

    pub fn stop_all_managed_threads(&self) {
        let threads: Vec<Arc<ManagedThread>> = self.managed_threads.lock().values().cloned().collect();
        for thread in threads {
            thread.stop();
        }
    }

    pub fn join_all_managed_threads(&self) {
        let threads: Vec<Arc<ManagedThread>> = self.managed_threads.lock().drain().map(|(_, t)| t).collect();
        for thread in threads {
            thread.join();
        }
    }

    // -- Messaging delegation (spec §4.F, delegating to §4.B) --

    pub fn send_message_to_thread<T: std::any::Any + Send + 'static>(
        &self,
        name: &str,
        payload: T,
        priority: MessagePriority,
    ) -> SendOutcome {
        self.bus.send(name, payload, priority)
    }

    pub fn broadcast_message<T: std::any::Any + Send + Clone + 'static>(&self, payload: T, priority: MessagePriority) -> usize {
        self.bus.broadcast(payload, priority)
    }

    pub fn bus(&self) -> Arc<AddressBook> {
        self.bus.clone()
    }

    // -- Components (spec §4.F, delegating to §4.E) --

    pub fn add_component(&self, component: Arc<dyn Component>) -> Result<(), ComponentError> {
        self.components.add(component)
    }

    pub fn get_component(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components.get(name)
    }

    // -- CLI (spec §4.F) --

    pub fn cli(&self) -> Arc<Cli> {
        self.cli.clone()
    }

    pub fn enable_cli(&self) {
        self.cli_enabled.store(true, Ordering::Release);
    }

    pub fn disable_cli(&self) {
        self.cli_enabled.store(false, Ordering::Release);
        self.cli.stop();
    }

    pub fn is_cli_enabled(&self) -> bool {
        self.cli_enabled.load(Ordering::Acquire)
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        INSTANCE_ALIVE.store(false, Ordering::Release);
    }
}

impl CliHost for Application {
    fn app_name(&self) -> String {
        self.config.read().name.clone()
    }

    fn app_version(&self) -> String {
        self.config.read().version.clone()
    }

    fn app_description(&self) -> String {
        self.config.read().description.clone()
    }

    fn state_name(&self) -> String {
        self.state.get().to_string()
    }

    fn is_running(&self) -> bool {
        self.state.is(ApplicationState::Running)
    }

    fn worker_threads(&self) -> usize {
        self.config.read().worker_threads
    }

    fn managed_thread_count(&self) -> usize {
        Application::managed_thread_count(self)
    }

    fn uses_dedicated_io_thread(&self) -> bool {
        let cfg = self.cli.config();
        cfg.enable_stdin || cfg.enable_tcp_server
    }

    fn config_file(&self) -> String {
        self.config_path
            .lock()
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    }

    fn health_check_enabled(&self) -> bool {
        self.config.read().health_check_enabled
    }

    fn health_check_interval_ms(&self) -> u64 {
        self.config.read().health_check_interval_ms
    }

    fn health_check(&self) -> bool {
        self.components.health_all()
    }

    fn messaging_summary(&self) -> String {
        let names = self.bus.registered_names();
        format!("Message Bus: Available\nRegistered mailboxes: {}\nThreads: {}", names.len(), names.join(", "))
    }

    fn shutdown(&self) {
        Application::shutdown(self);
    }

    fn force_shutdown(&self) {
        Application::force_shutdown(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// `Application::new` enforces a process-wide singleton; since
    /// `cargo test` runs `#[test]` functions on a shared thread pool within
    /// one process, every test that constructs an `Application` must hold
    /// this lock for its whole lifetime or two tests could observe each
    /// other's still-alive instance.
    static SINGLETON_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn test_config(name: &str) -> ApplicationConfig {
        ApplicationConfig {
            name: name.to_string(),
            worker_threads: 1,
            network: crate::config::NetworkConfig {
                cli_enabled: false,
                ..Default::default()
            },
            health_check_enabled: false,
            ..Default::default()
        }
    }

    #[test]
    fn only_one_instance_is_permitted_per_process() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let first = Application::new(test_config("app-one")).unwrap();
        let second = Application::new(test_config("app-one"));
        assert!(second.is_err());
        drop(first);
        // Once the first is dropped, a new instance is permitted again.
        let third = Application::new(test_config("app-one"));
        assert!(third.is_ok());
    }

    #[test]
    fn run_with_argv_reaches_stopped_after_shutdown() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let app = Application::new(test_config("app-two")).unwrap();
        let app_for_shutdown = app.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            app_for_shutdown.shutdown();
        });
        let code = app.run_with_argv(["app-two", "--no-daemon"]);
        assert_eq!(code, 0);
        assert_eq!(app.state(), ApplicationState::Stopped);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let app = Application::new(test_config("app-three")).unwrap();
        app.initialize_for_test();
        app.start_for_test();
        app.shutdown();
        app.shutdown();
        app.stop_sequence();
        assert_eq!(app.state(), ApplicationState::Stopped);
    }

    #[test]
    fn recurring_task_can_be_cancelled_by_id() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let app = Application::new(test_config("app-four")).unwrap();
        app.initialize_for_test();
        app.start_for_test();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let id = app.schedule_recurring_task(Duration::from_millis(5), TaskPriority::Normal, move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(30));
        assert!(app.cancel_recurring_task(id));
        let seen = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), seen);
        app.stop_sequence();
    }

    #[test]
    fn managed_thread_registry_tracks_creation_and_stop() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let app = Application::new(test_config("app-five")).unwrap();
        app.initialize_for_test();
        app.start_for_test();
        app.create_worker_thread("worker-a").unwrap();
        assert_eq!(app.managed_thread_count(), 1);
        app.stop_all_managed_threads();
        app.join_all_managed_threads();
        assert_eq!(app.managed_thread_count(), 0);
        app.stop_sequence();
    }

    impl Application {
        /// Test-only shortcut: runs `initialize()` without going through
        /// `run_with_argv`'s argument parsing.
        fn initialize_for_test(self: &Arc<Self>) {
            self.initialize().expect("test initialize should succeed");
        }

        /// Test-only shortcut for `start()`.
        fn start_for_test(self: &Arc<Self>) {
            self.start().expect("test start should succeed");
        }

        fn stop_sequence(self: &Arc<Self>) {
            Application::stop_sequence(self)
        }
    }
}
