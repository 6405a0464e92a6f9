/// The surface of the application that the built-in commands inspect
/// (spec §4.H "Commands requiring application context"). Kept as a
/// trait rather than a direct dependency on the application crate so
/// the CLI can be wired into anything that exposes this shape without
/// creating a crate cycle.
pub trait CliHost: Send + Sync {
    fn app_name(&self) -> String;
    fn app_version(&self) -> String;
    fn app_description(&self) -> String;
    fn state_name(&self) -> String;
    fn is_running(&self) -> bool;
    fn worker_threads(&self) -> usize;
    fn managed_thread_count(&self) -> usize;
    fn uses_dedicated_io_thread(&self) -> bool;
    fn config_file(&self) -> String;
    fn health_check_enabled(&self) -> bool;
    fn health_check_interval_ms(&self) -> u64;
    /// Aggregate health across every registered component.
    fn health_check(&self) -> bool;
    fn messaging_summary(&self) -> String;
    fn shutdown(&self);
    fn force_shutdown(&self);
}
