//! The reactor interface (spec §4.A) and its one concrete realization.
//!
//! The wire-level event-loop implementation is, per spec §1, an external
//! collaborator specified only by interface. This crate supplies the
//! [`Reactor`] trait plus [`TokioReactor`], the "actor per thread, each
//! with its own tiny runtime" pattern: every managed thread (spec §4.C)
//! builds a single-threaded Tokio runtime and drives it from its own
//! native thread via [`Reactor::run`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub type BoxTask = Box<dyn FnOnce() + Send + 'static>;
pub type SignalCallback = Arc<dyn Fn(i32) + Send + Sync + 'static>;

/// Cancellable one-shot timer handle (spec §4.A "timer").
pub struct TimerHandle {
    join: JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Cancellable signal-wait handle (spec §4.A "signal_set").
pub struct SignalSetHandle {
    joins: Vec<JoinHandle<()>>,
}

impl SignalSetHandle {
    pub fn cancel(&self) {
        for j in &self.joins {
            j.abort();
        }
    }
}

/// RAII accounting token for outstanding "keep this reactor meaningfully
/// alive" holders (spec §4.A "Each reactor owns a work-guard..."). `run()`
/// itself always terminates on an explicit `stop()`; the guard count is
/// exposed for introspection (e.g. the `threads` CLI command, spec §4.H).
pub struct WorkGuard {
    reactor: Arc<dyn Reactor>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.reactor.release_work_guard();
    }
}

/// The abstract event loop contract every managed thread and the
/// application's main loop are built against (spec §4.A).
pub trait Reactor: Send + Sync {
    /// Enqueues `task` for later execution on this reactor's thread.
    fn post(&self, task: BoxTask);

    /// Executes `task` inline if the caller is already on this reactor's
    /// thread, otherwise posts it.
    fn dispatch(&self, task: BoxTask);

    /// Arms a cancellable one-shot timer.
    fn timer(&self, delay: Duration, callback: BoxTask) -> TimerHandle;

    /// Arms an asynchronous wait for any of `signals`; `callback` receives
    /// the delivered signal number on the reactor's own thread.
    fn signal_set(&self, signals: Vec<i32>, callback: SignalCallback) -> SignalSetHandle;

    /// Blocks the caller, executing ready work until `stop()` is called
    /// and every outstanding work-guard has been released.
    fn run(&self);

    /// Causes `run()` to return after currently queued work drains.
    fn stop(&self);

    /// Acquires an additional work-guard keeping `run()` alive.
    fn acquire_work_guard(self: Arc<Self>) -> WorkGuard
    where
        Self: Sized + 'static,
    {
        self.inc_work_guard();
        WorkGuard { reactor: self }
    }

    #[doc(hidden)]
    fn inc_work_guard(&self);
    #[doc(hidden)]
    fn release_work_guard(&self);
}

/// A [`Reactor`] backed by a dedicated single-threaded Tokio runtime.
pub struct TokioReactor {
    runtime: Runtime,
    handle: Handle,
    owner_thread: Mutex<Option<ThreadId>>,
    wake: Notify,
    stop_requested: AtomicBool,
    work_guards: AtomicU64,
}

impl TokioReactor {
    pub fn new() -> anyhow::Result<Arc<Self>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Arc::new(Self {
            runtime,
            handle,
            owner_thread: Mutex::new(None),
            wake: Notify::new(),
            stop_requested: AtomicBool::new(false),
            work_guards: AtomicU64::new(0),
        }))
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    fn is_on_own_thread(&self) -> bool {
        *self.owner_thread.lock() == Some(std::thread::current().id())
    }

    /// Spawns an async future onto this reactor's runtime; used by code
    /// that is already async (e.g. the CLI's TCP acceptor, spec §4.H)
    /// rather than `post`'s sync-closure interface.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl Reactor for TokioReactor {
    fn post(&self, task: BoxTask) {
        self.handle.spawn(async move { task() });
    }

    fn dispatch(&self, task: BoxTask) {
        if self.is_on_own_thread() {
            task();
        } else {
            self.post(task);
        }
    }

    fn timer(&self, delay: Duration, callback: BoxTask) -> TimerHandle {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TimerHandle { join }
    }

    fn signal_set(&self, signals: Vec<i32>, callback: SignalCallback) -> SignalSetHandle {
        let mut joins = Vec::with_capacity(signals.len());
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            for sig in signals {
                match signal(SignalKind::from_raw(sig)) {
                    Ok(mut stream) => {
                        let cb = callback.clone();
                        joins.push(self.handle.spawn(async move {
                            loop {
                                if stream.recv().await.is_none() {
                                    break;
                                }
                                cb(sig);
                            }
                        }));
                    }
                    Err(err) => {
                        tracing::warn!(signal = sig, error = %err, "failed to register signal handler");
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (signals, callback);
        }
        SignalSetHandle { joins }
    }

    fn run(&self) {
        *self.owner_thread.lock() = Some(std::thread::current().id());
        self.handle.clone().block_on(async {
            while !self.stop_requested.load(Ordering::Acquire) {
                self.wake.notified().await;
            }
        });
    }

    fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        // notify_one stores a permit if run()'s loop hasn't started waiting
        // yet, avoiding the lost-wakeup race notify_waiters() would have.
        self.wake.notify_one();
    }

    fn inc_work_guard(&self) {
        self.work_guards.fetch_add(1, Ordering::AcqRel);
    }

    fn release_work_guard(&self) {
        self.work_guards.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn post_runs_on_reactor_thread() {
        let reactor = TokioReactor::new().unwrap();
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = flag.clone();
        reactor.post(Box::new(move || {
            flag2.store(1, Ordering::SeqCst);
        }));
        let reactor_for_thread = reactor.clone();
        let guard = reactor_for_thread.clone().acquire_work_guard();
        let join = std::thread::spawn(move || reactor_for_thread.run());
        // Give the spawned task a moment to run, then release the guard to stop.
        std::thread::sleep(Duration::from_millis(50));
        drop(guard);
        reactor.stop();
        join.join().unwrap();
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timer_cancel_prevents_callback() {
        let reactor = TokioReactor::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let handle = reactor.timer(
            Duration::from_millis(200),
            Box::new(move || {
                fired2.store(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();

        let reactor_for_thread = reactor.clone();
        let guard = reactor_for_thread.clone().acquire_work_guard();
        let join = std::thread::spawn(move || reactor_for_thread.run());
        std::thread::sleep(Duration::from_millis(300));
        drop(guard);
        reactor.stop();
        join.join().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
