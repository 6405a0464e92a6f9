//! A managed, single-purpose worker thread (spec §4.C): a unique name, a
//! dedicated [`TokioReactor`], a mailbox registered under that name in a
//! shared [`AddressBook`], and a native thread driving `reactor.run()`.
//!
//! Message delivery is pulled: a recurring task (spec §4.B/§4.D) drains the
//! owned mailbox on a fixed interval from the reactor's own thread.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crux_messaging::{AddressBook, Mailbox, MessagePriority, MessagingError};
use crux_reactor::{BoxTask, Reactor, TokioReactor, WorkGuard};
use crux_scheduler::{RecurringTask, TaskPriority};

/// Default interval on which a managed thread drains its own mailbox
/// (spec §4.B "periodic-drain" default).
const DRAIN_INTERVAL: Duration = Duration::from_millis(1);

/// One-shot initialization hook run on the managed thread before it starts
/// accepting scheduled work (spec §4.C "optional user-supplied setup
/// function").
pub type Setup = Box<dyn FnOnce(&ManagedThread) + Send + 'static>;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("failed to initialize reactor: {0}")]
    ReactorInit(String),
    #[error("failed to spawn native thread: {0}")]
    SpawnFailed(String),
    #[error("mailbox registration failed: {0}")]
    Registration(#[from] MessagingError),
}

/// Lifecycle state of a [`ManagedThread`] (spec §4.C "Lifecycle").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Starting,
    Running,
    Stopped,
    Failed,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct ManagedThread {
    name: String,
    reactor: Arc<TokioReactor>,
    mailbox: Arc<Mailbox>,
    bus: Arc<AddressBook>,
    state: Mutex<ThreadState>,
    running: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
    work_guard: Mutex<Option<WorkGuard>>,
    drain_task: Mutex<Option<RecurringTask>>,
    stop_once: AtomicBool,
    next_message_id: AtomicU64,
}

impl ManagedThread {
    /// Builds and starts a managed thread registered as `name` in `bus`.
    /// `setup`, if given, runs once on the native thread before the
    /// reactor's run loop and any scheduled drain begins.
    pub fn spawn(
        name: impl Into<String>,
        bus: Arc<AddressBook>,
        setup: Option<Setup>,
    ) -> Result<Arc<Self>, ThreadError> {
        let name = name.into();
        let reactor = TokioReactor::new().map_err(|e| ThreadError::ReactorInit(e.to_string()))?;
        let mailbox = Mailbox::new(name.clone());
        bus.register(name.clone(), mailbox.clone())?;

        let thread = Arc::new(Self {
            name: name.clone(),
            reactor,
            mailbox,
            bus,
            state: Mutex::new(ThreadState::Starting),
            running: Arc::new(AtomicBool::new(false)),
            join: Mutex::new(None),
            work_guard: Mutex::new(None),
            drain_task: Mutex::new(None),
            stop_once: AtomicBool::new(false),
            next_message_id: AtomicU64::new(1),
        });

        let thread_for_native = thread.clone();
        let native = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || thread_for_native.run_native(setup))
            .map_err(|e| ThreadError::SpawnFailed(e.to_string()))?;

        *thread.join.lock() = Some(native);
        Ok(thread)
    }

    fn run_native(self: Arc<Self>, setup: Option<Setup>) {
        if let Some(setup) = setup {
            let self_for_setup = self.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                setup(self_for_setup.as_ref());
            }));
            if let Err(payload) = result {
                tracing::error!(
                    thread = %self.name,
                    error = %panic_message(&*payload),
                    "setup function panicked; thread will not start"
                );
                *self.state.lock() = ThreadState::Failed;
                self.bus.unregister(&self.name);
                return;
            }
        }

        let guard = self.reactor.clone().acquire_work_guard();
        *self.work_guard.lock() = Some(guard);

        self.running.store(true, Ordering::Release);
        let mailbox_for_drain = self.mailbox.clone();
        let running_for_drain = self.running.clone();
        let drain_task = crux_scheduler::schedule_recurring(
            self.reactor_dyn(),
            DRAIN_INTERVAL,
            TaskPriority::High,
            move || running_for_drain.load(Ordering::Acquire),
            move || {
                mailbox_for_drain.drain_ready();
            },
        );
        *self.drain_task.lock() = Some(drain_task);

        *self.state.lock() = ThreadState::Running;

        self.reactor.run();

        let mut state = self.state.lock();
        if *state != ThreadState::Failed {
            *state = ThreadState::Stopped;
        }
    }

    fn reactor_dyn(&self) -> Arc<dyn Reactor> {
        self.reactor.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    /// Queues `task` onto the owned reactor at `Normal` priority
    /// (spec §4.C "post_task").
    pub fn post_task(&self, task: BoxTask) {
        self.post_task_with_priority(task, TaskPriority::Normal);
    }

    pub fn post_task_with_priority(&self, task: BoxTask, priority: TaskPriority) {
        crux_scheduler::post(&self.reactor_dyn(), task, priority);
    }

    /// Enqueues `payload` on this thread's own mailbox (spec §4.C
    /// "send<T>"). Returns `false` if the mailbox is full or stopped.
    pub fn send<T: Any + Send + 'static>(&self, payload: T, priority: MessagePriority) -> bool {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        self.mailbox.post(id, payload, priority)
    }

    pub fn subscribe<T: Any + Send + 'static>(&self, handler: impl Fn(&T) + Send + Sync + 'static) {
        self.mailbox.subscribe(handler);
    }

    pub fn unsubscribe<T: Any + 'static>(&self) {
        self.mailbox.unsubscribe::<T>();
    }

    pub fn pending_message_count(&self) -> usize {
        self.mailbox.pending_message_count()
    }

    /// Releases the work-guard, stops the reactor, and unregisters from
    /// the bus. Idempotent (spec §4.C "Lifecycle").
    pub fn stop(&self) {
        if self.stop_once.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(false, Ordering::Release);
        if let Some(task) = self.drain_task.lock().take() {
            task.cancel();
        }
        self.mailbox.stop();
        self.bus.unregister(&self.name);
        self.work_guard.lock().take();
        self.reactor.stop();
    }

    /// Waits for the native thread to terminate. A no-op if called from
    /// within the managed thread itself (e.g. transitively via `Drop`).
    pub fn join(&self) {
        let current = std::thread::current().id();
        let handle = {
            let mut guard = self.join.lock();
            if guard.as_ref().map(|h| h.thread().id()) == Some(current) {
                return;
            }
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn spawn_registers_in_bus_and_stop_unregisters() {
        let bus = Arc::new(AddressBook::new());
        let thread = ManagedThread::spawn("worker-1", bus.clone(), None).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(bus.is_registered("worker-1"));
        thread.stop();
        thread.join();
        assert!(!bus.is_registered("worker-1"));
    }

    #[test]
    fn post_task_runs_on_owned_reactor() {
        let bus = Arc::new(AddressBook::new());
        let thread = ManagedThread::spawn("worker-2", bus, None).unwrap();
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = flag.clone();
        thread.post_task(Box::new(move || {
            flag2.store(1, Ordering::SeqCst);
        }));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(flag.load(Ordering::SeqCst), 1);
        thread.stop();
        thread.join();
    }

    #[test]
    fn send_and_drain_invokes_subscribed_handler() {
        let bus = Arc::new(AddressBook::new());
        let received = Arc::new(AtomicUsize::new(0));
        let received2 = received.clone();
        let thread = ManagedThread::spawn(
            "worker-3",
            bus,
            Some(Box::new(move |t: &ManagedThread| {
                t.subscribe::<i32>(move |v| {
                    received2.fetch_add(*v as usize, Ordering::SeqCst);
                });
            })),
        )
        .unwrap();
        thread.send(41, MessagePriority::Normal);
        thread.send(1, MessagePriority::Normal);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(received.load(Ordering::SeqCst), 42);
        thread.stop();
        thread.join();
    }

    #[test]
    fn stop_is_idempotent() {
        let bus = Arc::new(AddressBook::new());
        let thread = ManagedThread::spawn("worker-4", bus, None).unwrap();
        thread.stop();
        thread.stop();
        thread.join();
        assert_eq!(thread.state(), ThreadState::Stopped);
    }

    #[test]
    fn panicking_setup_terminates_thread_and_marks_failed() {
        let bus = Arc::new(AddressBook::new());
        let thread = ManagedThread::spawn(
            "worker-5",
            bus.clone(),
            Some(Box::new(|_: &ManagedThread| {
                panic!("setup exploded");
            })),
        )
        .unwrap();
        thread.join();
        assert_eq!(thread.state(), ThreadState::Failed);
        assert!(!bus.is_registered("worker-5"));
    }
}
