//! Immediate, delayed, and recurring task-scheduling primitives (spec §4.D)
//! that operate against any [`Reactor`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crux_reactor::{BoxTask, Reactor, TimerHandle};

/// Priority ladder for scheduled tasks (spec §3 "TaskPriority").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Wraps `task` so that any panic is caught and logged with `priority`
/// instead of unwinding into the reactor (spec §4.D "wrap").
fn wrap(task: BoxTask, priority: TaskPriority) -> BoxTask {
    Box::new(move || {
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            tracing::error!(?priority, message = %panic_message(&*payload), "scheduled task panicked");
        }
    })
}

/// `post(task, priority)` (spec §4.D): `Critical` dispatches inline when
/// already on the reactor's thread; everything else is posted.
pub fn post(reactor: &Arc<dyn Reactor>, task: BoxTask, priority: TaskPriority) {
    let wrapped = wrap(task, priority);
    match priority {
        TaskPriority::Critical => reactor.dispatch(wrapped),
        _ => reactor.post(wrapped),
    }
}

/// `post_delayed(task, delay, priority)` (spec §4.D): arms an owning timer
/// whose expiry invokes `post`.
pub fn post_delayed(reactor: &Arc<dyn Reactor>, task: BoxTask, delay: Duration, priority: TaskPriority) -> TimerHandle {
    let reactor_for_callback = reactor.clone();
    reactor.timer(
        delay,
        Box::new(move || {
            post(&reactor_for_callback, task, priority);
        }),
    )
}

/// Cancellable handle to a recurring task (spec §3 "RecurringTask").
pub struct RecurringTask {
    cancelled: Arc<AtomicBool>,
    current_timer: Arc<Mutex<Option<TimerHandle>>>,
}

impl RecurringTask {
    /// Cancels the timer and prevents any further re-arming.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(timer) = self.current_timer.lock().take() {
            timer.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// `schedule_recurring(task, interval, priority)` (spec §4.D): repeatedly
/// arms a timer that, while `should_run()` holds (typically
/// `Application.state == Running`), invokes `task` via [`post`] and
/// re-arms for another `interval`.
pub fn schedule_recurring<F, R>(
    reactor: Arc<dyn Reactor>,
    interval: Duration,
    priority: TaskPriority,
    should_run: R,
    task: F,
) -> RecurringTask
where
    F: FnMut() + Send + 'static,
    R: Fn() -> bool + Send + Sync + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let current_timer = Arc::new(Mutex::new(None));
    let task_cell: Arc<Mutex<Box<dyn FnMut() + Send>>> = Arc::new(Mutex::new(Box::new(task)));
    let should_run: Arc<dyn Fn() -> bool + Send + Sync> = Arc::new(should_run);

    arm(reactor, interval, priority, should_run, task_cell, cancelled.clone(), current_timer.clone());

    RecurringTask {
        cancelled,
        current_timer,
    }
}

fn arm(
    reactor: Arc<dyn Reactor>,
    interval: Duration,
    priority: TaskPriority,
    should_run: Arc<dyn Fn() -> bool + Send + Sync>,
    task_cell: Arc<Mutex<Box<dyn FnMut() + Send>>>,
    cancelled: Arc<AtomicBool>,
    current_timer: Arc<Mutex<Option<TimerHandle>>>,
) {
    if cancelled.load(Ordering::SeqCst) {
        return;
    }
    let reactor_for_timer = reactor.clone();
    let current_timer_for_closure = current_timer.clone();
    let timer = reactor.timer(
        interval,
        Box::new(move || {
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            if should_run() {
                let task_cell_for_post = task_cell.clone();
                post(
                    &reactor_for_timer,
                    Box::new(move || {
                        (task_cell_for_post.lock())();
                    }),
                    priority,
                );
            }
            arm(
                reactor_for_timer,
                interval,
                priority,
                should_run,
                task_cell,
                cancelled,
                current_timer_for_closure,
            );
        }),
    );
    *current_timer.lock() = Some(timer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crux_reactor::TokioReactor;
    use std::sync::atomic::AtomicUsize;

    fn run_reactor_for(reactor: Arc<dyn Reactor>, duration: Duration) {
        let r = reactor.clone();
        let join = std::thread::spawn(move || r.run());
        std::thread::sleep(duration);
        reactor.stop();
        join.join().unwrap();
    }

    #[test]
    fn post_executes_task() {
        let reactor: Arc<dyn Reactor> = TokioReactor::new().unwrap();
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = flag.clone();
        post(&reactor, Box::new(move || flag2.store(1, Ordering::SeqCst)), TaskPriority::Normal);
        run_reactor_for(reactor, Duration::from_millis(50));
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_task_is_caught_and_logged() {
        let reactor: Arc<dyn Reactor> = TokioReactor::new().unwrap();
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = flag.clone();
        post(
            &reactor,
            Box::new(move || {
                flag2.store(1, Ordering::SeqCst);
                panic!("boom");
            }),
            TaskPriority::High,
        );
        run_reactor_for(reactor, Duration::from_millis(50));
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn post_delayed_runs_after_delay() {
        let reactor: Arc<dyn Reactor> = TokioReactor::new().unwrap();
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = flag.clone();
        post_delayed(
            &reactor,
            Box::new(move || flag2.store(1, Ordering::SeqCst)),
            Duration::from_millis(20),
            TaskPriority::Normal,
        );
        let r = reactor.clone();
        let join = std::thread::spawn(move || r.run());
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(flag.load(Ordering::SeqCst), 0);
        std::thread::sleep(Duration::from_millis(40));
        reactor.stop();
        join.join().unwrap();
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recurring_task_runs_roughly_on_interval_and_stops_after_cancel() {
        let reactor: Arc<dyn Reactor> = TokioReactor::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let running = Arc::new(AtomicBool::new(true));
        let running2 = running.clone();

        let r = reactor.clone();
        let join = std::thread::spawn(move || r.run());

        let handle = schedule_recurring(
            reactor.clone(),
            Duration::from_millis(10),
            TaskPriority::Normal,
            move || running2.load(Ordering::SeqCst),
            move || {
                count2.fetch_add(1, Ordering::SeqCst);
            },
        );

        std::thread::sleep(Duration::from_millis(35));
        handle.cancel();
        let count_at_cancel = count.load(Ordering::SeqCst);
        assert!((2..=4).contains(&count_at_cancel), "got {count_at_cancel}");

        std::thread::sleep(Duration::from_millis(50));
        reactor.stop();
        join.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), count_at_cancel);
    }
}
