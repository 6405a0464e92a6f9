//! Type-erased, type-safe inter-thread messaging fabric (spec §4.B).
//!
//! A [`Mailbox`] is a per-thread priority-ordered buffer with a type-tag to
//! handler mapping; an [`AddressBook`] is the process-wide registry that
//! `send`/`broadcast` consult. Dispatch is pulled, not pushed: something on
//! the owning thread (typically a recurring scheduler task, spec §4.D) must
//! call [`Mailbox::drain_ready`] to invoke handlers — this keeps all handler
//! invocations on the owning thread without the mailbox itself owning one.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;

/// Four-level priority ladder shared by tasks and messages (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MessagePriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

pub type MessageId = u64;

/// Default mailbox capacity (spec §3 "ThreadMailbox").
pub const DEFAULT_MAILBOX_CAPACITY: usize = 10_000;

/// Delivery-error taxonomy (spec §7 "Delivery error").
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("thread '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Outcome of [`AddressBook::send`] (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    NotFound,
    Full,
    Shutdown,
}

struct Envelope {
    id: MessageId,
    priority: MessagePriority,
    created_at: Instant,
    type_id: TypeId,
    payload: Box<dyn Any + Send>,
}

type Handler = Box<dyn Fn(&(dyn Any + Send)) + Send + Sync>;

/// Per-thread mailbox: a bounded, priority-ordered message buffer plus a
/// type-tag → handler mapping (spec §3 "ThreadMailbox").
pub struct Mailbox {
    name: String,
    capacity: usize,
    // One FIFO queue per priority level; draining always empties the
    // highest-priority non-empty queue first, which gives "higher priority
    // drains before lower; FIFO within a priority" for free.
    queues: Mutex<[VecDeque<Envelope>; 4]>,
    len: AtomicU64,
    handlers: Mutex<HashMap<TypeId, Handler>>,
    shutdown: AtomicBool,
    next_id: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Mailbox {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_capacity(name, DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            capacity,
            queues: Mutex::new([
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ]),
            len: AtomicU64::new(0),
            handlers: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `handler` as the sole subscriber for `T` in this mailbox,
    /// replacing any prior handler for `T` (spec §4.B "subscribe<T>").
    pub fn subscribe<T: Any + Send + 'static>(&self, handler: impl Fn(&T) + Send + Sync + 'static) {
        let type_id = TypeId::of::<T>();
        let wrapped: Handler = Box::new(move |any: &(dyn Any + Send)| {
            if let Some(typed) = any.downcast_ref::<T>() {
                handler(typed);
            }
        });
        self.handlers.lock().insert(type_id, wrapped);
    }

    /// Removes the handler for `T`; subsequent messages of `T` are silently
    /// discarded on drain (spec §4.B "unsubscribe<T>").
    pub fn unsubscribe<T: Any + 'static>(&self) {
        self.handlers.lock().remove(&TypeId::of::<T>());
    }

    fn enqueue(&self, envelope: Envelope) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        let mut queues = self.queues.lock();
        if self.len.load(Ordering::Relaxed) as usize >= self.capacity {
            return false;
        }
        queues[envelope.priority as usize].push_back(envelope);
        self.len.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Enqueues a message for later drain. Returns `false` (caller maps to
    /// `Full`/`Shutdown`) without blocking, per spec §4.B backpressure.
    pub fn post<T: Any + Send + 'static>(&self, id: MessageId, payload: T, priority: MessagePriority) -> bool {
        let envelope = Envelope {
            id,
            priority,
            created_at: Instant::now(),
            type_id: TypeId::of::<T>(),
            payload: Box::new(payload),
        };
        self.enqueue(envelope)
    }

    /// Drains every currently queued message in strict priority order
    /// (spec §4.B "Delivery model"), invoking the registered handler for
    /// each. Messages without a handler are dropped. Returns the number of
    /// messages handled (delivered + dropped-for-no-handler).
    pub fn drain_ready(&self) -> usize {
        let mut drained = 0usize;
        loop {
            let envelope = {
                let mut queues = self.queues.lock();
                let mut found = None;
                for q in queues.iter_mut().rev() {
                    if let Some(e) = q.pop_front() {
                        found = Some(e);
                        break;
                    }
                }
                if found.is_some() {
                    self.len.fetch_sub(1, Ordering::Relaxed);
                }
                found
            };
            let Some(envelope) = envelope else { break };
            drained += 1;
            let handlers = self.handlers.lock();
            if let Some(handler) = handlers.get(&envelope.type_id) {
                handler(envelope.payload.as_ref());
                self.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                tracing::debug!(mailbox = %self.name, message_id = envelope.id, "dropping message with no handler");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        drained
    }

    /// Stops the mailbox: drains and drops outstanding messages; no handler
    /// fires after this call (spec §4.B "Cancellation").
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        let mut queues = self.queues.lock();
        for q in queues.iter_mut() {
            q.clear();
        }
        self.len.store(0, Ordering::Relaxed);
    }

    pub fn pending_message_count(&self) -> usize {
        self.len.load(Ordering::Relaxed) as usize
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            name: self.name.clone(),
            pending: self.pending_message_count(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailboxStats {
    pub name: String,
    pub pending: usize,
    pub delivered: u64,
    pub dropped: u64,
}

/// Process-wide registry mapping thread name → mailbox (spec §3
/// "AddressBook"), plus the monotone per-bus message id counter.
pub struct AddressBook {
    mailboxes: Mutex<HashMap<String, Arc<Mailbox>>>,
    next_message_id: AtomicU64,
    shutdown: AtomicBool,
}

impl Default for AddressBook {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressBook {
    pub fn new() -> Self {
        Self {
            mailboxes: Mutex::new(HashMap::new()),
            next_message_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Registers a mailbox under `name`; idempotent registration of the
    /// SAME name is rejected (spec §4.B).
    pub fn register(&self, name: impl Into<String>, mailbox: Arc<Mailbox>) -> Result<(), MessagingError> {
        let name = name.into();
        let mut mailboxes = self.mailboxes.lock();
        if mailboxes.contains_key(&name) {
            return Err(MessagingError::AlreadyRegistered(name));
        }
        mailboxes.insert(name, mailbox);
        Ok(())
    }

    /// Idempotent: removing an absent name is a no-op.
    pub fn unregister(&self, name: &str) {
        self.mailboxes.lock().remove(name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.mailboxes.lock().contains_key(name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.mailboxes.lock().keys().cloned().collect()
    }

    fn next_id(&self) -> MessageId {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Point-to-point send (spec §4.B). Never blocks.
    pub fn send<T: Any + Send + 'static>(&self, target: &str, payload: T, priority: MessagePriority) -> SendOutcome {
        if self.shutdown.load(Ordering::Acquire) {
            return SendOutcome::Shutdown;
        }
        let mailbox = self.mailboxes.lock().get(target).cloned();
        let Some(mailbox) = mailbox else {
            return SendOutcome::NotFound;
        };
        let id = self.next_id();
        if mailbox.post(id, payload, priority) {
            SendOutcome::Delivered
        } else {
            SendOutcome::Full
        }
    }

    /// Best-effort broadcast to every currently registered mailbox
    /// (spec §4.B / §9 open question — best-effort with per-recipient
    /// error logging, not all-or-nothing). Returns the count delivered.
    pub fn broadcast<T: Any + Send + Clone + 'static>(&self, payload: T, priority: MessagePriority) -> usize {
        if self.shutdown.load(Ordering::Acquire) {
            return 0;
        }
        let targets: Vec<Arc<Mailbox>> = self.mailboxes.lock().values().cloned().collect();
        let mut delivered = 0usize;
        for mailbox in targets {
            let id = self.next_id();
            if mailbox.post(id, payload.clone(), priority) {
                delivered += 1;
            } else {
                tracing::warn!(mailbox = %mailbox.name(), "broadcast send failed (mailbox full or shut down)");
            }
        }
        delivered
    }

    /// Marks the bus terminating: subsequent `send`/`broadcast` calls
    /// return `Shutdown` without touching any mailbox.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Debug, PartialEq)]
    struct Ping(i32);

    #[test]
    fn send_to_unknown_thread_returns_not_found() {
        let bus = AddressBook::new();
        assert_eq!(bus.send("nobody", Ping(1), MessagePriority::Normal), SendOutcome::NotFound);
    }

    #[test]
    fn register_same_name_twice_fails() {
        let bus = AddressBook::new();
        bus.register("a", Mailbox::new("a")).unwrap();
        let err = bus.register("a", Mailbox::new("a")).unwrap_err();
        assert!(matches!(err, MessagingError::AlreadyRegistered(_)));
    }

    #[test]
    fn unregister_is_idempotent() {
        let bus = AddressBook::new();
        bus.unregister("missing");
        bus.unregister("missing");
    }

    #[test]
    fn priority_preserving_drain_within_single_sender() {
        let mailbox = Mailbox::new("c");
        let seen: Arc<StdMutex<Vec<i32>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = seen.clone();
        mailbox.subscribe::<Ping>(move |p| seen2.lock().unwrap().push(p.0));

        let bus = AddressBook::new();
        bus.register("c", mailbox.clone()).unwrap();
        bus.send("c", Ping(7), MessagePriority::Normal);
        bus.send("c", Ping(8), MessagePriority::Normal);
        bus.send("c", Ping(9), MessagePriority::Normal);

        mailbox.drain_ready();
        assert_eq!(*seen.lock().unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn higher_priority_drains_before_lower() {
        let mailbox = Mailbox::new("d");
        let order: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));
        let order2 = order.clone();
        mailbox.subscribe::<&'static str>(move |s| order2.lock().unwrap().push(*s));

        let bus = AddressBook::new();
        bus.register("d", mailbox.clone()).unwrap();
        bus.send("d", "low", MessagePriority::Low);
        bus.send("d", "critical", MessagePriority::Critical);
        bus.send("d", "normal", MessagePriority::Normal);

        mailbox.drain_ready();
        assert_eq!(*order.lock().unwrap(), vec!["critical", "normal", "low"]);
    }

    #[test]
    fn full_mailbox_drops_without_blocking() {
        let mailbox = Mailbox::with_capacity("e", 1);
        let bus = AddressBook::new();
        bus.register("e", mailbox.clone()).unwrap();
        assert_eq!(bus.send("e", Ping(1), MessagePriority::Normal), SendOutcome::Delivered);
        assert_eq!(bus.send("e", Ping(2), MessagePriority::Normal), SendOutcome::Full);
    }

    #[test]
    fn stop_drops_outstanding_and_suppresses_future_handlers() {
        let mailbox = Mailbox::new("f");
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        mailbox.subscribe::<Ping>(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        let bus = AddressBook::new();
        bus.register("f", mailbox.clone()).unwrap();
        bus.send("f", Ping(1), MessagePriority::Normal);
        mailbox.stop();
        mailbox.drain_ready();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shutdown_bus_rejects_new_sends() {
        let bus = AddressBook::new();
        bus.register("g", Mailbox::new("g")).unwrap();
        bus.shutdown();
        assert_eq!(bus.send("g", Ping(1), MessagePriority::Normal), SendOutcome::Shutdown);
    }

    #[test]
    fn broadcast_delivers_to_all_registered() {
        let bus = AddressBook::new();
        let m1 = Mailbox::new("h1");
        let m2 = Mailbox::new("h2");
        bus.register("h1", m1).unwrap();
        bus.register("h2", m2).unwrap();
        let delivered = bus.broadcast(Ping(5), MessagePriority::Low);
        assert_eq!(delivered, 2);
    }

    #[test]
    fn unsubscribe_silently_discards_future_messages() {
        let mailbox = Mailbox::new("i");
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        mailbox.subscribe::<Ping>(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        mailbox.unsubscribe::<Ping>();
        let bus = AddressBook::new();
        bus.register("i", mailbox.clone()).unwrap();
        bus.send("i", Ping(1), MessagePriority::Normal);
        mailbox.drain_ready();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
