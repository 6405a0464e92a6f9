//! The top-level application lifecycle state machine (spec §3
//! "ApplicationState"): monotone progress along the happy path
//! `Created -> Initialized -> Starting -> Running`, except that any state
//! may transition to `Stopping` or `Failed`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApplicationState {
    Created = 0,
    Initialized = 1,
    Starting = 2,
    Running = 3,
    Stopping = 4,
    Stopped = 5,
    Failed = 6,
}

impl ApplicationState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ApplicationState::Created,
            1 => ApplicationState::Initialized,
            2 => ApplicationState::Starting,
            3 => ApplicationState::Running,
            4 => ApplicationState::Stopping,
            5 => ApplicationState::Stopped,
            _ => ApplicationState::Failed,
        }
    }

    /// Whether `self -> next` is a legal transition: monotone along the
    /// happy path, or unconditionally to `Stopping`/`Failed` from anywhere.
    pub fn can_transition_to(self, next: ApplicationState) -> bool {
        use ApplicationState::*;
        if matches!(next, Stopping | Failed) {
            return true;
        }
        matches!(
            (self, next),
            (Created, Initialized)
                | (Initialized, Starting)
                | (Starting, Running)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplicationState::Created => "Created",
            ApplicationState::Initialized => "Initialized",
            ApplicationState::Starting => "Starting",
            ApplicationState::Running => "Running",
            ApplicationState::Stopping => "Stopping",
            ApplicationState::Stopped => "Stopped",
            ApplicationState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// An atomic cell holding an [`ApplicationState`] (spec §5 "The state word
/// is atomic"; §5 "State transitions of the application core are totally
/// ordered (single atomic)").
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(initial: ApplicationState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> ApplicationState {
        ApplicationState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Unconditionally stores `next`, logging an illegal transition rather
    /// than rejecting it outright — the application core is the sole
    /// writer and is trusted to sequence its own lifecycle correctly.
    pub fn set(&self, next: ApplicationState) {
        let current = self.get();
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "unusual application state transition");
        }
        self.0.store(next as u8, Ordering::Release);
    }

    pub fn is(&self, expected: ApplicationState) -> bool {
        self.get() == expected
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.get(), ApplicationState::Stopping | ApplicationState::Stopped | ApplicationState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        use ApplicationState::*;
        assert!(Created.can_transition_to(Initialized));
        assert!(Initialized.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
    }

    #[test]
    fn any_state_can_reach_stopping_or_failed() {
        use ApplicationState::*;
        for s in [Created, Initialized, Starting, Running, Stopping, Stopped, Failed] {
            assert!(s.can_transition_to(Stopping));
            assert!(s.can_transition_to(Failed));
        }
    }

    #[test]
    fn skipping_the_happy_path_is_illegal_but_not_rejected() {
        let cell = StateCell::new(ApplicationState::Created);
        cell.set(ApplicationState::Running);
        assert_eq!(cell.get(), ApplicationState::Running);
    }
}
