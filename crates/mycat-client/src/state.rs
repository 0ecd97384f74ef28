//! Logical connection states.
//!
//! A connection moves `Closed -> Connecting -> Open -> Closed`. Listeners
//! hear about every change, and about repeated states when the caller
//! broadcasts them to mark the end of a multi-step transition.

use std::fmt;
use std::sync::Arc;

/// State of a logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session is held.
    #[default]
    Closed,
    /// An open attempt is in progress.
    Connecting,
    /// A session is held and usable.
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
        })
    }
}

/// A state notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State before the update.
    pub previous: ConnectionState,
    /// State after the update.
    pub current: ConnectionState,
}

/// Callback receiving state notifications.
pub type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Default)]
pub(crate) struct StateMachine {
    state: ConnectionState,
    listeners: Vec<StateListener>,
}

impl StateMachine {
    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn subscribe(&mut self, listener: StateListener) {
        self.listeners.push(listener);
    }

    /// Update the state; returns whether listeners were notified.
    pub(crate) fn set_state(&mut self, state: ConnectionState, broadcast: bool) -> bool {
        let previous = std::mem::replace(&mut self.state, state);
        if previous == state && !broadcast {
            return false;
        }
        let change = StateChange {
            previous,
            current: state,
        };
        tracing::trace!(from = %previous, to = %state, broadcast, "connection state");
        for listener in &self.listeners {
            listener(&change);
        }
        true
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn recording() -> (StateMachine, Arc<Mutex<Vec<StateChange>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut machine = StateMachine::default();
        let sink = seen.clone();
        machine.subscribe(Arc::new(move |change: &StateChange| sink.lock().push(*change)));
        (machine, seen)
    }

    #[test]
    fn test_changes_are_always_reported() {
        let (mut machine, seen) = recording();
        assert!(machine.set_state(ConnectionState::Connecting, false));
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(
            seen.lock()[0],
            StateChange {
                previous: ConnectionState::Closed,
                current: ConnectionState::Connecting
            }
        );
    }

    #[test]
    fn test_repeated_state_needs_broadcast() {
        let (mut machine, seen) = recording();
        assert!(!machine.set_state(ConnectionState::Closed, false));
        assert!(seen.lock().is_empty());

        assert!(machine.set_state(ConnectionState::Closed, true));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].previous, ConnectionState::Closed);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
    }
}
