//! Connection state tracking for the recovery state machine.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Initial attach in progress.
    Connecting,

    /// Attached to a broker and usable.
    Open,

    /// Transport lost; reconnect attempts are under way.
    Recovering,

    /// Terminal: disposed, or recovery gave up.
    Closed,
}

impl ConnectionState {
    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Recovering)
                | (Open, Closed)
                | (Recovering, Open)
                | (Recovering, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Recovering => "recovering",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A transition refused by [`ConnectionStateTracker::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid connection state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Shared connection state and consecutive-failure counter.
///
/// State changes are published on a watch channel so that callers can await
/// a particular state.
#[derive(Clone)]
pub struct ConnectionStateTracker {
    state: Arc<watch::Sender<ConnectionState>>,

    /// Consecutive failed attempts since the connection was last open.
    attempts: Arc<AtomicU32>,

    last_opened: Arc<Mutex<Option<Instant>>>,
}

impl ConnectionStateTracker {
    /// Creates a tracker in the `Connecting` state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            state: Arc::new(state),
            attempts: Arc::new(AtomicU32::new(0)),
            last_opened: Arc::new(Mutex::new(None)),
        }
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Atomically moves to `to` if the state machine allows it from the
    /// current state. Returns the previous state.
    ///
    /// Entering `Open` resets the attempt counter.
    pub fn transition(&self, to: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        let mut outcome = Err(InvalidTransition {
            from: self.state(),
            to,
        });
        self.state.send_if_modified(|current| {
            let from = *current;
            if from.can_transition_to(to) {
                *current = to;
                outcome = Ok(from);
                true
            } else {
                outcome = Err(InvalidTransition { from, to });
                false
            }
        });

        if let Ok(_from) = outcome {
            if to == ConnectionState::Open {
                self.reset_attempts();
                *self.last_opened.lock() = Some(Instant::now());
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(from = %_from, to = %to, "connection state transition");
        }
        outcome
    }

    /// Moves to `Closed` from any state. Returns the previous state, or
    /// `None` if the tracker was already closed.
    pub fn close(&self) -> Option<ConnectionState> {
        let mut previous = None;
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                previous = Some(*current);
                *current = ConnectionState::Closed;
                true
            }
        });
        previous
    }

    /// Get the current attempt number
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Increment and return the attempt number
    pub fn increment_attempts(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Reset attempts to zero
    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::Release);
    }

    /// Time since the connection last entered `Open`.
    pub fn time_since_opened(&self) -> Option<Duration> {
        self.last_opened.lock().map(|opened| opened.elapsed())
    }

    /// Returns a receiver observing every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Waits until the state satisfies `predicate` and returns that state.
    pub async fn wait_for<F>(&self, mut predicate: F) -> ConnectionState
    where
        F: FnMut(ConnectionState) -> bool,
    {
        let mut receiver = self.state.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let reached = match receiver.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        reached
    }
}

impl Default for ConnectionStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStateTracker")
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}
