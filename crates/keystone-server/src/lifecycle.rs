//! Server lifecycle state machine.
//!
//! ```text
//! Starting ──► Serving ──► ShuttingDown ──► Stopped
//!                                 │
//!                                 └──────► TimedOut
//! ```
//!
//! `Stopped` and `TimedOut` are terminal. `TimedOut` means the grace period
//! elapsed with requests still in flight; the top-level serve call answers it
//! by terminating the process with [`FORCED_EXIT_CODE`].
//!
//! The current state is published through a [`tokio::sync::watch`] channel
//! so callers and tests can observe transitions:
//!
//! ```rust
//! use keystone_server::{Lifecycle, LifecycleState};
//!
//! let lifecycle = Lifecycle::new();
//! assert_eq!(lifecycle.current(), LifecycleState::Starting);
//!
//! lifecycle.advance(LifecycleState::Serving).unwrap();
//! assert!(lifecycle.advance(LifecycleState::Stopped).is_err());
//! ```

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

/// Exit code used when the shutdown grace period is exceeded.
pub const FORCED_EXIT_CODE: i32 = 1;

/// Lifecycle states of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Binding listeners.
    Starting,
    /// Accepting connections.
    Serving,
    /// No longer accepting; waiting for in-flight requests.
    ShuttingDown,
    /// Shut down cleanly.
    Stopped,
    /// Grace period exceeded.
    TimedOut,
}

impl LifecycleState {
    /// Returns true for `Stopped` and `TimedOut`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::TimedOut)
    }

    /// Returns true if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Serving)
                | (Self::Serving, Self::ShuttingDown)
                | (Self::ShuttingDown, Self::Stopped | Self::TimedOut)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
            Self::TimedOut => "timed_out",
        })
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid lifecycle transition from {from} to {to}")]
pub struct LifecycleError {
    /// State at the time of the attempt.
    pub from: LifecycleState,
    /// Requested state.
    pub to: LifecycleState,
}

/// Shared, observable lifecycle state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    /// Creates a lifecycle in `Starting`.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            state: Arc::new(state),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Moves to `next` if the transition is legal.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] and leaves the state unchanged otherwise.
    pub fn advance(&self, next: LifecycleState) -> Result<(), LifecycleError> {
        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if state.can_advance_to(next) {
                tracing::debug!(from = %state, to = %next, "Lifecycle transition");
                *state = next;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });

        match rejected {
            Some(from) => Err(LifecycleError { from, to: next }),
            None => Ok(()),
        }
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Waits until the state satisfies `predicate`, returning that state.
    pub async fn wait_until(&self, predicate: impl FnMut(&LifecycleState) -> bool) -> LifecycleState {
        let mut rx = self.subscribe();
        let state = match rx.wait_for(predicate).await {
            Ok(state) => *state,
            Err(_) => self.current(),
        };
        state
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
