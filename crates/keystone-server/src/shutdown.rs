//! Shutdown coordination.
//!
//! [`ShutdownSignal`] is the single cancellation handle shared by every task
//! that reacts to shutdown: the accept loops, each connection, and the
//! orchestrator. It is one-shot: the first [`trigger`](ShutdownSignal::trigger)
//! wins and later calls are no-ops.
//!
//! [`ConnectionTracker`] counts live connections so the orchestrator can
//! wait for them to drain.
//!
//! # Example
//!
//! ```rust
//! use keystone_server::ShutdownSignal;
//!
//! # tokio_test::block_on(async {
//! let shutdown = ShutdownSignal::new();
//! let waiter = shutdown.recv();
//!
//! assert!(shutdown.trigger());
//! assert!(!shutdown.trigger());
//! waiter.await;
//! assert!(shutdown.is_shutdown());
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};

/// Termination signals that start a graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGHUP
    Hangup,
    /// SIGINT (Ctrl-C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGQUIT
    Quit,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Quit => "SIGQUIT",
        })
    }
}

/// One-shot shutdown handle.
///
/// Cloning is cheap; all clones observe the same trigger.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    state: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Creates a signal triggered by the first SIGHUP, SIGINT, SIGTERM or
    /// SIGQUIT (Ctrl-C on non-Unix platforms).
    ///
    /// Signal handlers are registered before this returns, so no signal
    /// delivered afterwards can be missed. Must be called inside a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a signal handler cannot be registered.
    pub fn with_os_signals() -> io::Result<Self> {
        let signal = Self::new();
        let mut listener = TerminationListener::install()?;
        let trigger = signal.clone();

        tokio::spawn(async move {
            loop {
                let Some(received) = listener.recv().await else {
                    break;
                };
                if trigger.trigger() {
                    tracing::info!(signal = %received, "Stopping the server");
                } else {
                    tracing::debug!(signal = %received, "Shutdown already in progress");
                }
            }
        });

        Ok(signal)
    }

    /// Starts shutdown. Returns true only for the call that flipped the
    /// signal.
    pub fn trigger(&self) -> bool {
        self.state.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    /// Returns true once shutdown has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.state.borrow()
    }

    /// Returns a future that completes once shutdown is triggered.
    ///
    /// The future is independent of `self` and resolves immediately if the
    /// signal has already fired.
    pub fn recv(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.state.subscribe();
        async move {
            // Only fails if every sender is gone, which also means shutdown.
            let _ = rx.wait_for(|triggered| *triggered).await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
struct TerminationListener {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationListener {
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    async fn recv(&mut self) -> Option<TerminationSignal> {
        tokio::select! {
            Some(()) = self.hangup.recv() => Some(TerminationSignal::Hangup),
            Some(()) = self.interrupt.recv() => Some(TerminationSignal::Interrupt),
            Some(()) = self.terminate.recv() => Some(TerminationSignal::Terminate),
            Some(()) = self.quit.recv() => Some(TerminationSignal::Quit),
            else => None,
        }
    }
}

#[cfg(not(unix))]
struct TerminationListener;

#[cfg(not(unix))]
impl TerminationListener {
    fn install() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<TerminationSignal> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|()| TerminationSignal::Interrupt)
    }
}

/// Counts live connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicUsize,
    drained: Notify,
}

impl ConnectionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. It stays counted until the token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Waits until no connections are live.
    pub async fn wait_for_drain(&self) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not lost.
            notified.as_mut().enable();

            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps a connection counted while alive.
#[derive(Debug)]
pub struct ConnectionToken {
    inner: Arc<TrackerInner>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_starts_untriggered() {
        let shutdown = ShutdownSignal::new();
        assert!(!shutdown.is_shutdown());
    }

    #[test]
    fn test_trigger_is_one_shot() {
        let shutdown = ShutdownSignal::new();
        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert!(!shutdown.clone().trigger());
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_recv_completes_after_trigger() {
        let shutdown = ShutdownSignal::new();
        let waiter = tokio::spawn(shutdown.recv());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("receiver should complete")
            .unwrap();
    }

    #[tokio::test]
    async fn test_recv_after_trigger_is_immediate() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(50), shutdown.recv())
            .await
            .expect("already triggered");
    }

    #[test]
    fn test_recv_pending_until_trigger() {
        let shutdown = ShutdownSignal::new();
        let mut waiter = tokio_test::task::spawn(shutdown.recv());
        tokio_test::assert_pending!(waiter.poll());

        shutdown.trigger();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let shutdown = ShutdownSignal::new();
        let clone = shutdown.clone();
        clone.trigger();
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_with_os_signals_registers() {
        let shutdown = ShutdownSignal::with_os_signals().unwrap();
        assert!(!shutdown.is_shutdown());
    }

    #[test]
    fn test_termination_signal_display() {
        assert_eq!(TerminationSignal::Hangup.to_string(), "SIGHUP");
        assert_eq!(TerminationSignal::Quit.to_string(), "SIGQUIT");
    }

    #[test]
    fn test_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let first = tracker.acquire();
        let second = tracker.acquire();
        assert_eq!(tracker.active_count(), 2);

        drop(first);
        assert_eq!(tracker.active_count(), 1);
        drop(second);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_drain_when_idle() {
        let tracker = ConnectionTracker::new();
        tokio::time::timeout(Duration::from_millis(50), tracker.wait_for_drain())
            .await
            .expect("idle tracker drains immediately");
    }

    #[tokio::test]
    async fn test_wait_for_drain_waits_for_tokens() {
        let tracker = ConnectionTracker::new();
        let token = tracker.acquire();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_for_drain().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(token);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drain after last token")
            .unwrap();
    }
}
