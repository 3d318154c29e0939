//! Deadline and cancellation propagation for blocking calls
//!
//! A [`CallContext`] travels with every attempt: the retry loop reads it
//! before and between attempts, and the transport receives a derived copy so
//! that it can abandon work once the deadline passes or the caller cancels.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag that blocked threads can wait on
///
/// Clones observe the same flag. Cancellation is one-way: once cancelled a
/// token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancellationToken {
    /// Create a new, not yet cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token and wake every thread waiting on it
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        if !*cancelled {
            *cancelled = true;
            self.inner.signal.notify_all();
        }
    }

    /// Whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Park the calling thread for up to `timeout`.
    ///
    /// Returns `true` when woken by cancellation, `false` when the full
    /// timeout elapsed without cancellation.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        let Some(until) = Instant::now().checked_add(timeout) else {
            while !*cancelled {
                self.inner.signal.wait(&mut cancelled);
            }
            return true;
        };

        while !*cancelled {
            if self.inner.signal.wait_until(&mut cancelled, until).timed_out() {
                return *cancelled;
            }
        }
        true
    }
}

/// Deadline and cancellation scope of one logical call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// Context with no deadline and a fresh cancellation token
    pub fn background() -> Self {
        Self::default()
    }

    /// Context that expires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancellationToken::new(),
        }
    }

    /// Context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token, e.g. to share one with other work
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Absolute deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token observed by this context
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the caller cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left until the deadline, measured from `now`.
    ///
    /// `None` means unbounded; an elapsed deadline yields `Some(ZERO)`.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Whether the deadline has passed at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// Derive a child context bounded by `timeout` from `now`.
    ///
    /// The child keeps whichever deadline comes first, its own or the
    /// parent's, and shares the parent's cancellation token.
    pub fn shrink(&self, now: Instant, timeout: Duration) -> CallContext {
        let candidate = now.checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(parent), Some(child)) => Some(parent.min(child)),
            (Some(parent), None) => Some(parent),
            (None, child) => child,
        };

        CallContext {
            deadline,
            cancel: self.cancel.clone(),
        }
    }
}
