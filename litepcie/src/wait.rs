//! Suspension primitives.
//!
//! No scheduler is assumed. A `WaitQueue` is a generation counter that the
//! interrupt path bumps after publishing new counters; waiters spin until
//! the generation moves and then re-check their condition. A `Signal` is
//! the per-session "pending signal" flag that cuts a wait short.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{LitePcieError, Result};

/// Wake condition for one direction.
#[derive(Debug, Default)]
pub struct WaitQueue {
    generation: AtomicU64,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }

    /// Wake every waiter. Call only after the state they wait on is published.
    #[inline]
    pub fn wake_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Current generation (bumped once per `wake_all`).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Wait until `cond` holds or `signal` is raised.
    ///
    /// The signal is consumed when it ends the wait.
    pub fn wait_interruptible(&self, signal: &Signal, mut cond: impl FnMut() -> bool) -> Result<()> {
        loop {
            // Snapshot before checking so a wake between the check and the
            // spin is never lost.
            let seen = self.generation();
            if cond() {
                return Ok(());
            }
            while self.generation() == seen {
                if signal.take() {
                    return Err(LitePcieError::Interrupted);
                }
                core::hint::spin_loop();
            }
        }
    }
}

/// Pending-signal flag of one session.
#[derive(Debug, Default)]
pub struct Signal {
    pending: AtomicBool,
}

impl Signal {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }

    /// Deliver a signal; any wait on behalf of this session returns `Interrupted`.
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Consume a pending signal.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}
