//! Per-direction state.
//!
//! Each channel has two directions: the *reader* engine fetches host
//! buffers (caller writes, host→device) and the *writer* engine fills host
//! buffers (caller reads, device→host). Counters are only ever compared by
//! difference, so both are kept as wide monotonic values.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};

use crate::pool::RingBuffers;
use crate::wait::WaitQueue;

/// Data-flow path of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host→device: the engine reads host memory.
    Reader,
    /// Device→host: the engine writes host memory.
    Writer,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Reader, Direction::Writer];

    pub fn name(&self) -> &'static str {
        match self {
            Direction::Reader => "reader",
            Direction::Writer => "writer",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transfer-layer state of a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferState {
    /// No transfer pending.
    Idle = 0,
    /// Blocked on hardware progress.
    Waiting = 1,
    /// Copying buffers.
    Transferring = 2,
    /// Last transfer finished.
    Done = 3,
}

impl TransferState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Waiting,
            2 => Self::Transferring,
            3 => Self::Done,
            _ => Self::Idle,
        }
    }
}

/// Hardware and software counts at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub hw_count: i64,
    pub sw_count: i64,
}

impl CounterSnapshot {
    /// `hw_count - sw_count`.
    pub fn backlog(&self) -> i64 {
        self.hw_count - self.sw_count
    }
}

/// No session holds the direction.
pub(crate) const NO_OWNER: u64 = 0;

/// State of one direction of one channel.
pub struct DirectionState {
    direction: Direction,
    buffers: RingBuffers,
    /// Reconciled completions; written by the interrupt path only.
    hw_count: AtomicI64,
    hw_count_last: AtomicI64,
    /// Caller progress; written by the lock holder only.
    sw_count: AtomicI64,
    enabled: AtomicBool,
    /// Session id of the lock holder, `NO_OWNER` when free.
    owner: AtomicU64,
    state: AtomicU8,
    /// Serializes start/stop transactions.
    pub(crate) control: spin::Mutex<()>,
    /// Woken after every counter update.
    pub(crate) wait: WaitQueue,
}

impl DirectionState {
    pub(crate) fn new(direction: Direction, buffers: RingBuffers) -> Self {
        Self {
            direction,
            buffers,
            hw_count: AtomicI64::new(0),
            hw_count_last: AtomicI64::new(0),
            sw_count: AtomicI64::new(0),
            enabled: AtomicBool::new(false),
            owner: AtomicU64::new(NO_OWNER),
            state: AtomicU8::new(TransferState::Idle as u8),
            control: spin::Mutex::new(()),
            wait: WaitQueue::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn buffers(&self) -> &RingBuffers {
        &self.buffers
    }

    pub(crate) fn into_buffers(self) -> RingBuffers {
        self.buffers
    }

    /// Ring depth as a counter delta.
    #[inline]
    pub fn ring_len(&self) -> i64 {
        self.buffers.count() as i64
    }

    /// Half the ring: overflow/underflow and readiness cutoff.
    #[inline]
    pub fn half_ring(&self) -> i64 {
        self.ring_len() / 2
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Counters
    // ═══════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn hw_count(&self) -> i64 {
        self.hw_count.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn hw_count_last(&self) -> i64 {
        self.hw_count_last.load(Ordering::Acquire)
    }

    #[inline]
    pub fn sw_count(&self) -> i64 {
        self.sw_count.load(Ordering::Acquire)
    }

    /// `hw_count - sw_count`.
    #[inline]
    pub fn backlog(&self) -> i64 {
        self.hw_count() - self.sw_count()
    }

    pub fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            hw_count: self.hw_count(),
            sw_count: self.sw_count(),
        }
    }

    /// Publish a reconciled hardware count.
    pub(crate) fn publish_hw_count(&self, hw: i64) {
        self.hw_count.store(hw, Ordering::Release);
        self.hw_count_last.store(hw, Ordering::Release);
    }

    pub(crate) fn set_sw_count(&self, sw: i64) {
        self.sw_count.store(sw, Ordering::Release);
    }

    /// Advance the software count by one buffer.
    #[inline]
    pub(crate) fn advance_sw(&self) {
        self.sw_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Zero all counters.
    pub(crate) fn reset_counters(&self) {
        self.hw_count.store(0, Ordering::Release);
        self.hw_count_last.store(0, Ordering::Release);
        self.sw_count.store(0, Ordering::Release);
        self.set_transfer_state(TransferState::Idle);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Flags
    // ═══════════════════════════════════════════════════════════════════════

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.owner() != NO_OWNER
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner.load(Ordering::Acquire)
    }

    /// Claim the lock for `session`; false if anyone holds it.
    pub(crate) fn try_lock(&self, session: u64) -> bool {
        self.owner
            .compare_exchange(NO_OWNER, session, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn unlock(&self) {
        self.owner.store(NO_OWNER, Ordering::Release);
    }

    pub(crate) fn is_owned_by(&self, session: u64) -> bool {
        self.owner() == session
    }

    pub fn transfer_state(&self) -> TransferState {
        TransferState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_transfer_state(&self, state: TransferState) {
        self.state.store(state as u8, Ordering::Release);
    }
}
