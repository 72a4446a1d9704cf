//! Counter reconciler.
//!
//! The engine reports progress through a 32-bit loop-status word:
//!
//! ```text
//! 31            16 15             0
//! +---------------+---------------+
//! |  loop count   |  ring index   |
//! +---------------+---------------+
//! ```
//!
//! `count * N + index` is the number of completed buffers modulo
//! `N << 16`. [`reconcile`] folds that narrow value into the 64-bit
//! monotonic count kept by the driver.

use log::debug;

use crate::direction::DirectionState;

/// Decoded loop-status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopStatus {
    /// Position inside the ring.
    pub index: u16,
    /// Full loops since the table was loaded (wraps at 16 bits).
    pub count: u16,
}

impl LoopStatus {
    pub const fn new(index: u16, count: u16) -> Self {
        Self { index, count }
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self {
            index: (raw & 0xffff) as u16,
            count: (raw >> 16) as u16,
        }
    }

    pub const fn raw(&self) -> u32 {
        (self.count as u32) << 16 | self.index as u32
    }

    /// Status word the engine reports after `completed` buffers on a ring of
    /// `buffer_count`.
    pub fn for_completed(completed: i64, buffer_count: u32) -> Self {
        let n = buffer_count as i64;
        Self {
            index: completed.rem_euclid(n) as u16,
            count: (completed / n) as u16,
        }
    }
}

/// Fold `index`/`count` into the wide count `previous`.
///
/// The bits above `log2(N) + 16` are kept from `previous`; the bits below
/// are replaced by `count * N + index`. If that moves the value backwards
/// the narrow field wrapped, so one carry is added. The result never
/// decreases provided fewer than `N << 16` buffers complete between calls.
pub fn reconcile(index: u16, count: u16, previous: i64, buffer_count: u32) -> i64 {
    debug_assert!(buffer_count.is_power_of_two());
    let width = buffer_count.trailing_zeros() + 16;
    let low_mask = (1i64 << width) - 1;

    let raw = count as i64 * buffer_count as i64 + index as i64;
    let mut hw = (previous & !low_mask) | raw;
    if previous > hw {
        hw += 1i64 << width;
    }
    hw
}

/// Apply one loop-status word to `state` and wake its waiters.
///
/// Returns the new hardware count.
pub(crate) fn on_loop_status(state: &DirectionState, status: LoopStatus) -> i64 {
    let n = state.ring_len() as u32;
    let previous = state.hw_count_last();
    let hw = reconcile(status.index, status.count, previous, n);
    state.publish_hw_count(hw);
    // Counters first, then the wake, so a woken caller sees them.
    state.wait.wake_all();

    debug!(
        "{} irq: hw_count {} -> {} (sw_count {})",
        state.direction(),
        previous,
        hw,
        state.sw_count()
    );
    hw
}
