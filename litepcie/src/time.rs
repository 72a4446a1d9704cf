//! Busy-wait delays.
//!
//! The stop sequence needs a fixed settle time while the engine drains. The
//! host supplies the clock; `SpinDelay` is the fallback when only a
//! calibrated loop count is known.

/// Microsecond busy-wait provided by the platform.
pub trait Delay: Send + Sync {
    fn delay_us(&self, us: u32);
}

/// Calibrated spin loop.
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    spins_per_us: u32,
}

impl SpinDelay {
    /// `spins_per_us` comes from a boot-time calibration against a real clock.
    pub const fn new(spins_per_us: u32) -> Self {
        Self { spins_per_us }
    }
}

impl Delay for SpinDelay {
    fn delay_us(&self, us: u32) {
        let spins = (us as u64) * (self.spins_per_us as u64);
        for _ in 0..spins {
            core::hint::spin_loop();
        }
    }
}
