//! Register access shim.
//!
//! Every CSR is a 32-bit register at a byte offset from the start of BAR0.
//! There is no partial-width access. Channels own disjoint register ranges,
//! so implementations only need to tolerate concurrent access to
//! *different* offsets.

use alloc::sync::Arc;
use core::ptr::NonNull;

use log::trace;

use crate::error::{LitePcieError, Result};

/// 32-bit CSR space of one device.
pub trait RegisterSpace: Send + Sync {
    /// Whether `addr` names a register of this space.
    ///
    /// Only caller-supplied addresses go through this; offsets from a
    /// validated `CsrMap` are trusted.
    fn check(&self, addr: u32) -> Result<()> {
        if addr % 4 != 0 {
            return Err(LitePcieError::InvalidArgument);
        }
        Ok(())
    }

    /// Read the register at byte offset `addr`.
    fn read32(&self, addr: u32) -> u32;

    /// Write `value` to the register at byte offset `addr`.
    fn write32(&self, addr: u32, value: u32);

    /// Set `mask` bits with a read-modify-write.
    fn set_bits(&self, addr: u32, mask: u32) {
        let v = self.read32(addr);
        self.write32(addr, v | mask);
    }

    /// Clear `mask` bits with a read-modify-write.
    fn clear_bits(&self, addr: u32, mask: u32) {
        let v = self.read32(addr);
        self.write32(addr, v & !mask);
    }
}

impl<T: RegisterSpace + ?Sized> RegisterSpace for Arc<T> {
    fn check(&self, addr: u32) -> Result<()> {
        (**self).check(addr)
    }

    fn read32(&self, addr: u32) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&self, addr: u32, value: u32) {
        (**self).write32(addr, value)
    }
}

/// Poll `addr` until `done(value)` holds, at most `limit` reads.
///
/// Returns the last value read, or `Timeout` if the condition never held.
pub fn poll_until<R: RegisterSpace + ?Sized>(
    regs: &R,
    addr: u32,
    limit: u32,
    mut done: impl FnMut(u32) -> bool,
) -> Result<u32> {
    for _ in 0..limit {
        let v = regs.read32(addr);
        if done(v) {
            return Ok(v);
        }
        core::hint::spin_loop();
    }
    Err(LitePcieError::Timeout)
}

/// Volatile MMIO access to a mapped BAR.
pub struct MmioRegisters {
    /// Virtual address of BAR0.
    base: NonNull<u8>,
    /// Mapped length in bytes.
    len: usize,
    /// CSR address that corresponds to `base`.
    csr_base: u32,
}

impl MmioRegisters {
    /// Wrap a mapped BAR.
    ///
    /// # Safety
    /// - `base` must point to `len` bytes of device memory mapped uncached
    /// - The mapping must outlive this value
    pub unsafe fn new(base: NonNull<u8>, len: usize, csr_base: u32) -> Self {
        Self { base, len, csr_base }
    }

    #[inline]
    fn offset(&self, addr: u32) -> Option<usize> {
        let offset = addr.checked_sub(self.csr_base)? as usize;
        (offset % 4 == 0 && offset + 4 <= self.len).then_some(offset)
    }

    #[inline]
    fn ptr(&self, addr: u32) -> *mut u32 {
        let Some(offset) = self.offset(addr) else {
            panic!("CSR access outside BAR0: {:#x}", addr);
        };
        // SAFETY: bounds and alignment checked above.
        unsafe { self.base.as_ptr().add(offset) as *mut u32 }
    }
}

impl RegisterSpace for MmioRegisters {
    fn check(&self, addr: u32) -> Result<()> {
        self.offset(addr).map(|_| ()).ok_or(LitePcieError::InvalidArgument)
    }

    #[inline]
    fn read32(&self, addr: u32) -> u32 {
        // SAFETY: `ptr` stays inside the BAR mapping.
        let val = unsafe { core::ptr::read_volatile(self.ptr(addr)) };
        trace!("csr_read: {:#010x} @ {:#010x}", val, addr);
        val
    }

    #[inline]
    fn write32(&self, addr: u32, value: u32) {
        trace!("csr_write: {:#010x} @ {:#010x}", value, addr);
        // SAFETY: `ptr` stays inside the BAR mapping.
        unsafe { core::ptr::write_volatile(self.ptr(addr), value) }
    }
}

// SAFETY: MMIO registers are device memory; concurrent accesses from
// different channels target disjoint offsets.
unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}
