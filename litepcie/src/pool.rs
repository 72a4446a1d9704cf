//! Ring buffer pool.
//!
//! N physically-contiguous buffers per direction, allocated once at attach
//! and released at detach. Transfer index `k` always lands in buffer
//! `k mod N`.

use alloc::vec::Vec;
use core::ptr::NonNull;

use dma_pool::{DmaChunk, DmaError, DmaPool};
use log::error;

use crate::error::{LitePcieError, Result};

/// Source of coherent DMA memory.
///
/// Implemented for [`DmaPool`]; a kernel host can back it with its own
/// coherent allocator instead.
pub trait DmaAllocator {
    /// Allocate `size` bytes of zeroed, device-visible memory.
    fn alloc_coherent(&self, size: usize) -> core::result::Result<DmaChunk, DmaError>;

    /// Return memory obtained from `alloc_coherent`.
    ///
    /// # Safety
    /// The device must no longer target the chunk.
    unsafe fn free_coherent(&self, chunk: DmaChunk);
}

impl DmaAllocator for DmaPool {
    fn alloc_coherent(&self, size: usize) -> core::result::Result<DmaChunk, DmaError> {
        self.alloc_bytes(size)
    }

    unsafe fn free_coherent(&self, chunk: DmaChunk) {
        if let Err(err) = self.dealloc(chunk) {
            error!("DMA free failed: {}", err);
        }
    }
}

/// One ring slot.
pub struct DmaBuffer {
    chunk: DmaChunk,
    /// Usable length (the configured buffer size, not the page-rounded chunk).
    len: usize,
}

impl DmaBuffer {
    /// Device-visible bus address.
    pub fn bus_addr(&self) -> u64 {
        self.chunk.bus_addr()
    }

    /// CPU pointer to the first byte.
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.chunk.cpu_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the whole slot into `dst[..len]`.
    pub(crate) fn copy_to(&self, dst: &mut [u8]) {
        assert!(dst.len() >= self.len, "BUG: destination shorter than a buffer");
        // SAFETY: the slot is `len` valid bytes; the counters guarantee the
        // engine is not writing it while software owns it.
        unsafe {
            core::ptr::copy_nonoverlapping(self.cpu_ptr().as_ptr(), dst.as_mut_ptr(), self.len);
        }
    }

    /// Fill the slot from `src[..len]`.
    pub(crate) fn copy_from(&self, src: &[u8]) {
        assert!(src.len() >= self.len, "BUG: source shorter than a buffer");
        // SAFETY: as in `copy_to`; only the lock holder writes a slot.
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), self.cpu_ptr().as_ptr(), self.len);
        }
    }
}

/// Fixed ring of DMA buffers for one direction.
pub struct RingBuffers {
    buffers: Vec<DmaBuffer>,
    buffer_size: usize,
}

impl RingBuffers {
    /// Allocate `count` buffers of `buffer_size` bytes.
    ///
    /// On failure every buffer allocated so far is returned to `alloc`.
    pub fn allocate<A: DmaAllocator + ?Sized>(
        alloc: &A,
        count: usize,
        buffer_size: usize,
    ) -> Result<Self> {
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            match alloc.alloc_coherent(buffer_size) {
                Ok(chunk) => buffers.push(DmaBuffer {
                    chunk,
                    len: buffer_size,
                }),
                Err(err) => {
                    error!("Failed to allocate dma buffers: {}", err);
                    let partial = Self {
                        buffers,
                        buffer_size,
                    };
                    // SAFETY: nothing was programmed into the engine yet.
                    unsafe { partial.release(alloc) };
                    return Err(LitePcieError::from(err));
                }
            }
        }
        Ok(Self {
            buffers,
            buffer_size,
        })
    }

    /// Return every buffer to `alloc`, newest first.
    ///
    /// # Safety
    /// The engine must be stopped.
    pub unsafe fn release<A: DmaAllocator + ?Sized>(self, alloc: &A) {
        for buf in self.buffers.into_iter().rev() {
            alloc.free_coherent(buf.chunk);
        }
    }

    /// Buffer used by transfer index `k` (`k mod N`).
    #[inline]
    pub fn slot(&self, k: i64) -> &DmaBuffer {
        &self.buffers[self.slot_index(k)]
    }

    /// Ring position of transfer index `k`.
    #[inline]
    pub fn slot_index(&self, k: i64) -> usize {
        k.rem_euclid(self.buffers.len() as i64) as usize
    }

    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Total bytes across the ring.
    pub fn total_size(&self) -> usize {
        self.buffers.len() * self.buffer_size
    }

    pub fn iter(&self) -> impl Iterator<Item = &DmaBuffer> {
        self.buffers.iter()
    }
}
