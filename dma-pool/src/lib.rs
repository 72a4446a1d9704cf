//! DMA memory pool for bare-metal drivers.
//!
//! Carves page-aligned, physically-contiguous chunks out of a memory region
//! that the platform has already made device-visible. The pool is a plain
//! value: whoever attaches a device owns one and hands it to the driver, so
//! no global state is involved.
//!
//! # Allocation model
//!
//! - Bump allocation, page granular, zeroed on return
//! - Freeing the most recent chunk rolls the bump pointer back
//! - Once every chunk is freed the whole region is reusable again
//!
//! # Usage
//!
//! ```ignore
//! use dma_pool::{DmaPool, MemoryRegion};
//!
//! // Region handed over by the platform (cpu address + bus address).
//! let pool = unsafe { DmaPool::new(MemoryRegion::new(cpu_base, size), bus_base)? };
//!
//! let chunk = pool.alloc_bytes(8192)?;
//! device.program(chunk.bus_addr());
//! ```

#![no_std]

use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Page size (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Minimum usable memory region size (64KB).
pub const MIN_REGION_SIZE: usize = 64 * 1024;

// ============================================================================
// Utility functions
// ============================================================================

/// Align a value up to the given alignment.
#[inline]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Align a value down to the given alignment.
#[inline]
pub const fn align_down(val: usize, align: usize) -> usize {
    val & !(align - 1)
}

/// Convert pages to bytes.
#[inline]
pub const fn pages_to_bytes(pages: usize) -> usize {
    pages * PAGE_SIZE
}

/// Convert bytes to pages (rounded up).
#[inline]
pub const fn bytes_to_pages(bytes: usize) -> usize {
    align_up(bytes, PAGE_SIZE) / PAGE_SIZE
}

// ============================================================================
// Memory regions
// ============================================================================

/// A CPU-addressable memory region suitable for DMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// CPU-visible base address.
    pub base: usize,
    /// Size in bytes.
    pub size: usize,
}

impl MemoryRegion {
    /// Create a new memory region.
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Check if region is usable for DMA (page-aligned, large enough).
    pub fn is_usable(&self) -> bool {
        self.base % PAGE_SIZE == 0 && self.size >= MIN_REGION_SIZE
    }

    /// Shrink the region to whole pages.
    pub fn aligned(&self) -> Self {
        let aligned_base = align_up(self.base, PAGE_SIZE);
        let adjustment = aligned_base - self.base;
        let aligned_size = align_down(self.size.saturating_sub(adjustment), PAGE_SIZE);
        Self {
            base: aligned_base,
            size: aligned_size,
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

/// DMA pool errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// Requested 0 pages.
    ZeroPages,
    /// Not enough memory in pool.
    OutOfMemory,
    /// Invalid memory region.
    InvalidRegion,
    /// Chunk does not belong to this pool.
    ForeignChunk,
}

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroPages => write!(f, "Zero-page DMA allocation"),
            Self::OutOfMemory => write!(f, "DMA pool exhausted"),
            Self::InvalidRegion => write!(f, "Invalid DMA memory region"),
            Self::ForeignChunk => write!(f, "Chunk not owned by this pool"),
        }
    }
}

/// Result type for DMA operations.
pub type Result<T> = core::result::Result<T, DmaError>;

// ============================================================================
// Chunks
// ============================================================================

/// A physically-contiguous allocation handed out by [`DmaPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChunk {
    cpu_ptr: NonNull<u8>,
    bus_addr: u64,
    pages: usize,
}

impl DmaChunk {
    /// CPU pointer to the first byte.
    #[inline]
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.cpu_ptr
    }

    /// Device-visible bus address of the first byte.
    #[inline]
    pub fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    /// Number of pages backing this chunk.
    #[inline]
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Size in bytes (always whole pages).
    #[inline]
    pub fn len(&self) -> usize {
        pages_to_bytes(self.pages)
    }

    /// Chunks are never empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }
}

// SAFETY: a chunk is an address range; access discipline is the owner's job.
unsafe impl Send for DmaChunk {}
unsafe impl Sync for DmaChunk {}

// ============================================================================
// DmaPool
// ============================================================================

/// Bump allocator over one device-visible memory region.
pub struct DmaPool {
    /// CPU base address of the region.
    cpu_base: usize,
    /// Bus address matching `cpu_base`.
    bus_base: u64,
    /// Region size in bytes.
    size: usize,
    /// Bump offset.
    offset: AtomicUsize,
    /// Live (not yet freed) chunk count.
    live: AtomicUsize,
    /// Serializes offset updates.
    lock: AtomicBool,
}

impl DmaPool {
    /// Create a pool over `region`, whose first byte the device sees at `bus_base`.
    ///
    /// The region is zeroed.
    ///
    /// # Safety
    ///
    /// - `region` must be valid, writable memory for the pool's lifetime.
    /// - `bus_base` must be the device-visible address of `region.base`.
    /// - Nothing else may use the region while the pool exists.
    pub unsafe fn new(region: MemoryRegion, bus_base: u64) -> Result<Self> {
        if !region.is_usable() {
            return Err(DmaError::InvalidRegion);
        }

        let aligned = region.aligned();
        core::ptr::write_bytes(aligned.base as *mut u8, 0, aligned.size);

        Ok(Self {
            cpu_base: aligned.base,
            bus_base,
            size: aligned.size,
            offset: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            lock: AtomicBool::new(false),
        })
    }

    /// Create a pool over an identity-mapped region (bus == cpu address).
    ///
    /// # Safety
    ///
    /// Same requirements as [`DmaPool::new`].
    pub unsafe fn identity(region: MemoryRegion) -> Result<Self> {
        Self::new(region, region.base as u64)
    }

    #[inline]
    fn lock(&self) {
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
    }

    #[inline]
    fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }

    /// Allocate contiguous DMA pages.
    ///
    /// Memory is zeroed before return.
    pub fn alloc_pages(&self, pages: usize) -> Result<DmaChunk> {
        if pages == 0 {
            return Err(DmaError::ZeroPages);
        }

        let size = pages_to_bytes(pages);

        self.lock();
        let offset = self.offset.load(Ordering::Relaxed);
        let new_offset = offset + size;
        if new_offset > self.size {
            self.unlock();
            return Err(DmaError::OutOfMemory);
        }
        self.offset.store(new_offset, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::Relaxed);
        self.unlock();

        let vaddr_ptr = (self.cpu_base + offset) as *mut u8;
        // SAFETY: [offset, new_offset) lies inside our region and was just reserved.
        unsafe {
            core::ptr::write_bytes(vaddr_ptr, 0, size);
        }

        let cpu_ptr = NonNull::new(vaddr_ptr).ok_or(DmaError::OutOfMemory)?;
        Ok(DmaChunk {
            cpu_ptr,
            bus_addr: self.bus_base + offset as u64,
            pages,
        })
    }

    /// Allocate at least `bytes` bytes (rounded up to pages).
    pub fn alloc_bytes(&self, bytes: usize) -> Result<DmaChunk> {
        self.alloc_pages(bytes_to_pages(bytes))
    }

    /// Return a chunk to the pool.
    ///
    /// # Safety
    ///
    /// The chunk must have come from this pool, must not be freed twice, and
    /// no device may still be targeting it.
    pub unsafe fn dealloc(&self, chunk: DmaChunk) -> Result<()> {
        let addr = chunk.cpu_ptr.as_ptr() as usize;
        if addr < self.cpu_base || addr + chunk.len() > self.cpu_base + self.size {
            return Err(DmaError::ForeignChunk);
        }
        let chunk_offset = addr - self.cpu_base;

        self.lock();
        let live = self.live.load(Ordering::Relaxed);
        if live == 0 {
            self.unlock();
            return Err(DmaError::ForeignChunk);
        }
        if chunk_offset + chunk.len() == self.offset.load(Ordering::Relaxed) {
            self.offset.store(chunk_offset, Ordering::Relaxed);
        }
        self.live.store(live - 1, Ordering::Relaxed);
        if live == 1 {
            self.offset.store(0, Ordering::Relaxed);
        }
        self.unlock();

        Ok(())
    }

    /// Remaining free space in bytes.
    pub fn free_space(&self) -> usize {
        self.size.saturating_sub(self.offset.load(Ordering::Relaxed))
    }

    /// Total pool size in bytes.
    pub fn total_size(&self) -> usize {
        self.size
    }

    /// Number of chunks not yet returned.
    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Region base as seen by the CPU.
    pub fn base_address(&self) -> usize {
        self.cpu_base
    }

    /// Region base as seen by the device.
    pub fn bus_base(&self) -> u64 {
        self.bus_base
    }
}

// ============================================================================
// Tests
// ============================================================================
