//! Host-side fixtures for unit tests.

extern crate std;

use alloc::sync::Arc;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::{BTreeMap, BTreeSet};
use std::vec::Vec;

use dma_pool::{bytes_to_pages, DmaPool, MemoryRegion, PAGE_SIZE};

use crate::config::{DmaConfig, MsiMode};
use crate::counter::LoopStatus;
use crate::csr::{DirectionRegs, CSR_CTRL_RESET_ADDR};
use crate::device::DmaDevice;
use crate::direction::Direction;
use crate::regs::RegisterSpace;
use crate::time::Delay;

/// In-memory register file that logs every write.
#[derive(Default)]
pub struct FakeCsr {
    regs: spin::Mutex<BTreeMap<u32, u32>>,
    log: spin::Mutex<Vec<(u32, u32)>>,
    self_clearing: BTreeSet<u32>,
}

impl FakeCsr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes to `addr` are logged but read back as zero.
    pub fn with_self_clearing(mut self, addr: u32) -> Self {
        self.self_clearing.insert(addr);
        self
    }

    /// Set a register without logging, as the hardware would.
    pub fn poke(&self, addr: u32, value: u32) {
        self.regs.lock().insert(addr, value);
    }

    pub fn peek(&self, addr: u32) -> u32 {
        self.regs.lock().get(&addr).copied().unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.log.lock().clone()
    }

    /// Values written to `addr`, oldest first.
    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.log
            .lock()
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Store `text` one character per word, NUL terminated.
    pub fn load_identifier(&self, base: u32, text: &str) {
        for (i, b) in text.bytes().chain(core::iter::once(0)).enumerate() {
            self.poke(base + 4 * i as u32, b as u32);
        }
    }
}

impl RegisterSpace for FakeCsr {
    fn read32(&self, addr: u32) -> u32 {
        self.peek(addr)
    }

    fn write32(&self, addr: u32, value: u32) {
        self.log.lock().push((addr, value));
        if !self.self_clearing.contains(&addr) {
            self.regs.lock().insert(addr, value);
        }
    }
}

/// Heap region standing in for device-visible memory (identity mapped).
pub struct HostDma {
    ptr: *mut u8,
    layout: Layout,
    pool: DmaPool,
}

impl HostDma {
    pub fn new(pages: usize) -> Self {
        let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        let region = MemoryRegion::new(ptr as usize, layout.size());
        let pool = unsafe { DmaPool::identity(region) }.unwrap();
        Self { ptr, layout, pool }
    }

    /// Enough pages for every ring `config` describes.
    pub fn for_config(config: &DmaConfig) -> Self {
        let per_buffer = bytes_to_pages(config.buffer_size as usize);
        let rings = 2 * config.csr.channels.len();
        let pages = per_buffer * config.buffer_count as usize * rings;
        Self::new(pages.max(16))
    }

    pub fn pool(&self) -> &DmaPool {
        &self.pool
    }
}

// SAFETY: the region is only reached through the pool.
unsafe impl Send for HostDma {}
unsafe impl Sync for HostDma {}

impl Drop for HostDma {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) }
    }
}

/// Delay that returns immediately.
pub struct NoDelay;

impl Delay for NoDelay {
    fn delay_us(&self, _us: u32) {}
}

pub type TestDevice = DmaDevice<Arc<FakeCsr>, NoDelay>;

/// An attached device over a fake register file.
pub struct Rig {
    pub csr: Arc<FakeCsr>,
    pub device: Arc<TestDevice>,
    pub host: HostDma,
}

impl Rig {
    pub fn new(config: DmaConfig) -> Self {
        let host = HostDma::for_config(&config);
        let csr = Arc::new(FakeCsr::new().with_self_clearing(CSR_CTRL_RESET_ADDR));
        let device = DmaDevice::attach(csr.clone(), NoDelay, host.pool(), config).unwrap();
        Self {
            csr,
            device: Arc::new(device),
            host,
        }
    }

    /// Small ring: N=16, 8 KiB buffers.
    pub fn small() -> Self {
        Self::new(DmaConfig::default().with_ring(16, 8192).with_reset(false))
    }

    /// Report `total` completed buffers on `direction` and raise its MSI.
    pub fn complete(&self, channel: usize, direction: Direction, total: i64) {
        let config = self.device.config();
        let layout = config.csr.channels[channel];
        let block = DirectionRegs::at(layout.base, direction);
        let status = LoopStatus::for_completed(total, config.buffer_count);
        self.csr.poke(block.loop_status, status.raw());

        let irq = match direction {
            Direction::Reader => layout.reader_irq,
            Direction::Writer => layout.writer_irq,
        };
        if config.msi_mode == MsiMode::Single {
            self.csr.poke(config.csr.msi_vector, 1 << irq);
        }
        self.device.on_interrupt(irq);
    }
}
