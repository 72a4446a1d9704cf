//! Driver configuration.
//!
//! Mirrors the constants a LitePCIe build generates (`config.h`, `csr.h`,
//! `soc.h`), so one binary can drive bitstreams built with different ring
//! geometries.

use alloc::vec::Vec;

use crate::csr::{
    CSR_CTRL_RESET_ADDR, CSR_IDENTIFIER_MEM_BASE, CSR_PCIE_DMA0_BASE, CSR_PCIE_MSI_CLEAR_ADDR,
    CSR_PCIE_MSI_ENABLE_ADDR, CSR_PCIE_MSI_VECTOR_ADDR, DMA_LENGTH_BITS,
};
use crate::error::{LitePcieError, Result};

/// Upper bound on DMA channels per device.
pub const MAX_CHANNELS: usize = 8;

/// Default ring depth.
pub const DEFAULT_BUFFER_COUNT: u32 = 256;

/// Default buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: u32 = 8192;

/// Default MSI pacing (one interrupt every N buffers).
pub const DEFAULT_BUFFERS_PER_IRQ: u32 = 32;

/// How completion interrupts reach the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsiMode {
    /// One vector; pending sources are read from, and cleared through, CSRs.
    Single,
    /// One vector per source (MSI multi-vector or MSI-X).
    MultiVector,
}

/// Register base and interrupt bits of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub base: u32,
    pub reader_irq: u32,
    pub writer_irq: u32,
}

impl ChannelLayout {
    pub const fn new(base: u32, reader_irq: u32, writer_irq: u32) -> Self {
        Self {
            base,
            reader_irq,
            writer_irq,
        }
    }
}

/// Absolute CSR addresses outside the DMA blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrMap {
    pub ctrl_reset: u32,
    pub identifier_mem: u32,
    pub msi_enable: u32,
    pub msi_clear: u32,
    pub msi_vector: u32,
    pub channels: Vec<ChannelLayout>,
}

impl Default for CsrMap {
    fn default() -> Self {
        let mut channels = Vec::new();
        channels.push(ChannelLayout::new(CSR_PCIE_DMA0_BASE, 0, 1));
        Self {
            ctrl_reset: CSR_CTRL_RESET_ADDR,
            identifier_mem: CSR_IDENTIFIER_MEM_BASE,
            msi_enable: CSR_PCIE_MSI_ENABLE_ADDR,
            msi_clear: CSR_PCIE_MSI_CLEAR_ADDR,
            msi_vector: CSR_PCIE_MSI_VECTOR_ADDR,
            channels,
        }
    }
}

/// Ring geometry and device behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaConfig {
    /// Buffers per direction (power of two).
    pub buffer_count: u32,
    /// Bytes per buffer.
    pub buffer_size: u32,
    /// Raise an MSI every this many buffers.
    pub buffers_per_irq: u32,
    /// Gateware built with aligned buffers (LAST markers kept).
    pub buffer_aligned: bool,
    /// Drain time between flush and disable on stop.
    pub stop_settle_us: u32,
    /// Pulse the SoC reset during attach.
    pub reset_on_attach: bool,
    /// Reads allowed for the reset bit to self-clear.
    pub reset_poll_limit: u32,
    pub msi_mode: MsiMode,
    pub csr: CsrMap,
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffers_per_irq: DEFAULT_BUFFERS_PER_IRQ,
            buffer_aligned: false,
            stop_settle_us: 1000,
            reset_on_attach: true,
            reset_poll_limit: 10_000,
            msi_mode: MsiMode::MultiVector,
            csr: CsrMap::default(),
        }
    }
}

impl DmaConfig {
    pub fn with_ring(mut self, buffer_count: u32, buffer_size: u32) -> Self {
        self.buffer_count = buffer_count;
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_buffers_per_irq(mut self, n: u32) -> Self {
        self.buffers_per_irq = n;
        self
    }

    pub fn with_msi_mode(mut self, mode: MsiMode) -> Self {
        self.msi_mode = mode;
        self
    }

    pub fn with_channels(mut self, channels: &[ChannelLayout]) -> Self {
        self.csr.channels = channels.to_vec();
        self
    }

    pub fn with_reset(mut self, reset_on_attach: bool) -> Self {
        self.reset_on_attach = reset_on_attach;
        self
    }

    /// Size of one direction's pool (`N * buffer_size`).
    pub fn pool_bytes(&self) -> usize {
        self.buffer_count as usize * self.buffer_size as usize
    }

    /// Half the ring: the backlog cutoff for overflow, underflow and poll.
    pub fn half_ring(&self) -> i64 {
        (self.buffer_count / 2) as i64
    }

    /// Reject geometries the gateware cannot represent.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_count < 2 || !self.buffer_count.is_power_of_two() {
            return Err(LitePcieError::InvalidConfig("buffer_count must be a power of two >= 2"));
        }
        // The loop-status index field is 16 bits wide.
        if self.buffer_count > 1 << 16 {
            return Err(LitePcieError::InvalidConfig("buffer_count exceeds 16-bit index"));
        }
        if self.buffer_size == 0 || self.buffer_size >= 1 << DMA_LENGTH_BITS {
            return Err(LitePcieError::InvalidConfig("buffer_size must fit 24 bits"));
        }
        if self.buffers_per_irq == 0 {
            return Err(LitePcieError::InvalidConfig("buffers_per_irq must be non-zero"));
        }
        let channels = &self.csr.channels;
        if channels.is_empty() || channels.len() > MAX_CHANNELS {
            return Err(LitePcieError::InvalidConfig("channel count out of range"));
        }

        let mut seen = 0u32;
        for ch in channels {
            for irq in [ch.reader_irq, ch.writer_irq] {
                if irq >= 32 {
                    return Err(LitePcieError::InvalidConfig("irq bit out of range"));
                }
                if seen & (1 << irq) != 0 {
                    return Err(LitePcieError::InvalidConfig("irq bit shared"));
                }
                seen |= 1 << irq;
            }
        }
        Ok(())
    }
}
