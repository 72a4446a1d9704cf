//! Descriptor programmer.
//!
//! The engine walks a circular table of descriptors, one per ring buffer.
//! A descriptor is 96 bits pushed through three register writes:
//!
//! ```text
//! TABLE_VALUE      flags | length        (IRQ_DISABLE, LAST_DISABLE, 24-bit length)
//! TABLE_VALUE + 4  bus address [31:0]
//! TABLE_WE         bus address [63:32]   (commits the descriptor)
//! ```
//!
//! With `LOOP_PROG_N` set the engine repeats the table until stopped.

use log::debug;

use crate::config::DmaConfig;
use crate::csr::{DescriptorFlags, DirectionRegs};
use crate::direction::DirectionState;
use crate::regs::RegisterSpace;
use crate::time::Delay;

/// Register words of one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub control: u32,
    pub addr_lsb: u32,
    pub addr_msb: u32,
}

impl Descriptor {
    /// Descriptor for ring slot `index` backed by `bus_addr`.
    pub fn for_slot(index: usize, bus_addr: u64, config: &DmaConfig) -> Self {
        let mut flags = DescriptorFlags::empty();
        if !config.buffer_aligned {
            flags |= DescriptorFlags::LAST_DISABLE;
        }
        // Only every K-th buffer raises an MSI.
        if index % config.buffers_per_irq as usize != 0 {
            flags |= DescriptorFlags::IRQ_DISABLE;
        }
        Self {
            control: flags.bits() | config.buffer_size,
            addr_lsb: bus_addr as u32,
            addr_msb: (bus_addr >> 32) as u32,
        }
    }

    pub fn flags(&self) -> DescriptorFlags {
        DescriptorFlags::from_bits_truncate(self.control)
    }

    pub fn length(&self) -> u32 {
        self.control & ((1 << crate::csr::DMA_LENGTH_BITS) - 1)
    }

    pub fn bus_addr(&self) -> u64 {
        (self.addr_msb as u64) << 32 | self.addr_lsb as u64
    }
}

/// Load the full table for `state` and enable the engine.
///
/// Counters are zeroed after the table is committed and before the engine
/// runs, so the first interrupt reconciles from zero.
pub fn start<R: RegisterSpace + ?Sized>(
    regs: &R,
    block: &DirectionRegs,
    state: &DirectionState,
    config: &DmaConfig,
) {
    regs.write32(block.enable, 0);
    regs.write32(block.flush, 1);
    regs.write32(block.loop_prog_n, 0);

    for (i, buf) in state.buffers().iter().enumerate() {
        let desc = Descriptor::for_slot(i, buf.bus_addr(), config);
        regs.write32(block.table_value, desc.control);
        regs.write32(block.table_value + 4, desc.addr_lsb);
        regs.write32(block.table_we, desc.addr_msb);
    }

    regs.write32(block.loop_prog_n, 1);
    state.reset_counters();

    debug!(
        "{} table loaded: level {}",
        state.direction(),
        regs.read32(block.level)
    );

    regs.write32(block.enable, 1);
}

/// Drain and disable the engine, then zero the counters.
pub fn stop<R: RegisterSpace + ?Sized, D: Delay + ?Sized>(
    regs: &R,
    delay: &D,
    block: &DirectionRegs,
    state: &DirectionState,
    config: &DmaConfig,
) {
    regs.write32(block.loop_prog_n, 0);
    regs.write32(block.flush, 1);
    delay.delay_us(config.stop_settle_us);
    regs.write32(block.enable, 0);
    regs.write32(block.flush, 1);
    state.reset_counters();
}
