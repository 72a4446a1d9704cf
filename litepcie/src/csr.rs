//! LitePCIe CSR layout.
//!
//! Absolute offsets are relative to `CSR_BASE` (the start of BAR0). DMA
//! registers are relative to a channel's base.
//!
//! # Per-channel block
//! ```text
//! Offset  Register
//! 0x00    WRITER_ENABLE
//! 0x04    WRITER_TABLE_VALUE      (2 words: control/length, address LSB)
//! 0x0C    WRITER_TABLE_WE         (address MSB, commits the descriptor)
//! 0x10    WRITER_TABLE_LOOP_PROG_N
//! 0x14    WRITER_TABLE_LOOP_STATUS (count << 16 | index)
//! 0x18    WRITER_TABLE_LEVEL
//! 0x1C    WRITER_TABLE_FLUSH
//! 0x20..  READER_* (same layout, +0x20)
//! 0x40    LOOPBACK_ENABLE
//! ```

use bitflags::bitflags;

use crate::direction::Direction;

// ═══════════════════════════════════════════════════════════════════════════
// GLOBAL CSRS
// ═══════════════════════════════════════════════════════════════════════════

/// SoC reset (self-clearing).
pub const CSR_CTRL_RESET_ADDR: u32 = 0x0000;

/// FPGA identifier string, one character per 32-bit word.
pub const CSR_IDENTIFIER_MEM_BASE: u32 = 0x1000;

/// Identifier length in characters.
pub const IDENTIFIER_LEN: usize = 256;

/// MSI enable mask.
pub const CSR_PCIE_MSI_ENABLE_ADDR: u32 = 0x1800;

/// MSI clear register (single-MSI builds).
pub const CSR_PCIE_MSI_CLEAR_ADDR: u32 = 0x1804;

/// MSI pending vector (single-MSI builds).
pub const CSR_PCIE_MSI_VECTOR_ADDR: u32 = 0x1808;

/// First DMA channel block.
pub const CSR_PCIE_DMA0_BASE: u32 = 0x3000;

/// Spacing between consecutive DMA channel blocks.
pub const CSR_PCIE_DMA_STRIDE: u32 = 0x0800;

// ═══════════════════════════════════════════════════════════════════════════
// PER-CHANNEL OFFSETS
// ═══════════════════════════════════════════════════════════════════════════

pub const PCIE_DMA_WRITER_ENABLE_OFFSET: u32 = 0x00;
pub const PCIE_DMA_WRITER_TABLE_VALUE_OFFSET: u32 = 0x04;
pub const PCIE_DMA_WRITER_TABLE_WE_OFFSET: u32 = 0x0c;
pub const PCIE_DMA_WRITER_TABLE_LOOP_PROG_N_OFFSET: u32 = 0x10;
pub const PCIE_DMA_WRITER_TABLE_LOOP_STATUS_OFFSET: u32 = 0x14;
pub const PCIE_DMA_WRITER_TABLE_LEVEL_OFFSET: u32 = 0x18;
pub const PCIE_DMA_WRITER_TABLE_FLUSH_OFFSET: u32 = 0x1c;

pub const PCIE_DMA_READER_ENABLE_OFFSET: u32 = 0x20;
pub const PCIE_DMA_READER_TABLE_VALUE_OFFSET: u32 = 0x24;
pub const PCIE_DMA_READER_TABLE_WE_OFFSET: u32 = 0x2c;
pub const PCIE_DMA_READER_TABLE_LOOP_PROG_N_OFFSET: u32 = 0x30;
pub const PCIE_DMA_READER_TABLE_LOOP_STATUS_OFFSET: u32 = 0x34;
pub const PCIE_DMA_READER_TABLE_LEVEL_OFFSET: u32 = 0x38;
pub const PCIE_DMA_READER_TABLE_FLUSH_OFFSET: u32 = 0x3c;

pub const PCIE_DMA_LOOPBACK_ENABLE_OFFSET: u32 = 0x40;

/// Width of the descriptor length field.
pub const DMA_LENGTH_BITS: u32 = 24;

bitflags! {
    /// Control bits in the upper descriptor word (bits 56/57 of the 64-bit value).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescriptorFlags: u32 {
        /// Do not raise an MSI when this buffer completes.
        const IRQ_DISABLE = 1 << 24;
        /// Do not mark the end of this buffer as a packet boundary.
        const LAST_DISABLE = 1 << 25;
    }
}

/// Register block of one direction of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionRegs {
    pub enable: u32,
    pub table_value: u32,
    pub table_we: u32,
    pub loop_prog_n: u32,
    pub loop_status: u32,
    pub level: u32,
    pub flush: u32,
}

impl DirectionRegs {
    /// Absolute register addresses for `direction` of the channel at `base`.
    pub const fn at(base: u32, direction: Direction) -> Self {
        match direction {
            Direction::Writer => Self {
                enable: base + PCIE_DMA_WRITER_ENABLE_OFFSET,
                table_value: base + PCIE_DMA_WRITER_TABLE_VALUE_OFFSET,
                table_we: base + PCIE_DMA_WRITER_TABLE_WE_OFFSET,
                loop_prog_n: base + PCIE_DMA_WRITER_TABLE_LOOP_PROG_N_OFFSET,
                loop_status: base + PCIE_DMA_WRITER_TABLE_LOOP_STATUS_OFFSET,
                level: base + PCIE_DMA_WRITER_TABLE_LEVEL_OFFSET,
                flush: base + PCIE_DMA_WRITER_TABLE_FLUSH_OFFSET,
            },
            Direction::Reader => Self {
                enable: base + PCIE_DMA_READER_ENABLE_OFFSET,
                table_value: base + PCIE_DMA_READER_TABLE_VALUE_OFFSET,
                table_we: base + PCIE_DMA_READER_TABLE_WE_OFFSET,
                loop_prog_n: base + PCIE_DMA_READER_TABLE_LOOP_PROG_N_OFFSET,
                loop_status: base + PCIE_DMA_READER_TABLE_LOOP_STATUS_OFFSET,
                level: base + PCIE_DMA_READER_TABLE_LEVEL_OFFSET,
                flush: base + PCIE_DMA_READER_TABLE_FLUSH_OFFSET,
            },
        }
    }
}
