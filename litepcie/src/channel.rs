//! One bidirectional DMA channel.

use crate::config::ChannelLayout;
use crate::csr::{DirectionRegs, PCIE_DMA_LOOPBACK_ENABLE_OFFSET};
use crate::direction::{Direction, DirectionState};
use crate::flow::{self, PollMask};
use crate::pool::RingBuffers;

/// Reader and writer state sharing one register block.
pub struct DmaChannel {
    index: usize,
    layout: ChannelLayout,
    reader: DirectionState,
    writer: DirectionState,
}

impl DmaChannel {
    pub(crate) fn new(
        index: usize,
        layout: ChannelLayout,
        reader: RingBuffers,
        writer: RingBuffers,
    ) -> Self {
        Self {
            index,
            layout,
            reader: DirectionState::new(Direction::Reader, reader),
            writer: DirectionState::new(Direction::Writer, writer),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn direction(&self, direction: Direction) -> &DirectionState {
        match direction {
            Direction::Reader => &self.reader,
            Direction::Writer => &self.writer,
        }
    }

    pub fn reader(&self) -> &DirectionState {
        &self.reader
    }

    pub fn writer(&self) -> &DirectionState {
        &self.writer
    }

    /// Register block of `direction`.
    pub fn regs(&self, direction: Direction) -> DirectionRegs {
        DirectionRegs::at(self.layout.base, direction)
    }

    /// MSI bit of `direction`.
    pub fn irq_bit(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Reader => self.layout.reader_irq,
            Direction::Writer => self.layout.writer_irq,
        }
    }

    pub fn loopback_addr(&self) -> u32 {
        self.layout.base + PCIE_DMA_LOOPBACK_ENABLE_OFFSET
    }

    /// Readable when the writer has more than a couple of completed
    /// buffers, writable while the reader queue is under half the ring.
    pub fn readiness(&self) -> PollMask {
        flow::readiness(&self.writer, &self.reader)
    }

    pub(crate) fn into_buffers(self) -> (RingBuffers, RingBuffers) {
        (self.reader.into_buffers(), self.writer.into_buffers())
    }
}
