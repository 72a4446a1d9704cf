//! MSI dispatch.
//!
//! The collaborator that owns interrupt delivery calls
//! [`DmaDevice::on_interrupt`] with the line that fired. Each pending
//! direction gets its counters reconciled and its waiters woken; the
//! returned mask names the sources to acknowledge.

use log::trace;

use crate::config::MsiMode;
use crate::counter::{on_loop_status, LoopStatus};
use crate::device::DmaDevice;
use crate::direction::Direction;
use crate::regs::RegisterSpace;
use crate::time::Delay;

/// What one interrupt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqOutcome {
    /// Pending sources after masking with the enable register.
    pub vector: u32,
    /// Sources serviced; already written to the clear CSR in single-MSI mode.
    pub clear_mask: u32,
}

impl IrqOutcome {
    pub fn handled(&self) -> bool {
        self.clear_mask != 0
    }
}

impl<R: RegisterSpace, D: Delay> DmaDevice<R, D> {
    /// Service an MSI.
    ///
    /// In single-MSI mode `line` is ignored and the pending sources come
    /// from the vector CSR; otherwise line `i` stands for source bit `i`.
    pub fn on_interrupt(&self, line: u32) -> IrqOutcome {
        let csr = &self.config().csr;
        let raw_vector = match self.config().msi_mode {
            MsiMode::Single => self.regs().read32(csr.msi_vector),
            MsiMode::MultiVector => 1u32.checked_shl(line).unwrap_or(0),
        };
        let enable = self.regs().read32(csr.msi_enable);
        trace!("MSI: {:#x} {:#x}", raw_vector, enable);

        let vector = raw_vector & enable;
        let mut clear_mask = 0;

        for channel in self.channels() {
            for direction in [Direction::Reader, Direction::Writer] {
                let bit = 1 << channel.irq_bit(direction);
                if vector & bit == 0 {
                    continue;
                }
                let addr = channel.regs(direction).loop_status;
                let status = LoopStatus::from_raw(self.regs().read32(addr));
                on_loop_status(channel.direction(direction), status);
                clear_mask |= bit;
            }
        }

        if self.config().msi_mode == MsiMode::Single {
            self.regs().write32(csr.msi_clear, clear_mask);
        }

        IrqOutcome { vector, clear_mask }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DmaConfig;
    use crate::direction::CounterSnapshot;
    use crate::testing::Rig;

    #[test]
    fn test_multi_vector_dispatch() {
        let rig = Rig::small();
        let dev = &rig.device;
        dev.set_direction_enabled(0, Direction::Writer, true).unwrap();

        let status = rig.device.channel(0).unwrap().regs(Direction::Writer).loop_status;
        rig.csr.poke(status, LoopStatus::new(15, 0).raw());
        let out = dev.on_interrupt(1);
        assert_eq!(out, IrqOutcome { vector: 0b10, clear_mask: 0b10 });
        assert_eq!(dev.channel(0).unwrap().writer().hw_count(), 15);

        // Wrap from index 15 to index 0 of the next loop.
        rig.csr.poke(status, LoopStatus::new(0, 1).raw());
        dev.on_interrupt(1);
        assert_eq!(dev.channel(0).unwrap().writer().hw_count(), 16);
    }

    #[test]
    fn test_masked_source_ignored() {
        let rig = Rig::small();
        // Reader never enabled: its bit is masked out.
        let out = rig.device.on_interrupt(0);
        assert!(!out.handled());
        assert_eq!(rig.device.channel(0).unwrap().reader().hw_count(), 0);

        assert_eq!(rig.device.on_interrupt(40), IrqOutcome::default());
    }

    #[test]
    fn test_single_msi_clears_through_csr() {
        let rig = Rig::new(
            DmaConfig::default()
                .with_ring(16, 4096)
                .with_msi_mode(MsiMode::Single)
                .with_reset(false),
        );
        let dev = &rig.device;
        dev.set_direction_enabled(0, Direction::Reader, true).unwrap();
        dev.set_direction_enabled(0, Direction::Writer, true).unwrap();

        let csr = &dev.config().csr;
        let ch = dev.channel(0).unwrap();
        rig.csr.poke(ch.regs(Direction::Reader).loop_status, LoopStatus::new(3, 0).raw());
        rig.csr.poke(ch.regs(Direction::Writer).loop_status, LoopStatus::new(7, 2).raw());
        rig.csr.poke(csr.msi_vector, 0b11);

        let out = dev.on_interrupt(0);
        assert_eq!(out.clear_mask, 0b11);
        assert_eq!(rig.csr.writes_to(csr.msi_clear), [0b11]);
        assert_eq!(ch.reader().hw_count(), 3);
        assert_eq!(ch.writer().hw_count(), 2 * 16 + 7);
    }

    #[test]
    fn test_interrupt_after_stop_is_harmless() {
        let rig = Rig::small();
        let dev = &rig.device;
        let ch = dev.channel(0).unwrap();
        let status = ch.regs(Direction::Writer).loop_status;
        dev.set_direction_enabled(0, Direction::Writer, true).unwrap();
        rig.complete(0, Direction::Writer, 5);
        dev.set_direction_enabled(0, Direction::Writer, false).unwrap();

        // Source is masked once the direction stops.
        rig.csr.poke(status, LoopStatus::new(9, 0).raw());
        assert_eq!(dev.on_interrupt(1), IrqOutcome::default());
        assert_eq!(ch.writer().hw_count(), 0);

        // Serviced before the mask took effect: counts land, then restart wipes them.
        rig.csr.poke(dev.config().csr.msi_enable, 1 << 1);
        assert!(dev.on_interrupt(1).handled());
        assert_eq!(ch.writer().hw_count(), 9);
        rig.csr.poke(dev.config().csr.msi_enable, 0);

        let snap = dev.set_direction_enabled(0, Direction::Writer, true).unwrap();
        assert_eq!(snap, CounterSnapshot::default());
        rig.complete(0, Direction::Writer, 2);
        assert_eq!(ch.writer().counters(), CounterSnapshot { hw_count: 2, sw_count: 0 });
    }

    #[test]
    fn test_single_msi_after_stop_is_harmless() {
        let rig = Rig::new(
            DmaConfig::default()
                .with_ring(16, 4096)
                .with_msi_mode(MsiMode::Single)
                .with_reset(false),
        );
        let dev = &rig.device;
        let csr = &dev.config().csr;
        let ch = dev.channel(0).unwrap();
        dev.set_direction_enabled(0, Direction::Reader, true).unwrap();
        rig.complete(0, Direction::Reader, 4);
        dev.set_direction_enabled(0, Direction::Reader, false).unwrap();

        // Vector still latched from the last completion.
        rig.csr.poke(ch.regs(Direction::Reader).loop_status, LoopStatus::new(11, 0).raw());
        rig.csr.poke(csr.msi_vector, 1 << 0);
        rig.csr.clear_log();
        let out = dev.on_interrupt(0);
        assert_eq!(out, IrqOutcome { vector: 0, clear_mask: 0 });
        assert_eq!(rig.csr.writes_to(csr.msi_clear), [0]);
        assert_eq!(ch.reader().hw_count(), 0);

        dev.set_direction_enabled(0, Direction::Reader, true).unwrap();
        assert_eq!(ch.reader().counters(), CounterSnapshot::default());
        rig.complete(0, Direction::Reader, 1);
        assert_eq!(ch.reader().hw_count(), 1);
    }
}
