//! Attached LitePCIe device.
//!
//! Owns the register space, the per-channel ring state and the settle-delay
//! source. Everything here is reachable through `&self`, so one device can
//! be shared between the interrupt path and any number of sessions.

use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use log::{error, info};

use crate::channel::DmaChannel;
use crate::config::DmaConfig;
use crate::csr::IDENTIFIER_LEN;
use crate::descriptor;
use crate::direction::{CounterSnapshot, Direction, NO_OWNER};
use crate::error::{LitePcieError, Result};
use crate::mmap::MmapDmaInfo;
use crate::pool::{DmaAllocator, RingBuffers};
use crate::regs::{poll_until, RegisterSpace};
use crate::time::Delay;

/// Time the SoC needs after a reset pulse.
const RESET_SETTLE_US: u32 = 10_000;

pub struct DmaDevice<R: RegisterSpace, D: Delay> {
    regs: R,
    delay: D,
    config: DmaConfig,
    channels: Vec<DmaChannel>,
    identifier: String,
    /// Serializes read-modify-writes of the MSI enable register.
    msi_lock: spin::Mutex<()>,
    next_session: AtomicU64,
}

impl<R: RegisterSpace, D: Delay> DmaDevice<R, D> {
    // ═══════════════════════════════════════════════════════════════════════
    // Attach / detach
    // ═══════════════════════════════════════════════════════════════════════

    /// Bring up a device whose BAR0 is reachable through `regs`.
    ///
    /// # Arguments
    ///
    /// * `regs` - CSR space of the device
    /// * `delay` - microsecond delay used for reset and drain waits
    /// * `alloc` - source of the ring buffers
    /// * `config` - ring geometry and CSR layout of the bitstream
    ///
    /// Allocation failure frees every ring allocated so far and returns
    /// `OutOfMemory`; no channel is usable in that case.
    pub fn attach<A: DmaAllocator + ?Sized>(
        regs: R,
        delay: D,
        alloc: &A,
        config: DmaConfig,
    ) -> Result<Self> {
        config.validate()?;

        if config.reset_on_attach {
            let addr = config.csr.ctrl_reset;
            regs.write32(addr, 1);
            delay.delay_us(RESET_SETTLE_US);
            poll_until(&regs, addr, config.reset_poll_limit, |v| v & 1 == 0).map_err(|err| {
                error!("SoC reset did not complete");
                err
            })?;
        }

        let identifier = read_identifier(&regs, config.csr.identifier_mem);
        info!("Version {}", identifier);

        let count = config.buffer_count as usize;
        let size = config.buffer_size as usize;
        let mut rings: Vec<(RingBuffers, RingBuffers)> = Vec::with_capacity(config.csr.channels.len());
        for _ in 0..config.csr.channels.len() {
            let pair = RingBuffers::allocate(alloc, count, size).and_then(|reader| {
                match RingBuffers::allocate(alloc, count, size) {
                    Ok(writer) => Ok((reader, writer)),
                    Err(err) => {
                        // SAFETY: never programmed.
                        unsafe { reader.release(alloc) };
                        Err(err)
                    }
                }
            });
            match pair {
                Ok(pair) => rings.push(pair),
                Err(err) => {
                    for (reader, writer) in rings.into_iter().rev() {
                        // SAFETY: never programmed.
                        unsafe {
                            writer.release(alloc);
                            reader.release(alloc);
                        }
                    }
                    return Err(err);
                }
            }
        }

        let channels: Vec<DmaChannel> = rings
            .into_iter()
            .zip(config.csr.channels.iter())
            .enumerate()
            .map(|(i, ((reader, writer), layout))| DmaChannel::new(i, *layout, reader, writer))
            .collect();

        info!(
            "{} DMA channels, {} buffers of {} bytes per direction",
            channels.len(),
            count,
            size
        );

        Ok(Self {
            regs,
            delay,
            config,
            channels,
            identifier,
            msi_lock: spin::Mutex::new(()),
            next_session: AtomicU64::new(NO_OWNER + 1),
        })
    }

    /// Stop every engine and mask all interrupts. The rings stay allocated.
    pub fn shutdown(&self) {
        for channel in &self.channels {
            for direction in Direction::ALL {
                let state = channel.direction(direction);
                let _guard = state.control.lock();
                self.regs.write32(channel.regs(direction).enable, 0);
                state.set_enabled(false);
                state.wait.wake_all();
            }
        }
        self.regs.write32(self.config.csr.msi_enable, 0);
    }

    /// Shut the device down and return its rings to `alloc`.
    pub fn detach<A: DmaAllocator + ?Sized>(self, alloc: &A) {
        self.shutdown();
        for channel in self.channels {
            let (reader, writer) = channel.into_buffers();
            // SAFETY: every engine was disabled by `shutdown`.
            unsafe {
                writer.release(alloc);
                reader.release(alloc);
            }
        }
        info!("Device detached");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &DmaConfig {
        &self.config
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// FPGA identifier read at attach.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Result<&DmaChannel> {
        self.channels.get(index).ok_or(LitePcieError::InvalidChannel)
    }

    pub fn channels(&self) -> &[DmaChannel] {
        &self.channels
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Engine control
    // ═══════════════════════════════════════════════════════════════════════

    /// Program the descriptor table of `direction` and start it.
    pub fn start_direction(&self, channel: usize, direction: Direction) -> Result<()> {
        let ch = self.channel(channel)?;
        let _guard = ch.direction(direction).control.lock();
        self.start_locked(ch, direction);
        Ok(())
    }

    /// Drain and stop `direction`.
    pub fn stop_direction(&self, channel: usize, direction: Direction) -> Result<()> {
        let ch = self.channel(channel)?;
        let _guard = ch.direction(direction).control.lock();
        self.stop_locked(ch, direction);
        Ok(())
    }

    /// Start or stop `direction` if `enable` differs from its state, then
    /// report its counters.
    pub fn set_direction_enabled(
        &self,
        channel: usize,
        direction: Direction,
        enable: bool,
    ) -> Result<CounterSnapshot> {
        let ch = self.channel(channel)?;
        let state = ch.direction(direction);
        let _guard = state.control.lock();
        if enable != state.is_enabled() {
            if enable {
                self.start_locked(ch, direction);
            } else {
                self.stop_locked(ch, direction);
            }
        }
        Ok(state.counters())
    }

    /// Caller holds `control` of the direction.
    fn start_locked(&self, ch: &DmaChannel, direction: Direction) {
        let state = ch.direction(direction);
        descriptor::start(&self.regs, &ch.regs(direction), state, &self.config);
        self.enable_interrupt(ch.irq_bit(direction));
        state.set_enabled(true);
        info!("DMA{} {} started", ch.index(), direction);
    }

    /// Caller holds `control` of the direction.
    fn stop_locked(&self, ch: &DmaChannel, direction: Direction) {
        let state = ch.direction(direction);
        self.disable_interrupt(ch.irq_bit(direction));
        descriptor::stop(&self.regs, &self.delay, &ch.regs(direction), state, &self.config);
        state.set_enabled(false);
        state.wait.wake_all();
        info!("DMA{} {} stopped", ch.index(), direction);
    }

    pub fn enable_interrupt(&self, irq: u32) {
        let _guard = self.msi_lock.lock();
        self.regs.set_bits(self.config.csr.msi_enable, 1 << irq);
    }

    pub fn disable_interrupt(&self, irq: u32) {
        let _guard = self.msi_lock.lock();
        self.regs.clear_bits(self.config.csr.msi_enable, 1 << irq);
    }

    /// Route the channel's reader output back into its writer.
    pub fn set_loopback(&self, channel: usize, enable: bool) -> Result<()> {
        let ch = self.channel(channel)?;
        self.regs.write32(ch.loopback_addr(), enable as u32);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Raw access
    // ═══════════════════════════════════════════════════════════════════════

    /// Read any register; `InvalidArgument` if `addr` is not one.
    pub fn read_csr(&self, addr: u32) -> Result<u32> {
        self.regs.check(addr)?;
        Ok(self.regs.read32(addr))
    }

    pub fn write_csr(&self, addr: u32, value: u32) -> Result<()> {
        self.regs.check(addr)?;
        self.regs.write32(addr, value);
        Ok(())
    }

    /// Offsets and geometry of both pools for mapping clients.
    pub fn mmap_info(&self) -> MmapDmaInfo {
        MmapDmaInfo::new(
            self.config.buffer_count as usize,
            self.config.buffer_size as usize,
        )
    }
}

/// Read the NUL-terminated identifier, one character per word.
fn read_identifier<R: RegisterSpace + ?Sized>(regs: &R, base: u32) -> String {
    let mut bytes = Vec::with_capacity(IDENTIFIER_LEN);
    for i in 0..IDENTIFIER_LEN as u32 {
        let c = regs.read32(base + 4 * i) as u8;
        if c == 0 {
            break;
        }
        bytes.push(c);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::ChannelLayout;
    use crate::csr::{CSR_CTRL_RESET_ADDR, CSR_PCIE_DMA0_BASE, CSR_PCIE_DMA_STRIDE, CSR_PCIE_MSI_ENABLE_ADDR};
    use crate::regs::MmioRegisters;
    use crate::testing::{FakeCsr, HostDma, NoDelay, Rig};
    use alloc::sync::Arc;

    fn two_channels() -> DmaConfig {
        DmaConfig::default().with_ring(8, 4096).with_channels(&[
            ChannelLayout::new(CSR_PCIE_DMA0_BASE, 0, 1),
            ChannelLayout::new(CSR_PCIE_DMA0_BASE + CSR_PCIE_DMA_STRIDE, 2, 3),
        ])
    }

    #[test]
    fn test_attach_reads_identifier_and_resets() {
        let config = two_channels();
        let host = HostDma::for_config(&config);
        let csr = Arc::new(FakeCsr::new().with_self_clearing(CSR_CTRL_RESET_ADDR));
        csr.load_identifier(config.csr.identifier_mem, "LitePCIe SoC on Acorn CLE-215+");

        let dev = DmaDevice::attach(csr.clone(), NoDelay, host.pool(), config).unwrap();
        assert_eq!(dev.identifier(), "LitePCIe SoC on Acorn CLE-215+");
        assert_eq!(csr.writes_to(CSR_CTRL_RESET_ADDR), [1]);
        assert_eq!(dev.channel_count(), 2);
        assert_eq!(host.pool().live_allocations(), 4 * 8);

        dev.detach(host.pool());
        assert_eq!(host.pool().live_allocations(), 0);
        assert_eq!(csr.peek(CSR_PCIE_MSI_ENABLE_ADDR), 0);
    }

    #[test]
    fn test_attach_reset_timeout() {
        let config = two_channels();
        let host = HostDma::for_config(&config);
        // Reset bit never clears.
        let csr = FakeCsr::new();
        let res = DmaDevice::attach(csr, NoDelay, host.pool(), config);
        assert_eq!(res.err(), Some(LitePcieError::Timeout));
        assert_eq!(host.pool().live_allocations(), 0);
    }

    #[test]
    fn test_attach_out_of_memory_rolls_back() {
        let config = two_channels().with_reset(false);
        // Room for three of the four rings.
        let host = HostDma::new(3 * 8);
        let res = DmaDevice::attach(FakeCsr::new(), NoDelay, host.pool(), config);
        assert_eq!(res.err(), Some(LitePcieError::OutOfMemory));
        assert_eq!(host.pool().live_allocations(), 0);
    }

    #[test]
    fn test_attach_rejects_bad_config() {
        let host = HostDma::new(16);
        let config = DmaConfig::default().with_ring(6, 4096);
        let res = DmaDevice::attach(FakeCsr::new(), NoDelay, host.pool(), config);
        assert!(matches!(res.err(), Some(LitePcieError::InvalidConfig(_))));
    }

    #[test]
    fn test_enable_is_edge_triggered() {
        let rig = Rig::small();
        let dev = &rig.device;
        let enable = dev.channel(0).unwrap().regs(Direction::Writer).enable;

        let snap = dev.set_direction_enabled(0, Direction::Writer, true).unwrap();
        assert_eq!(snap, CounterSnapshot::default());
        assert!(dev.channel(0).unwrap().writer().is_enabled());
        assert_eq!(rig.csr.peek(CSR_PCIE_MSI_ENABLE_ADDR), 1 << 1);

        rig.complete(0, Direction::Writer, 5);
        rig.csr.clear_log();
        // Already running: no reprogramming, counters survive.
        let snap = dev.set_direction_enabled(0, Direction::Writer, true).unwrap();
        assert_eq!(snap.hw_count, 5);
        assert!(rig.csr.writes().is_empty());

        let snap = dev.set_direction_enabled(0, Direction::Writer, false).unwrap();
        assert_eq!(snap, CounterSnapshot::default());
        assert_eq!(rig.csr.peek(enable), 0);
        assert_eq!(rig.csr.peek(CSR_PCIE_MSI_ENABLE_ADDR), 0);
    }

    #[test]
    fn test_loopback_and_raw_csr() {
        let rig = Rig::small();
        rig.device.set_loopback(0, true).unwrap();
        assert_eq!(rig.csr.peek(CSR_PCIE_DMA0_BASE + 0x40), 1);
        assert_eq!(rig.device.set_loopback(3, true), Err(LitePcieError::InvalidChannel));

        rig.device.write_csr(0x2000, 0xcafe).unwrap();
        assert_eq!(rig.device.read_csr(0x2000), Ok(0xcafe));
        assert_eq!(rig.device.read_csr(0x2002), Err(LitePcieError::InvalidArgument));
        assert_eq!(rig.device.write_csr(0x2001, 1), Err(LitePcieError::InvalidArgument));
    }

    #[test]
    fn test_raw_csr_outside_bar_is_rejected() {
        let mut bar = std::vec![0u32; 0x4000];
        let base = core::ptr::NonNull::new(bar.as_mut_ptr() as *mut u8).unwrap();
        let regs = unsafe { MmioRegisters::new(base, 0x1_0000, 0) };
        let config = DmaConfig::default().with_ring(4, 4096).with_reset(false);
        let host = HostDma::for_config(&config);
        let dev = DmaDevice::attach(regs, NoDelay, host.pool(), config).unwrap();

        assert_eq!(dev.read_csr(0x2_0000), Err(LitePcieError::InvalidArgument));
        assert_eq!(dev.write_csr(0x1_0000, 1), Err(LitePcieError::InvalidArgument));
        assert_eq!(dev.read_csr(0x1_0002), Err(LitePcieError::InvalidArgument));

        dev.write_csr(0xfffc, 0x55).unwrap();
        assert_eq!(dev.read_csr(0xfffc), Ok(0x55));
        assert_eq!(bar[0x3fff], 0x55);

        dev.detach(host.pool());
    }

    #[test]
    fn test_mmap_info() {
        let rig = Rig::small();
        let info = rig.device.mmap_info();
        assert_eq!(info.tx_offset, 0);
        assert_eq!(info.rx_offset, 16 * 8192);
        assert_eq!(info.rx_buffer_count, 16);
    }
}
