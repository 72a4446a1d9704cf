//! Open handle to one channel.
//!
//! A session is what a character-device open would hand back: it can lock
//! either direction, move data through the copy path or a mapping, and on
//! close it force-stops whatever it still controls.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::arbiter::{self, LockOp, LockRequest, LockStatus};
use crate::channel::DmaChannel;
use crate::device::DmaDevice;
use crate::direction::{CounterSnapshot, Direction, DirectionState};
use crate::error::{LitePcieError, Result};
use crate::flow::{self, PollMask, TransferMode, TransferReport};
use crate::mmap::{MappedRegion, MmapDmaInfo};
use crate::regs::RegisterSpace;
use crate::time::Delay;
use crate::wait::Signal;

pub struct Session<R: RegisterSpace, D: Delay> {
    id: u64,
    device: Arc<DmaDevice<R, D>>,
    channel: usize,
    /// Locks taken through this session.
    holds_reader: AtomicBool,
    holds_writer: AtomicBool,
    signal: Signal,
    closed: AtomicBool,
}

impl<R: RegisterSpace, D: Delay> Session<R, D> {
    /// Open `channel` of `device`.
    ///
    /// Counters of a direction that is not running are zeroed; a running
    /// direction belongs to another session and is left alone.
    pub fn open(device: Arc<DmaDevice<R, D>>, channel: usize) -> Result<Self> {
        let ch = device.channel(channel)?;
        for direction in Direction::ALL {
            let state = ch.direction(direction);
            let _guard = state.control.lock();
            if !state.is_enabled() {
                state.reset_counters();
            }
        }
        let id = device.next_session_id();
        debug!("session {} opened on DMA{}", id, channel);
        Ok(Self {
            id,
            device,
            channel,
            holds_reader: AtomicBool::new(false),
            holds_writer: AtomicBool::new(false),
            signal: Signal::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &Arc<DmaDevice<R, D>> {
        &self.device
    }

    pub fn channel_index(&self) -> usize {
        self.channel
    }

    fn channel(&self) -> &DmaChannel {
        // Checked in `open`; the channel table never changes after attach.
        &self.device.channels()[self.channel]
    }

    fn state(&self, direction: Direction) -> &DirectionState {
        self.channel().direction(direction)
    }

    fn holds(&self, direction: Direction) -> &AtomicBool {
        match direction {
            Direction::Reader => &self.holds_reader,
            Direction::Writer => &self.holds_writer,
        }
    }

    /// Pending-signal flag; raising it makes blocked calls return `Interrupted`.
    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn interrupt(&self) {
        self.signal.raise();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Ownership
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply lock actions to both directions.
    pub fn lock(&self, req: LockRequest) -> LockStatus {
        LockStatus {
            reader: self.apply_lock(Direction::Reader, req.reader),
            writer: self.apply_lock(Direction::Writer, req.writer),
        }
    }

    fn apply_lock(&self, direction: Direction, op: LockOp) -> bool {
        match op {
            LockOp::None => true,
            LockOp::Request => self.request_lock(direction).is_ok(),
            LockOp::Release => {
                self.release_lock(direction);
                true
            }
        }
    }

    pub fn request_lock(&self, direction: Direction) -> Result<()> {
        arbiter::request(self.state(direction), self.id)?;
        self.holds(direction).store(true, Ordering::Release);
        Ok(())
    }

    pub fn release_lock(&self, direction: Direction) {
        arbiter::release(self.state(direction));
        self.holds(direction).store(false, Ordering::Release);
    }

    /// Whether this session currently owns `direction`.
    pub fn owns(&self, direction: Direction) -> bool {
        self.state(direction).is_owned_by(self.id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Engine control
    // ═══════════════════════════════════════════════════════════════════════

    /// Start or stop `direction` on change; returns its counters.
    pub fn set_enabled(&self, direction: Direction, enable: bool) -> Result<CounterSnapshot> {
        self.device.set_direction_enabled(self.channel, direction, enable)
    }

    pub fn counters(&self, direction: Direction) -> CounterSnapshot {
        self.state(direction).counters()
    }

    pub fn set_loopback(&self, enable: bool) -> Result<()> {
        self.device.set_loopback(self.channel, enable)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Copy path
    // ═══════════════════════════════════════════════════════════════════════

    /// Read completed device→host buffers. Requires the writer lock.
    pub fn read(&self, buf: &mut [u8], mode: TransferMode) -> Result<TransferReport> {
        let state = self.state(Direction::Writer);
        arbiter::ensure_owner(state, self.id)?;
        flow::read(state, buf, mode, &self.signal)
    }

    /// Queue host→device buffers. Requires the reader lock.
    pub fn write(&self, buf: &[u8], mode: TransferMode) -> Result<TransferReport> {
        let state = self.state(Direction::Reader);
        arbiter::ensure_owner(state, self.id)?;
        flow::write(state, buf, mode, &self.signal)
    }

    pub fn poll(&self) -> PollMask {
        self.channel().readiness()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Zero-copy path
    // ═══════════════════════════════════════════════════════════════════════

    pub fn mmap_info(&self) -> MmapDmaInfo {
        self.device.mmap_info()
    }

    /// Map the pool selected by `offset`; `len` must be exactly `N * size`.
    pub fn map_buffers(&self, offset: usize, len: usize) -> Result<MappedRegion<'_>> {
        let direction = self.mmap_info().resolve(offset, len)?;
        let state = self.state(direction);
        arbiter::ensure_owner(state, self.id)?;
        Ok(MappedRegion::new(state))
    }

    /// Publish software progress made through a mapping.
    ///
    /// The count never moves backwards, and the reader side may queue at
    /// most one full ring ahead of the hardware.
    pub fn report_progress(&self, direction: Direction, sw_count: i64) -> Result<()> {
        let state = self.state(direction);
        arbiter::ensure_owner(state, self.id)?;
        if sw_count < state.sw_count() {
            return Err(LitePcieError::InvalidArgument);
        }
        if direction == Direction::Reader && sw_count - state.hw_count() > state.ring_len() {
            return Err(LitePcieError::InvalidArgument);
        }
        state.set_sw_count(sw_count);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Teardown
    // ═══════════════════════════════════════════════════════════════════════

    /// Release held locks and stop the directions behind them.
    pub fn close(self) {
        self.teardown();
    }

    fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for direction in Direction::ALL {
            if !self.holds(direction).swap(false, Ordering::AcqRel) {
                continue;
            }
            let state = self.state(direction);
            // Someone released our lock and another session took it.
            if state.is_locked() && !state.is_owned_by(self.id) {
                warn!(
                    "session {}: {} lock now held by another session, leaving it running",
                    self.id, direction
                );
                continue;
            }
            if let Err(err) = self.device.set_direction_enabled(self.channel, direction, false) {
                warn!("session {}: failed to stop {}: {}", self.id, direction, err);
            }
            arbiter::release(state);
        }
        debug!("session {} closed", self.id);
    }
}

impl<R: RegisterSpace, D: Delay> Drop for Session<R, D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::direction::TransferState;
    use crate::testing::{FakeCsr, NoDelay, Rig, TestDevice};
    use core::sync::atomic::AtomicUsize;
    use std::thread;
    use std::vec;
    use std::vec::Vec;

    const SIZE: usize = 8192;

    fn open(rig: &Rig) -> Session<Arc<FakeCsr>, NoDelay> {
        Session::open(rig.device.clone(), 0).unwrap()
    }

    fn reader_of(dev: &TestDevice) -> &DirectionState {
        dev.channel(0).unwrap().reader()
    }

    #[test]
    fn test_open_rejects_bad_channel() {
        let rig = Rig::small();
        assert!(matches!(
            Session::open(rig.device.clone(), 1),
            Err(LitePcieError::InvalidChannel)
        ));
    }

    #[test]
    fn test_open_resets_only_idle_directions() {
        let rig = Rig::small();
        let a = open(&rig);
        a.request_lock(Direction::Writer).unwrap();
        a.set_enabled(Direction::Writer, true).unwrap();
        rig.complete(0, Direction::Writer, 6);
        reader_of(&rig.device).set_sw_count(3);

        let _b = open(&rig);
        assert_eq!(a.counters(Direction::Writer).hw_count, 6);
        assert_eq!(a.counters(Direction::Reader), CounterSnapshot::default());
    }

    #[test]
    fn test_transfers_require_lock() {
        let rig = Rig::small();
        let s = open(&rig);
        let mut buf = vec![0u8; SIZE];
        assert_eq!(
            s.read(&mut buf, TransferMode::NonBlocking),
            Err(LitePcieError::NotOwner)
        );
        assert_eq!(s.write(&buf, TransferMode::NonBlocking), Err(LitePcieError::NotOwner));
        assert_eq!(s.report_progress(Direction::Writer, 1), Err(LitePcieError::NotOwner));
        assert_eq!(reader_of(&rig.device).sw_count(), 0);
    }

    #[test]
    fn test_nonblocking_read_with_no_data() {
        let rig = Rig::small();
        let s = open(&rig);
        s.request_lock(Direction::Writer).unwrap();
        s.set_enabled(Direction::Writer, true).unwrap();

        let mut buf = vec![0u8; SIZE];
        assert_eq!(s.read(&mut buf, TransferMode::NonBlocking), Err(LitePcieError::WouldBlock));
    }

    #[test]
    fn test_lock_exclusive_across_sessions() {
        let rig = Rig::small();
        let sessions: Vec<_> = (0..4).map(|_| open(&rig)).collect();
        let granted = AtomicUsize::new(0);

        thread::scope(|s| {
            for session in &sessions {
                let granted = &granted;
                s.spawn(move || {
                    let status = session.lock(LockRequest::reader(LockOp::Request));
                    if status.reader {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(granted.load(Ordering::SeqCst), 1);

        let owner = sessions.iter().position(|s| s.owns(Direction::Reader)).unwrap();
        let other = (owner + 1) % sessions.len();
        assert!(!sessions[other].lock(LockRequest::reader(LockOp::Request)).reader);

        sessions[owner].lock(LockRequest::reader(LockOp::Release));
        assert!(sessions[other].lock(LockRequest::reader(LockOp::Request)).reader);
    }

    #[test]
    fn test_lock_freed_by_close() {
        let rig = Rig::small();
        let a = open(&rig);
        let b = open(&rig);
        a.request_lock(Direction::Writer).unwrap();
        assert_eq!(b.request_lock(Direction::Writer), Err(LitePcieError::LockDenied));
        a.close();
        assert_eq!(b.request_lock(Direction::Writer), Ok(()));
    }

    #[test]
    fn test_close_stops_and_unlocks() {
        let rig = Rig::small();
        let s = open(&rig);
        s.request_lock(Direction::Reader).unwrap();
        s.set_enabled(Direction::Reader, true).unwrap();
        let enable = rig.device.channel(0).unwrap().regs(Direction::Reader).enable;
        assert_eq!(rig.csr.peek(enable), 1);

        drop(s);

        let reader = reader_of(&rig.device);
        assert!(!reader.is_enabled());
        assert!(!reader.is_locked());
        assert_eq!(rig.csr.peek(enable), 0);
    }

    #[test]
    fn test_close_leaves_foreign_lock_alone() {
        let rig = Rig::small();
        let a = open(&rig);
        let b = open(&rig);
        a.request_lock(Direction::Reader).unwrap();
        // Release works for anyone.
        b.release_lock(Direction::Reader);
        b.request_lock(Direction::Reader).unwrap();
        b.set_enabled(Direction::Reader, true).unwrap();

        a.close();
        let reader = reader_of(&rig.device);
        assert!(reader.is_enabled());
        assert!(b.owns(Direction::Reader));
    }

    #[test]
    fn test_blocking_write_completes_across_wakeups() {
        // N=16 with 4 slots of room below the half-ring mark.
        let rig = Rig::small();
        let s = open(&rig);
        s.request_lock(Direction::Reader).unwrap();
        s.set_enabled(Direction::Reader, true).unwrap();
        let reader = reader_of(&rig.device);
        s.report_progress(Direction::Reader, 4).unwrap();

        let src: Vec<u8> = (0..10 * SIZE).map(|i| (i / SIZE) as u8 + 1).collect();
        thread::scope(|scope| {
            scope.spawn(|| {
                let mut hw = 0;
                while hw < 14 {
                    if hw < reader.sw_count() {
                        hw += 1;
                        rig.complete(0, Direction::Reader, hw);
                    }
                    thread::yield_now();
                }
            });
            let report = s.write(&src, TransferMode::Blocking).unwrap();
            assert_eq!(report, TransferReport { bytes: 10 * SIZE, lost: 0 });
        });

        assert_eq!(reader.sw_count(), 14);
        assert_eq!(reader.transfer_state(), TransferState::Done);
    }

    #[test]
    fn test_blocking_read_interrupted_by_signal() {
        let rig = Rig::small();
        let s = open(&rig);
        s.request_lock(Direction::Writer).unwrap();
        s.set_enabled(Direction::Writer, true).unwrap();
        let writer = rig.device.channel(0).unwrap().writer();

        let mut buf = vec![0u8; SIZE];
        thread::scope(|scope| {
            scope.spawn(|| {
                while writer.transfer_state() != TransferState::Waiting {
                    thread::yield_now();
                }
                s.interrupt();
            });
            assert_eq!(
                s.read(&mut buf, TransferMode::Blocking),
                Err(LitePcieError::Interrupted)
            );
        });
        assert_eq!(writer.sw_count(), 0);
    }

    #[test]
    fn test_fast_path_delivers_every_byte() {
        let rig = Rig::small();
        let s = open(&rig);
        s.request_lock(Direction::Reader).unwrap();
        s.set_enabled(Direction::Reader, true).unwrap();
        let reader = reader_of(&rig.device);

        // Engine keeps up: never more than four buffers queued.
        for round in 0..12u8 {
            let src = vec![round; 4 * SIZE];
            let report = s.write(&src, TransferMode::NonBlocking).unwrap();
            assert_eq!(report, TransferReport { bytes: 4 * SIZE, lost: 0 });
            let sw = reader.sw_count();
            assert!(sw - reader.hw_count() <= reader.ring_len());
            for k in sw - 4..sw {
                let slot = reader.buffers().slot(k);
                let first = unsafe { *slot.cpu_ptr().as_ptr() };
                assert_eq!(first, round);
            }
            rig.complete(0, Direction::Reader, sw);
        }
    }

    #[test]
    fn test_zero_copy_read() {
        let rig = Rig::small();
        let s = open(&rig);
        s.request_lock(Direction::Writer).unwrap();
        s.set_enabled(Direction::Writer, true).unwrap();

        let info = s.mmap_info();
        assert_eq!(
            s.map_buffers(info.rx_offset, info.pool_len() - 1).err(),
            Some(LitePcieError::InvalidArgument)
        );
        assert_eq!(
            s.map_buffers(info.tx_offset, info.pool_len()).err(),
            Some(LitePcieError::NotOwner)
        );

        let region = s.map_buffers(info.rx_offset, info.pool_len()).unwrap();
        assert_eq!(region.direction(), Direction::Writer);
        assert_eq!(region.len(), 16 * SIZE);

        unsafe { region.slot_mut(0).fill(0x77) };
        rig.complete(0, Direction::Writer, 1);
        let sw = s.counters(Direction::Writer).sw_count;
        assert_eq!(unsafe { region.slot_mut(sw)[0] }, 0x77);
        s.report_progress(Direction::Writer, sw + 1).unwrap();
        assert_eq!(s.counters(Direction::Writer), CounterSnapshot { hw_count: 1, sw_count: 1 });
    }

    #[test]
    fn test_progress_never_goes_backwards() {
        let rig = Rig::small();
        let s = open(&rig);
        s.request_lock(Direction::Writer).unwrap();
        s.set_enabled(Direction::Writer, true).unwrap();
        rig.complete(0, Direction::Writer, 6);

        s.report_progress(Direction::Writer, 4).unwrap();
        assert_eq!(s.report_progress(Direction::Writer, 3), Err(LitePcieError::InvalidArgument));
        assert_eq!(s.counters(Direction::Writer).sw_count, 4);
        s.report_progress(Direction::Writer, 4).unwrap();
        s.report_progress(Direction::Writer, 6).unwrap();
        assert_eq!(s.counters(Direction::Writer), CounterSnapshot { hw_count: 6, sw_count: 6 });
    }

    #[test]
    fn test_reader_progress_bounded_by_ring() {
        let rig = Rig::small();
        let s = open(&rig);
        s.request_lock(Direction::Reader).unwrap();
        s.set_enabled(Direction::Reader, true).unwrap();

        assert_eq!(s.report_progress(Direction::Reader, 1000), Err(LitePcieError::InvalidArgument));
        assert_eq!(s.report_progress(Direction::Reader, 17), Err(LitePcieError::InvalidArgument));
        s.report_progress(Direction::Reader, 16).unwrap();

        rig.complete(0, Direction::Reader, 3);
        s.report_progress(Direction::Reader, 19).unwrap();
        assert_eq!(s.report_progress(Direction::Reader, 5), Err(LitePcieError::InvalidArgument));
        let counters = s.counters(Direction::Reader);
        assert_eq!(counters.sw_count, 19);
        assert!(counters.sw_count - counters.hw_count <= 16);
    }

    #[test]
    fn test_poll() {
        let rig = Rig::small();
        let s = open(&rig);
        s.set_enabled(Direction::Writer, true).unwrap();
        assert_eq!(s.poll(), PollMask::WRITABLE);
        rig.complete(0, Direction::Writer, 3);
        assert_eq!(s.poll(), PollMask::READABLE | PollMask::WRITABLE);
    }
}
