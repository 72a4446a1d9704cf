//! Flow control and copy-based transfers.
//!
//! The only synchronization between the engine and the caller is the pair
//! of monotonic counters of each direction:
//!
//! - writer (device→host): `hw - sw` completed buffers wait to be read
//! - reader (host→device): `sw - hw` queued buffers wait to be fetched
//!
//! Both directions treat a backlog past half the ring as the point where
//! the caller has fallen behind.

use bitflags::bitflags;
use log::{debug, error};

use crate::direction::{DirectionState, TransferState};
use crate::error::{LitePcieError, Result};
use crate::wait::Signal;

/// Completed buffers needed before a channel polls readable.
pub const READABLE_THRESHOLD: i64 = 2;

/// Blocking behavior of one transfer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Blocking,
    NonBlocking,
}

impl TransferMode {
    pub fn is_blocking(&self) -> bool {
        matches!(self, TransferMode::Blocking)
    }
}

/// Outcome of a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferReport {
    /// Caller bytes consumed, in whole buffers. Lost slots are included, so
    /// the caller region for slot `i` is always `[i * size, (i + 1) * size)`.
    pub bytes: usize,
    /// Buffers skipped by overflow (reads) or underflow (writes).
    pub lost: usize,
}

bitflags! {
    /// Readiness of a channel, laid out like `POLLIN` / `POLLOUT`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollMask: u32 {
        const READABLE = 0x0001;
        const WRITABLE = 0x0004;
    }
}

/// Read completed buffers from the writer direction into `dst`.
///
/// Blocks until at least one buffer is complete (unless `mode` says
/// otherwise), then drains what is available once. Slots backlogged past
/// half the ring are skipped and counted as lost.
pub fn read(
    state: &DirectionState,
    dst: &mut [u8],
    mode: TransferMode,
    signal: &Signal,
) -> Result<TransferReport> {
    let size = state.buffers().buffer_size();
    if dst.len() < size {
        return Err(LitePcieError::InvalidArgument);
    }

    if state.backlog() <= 0 {
        if !mode.is_blocking() {
            return Err(LitePcieError::WouldBlock);
        }
        state.set_transfer_state(TransferState::Waiting);
        if let Err(err) = state.wait.wait_interruptible(signal, || state.backlog() > 0) {
            state.set_transfer_state(TransferState::Idle);
            return Err(err);
        }
    }

    state.set_transfer_state(TransferState::Transferring);
    let half = state.half_ring();
    let mut report = TransferReport::default();

    for out in dst.chunks_exact_mut(size) {
        let backlog = state.backlog();
        if backlog <= 0 {
            break;
        }
        if backlog > half {
            report.lost += 1;
        } else {
            state.buffers().slot(state.sw_count()).copy_to(out);
        }
        state.advance_sw();
        report.bytes += size;
    }
    state.set_transfer_state(TransferState::Done);

    if report.lost > 0 {
        error!("Reading too late, {} buffers lost", report.lost);
    }
    debug!("read: read {} bytes out of {}", report.bytes, dst.len());
    Ok(report)
}

/// Queue buffers from `src` on the reader direction.
///
/// A blocking write keeps waiting for room until every full buffer in
/// `src` is queued. If a signal arrives after some buffers went out, the
/// partial count is returned; before any, `Interrupted`.
pub fn write(
    state: &DirectionState,
    src: &[u8],
    mode: TransferMode,
    signal: &Signal,
) -> Result<TransferReport> {
    let size = state.buffers().buffer_size();
    if src.len() < size {
        return Err(LitePcieError::InvalidArgument);
    }

    let half = state.half_ring();
    let queued = || state.sw_count() - state.hw_count();
    if !mode.is_blocking() && queued() >= half {
        return Err(LitePcieError::WouldBlock);
    }

    state.set_transfer_state(TransferState::Transferring);
    let mut report = TransferReport::default();

    for chunk in src.chunks_exact(size) {
        if queued() >= half {
            if !mode.is_blocking() {
                break;
            }
            state.set_transfer_state(TransferState::Waiting);
            if let Err(err) = state.wait.wait_interruptible(signal, || queued() < half) {
                if report.bytes == 0 {
                    state.set_transfer_state(TransferState::Idle);
                    return Err(err);
                }
                break;
            }
            state.set_transfer_state(TransferState::Transferring);
        }

        if queued() < 0 {
            report.lost += 1;
        } else {
            state.buffers().slot(state.sw_count()).copy_from(chunk);
        }
        state.advance_sw();
        report.bytes += size;
    }
    state.set_transfer_state(TransferState::Done);

    if report.lost > 0 {
        error!("Writing too late, {} buffers lost", report.lost);
    }
    debug!("write: write {} bytes out of {}", report.bytes, src.len());
    Ok(report)
}

/// Readiness of a channel. Never blocks.
pub fn readiness(writer: &DirectionState, reader: &DirectionState) -> PollMask {
    let mut mask = PollMask::empty();
    if writer.backlog() > READABLE_THRESHOLD {
        mask |= PollMask::READABLE;
    }
    if reader.sw_count() - reader.hw_count() < reader.half_ring() {
        mask |= PollMask::WRITABLE;
    }
    debug!(
        "poll: writer {}/{} reader {}/{} -> {:?}",
        writer.hw_count(),
        writer.sw_count(),
        reader.hw_count(),
        reader.sw_count(),
        mask
    );
    mask
}
