//! Zero-copy mapping of a direction's ring.
//!
//! Both pools of a channel share one offset space:
//!
//! ```text
//! 0                 N*size            2*N*size
//! +-----------------+-----------------+
//! | reader pool (TX)| writer pool (RX)|
//! +-----------------+-----------------+
//! ```
//!
//! A mapping covers exactly one pool. Progress through mapped memory is
//! reported back explicitly; nothing is inferred from access patterns.

use alloc::vec::Vec;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::direction::{Direction, DirectionState};
use crate::error::{LitePcieError, Result};

/// Layout of both pools, as handed to mapping clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapDmaInfo {
    pub tx_offset: usize,
    pub tx_buffer_size: usize,
    pub tx_buffer_count: usize,
    pub rx_offset: usize,
    pub rx_buffer_size: usize,
    pub rx_buffer_count: usize,
}

impl MmapDmaInfo {
    pub fn new(buffer_count: usize, buffer_size: usize) -> Self {
        Self {
            tx_offset: 0,
            tx_buffer_size: buffer_size,
            tx_buffer_count: buffer_count,
            rx_offset: buffer_count * buffer_size,
            rx_buffer_size: buffer_size,
            rx_buffer_count: buffer_count,
        }
    }

    /// Bytes in one pool.
    pub fn pool_len(&self) -> usize {
        self.tx_buffer_count * self.tx_buffer_size
    }

    /// Pool selected by a mapping of `len` bytes at `offset`.
    pub fn resolve(&self, offset: usize, len: usize) -> Result<Direction> {
        if len != self.pool_len() {
            return Err(LitePcieError::InvalidArgument);
        }
        if offset == self.tx_offset {
            Ok(Direction::Reader)
        } else if offset == self.rx_offset {
            Ok(Direction::Writer)
        } else {
            Err(LitePcieError::InvalidArgument)
        }
    }
}

/// One ring buffer inside a mapping.
#[derive(Debug, Clone, Copy)]
pub struct MappedSegment {
    /// Offset from the start of the mapping.
    pub offset: usize,
    pub bus_addr: u64,
    pub cpu_ptr: NonNull<u8>,
    pub len: usize,
}

/// A direction's pool viewed as one contiguous region of `N * size` bytes.
///
/// The buffers themselves need not be physically adjacent; segment `i`
/// sits at `i * size`.
pub struct MappedRegion<'a> {
    direction: Direction,
    segments: Vec<MappedSegment>,
    buffer_size: usize,
    _ring: PhantomData<&'a DirectionState>,
}

impl<'a> MappedRegion<'a> {
    pub(crate) fn new(state: &'a DirectionState) -> Self {
        let size = state.buffers().buffer_size();
        let segments = state
            .buffers()
            .iter()
            .enumerate()
            .map(|(i, buf)| MappedSegment {
                offset: i * size,
                bus_addr: buf.bus_addr(),
                cpu_ptr: buf.cpu_ptr(),
                len: size,
            })
            .collect();
        Self {
            direction: state.direction(),
            segments,
            buffer_size: size,
            _ring: PhantomData,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Total mapped bytes.
    pub fn len(&self) -> usize {
        self.segments.len() * self.buffer_size
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[MappedSegment] {
        &self.segments
    }

    /// Segment used by transfer index `k`.
    pub fn segment(&self, k: i64) -> &MappedSegment {
        &self.segments[k.rem_euclid(self.segments.len() as i64) as usize]
    }

    /// Bytes of the slot for transfer index `k`.
    ///
    /// # Safety
    /// The slot must be owned by software per the direction's counters,
    /// and no other reference to it may be live.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, k: i64) -> &mut [u8] {
        let seg = self.segment(k);
        core::slice::from_raw_parts_mut(seg.cpu_ptr.as_ptr(), seg.len)
    }
}

// SAFETY: the region only hands out raw buffer addresses; access
// discipline follows the direction counters.
unsafe impl Send for MappedRegion<'_> {}
unsafe impl Sync for MappedRegion<'_> {}
