//! Driver error types

use core::fmt;

use dma_pool::DmaError;

pub type Result<T> = core::result::Result<T, LitePcieError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LitePcieError {
    /// DMA buffers could not be allocated at attach time.
    OutOfMemory,
    /// Underlying pool failure.
    Allocation(DmaError),
    /// Non-blocking caller: no data or no room right now.
    WouldBlock,
    /// A blocking wait was cut short by a pending signal.
    Interrupted,
    /// Length, offset or size does not match what the ring expects.
    InvalidArgument,
    /// Direction lock is already held.
    LockDenied,
    /// Session does not hold the lock for this direction.
    NotOwner,
    /// Hardware never asserted the awaited status.
    Timeout,
    /// Channel index out of range.
    InvalidChannel,
    /// Rejected configuration.
    InvalidConfig(&'static str),
    /// Minor numbers exhausted.
    TooManyDevices,
    /// Unknown device or minor.
    NoSuchDevice,
    /// Device still has open sessions.
    Busy,
}

impl From<DmaError> for LitePcieError {
    fn from(err: DmaError) -> Self {
        match err {
            DmaError::OutOfMemory => Self::OutOfMemory,
            other => Self::Allocation(other),
        }
    }
}

impl fmt::Display for LitePcieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "Failed to allocate DMA buffers"),
            Self::Allocation(err) => write!(f, "DMA allocation error: {}", err),
            Self::WouldBlock => write!(f, "Operation would block"),
            Self::Interrupted => write!(f, "Wait interrupted by signal"),
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::LockDenied => write!(f, "DMA lock already held"),
            Self::NotOwner => write!(f, "DMA lock not held by this session"),
            Self::Timeout => write!(f, "Hardware timeout"),
            Self::InvalidChannel => write!(f, "Invalid DMA channel"),
            Self::InvalidConfig(why) => write!(f, "Invalid configuration: {}", why),
            Self::TooManyDevices => write!(f, "No free minor numbers"),
            Self::NoSuchDevice => write!(f, "No such device"),
            Self::Busy => write!(f, "Device busy"),
        }
    }
}
