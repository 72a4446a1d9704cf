//! LitePCIe DMA ring engine.
//!
//! Streams fixed-size buffers between host memory and a LitePCIe FPGA core.
//! Each channel has two engines looping over a descriptor table of N
//! buffers; progress is tracked with two monotonic counters per direction
//! and nothing else.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ DeviceManager   minors → (device, channel)                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Session         lock / read / write / poll / map / progress  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ flow            counters → would-block, overflow, underflow  │
//! │ arbiter         one owner per direction                      │
//! │ mmap            pool as one contiguous region                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ DmaDevice       attach, start/stop, MSI dispatch             │
//! │ descriptor      table programming                            │
//! │ counter         16-bit loop status → 64-bit count            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ RegisterSpace   32-bit CSR access        RingBuffers/DmaPool │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let device = DmaDevice::attach(regs, delay, &pool, DmaConfig::default())?;
//! let manager = DeviceManager::new();
//! manager.register(device)?;
//!
//! // Interrupt glue:  device.on_interrupt(line);
//!
//! let session = manager.open(0)?;
//! session.request_lock(Direction::Writer)?;
//! session.set_enabled(Direction::Writer, true)?;
//! let report = session.read(&mut buf, TransferMode::Blocking)?;
//! ```

#![no_std]

extern crate alloc;

pub mod arbiter;
pub mod channel;
pub mod config;
pub mod counter;
pub mod csr;
pub mod descriptor;
pub mod device;
pub mod direction;
pub mod error;
pub mod flow;
pub mod interrupt;
pub mod manager;
pub mod mmap;
pub mod pool;
pub mod regs;
pub mod session;
pub mod time;
pub mod wait;

#[cfg(test)]
mod testing;

pub use arbiter::{LockOp, LockRequest, LockStatus};
pub use channel::DmaChannel;
pub use config::{ChannelLayout, CsrMap, DmaConfig, MsiMode};
pub use counter::{reconcile, LoopStatus};
pub use device::DmaDevice;
pub use direction::{CounterSnapshot, Direction, TransferState};
pub use error::{LitePcieError, Result};
pub use flow::{PollMask, TransferMode, TransferReport};
pub use interrupt::IrqOutcome;
pub use manager::{DeviceId, DeviceManager, DeviceNode};
pub use mmap::{MappedRegion, MmapDmaInfo};
pub use pool::{DmaAllocator, RingBuffers};
pub use regs::{MmioRegisters, RegisterSpace};
pub use session::Session;
pub use time::{Delay, SpinDelay};
pub use wait::Signal;
