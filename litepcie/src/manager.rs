//! Device manager.
//!
//! Owns every attached device and hands out node minors, one per channel.
//! Constructed once by the host and passed to whoever needs to look up a
//! channel; there is no global registry.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::info;

use crate::device::DmaDevice;
use crate::error::{LitePcieError, Result};
use crate::pool::DmaAllocator;
use crate::regs::RegisterSpace;
use crate::session::Session;
use crate::time::Delay;

/// Minors available across all devices.
pub const MINOR_COUNT: usize = 32;

/// Node name prefix; channel nodes are `litepcie0`, `litepcie1`, ...
pub const NODE_PREFIX: &str = "litepcie";

/// Handle of an attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(usize);

/// One channel node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    pub minor: usize,
    pub name: String,
    pub device: DeviceId,
    pub channel: usize,
}

struct Entry<R: RegisterSpace, D: Delay> {
    id: DeviceId,
    device: Arc<DmaDevice<R, D>>,
    minor_base: usize,
}

impl<R: RegisterSpace, D: Delay> Entry<R, D> {
    fn minors(&self) -> core::ops::Range<usize> {
        self.minor_base..self.minor_base + self.device.channel_count()
    }
}

struct Inner<R: RegisterSpace, D: Delay> {
    entries: Vec<Entry<R, D>>,
    next_id: usize,
}

pub struct DeviceManager<R: RegisterSpace, D: Delay> {
    inner: spin::Mutex<Inner<R, D>>,
}

impl<R: RegisterSpace, D: Delay> Default for DeviceManager<R, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RegisterSpace, D: Delay> DeviceManager<R, D> {
    pub fn new() -> Self {
        Self {
            inner: spin::Mutex::new(Inner {
                entries: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Take ownership of an attached device and create its channel nodes.
    ///
    /// Channels get consecutive minors from the lowest free range.
    pub fn register(&self, device: DmaDevice<R, D>) -> Result<DeviceId> {
        let mut inner = self.inner.lock();
        let channels = device.channel_count();

        let minor_base = (0..=MINOR_COUNT.saturating_sub(channels))
            .find(|&base| {
                inner
                    .entries
                    .iter()
                    .all(|e| e.minors().end <= base || base + channels <= e.minors().start)
            })
            .filter(|_| channels <= MINOR_COUNT)
            .ok_or(LitePcieError::TooManyDevices)?;

        let id = DeviceId(inner.next_id);
        inner.next_id += 1;

        for minor in minor_base..minor_base + channels {
            info!("Creating /dev/{}{}", NODE_PREFIX, minor);
        }
        inner.entries.push(Entry {
            id,
            device: Arc::new(device),
            minor_base,
        });
        Ok(id)
    }

    /// Every channel node, ordered by minor.
    pub fn nodes(&self) -> Vec<DeviceNode> {
        let inner = self.inner.lock();
        let mut nodes: Vec<DeviceNode> = inner
            .entries
            .iter()
            .flat_map(|e| {
                e.minors().enumerate().map(move |(channel, minor)| DeviceNode {
                    minor,
                    name: format!("{}{}", NODE_PREFIX, minor),
                    device: e.id,
                    channel,
                })
            })
            .collect();
        nodes.sort_by_key(|n| n.minor);
        nodes
    }

    pub fn device(&self, id: DeviceId) -> Result<Arc<DmaDevice<R, D>>> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.device.clone())
            .ok_or(LitePcieError::NoSuchDevice)
    }

    /// Open the channel behind `minor`.
    pub fn open(&self, minor: usize) -> Result<Session<R, D>> {
        let (device, channel) = {
            let inner = self.inner.lock();
            let entry = inner
                .entries
                .iter()
                .find(|e| e.minors().contains(&minor))
                .ok_or(LitePcieError::NoSuchDevice)?;
            (entry.device.clone(), minor - entry.minor_base)
        };
        Session::open(device, channel)
    }

    /// Remove a device, stop it and free its rings.
    ///
    /// Fails with `Busy` while sessions or other handles still reference
    /// the device; nothing changes in that case.
    pub fn detach<A: DmaAllocator + ?Sized>(&self, id: DeviceId, alloc: &A) -> Result<()> {
        let mut inner = self.inner.lock();
        let idx = inner
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(LitePcieError::NoSuchDevice)?;

        let entry = inner.entries.remove(idx);
        match Arc::try_unwrap(entry.device) {
            Ok(device) => {
                drop(inner);
                device.detach(alloc);
                Ok(())
            }
            Err(device) => {
                inner.entries.insert(
                    idx,
                    Entry {
                        id: entry.id,
                        device,
                        minor_base: entry.minor_base,
                    },
                );
                Err(LitePcieError::Busy)
            }
        }
    }

    /// Attached device count.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
