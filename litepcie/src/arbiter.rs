//! Ownership arbiter.
//!
//! At most one session controls each direction of a channel. Requesting
//! a held lock fails without side effects; releasing always succeeds,
//! whoever asks.

use log::debug;

use crate::direction::DirectionState;
use crate::error::{LitePcieError, Result};

/// Action on one direction's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockOp {
    #[default]
    None,
    Request,
    Release,
}

/// Lock actions for both directions of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockRequest {
    pub reader: LockOp,
    pub writer: LockOp,
}

impl LockRequest {
    pub const fn reader(op: LockOp) -> Self {
        Self {
            reader: op,
            writer: LockOp::None,
        }
    }

    pub const fn writer(op: LockOp) -> Self {
        Self {
            reader: LockOp::None,
            writer: op,
        }
    }
}

/// Per-direction result: false only when a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub reader: bool,
    pub writer: bool,
}

/// Claim `state` for `session`.
pub fn request(state: &DirectionState, session: u64) -> Result<()> {
    if state.try_lock(session) {
        debug!("{} lock granted to session {}", state.direction(), session);
        Ok(())
    } else {
        Err(LitePcieError::LockDenied)
    }
}

/// Drop the lock on `state`. Idempotent.
pub fn release(state: &DirectionState) {
    state.unlock();
}

/// Fail with `NotOwner` unless `session` holds `state`.
pub fn ensure_owner(state: &DirectionState, session: u64) -> Result<()> {
    if state.is_owned_by(session) {
        Ok(())
    } else {
        Err(LitePcieError::NotOwner)
    }
}
