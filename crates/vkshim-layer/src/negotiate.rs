//! Loader/layer interface negotiation.
//!
//! A strict state machine: `Unnegotiated` moves to `Negotiated` or `Failed`
//! exactly once, and both outcomes are terminal.

use std::ops::RangeInclusive;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::LayerError;

/// Oldest loader/layer interface version this layer can operate with.
pub const MIN_INTERFACE_VERSION: u32 = 1;
/// Newest version; version 2 adds `vk_layerGetPhysicalDeviceProcAddr`.
pub const MAX_INTERFACE_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Unnegotiated,
    Negotiated { version: u32 },
    Failed { requested: u32 },
}

pub struct Negotiator {
    supported: RangeInclusive<u32>,
    state: Mutex<NegotiationState>,
}

impl Negotiator {
    pub fn new(supported: RangeInclusive<u32>) -> Self {
        Self {
            supported,
            state: Mutex::new(NegotiationState::Unnegotiated),
        }
    }

    pub fn supported(&self) -> RangeInclusive<u32> {
        self.supported.clone()
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.lock()
    }

    /// Negotiate against the loader's requested version. Only a version
    /// inside the supported range is accepted; anything else, older or
    /// newer, fails. Once an outcome is reached, later calls report it
    /// unchanged regardless of the version they ask for.
    pub fn negotiate(&self, requested: u32) -> Result<u32, LayerError> {
        let (min, max) = (*self.supported.start(), *self.supported.end());
        let mut state = self.state.lock();
        match *state {
            NegotiationState::Negotiated { version } => Ok(version),
            NegotiationState::Failed { .. } => Err(LayerError::NegotiationFailed),
            NegotiationState::Unnegotiated => {
                if !self.supported.contains(&requested) {
                    warn!(requested, min, max, "refusing loader interface version");
                    *state = NegotiationState::Failed { requested };
                    return Err(LayerError::UnsupportedInterface { requested, min, max });
                }
                info!(version = requested, "negotiated loader interface");
                *state = NegotiationState::Negotiated { version: requested };
                Ok(requested)
            }
        }
    }

    /// The accepted version, or the reason no object may be created yet.
    pub fn require_negotiated(&self) -> Result<u32, LayerError> {
        match *self.state.lock() {
            NegotiationState::Negotiated { version } => Ok(version),
            NegotiationState::Unnegotiated => Err(LayerError::NotNegotiated),
            NegotiationState::Failed { .. } => Err(LayerError::NegotiationFailed),
        }
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new(MIN_INTERFACE_VERSION..=MAX_INTERFACE_VERSION)
    }
}
