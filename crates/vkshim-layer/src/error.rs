use std::ffi::CStr;

use ash::vk;
use vkshim_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("loader interface version {requested} is outside the supported range {min}..={max}")]
    UnsupportedInterface { requested: u32, min: u32, max: u32 },

    #[error("loader interface has not been negotiated")]
    NotNegotiated,

    #[error("loader interface negotiation failed")]
    NegotiationFailed,

    #[error("next link does not provide mandatory entry point {}", .0.to_string_lossy())]
    MissingEntryPoint(&'static CStr),

    #[error("no loader link info in {0} create info")]
    MissingLinkInfo(&'static str),

    #[error("downstream call failed: {0}")]
    Downstream(vk::Result),

    #[error("{module} emulation failed: {result}")]
    Emulation {
        module: &'static str,
        result: vk::Result,
    },
}

impl LayerError {
    /// The Vulkan result reported to the caller for this error.
    pub fn to_vk_result(&self) -> vk::Result {
        match self {
            LayerError::Core(CoreError::InvalidHandle { .. })
            | LayerError::Core(CoreError::DuplicateHandle { .. }) => vk::Result::ERROR_UNKNOWN,
            LayerError::Core(_) => vk::Result::ERROR_INITIALIZATION_FAILED,
            LayerError::UnsupportedInterface { .. }
            | LayerError::NotNegotiated
            | LayerError::NegotiationFailed
            | LayerError::MissingEntryPoint(_)
            | LayerError::MissingLinkInfo(_) => vk::Result::ERROR_INITIALIZATION_FAILED,
            LayerError::Downstream(result) => *result,
            LayerError::Emulation { result, .. } => *result,
        }
    }
}

/// Turn a downstream `VkResult` into `Ok` for any non-error code.
pub(crate) fn check(result: vk::Result) -> Result<vk::Result, LayerError> {
    if result.as_raw() < 0 {
        Err(LayerError::Downstream(result))
    } else {
        Ok(result)
    }
}
