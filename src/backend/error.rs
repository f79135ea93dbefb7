// Initialization errors
//
// Everything in here is unrecoverable: the bootstrap either produces a
// working device or the application cannot run. Callers decide whether to
// shut down gracefully or exit.

use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("could not load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("the driver rejected instance creation: {0}")]
    InstanceRejected(vk::Result),

    #[error("debug report functions are unavailable (is VK_EXT_debug_report supported?)")]
    DebugFunctionsUnavailable,

    #[error("no supported graphics card found")]
    NoSuitableDevice,

    #[error("the driver rejected logical device creation: {0}")]
    DeviceRejected(vk::Result),

    #[error("{call} failed: {result}")]
    Driver {
        call: &'static str,
        result: vk::Result,
    },

    #[error("{operation} is not allowed while the device selector is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("name contains an interior nul byte: {0:?}")]
    InvalidName(String),
}

/// Check a driver call, turning any failure into a fatal [`InitError::Driver`].
pub fn check<T>(call: &'static str, result: VkResult<T>) -> Result<T, InitError> {
    result.map_err(|result| {
        log::error!("Vulkan ERROR: {} returned {}", call, result);
        InitError::Driver { call, result }
    })
}
