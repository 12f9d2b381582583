// Error types for renderer bring-up and the frame loop
//
// Every variant here is fatal: nothing in the renderer retries. Negotiation
// fallbacks (surface format, present mode, extent) are plain values and never
// show up as errors.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions raised while building the renderer.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("requested layer {0} is not available")]
    MissingLayer(String),

    #[error("window system integration is unavailable: {0}")]
    WindowSupport(vk::Result),

    #[error("could not find any devices with Vulkan support")]
    NoAdapters,

    #[error("{count} device(s) found but none meet requirements")]
    NoSuitableAdapter { count: usize },

    #[error("surface reports no formats")]
    NoSurfaceFormats,

    #[error("failed to {what}: {result}")]
    Creation { what: &'static str, result: vk::Result },

    #[error("failed to query {what}: {result}")]
    Query { what: &'static str, result: vk::Result },

    #[error(transparent)]
    Shader(#[from] ShaderError),
}

impl InitError {
    /// Adapter for `map_err` on handle-creation calls.
    pub fn creation(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Creation { what, result }
    }

    /// Adapter for `map_err` on capability queries.
    pub fn query(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Query { what, result }
    }
}

/// Shader bytecode could not be turned into SPIR-V words.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("failed to open shader {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader bytecode is empty")]
    Empty,

    #[error("shader bytecode length {0} is not a multiple of 4")]
    Misaligned(usize),
}

/// Failures inside the acquire/submit/present cycle.
///
/// A stale chain (`ERROR_OUT_OF_DATE_KHR`) lands here too: rebuilding the
/// chain on demand is not implemented, so it ends the loop like any other
/// error.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to acquire next image: {0}")]
    Acquire(vk::Result),

    #[error("failed to submit command buffer for image {index}: {result}")]
    Submit { index: u32, result: vk::Result },

    #[error("failed to present image {index}: {result}")]
    Present { index: u32, result: vk::Result },

    #[error("acquired image index {index} is outside the chain ({count} images)")]
    IndexOutOfRange { index: u32, count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_adapter_keeps_the_step_name() {
        let err = InitError::creation("create swapchain")(vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(err.to_string().starts_with("failed to create swapchain: "));
        assert!(matches!(
            err,
            InitError::Creation {
                what: "create swapchain",
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            }
        ));
    }

    #[test]
    fn no_suitable_adapter_reports_count() {
        let err = InitError::NoSuitableAdapter { count: 2 };
        assert_eq!(err.to_string(), "2 device(s) found but none meet requirements");
    }
}
