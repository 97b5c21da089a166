// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Vulkan loader unavailable: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("Window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("Initialization failed at {stage}: {source}")]
    Initialization {
        stage: &'static str,
        #[source]
        source: vk::Result,
    },

    #[error("No suitable physical device ({candidates} enumerated)")]
    NoSuitableDevice { candidates: usize },

    #[error("Logical device creation rejected by the driver: {0}")]
    DeviceCreation(#[source] vk::Result),

    #[error("Swapchain creation failed at {stage}: {source}")]
    SwapchainCreation {
        stage: &'static str,
        #[source]
        source: vk::Result,
    },

    #[error("Surface cannot back a swapchain: {0}")]
    SwapchainUnsupported(&'static str),

    #[error("Pipeline creation failed at {stage}: {source}")]
    PipelineCreation {
        stage: &'static str,
        #[source]
        source: vk::Result,
    },

    #[error("Shader binary {path:?} could not be loaded: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Allocation of {what} failed: {source}")]
    Allocation {
        what: &'static str,
        #[source]
        source: vk::Result,
    },

    #[error("No memory type matches bits {type_bits:#b} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("Frame submission failed at {stage}: {source}")]
    FrameSubmission {
        stage: &'static str,
        #[source]
        source: vk::Result,
    },
}

impl RenderError {
    /// Swapchain failures after startup are retried by the next recreation;
    /// everything else ends the frame loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RenderError::SwapchainCreation { .. } | RenderError::SwapchainUnsupported(_)
        )
    }

    pub(crate) fn init(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |source| RenderError::Initialization { stage, source }
    }

    pub(crate) fn swapchain(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |source| RenderError::SwapchainCreation { stage, source }
    }

    pub(crate) fn pipeline(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |source| RenderError::PipelineCreation { stage, source }
    }

    pub(crate) fn alloc(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |source| RenderError::Allocation { what, source }
    }

    pub(crate) fn frame(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |source| RenderError::FrameSubmission { stage, source }
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
