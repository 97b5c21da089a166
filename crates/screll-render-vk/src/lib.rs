// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan device and swapchain lifecycle for a single window.
//!
//! [`RenderContext::new`] brings up instance, surface, physical and logical
//! device; [`FrameLoop`] drives acquire/submit/present and rebuilds the
//! swapchain generation on resize or when presentation reports it stale.

use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use screll_render::{
    FrameStatus, RenderSize, Renderer, RendererSettings, ShaderSource, SurfaceEvent, UniformSource,
};
use tracing::{error, info};

pub mod command;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod instance;
pub mod logical_device;
pub mod pipeline;
pub mod scoped;
pub mod surface;
pub mod swapchain;

pub use context::RenderContext;
pub use error::RenderError;
pub use frame::{FrameBackend, FrameLoop, FrameState, LifecycleProbe};

pub struct VkRenderer {
    frames: FrameLoop<RenderContext>,
}

impl VkRenderer {
    pub fn context(&self) -> &RenderContext {
        self.frames.backend()
    }

    pub fn probe(&self) -> &LifecycleProbe {
        self.frames.probe()
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RendererSettings,
        shaders: &dyn ShaderSource,
    ) -> Result<Self> {
        let context =
            RenderContext::new(window, display, settings, shaders).context("Vulkan initialization")?;
        let frames = FrameLoop::new(context, size, LifecycleProbe::default())
            .context("initial swapchain generation")?;
        if let Some(swapchain) = frames.backend().swapchain() {
            let extent = swapchain.extent();
            info!(
                "Vulkan swapchain ready ({}x{}, {:?})",
                extent.width,
                extent.height,
                swapchain.format()
            );
        }
        Ok(Self { frames })
    }

    fn handle_event(&mut self, event: SurfaceEvent) {
        self.frames.handle_event(event);
    }

    fn draw_frame(&mut self, uniforms: &mut dyn UniformSource) -> Result<FrameStatus> {
        Ok(self.frames.draw_frame(uniforms)?)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        self.frames.set_clear_color(rgba).context("set_clear_color")
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.frames.shutdown() {
            error!("renderer shutdown: {e}");
        }
        let violations = self.frames.probe().violations();
        if violations > 0 {
            error!("{violations} generation resource(s) were destroyed while the device was busy");
        }
    }
}
