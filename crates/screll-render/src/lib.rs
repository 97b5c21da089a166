// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Framebuffer size in physical pixels, always passed by value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports 0 in one dimension; nothing can be presented then.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Messages from the window system, delivered to the renderer before the next frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    Resized(RenderSize),
}

/// Uniform block consumed by the vertex stage (binding 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FrameUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl FrameUniforms {
    pub const IDENTITY: [[f32; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    pub fn identity() -> Self {
        Self {
            model: Self::IDENTITY,
            view: Self::IDENTITY,
            proj: Self::IDENTITY,
        }
    }
}

/// Supplies the per-frame uniform data; `extent` is the current swapchain extent.
pub trait UniformSource {
    fn frame_uniforms(&mut self, extent: RenderSize) -> FrameUniforms;
}

impl<F> UniformSource for F
where
    F: FnMut(RenderSize) -> FrameUniforms,
{
    fn frame_uniforms(&mut self, extent: RenderSize) -> FrameUniforms {
        self(extent)
    }
}

/// Reads compiled shader binaries. The bytes are opaque to the renderer.
pub trait ShaderSource {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FsShaderSource;

impl ShaderSource for FsShaderSource {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentPreference {
    /// Lock to the display refresh.
    Fifo,
    /// Low latency without tearing; falls back to FIFO when unsupported.
    #[default]
    Mailbox,
}

#[derive(Clone, Debug)]
pub struct RendererSettings {
    pub app_name: String,
    pub present: PresentPreference,
    pub frames_in_flight: usize,
    pub validation: bool,
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            app_name: "screll".to_owned(),
            present: PresentPreference::Mailbox,
            frames_in_flight: 2,
            validation: cfg!(debug_assertions),
            clear_color: [0.02, 0.02, 0.04, 1.0],
            vertex_shader: PathBuf::from("shaders/triangle.vert.spv"),
            fragment_shader: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// What happened to one call of [`Renderer::draw_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was queued for presentation, on a rebuilt swapchain if one was due.
    Presented,
    /// Nothing drawn: the framebuffer is empty.
    Skipped,
    /// The swapchain was rebuilt and nothing was presented; draw again on the next tick.
    Recreated,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RendererSettings,
        shaders: &dyn ShaderSource,
    ) -> Result<Self>
    where
        Self: Sized;

    fn handle_event(&mut self, event: SurfaceEvent);
    fn draw_frame(&mut self, uniforms: &mut dyn UniformSource) -> Result<FrameStatus>;
    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()>;
}
