// SPDX-License-Identifier: CEPL-1.0
//! winit adapters: window creation and translation of window events into
//! renderer-facing values.

use anyhow::{Context, Result};
use screll_render::{RenderSize, SurfaceEvent};
use tracing::debug;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

pub use winit;

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Current drawable size of the window in physical pixels.
pub fn framebuffer_size(window: &Window) -> RenderSize {
    render_size(window.inner_size())
}

/// The renderer only cares about size changes; everything else is the app's business.
pub fn surface_event(event: &WindowEvent) -> Option<SurfaceEvent> {
    match event {
        WindowEvent::Resized(size) => Some(SurfaceEvent::Resized(render_size(*size))),
        _ => None,
    }
}

pub fn create_window(event_loop: &ActiveEventLoop, title: &str, width: u32, height: u32) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(title)
        .with_inner_size(LogicalSize::new(width, height));
    let window = event_loop.create_window(attrs).context("create_window")?;
    let size = framebuffer_size(&window);
    debug!("window {title:?} created at {}x{}", size.width, size.height);
    Ok(window)
}
