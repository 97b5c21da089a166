// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use glam::{Mat4, Vec3};
use screll_core::init_tracing;
use screll_render::{
    FrameStatus, FrameUniforms, FsShaderSource, RenderSize, Renderer, RendererSettings, SurfaceEvent,
    UniformSource,
};
use screll_render_vk::{RenderError, VkRenderer};
use std::time::Instant;
use tracing::{error, info, warn};

use screll_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::Key,
    window::{Window, WindowId},
};

mod config;

use config::{AppConfig, Args};

/// Backgrounds cycled with the C key; the configured colour comes first.
const PALETTE: [[f32; 4]; 3] = [
    [0.10, 0.02, 0.02, 1.0],
    [0.02, 0.10, 0.02, 1.0],
    [0.60, 0.60, 0.65, 1.0],
];

/// Spinning triangle seen through a perspective camera.
struct Spinner {
    start: Instant,
}

impl Spinner {
    fn uniforms_at(seconds: f32, extent: RenderSize) -> FrameUniforms {
        let model = Mat4::from_rotation_z(seconds * std::f32::consts::FRAC_PI_2);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.5), Vec3::ZERO, Vec3::Y);
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), extent.aspect(), 0.1, 10.0);
        // Vulkan clip space has y pointing down.
        proj.y_axis.y *= -1.0;
        FrameUniforms {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }
}

impl UniformSource for Spinner {
    fn frame_uniforms(&mut self, extent: RenderSize) -> FrameUniforms {
        Self::uniforms_at(self.start.elapsed().as_secs_f32(), extent)
    }
}

struct App {
    cfg: AppConfig,
    settings: RendererSettings,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,
    scene: Spinner,
    palette_index: usize,

    exiting: bool,
    failure: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.failure = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // Renderer before the window it draws into.
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match renderer.draw_frame(&mut self.scene) {
            Ok(FrameStatus::Presented) => self.frames = self.frames.saturating_add(1),
            Ok(FrameStatus::Skipped) => {}
            Ok(FrameStatus::Recreated) => {
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
            Err(e) => {
                let recoverable = e
                    .downcast_ref::<RenderError>()
                    .is_some_and(|re| re.is_recoverable());
                if recoverable {
                    warn!("frame skipped: {e:#}");
                } else {
                    self.fail(event_loop, e);
                }
            }
        }
    }

    fn cycle_clear_color(&mut self, event_loop: &ActiveEventLoop) {
        self.palette_index = (self.palette_index + 1) % (PALETTE.len() + 1);
        let color = match self.palette_index {
            0 => self.settings.clear_color,
            i => PALETTE[i - 1],
        };
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match renderer.set_clear_color(color) {
            Ok(()) => info!("clear color = {color:?}"),
            Err(e) => self.fail(event_loop, e),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let w = &self.cfg.window;
        let window = match screll_platform::create_window(event_loop, &w.title, w.width, w.height) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e),
        };
        self.render_size = screll_platform::framebuffer_size(&window);

        match VkRenderer::new(&window, &window, self.render_size, &self.settings, &FsShaderSource) {
            Ok(renderer) => {
                info!(
                    "renderer = vk, present = {:?}, frames in flight = {}",
                    self.settings.present, self.settings.frames_in_flight
                );
                self.renderer = Some(renderer);
            }
            Err(e) => {
                drop(window);
                return self.fail(event_loop, e);
            }
        }
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        if let Some(surface_event) = screll_platform::surface_event(&event) {
            let SurfaceEvent::Resized(size) = surface_event;
            if size.is_empty() != self.render_size.is_empty() {
                info!("Resized → {}x{} (paused={})", size.width, size.height, size.is_empty());
            }
            self.render_size = size;
            if let Some(renderer) = &mut self.renderer {
                renderer.handle_event(surface_event);
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && !event.repeat
                    && matches!(event.logical_key.as_ref(), Key::Character("c" | "C")) =>
            {
                self.cycle_clear_color(event_loop);
            }
            WindowEvent::RedrawRequested if !self.exiting => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.render_size.is_empty() {
            // Minimized: sleep until the next window event.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (cfg, problem) = match AppConfig::load(&args.config) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    init_tracing(&cfg.render.log_filter);
    if let Some(e) = problem {
        warn!("{e:#}; using default configuration");
    }

    let settings = cfg.renderer_settings(&args);
    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        settings,
        window: None,
        renderer: None,
        render_size: RenderSize::default(),
        scene: Spinner { start: Instant::now() },
        palette_index: 0,
        exiting: false,
        failure: None,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_starts_unrotated_with_flipped_y() {
        let u = Spinner::uniforms_at(0.0, RenderSize::new(1600, 900));
        assert_eq!(u.model, FrameUniforms::IDENTITY);
        assert!(u.proj[1][1] < 0.0);
        let ratio = u.proj[1][1].abs() / u.proj[0][0];
        assert!((ratio - 1600.0 / 900.0).abs() < 1e-4);
    }

    #[test]
    fn spinner_quarter_turn_after_one_second() {
        let u = Spinner::uniforms_at(1.0, RenderSize::new(100, 100));
        // Column-major: first column is the rotated x axis.
        assert!(u.model[0][0].abs() < 1e-6);
        assert!((u.model[0][1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn minimized_extent_does_not_produce_nan() {
        let u = Spinner::uniforms_at(0.5, RenderSize::new(0, 0));
        assert!(u.proj.iter().flatten().all(|v| v.is_finite()));
    }
}
