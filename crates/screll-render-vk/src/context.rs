// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use screll_render::{FrameUniforms, PresentPreference, RenderSize, RendererSettings, ShaderSource};
use tracing::{info, warn};

use crate::command::{CommandBufferSet, CommandPool, FrameSync};
use crate::device::{DeviceSelector, SelectedDevice};
use crate::error::{RenderError, Result};
use crate::frame::{Acquire, FrameBackend, GenerationResource, Present};
use crate::framebuffer::FramebufferSet;
use crate::instance::InstanceContext;
use crate::logical_device::LogicalDeviceContext;
use crate::pipeline::{PipelineContext, ShaderBinaries};
use crate::surface::SurfaceBinding;
use crate::swapchain::{SwapchainPlan, SwapchainState};

/// Every Vulkan object the renderer owns.
///
/// Fields drop top to bottom: the swapchain generation, then per-slot sync and
/// the command pool, then the device, the surface and finally the instance.
pub struct RenderContext {
    commands: Option<CommandBufferSet>,
    framebuffers: Option<FramebufferSet>,
    pipeline: Option<PipelineContext>,
    swapchain: Option<SwapchainState>,
    // Fence of the slot that last submitted work for each image.
    images_in_flight: Vec<vk::Fence>,

    sync: Vec<FrameSync>,
    command_pool: CommandPool,
    shaders: ShaderBinaries,
    present: PresentPreference,
    clear_color: [f32; 4],

    selected: SelectedDevice,
    device: LogicalDeviceContext,
    surface: SurfaceBinding,
    instance: InstanceContext,
}

impl RenderContext {
    /// Instance, surface, device selection, logical device, then the
    /// device-lifetime command pool and sync objects. The swapchain generation
    /// is built separately by [`FrameBackend::build_generation`].
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        settings: &RendererSettings,
        shaders: &dyn ShaderSource,
    ) -> Result<Self> {
        let raw_display = display.display_handle()?.as_raw();
        let instance = InstanceContext::new(raw_display, &settings.app_name, settings.validation)?;
        let surface = SurfaceBinding::new(&instance, window, display)?;
        let selected = DeviceSelector::select(&instance, &surface)?;
        let device = LogicalDeviceContext::new(&instance, &selected)?;

        let shaders = ShaderBinaries::load(shaders, &settings.vertex_shader, &settings.fragment_shader)?;
        let command_pool = CommandPool::new(&device)?;
        let slots = if settings.frames_in_flight == 0 {
            warn!("frames_in_flight = 0 is not usable; using 1");
            1
        } else {
            settings.frames_in_flight
        };
        let sync = (0..slots)
            .map(|_| FrameSync::new(device.raw()))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "render context ready on {} ({} frame(s) in flight, validation {})",
            selected.name,
            slots,
            if instance.has_diagnostics() { "on" } else { "off" }
        );
        Ok(Self {
            commands: None,
            framebuffers: None,
            pipeline: None,
            swapchain: None,
            images_in_flight: Vec::new(),
            sync,
            command_pool,
            shaders,
            present: settings.present,
            clear_color: settings.clear_color,
            selected,
            device,
            surface,
            instance,
        })
    }

    pub fn instance(&self) -> &InstanceContext {
        &self.instance
    }

    pub fn device_name(&self) -> &str {
        &self.selected.name
    }

    pub fn swapchain(&self) -> Option<&SwapchainState> {
        self.swapchain.as_ref()
    }

    fn slot(&self, slot: usize) -> Result<&FrameSync> {
        self.sync.get(slot).ok_or(RenderError::FrameSubmission {
            stage: "frame slot",
            source: vk::Result::ERROR_UNKNOWN,
        })
    }

    fn generation(&self) -> Result<(&SwapchainState, &CommandBufferSet)> {
        match (&self.swapchain, &self.commands) {
            (Some(swapchain), Some(commands)) => Ok((swapchain, commands)),
            _ => Err(RenderError::FrameSubmission {
                stage: "no swapchain generation",
                source: vk::Result::ERROR_UNKNOWN,
            }),
        }
    }
}

impl FrameBackend for RenderContext {
    fn frames_in_flight(&self) -> usize {
        self.sync.len()
    }

    fn has_generation(&self) -> bool {
        self.swapchain.is_some() && self.commands.is_some()
    }

    fn extent(&self) -> RenderSize {
        self.swapchain
            .as_ref()
            .map(|s| s.plan().size())
            .unwrap_or_default()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slot(slot)?.in_flight.raw();
        // SAFETY: fence belongs to this device.
        unsafe { self.device.raw().wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(RenderError::frame("wait_for_fences"))
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquire> {
        let semaphore = self.slot(slot)?.image_available.raw();
        let Some(swapchain) = &self.swapchain else {
            return Ok(Acquire::OutOfDate);
        };
        // SAFETY: the semaphore is unsignaled: its last wait was submitted.
        let acquired = unsafe {
            self.device.swapchain_loader().acquire_next_image(
                swapchain.raw(),
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(RenderError::frame("acquire_next_image")(e)),
        }
    }

    fn claim_image(&mut self, slot: usize, image: u32) -> Result<()> {
        let fence = self.slot(slot)?.in_flight.raw();
        let Some(previous) = self.images_in_flight.get_mut(image as usize) else {
            return Err(RenderError::frame("claim_image")(vk::Result::ERROR_UNKNOWN));
        };
        if *previous != vk::Fence::null() && *previous != fence {
            // SAFETY: `previous` is a slot fence of this device.
            unsafe { self.device.raw().wait_for_fences(&[*previous], true, u64::MAX) }
                .map_err(RenderError::frame("wait_for_fences(image)"))?;
        }
        *previous = fence;
        Ok(())
    }

    fn upload_uniforms(&mut self, image: u32, uniforms: &FrameUniforms) -> Result<()> {
        let (_, commands) = self.generation()?;
        commands.upload(image as usize, uniforms)
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
        let (_, commands) = self.generation()?;
        let cmd = commands
            .buffer(image as usize)
            .ok_or(RenderError::frame("queue_submit")(vk::Result::ERROR_UNKNOWN))?;
        let sync = self.slot(slot)?;
        let d = self.device.raw();

        let wait = [sync.image_available.raw()];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let buffers = [cmd];
        let signal = [sync.render_finished.raw()];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&buffers)
            .signal_semaphores(&signal);
        // SAFETY: the acquire succeeded, so the fence is only reset when a
        // submission that signals it follows.
        unsafe {
            d.reset_fences(&[sync.in_flight.raw()])
                .map_err(RenderError::frame("reset_fences"))?;
            d.queue_submit(
                self.device.graphics_queue(),
                std::slice::from_ref(&submit),
                sync.in_flight.raw(),
            )
            .map_err(RenderError::frame("queue_submit"))
        }
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Present> {
        let (swapchain, _) = self.generation()?;
        let wait = [self.slot(slot)?.render_finished.raw()];
        let swapchains = [swapchain.raw()];
        let indices = [image];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        // SAFETY: the image was acquired from this chain and its work submitted.
        let presented = unsafe {
            self.device
                .swapchain_loader()
                .queue_present(self.device.present_queue(), &info)
        };
        match presented {
            Ok(false) => Ok(Present::Done),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::Stale),
            Err(e) => Err(RenderError::frame("queue_present")(e)),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device
            .wait_idle()
            .map_err(RenderError::frame("device_wait_idle"))
    }

    fn destroy_resource(&mut self, resource: GenerationResource) {
        match resource {
            GenerationResource::CommandBuffers => {
                self.commands = None;
                self.images_in_flight.clear();
            }
            GenerationResource::Framebuffers => self.framebuffers = None,
            GenerationResource::Pipeline => self.pipeline = None,
            GenerationResource::ImageViews => {
                if let Some(swapchain) = &mut self.swapchain {
                    swapchain.destroy_views();
                }
            }
            GenerationResource::Swapchain => {
                if let Some(swapchain) = self.swapchain.take() {
                    swapchain.destroy();
                }
            }
        }
    }

    fn build_generation(&mut self, window: RenderSize) -> Result<()> {
        let support = self
            .surface
            .query_support(self.selected.physical)
            .map_err(RenderError::swapchain("query_support"))?;
        let plan = SwapchainPlan::choose(&support, window, &self.selected.indices, self.present)?;

        // The previous chain, if any, is already gone.
        let swapchain = SwapchainState::create(&self.device, &self.surface, plan, None)?;
        let extent = swapchain.extent();
        let d = self.device.raw();
        let pipeline = PipelineContext::new(d, swapchain.format(), extent, &self.shaders)?;
        let framebuffers = FramebufferSet::new(d, pipeline.render_pass(), swapchain.image_views(), extent)?;
        let commands = CommandBufferSet::new(&self.device, &self.command_pool, &pipeline, &framebuffers)?;
        commands.record(&pipeline, &framebuffers, extent, self.clear_color)?;

        self.images_in_flight = vec![vk::Fence::null(); swapchain.image_count()];
        self.swapchain = Some(swapchain);
        self.pipeline = Some(pipeline);
        self.framebuffers = Some(framebuffers);
        self.commands = Some(commands);
        Ok(())
    }

    fn set_clear_color(&mut self, clear: [f32; 4]) -> Result<()> {
        self.clear_color = clear;
        if let (Some(swapchain), Some(pipeline), Some(framebuffers), Some(commands)) =
            (&self.swapchain, &self.pipeline, &self.framebuffers, &self.commands)
        {
            commands.record(pipeline, framebuffers, swapchain.extent(), clear)?;
        }
        Ok(())
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("device_wait_idle failed during teardown: {e}");
        }
        for resource in GenerationResource::TEARDOWN_ORDER {
            self.destroy_resource(resource);
        }
    }
}
