// SPDX-License-Identifier: CEPL-1.0
use ash::util::read_spv;
use ash::vk;
use screll_render::ShaderSource;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RenderError, Result};
use crate::scoped::{DeviceScoped, Scoped, SharedDevice};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decoded SPIR-V for the two stages, loaded once and reused by every rebuild.
#[derive(Clone, Debug)]
pub struct ShaderBinaries {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderBinaries {
    pub fn load(source: &dyn ShaderSource, vertex: &Path, fragment: &Path) -> Result<Self> {
        Ok(Self {
            vertex: load_stage(source, vertex)?,
            fragment: load_stage(source, fragment)?,
        })
    }
}

fn load_stage(source: &dyn ShaderSource, path: &Path) -> Result<Vec<u32>> {
    let shader_err = |source| RenderError::ShaderLoad {
        path: PathBuf::from(path),
        source,
    };
    let bytes = source.read(path).map_err(shader_err)?;
    let words = decode_spirv(&bytes).map_err(shader_err)?;
    debug!("loaded {} ({} words)", path.display(), words.len());
    Ok(words)
}

/// Aligns the blob to `u32` words and checks the SPIR-V magic number.
pub fn decode_spirv(bytes: &[u8]) -> io::Result<Vec<u32>> {
    let words = read_spv(&mut Cursor::new(bytes))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a SPIR-V module"));
    }
    Ok(words)
}

/// Render pass, layouts and the graphics pipeline for one swapchain generation.
pub struct PipelineContext {
    // Release order: pipeline, its layout, the set layout, then the pass.
    pipeline: DeviceScoped<vk::Pipeline>,
    pipeline_layout: DeviceScoped<vk::PipelineLayout>,
    set_layout: DeviceScoped<vk::DescriptorSetLayout>,
    render_pass: DeviceScoped<vk::RenderPass>,
}

impl PipelineContext {
    pub fn new(
        device: &SharedDevice,
        color_format: vk::Format,
        extent: vk::Extent2D,
        shaders: &ShaderBinaries,
    ) -> Result<Self> {
        let render_pass = create_render_pass(device, color_format)?;
        let set_layout = create_uniform_set_layout(device)?;

        let set_layouts = [set_layout.raw()];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        // SAFETY: the set layout is alive for the whole call.
        let pipeline_layout = unsafe {
            let raw = device
                .create_pipeline_layout(&layout_info, None)
                .map_err(RenderError::pipeline("create_pipeline_layout"))?;
            Scoped::new(raw, device.clone(), |d, l| d.destroy_pipeline_layout(l, None))
        };

        // Modules only need to live until the pipeline exists.
        let vs = create_shader_module(device, &shaders.vertex)?;
        let fs = create_shader_module(device, &shaders.fragment)?;
        let pipeline = create_graphics_pipeline(
            device,
            render_pass.raw(),
            pipeline_layout.raw(),
            extent,
            vs.raw(),
            fs.raw(),
        )?;
        vs.reset();
        fs.reset();

        debug!("pipeline built for {:?} at {}x{}", color_format, extent.width, extent.height);
        Ok(Self {
            pipeline,
            pipeline_layout,
            set_layout,
            render_pass,
        })
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.raw()
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout.raw()
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout.raw()
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.raw()
    }
}

fn create_render_pass(device: &SharedDevice, format: vk::Format) -> Result<DeviceScoped<vk::RenderPass>> {
    // Must match the swapchain image format or the framebuffers are incompatible.
    let attachments = [vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];
    // The acquired image may still be read by the presentation engine.
    let dependencies = [vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }];
    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    // SAFETY: all arrays live until the call returns.
    unsafe {
        let raw = device
            .create_render_pass(&info, None)
            .map_err(RenderError::pipeline("create_render_pass"))?;
        Ok(Scoped::new(raw, device.clone(), |d, rp| d.destroy_render_pass(rp, None)))
    }
}

fn create_uniform_set_layout(device: &SharedDevice) -> Result<DeviceScoped<vk::DescriptorSetLayout>> {
    let bindings = [vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX)];
    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    // SAFETY: as above.
    unsafe {
        let raw = device
            .create_descriptor_set_layout(&info, None)
            .map_err(RenderError::pipeline("create_descriptor_set_layout"))?;
        Ok(Scoped::new(raw, device.clone(), |d, l| {
            d.destroy_descriptor_set_layout(l, None)
        }))
    }
}

fn create_shader_module(device: &SharedDevice, code: &[u32]) -> Result<DeviceScoped<vk::ShaderModule>> {
    let info = vk::ShaderModuleCreateInfo::default().code(code);
    // SAFETY: `code` is validated SPIR-V words.
    unsafe {
        let raw = device
            .create_shader_module(&info, None)
            .map_err(RenderError::pipeline("create_shader_module"))?;
        Ok(Scoped::new(raw, device.clone(), |d, m| d.destroy_shader_module(m, None)))
    }
}

fn create_graphics_pipeline(
    device: &SharedDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
) -> Result<DeviceScoped<vk::Pipeline>> {
    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vs)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fs)
            .name(c"main"),
    ];

    // Geometry comes from gl_VertexIndex; no vertex buffers.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
    let input_assembly =
        vk::PipelineInputAssemblyStateCreateInfo::default().topology(vk::PrimitiveTopology::TRIANGLE_LIST);

    // Fixed viewport: any extent change rebuilds the pipeline.
    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(&viewports)
        .scissors(&scissors);

    let raster = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample =
        vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&raster)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    // SAFETY: every referenced state struct lives until the call returns.
    unsafe {
        let pipelines = device
            .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
            .map_err(|(_, err)| RenderError::PipelineCreation {
                stage: "create_graphics_pipelines",
                source: err,
            })?;
        Ok(Scoped::new(pipelines[0], device.clone(), |d, p| d.destroy_pipeline(p, None)))
    }
}
