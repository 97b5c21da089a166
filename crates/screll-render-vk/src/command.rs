// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use screll_render::FrameUniforms;
use std::mem::size_of;

use crate::error::{RenderError, Result};
use crate::framebuffer::FramebufferSet;
use crate::logical_device::LogicalDeviceContext;
use crate::pipeline::PipelineContext;
use crate::scoped::{DeviceScoped, Scoped, SharedDevice};

/// Index of the first memory type allowed by `type_bits` that has all `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (props.memory_type_count as usize).min(props.memory_types.len());
    props.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(flags))
        .map(|(i, _)| i as u32)
}

/// Device-lifetime pool on the graphics family; buffers come and go with generations.
pub struct CommandPool {
    pool: DeviceScoped<vk::CommandPool>,
}

impl CommandPool {
    pub fn new(device: &LogicalDeviceContext) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.graphics_family())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let d = device.raw();
        // SAFETY: pool lives until the device context drops.
        let pool = unsafe {
            let raw = d
                .create_command_pool(&info, None)
                .map_err(RenderError::init("create_command_pool"))?;
            Scoped::new(raw, d.clone(), |d, p| d.destroy_command_pool(p, None))
        };
        Ok(Self { pool })
    }

    pub fn raw(&self) -> vk::CommandPool {
        self.pool.raw()
    }
}

struct UniformBuffer {
    buffer: DeviceScoped<vk::Buffer>,
    memory: DeviceScoped<vk::DeviceMemory>,
}

impl UniformBuffer {
    const SIZE: vk::DeviceSize = size_of::<FrameUniforms>() as vk::DeviceSize;

    fn new(device: &LogicalDeviceContext) -> Result<Self> {
        let d = device.raw();
        let info = vk::BufferCreateInfo::default()
            .size(Self::SIZE)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        // SAFETY: both objects are released before the device.
        unsafe {
            let buffer = d
                .create_buffer(&info, None)
                .map_err(RenderError::alloc("uniform buffer"))?;
            let buffer = Scoped::new(buffer, d.clone(), |d, b| d.destroy_buffer(b, None));

            let reqs = d.get_buffer_memory_requirements(buffer.raw());
            let flags = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
            let memory_type = find_memory_type(device.memory_properties(), reqs.memory_type_bits, flags)
                .ok_or(RenderError::NoMemoryType {
                    type_bits: reqs.memory_type_bits,
                    flags,
                })?;
            let alloc = vk::MemoryAllocateInfo::default()
                .allocation_size(reqs.size)
                .memory_type_index(memory_type);
            let memory = d
                .allocate_memory(&alloc, None)
                .map_err(RenderError::alloc("uniform memory"))?;
            let memory = Scoped::new(memory, d.clone(), |d, m| d.free_memory(m, None));

            d.bind_buffer_memory(buffer.raw(), memory.raw(), 0)
                .map_err(RenderError::alloc("bind uniform memory"))?;
            Ok(Self { buffer, memory })
        }
    }

    fn write(&self, device: &ash::Device, uniforms: &FrameUniforms) -> Result<()> {
        let bytes = bytemuck::bytes_of(uniforms);
        // SAFETY: host-coherent memory, not in use by the GPU for this image.
        unsafe {
            let ptr = device
                .map_memory(self.memory.raw(), 0, Self::SIZE, vk::MemoryMapFlags::empty())
                .map_err(RenderError::frame("map_memory"))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            device.unmap_memory(self.memory.raw());
        }
        Ok(())
    }
}

/// Per-generation command state: one pre-recorded buffer, uniform buffer and
/// descriptor set per swapchain image.
pub struct CommandBufferSet {
    device: SharedDevice,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    // Sets are freed with their pool; the pool goes before the buffers it points at.
    descriptor_pool: DeviceScoped<vk::DescriptorPool>,
    uniforms: Vec<UniformBuffer>,
}

impl CommandBufferSet {
    pub fn new(
        device: &LogicalDeviceContext,
        pool: &CommandPool,
        pipeline: &PipelineContext,
        framebuffers: &FramebufferSet,
    ) -> Result<Self> {
        let d = device.raw();
        let count = framebuffers.len() as u32;

        let uniforms = (0..count)
            .map(|_| UniformBuffer::new(device))
            .collect::<Result<Vec<_>>>()?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(count)
            .pool_sizes(&pool_sizes);
        // SAFETY: pool and sets are released before the set layout.
        let descriptor_pool = unsafe {
            let raw = d
                .create_descriptor_pool(&pool_info, None)
                .map_err(RenderError::alloc("descriptor pool"))?;
            Scoped::new(raw, d.clone(), |d, p| d.destroy_descriptor_pool(p, None))
        };

        let layouts = vec![pipeline.set_layout(); count as usize];
        let set_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool.raw())
            .set_layouts(&layouts);
        // SAFETY: sized to the pool above.
        let descriptor_sets = unsafe { d.allocate_descriptor_sets(&set_info) }
            .map_err(RenderError::alloc("descriptor sets"))?;

        for (set, ubo) in descriptor_sets.iter().zip(&uniforms) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: ubo.buffer.raw(),
                offset: 0,
                range: UniformBuffer::SIZE,
            }];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(*set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info);
            // SAFETY: set and buffer are both alive and unused by the GPU.
            unsafe { d.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
        }

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.raw())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        // SAFETY: freed in Drop through the same pool.
        let buffers = unsafe { d.allocate_command_buffers(&alloc_info) }
            .map_err(RenderError::alloc("command buffers"))?;

        Ok(Self {
            device: d.clone(),
            pool: pool.raw(),
            buffers,
            descriptor_sets,
            descriptor_pool,
            uniforms,
        })
    }

    /// Records every buffer: clear, bind pipeline and the image's set, draw three vertices.
    /// The buffers must not be pending on the GPU.
    pub fn record(
        &self,
        pipeline: &PipelineContext,
        framebuffers: &FramebufferSet,
        extent: vk::Extent2D,
        clear: [f32; 4],
    ) -> Result<()> {
        let d = &self.device;
        let clears = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear },
        }];
        for (i, (&cmd, &set)) in self.buffers.iter().zip(&self.descriptor_sets).enumerate() {
            let Some(framebuffer) = framebuffers.get(i) else {
                break;
            };
            let begin = vk::CommandBufferBeginInfo::default();
            let pass = vk::RenderPassBeginInfo::default()
                .render_pass(pipeline.render_pass())
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clears);
            // SAFETY: the pool allows per-buffer reset and the caller guarantees idleness.
            unsafe {
                d.begin_command_buffer(cmd, &begin)
                    .map_err(RenderError::pipeline("begin_command_buffer"))?;
                d.cmd_begin_render_pass(cmd, &pass, vk::SubpassContents::INLINE);
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline());
                d.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline.layout(),
                    0,
                    &[set],
                    &[],
                );
                d.cmd_draw(cmd, 3, 1, 0, 0);
                d.cmd_end_render_pass(cmd);
                d.end_command_buffer(cmd)
                    .map_err(RenderError::pipeline("end_command_buffer"))?;
            }
        }
        Ok(())
    }

    pub fn buffer(&self, image_index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index).copied()
    }

    pub fn upload(&self, image_index: usize, uniforms: &FrameUniforms) -> Result<()> {
        match self.uniforms.get(image_index) {
            Some(ubo) => ubo.write(&self.device, uniforms),
            None => Err(RenderError::FrameSubmission {
                stage: "upload_uniforms",
                source: vk::Result::ERROR_UNKNOWN,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Drop for CommandBufferSet {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            // SAFETY: the owner waits for idle before dropping a generation.
            unsafe { self.device.free_command_buffers(self.pool, &self.buffers) };
        }
    }
}

/// Synchronisation for one frame slot. Lives as long as the device.
pub struct FrameSync {
    pub image_available: DeviceScoped<vk::Semaphore>,
    pub render_finished: DeviceScoped<vk::Semaphore>,
    pub in_flight: DeviceScoped<vk::Fence>,
}

impl FrameSync {
    pub fn new(device: &SharedDevice) -> Result<Self> {
        let sem_info = vk::SemaphoreCreateInfo::default();
        // Signaled so the first wait on each slot returns at once.
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        // SAFETY: released before the device.
        unsafe {
            let semaphore = |stage| -> Result<DeviceScoped<vk::Semaphore>> {
                let raw = device
                    .create_semaphore(&sem_info, None)
                    .map_err(RenderError::init(stage))?;
                Ok(Scoped::new(raw, device.clone(), |d, s| d.destroy_semaphore(s, None)))
            };
            let image_available = semaphore("create_semaphore(image_available)")?;
            let render_finished = semaphore("create_semaphore(render_finished)")?;
            let fence = device
                .create_fence(&fence_info, None)
                .map_err(RenderError::init("create_fence"))?;
            let in_flight = Scoped::new(fence, device.clone(), |d, f| d.destroy_fence(f, None));
            Ok(Self {
                image_available,
                render_finished,
                in_flight,
            })
        }
    }
}
