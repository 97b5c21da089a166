// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use std::rc::Rc;
use tracing::info;

use crate::device::{SelectedDevice, REQUIRED_DEVICE_EXTENSIONS};
use crate::error::{RenderError, Result};
use crate::instance::InstanceContext;
use crate::scoped::SharedDevice;

/// Owns the `VkDevice` and the queues resolved from it.
pub struct LogicalDeviceContext {
    device: SharedDevice,
    swapchain_loader: swapchain::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    graphics_family: u32,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl LogicalDeviceContext {
    pub fn new(instance: &InstanceContext, selected: &SelectedDevice) -> Result<Self> {
        let (Some(graphics_family), Some(present_family)) = (selected.indices.graphics, selected.indices.present)
        else {
            return Err(RenderError::DeviceCreation(vk::Result::ERROR_INITIALIZATION_FAILED));
        };

        let priorities = [1.0_f32];
        let queue_infos: Vec<_> = selected
            .indices
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extensions: Vec<_> = REQUIRED_DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();
        let info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let raw = instance.raw();
        // SAFETY: the physical device was enumerated from this instance and
        // every pointer in `info` outlives the call.
        let device = unsafe { raw.create_device(selected.physical, &info, None) }
            .map_err(RenderError::DeviceCreation)?;

        // SAFETY: both families were part of the create info, with one queue each.
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(graphics_family, 0),
                device.get_device_queue(present_family, 0),
            )
        };
        let swapchain_loader = swapchain::Device::new(raw, &device);
        // SAFETY: plain query.
        let memory_properties = unsafe { raw.get_physical_device_memory_properties(selected.physical) };

        info!(
            "logical device ready on {:?} ({} queue families)",
            selected.name,
            queue_infos.len()
        );
        Ok(Self {
            device: Rc::new(device),
            swapchain_loader,
            graphics_queue,
            present_queue,
            graphics_family,
            memory_properties,
        })
    }

    pub fn raw(&self) -> &SharedDevice {
        &self.device
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Blocks until every queue of the device has drained.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        // SAFETY: no other thread submits to this device.
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for LogicalDeviceContext {
    fn drop(&mut self) {
        // SAFETY: every child object was released by the owning contexts first.
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}
