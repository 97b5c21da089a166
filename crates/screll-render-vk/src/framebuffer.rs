// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{RenderError, Result};
use crate::scoped::{DeviceScoped, Scoped, SharedDevice};

/// One framebuffer per swapchain image view, in image order.
pub struct FramebufferSet {
    framebuffers: Vec<DeviceScoped<vk::Framebuffer>>,
}

impl FramebufferSet {
    pub fn new(
        device: &SharedDevice,
        render_pass: vk::RenderPass,
        views: impl IntoIterator<Item = vk::ImageView>,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let framebuffers = views
            .into_iter()
            .map(|view| {
                let attachments = [view];
                let info = vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);
                // SAFETY: pass and view belong to the same swapchain generation.
                unsafe {
                    let raw = device
                        .create_framebuffer(&info, None)
                        .map_err(RenderError::pipeline("create_framebuffer"))?;
                    Ok(Scoped::new(raw, device.clone(), |d, fb| d.destroy_framebuffer(fb, None)))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { framebuffers })
    }

    pub fn get(&self, image_index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index).map(|fb| fb.raw())
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }
}
