// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use screll_render::{PresentPreference, RenderSize};
use tracing::info;

use crate::device::QueueFamilyIndices;
use crate::error::{RenderError, Result};
use crate::logical_device::LogicalDeviceContext;
use crate::scoped::{DeviceScoped, Scoped, SharedDevice};
use crate::surface::SurfaceBinding;

/// `currentExtent.width` value meaning "the window decides".
pub const EXTENT_FROM_WINDOW: u32 = u32::MAX;

#[derive(Clone, Debug, Default)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    match formats {
        [] => None,
        // A lone UNDEFINED entry means the surface takes any format.
        [only] if only.format == vk::Format::UNDEFINED => Some(preferred),
        _ => Some(
            formats
                .iter()
                .copied()
                .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
                .unwrap_or(formats[0]),
        ),
    }
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preference: PresentPreference) -> vk::PresentModeKHR {
    match preference {
        PresentPreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        // FIFO support is mandatory for every surface.
        _ => vk::PresentModeKHR::FIFO,
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != EXTENT_FROM_WINDOW {
        return caps.current_extent;
    }
    // max-then-min instead of clamp(): no panic on inverted bounds.
    vk::Extent2D {
        width: window
            .width
            .max(caps.min_image_extent.width)
            .min(caps.max_image_extent.width),
        height: window
            .height
            .max(caps.min_image_extent.height)
            .min(caps.max_image_extent.height),
    }
}

pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count.saturating_add(1);
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSharing {
    Exclusive,
    Concurrent([u32; 2]),
}

impl ImageSharing {
    pub fn for_families(indices: &QueueFamilyIndices) -> Self {
        match (indices.graphics, indices.present) {
            (Some(g), Some(p)) if g != p => ImageSharing::Concurrent([g, p]),
            _ => ImageSharing::Exclusive,
        }
    }
}

/// Every choice that goes into one swapchain, decided before any Vulkan call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing: ImageSharing,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn choose(
        support: &SwapchainSupportDetails,
        window: RenderSize,
        indices: &QueueFamilyIndices,
        preference: PresentPreference,
    ) -> Result<Self> {
        let surface_format = choose_surface_format(&support.formats)
            .ok_or(RenderError::SwapchainUnsupported("no surface formats"))?;
        if support.present_modes.is_empty() {
            return Err(RenderError::SwapchainUnsupported("no present modes"));
        }
        let caps = &support.capabilities;
        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes, preference),
            extent: choose_extent(caps, window),
            image_count: choose_image_count(caps),
            sharing: ImageSharing::for_families(indices),
            pre_transform: caps.current_transform,
        })
    }

    pub fn size(&self) -> RenderSize {
        RenderSize::new(self.extent.width, self.extent.height)
    }
}

/// One swapchain generation: the chain itself plus a view per image.
pub struct SwapchainState {
    // Views go before the chain that owns their images.
    image_views: Vec<DeviceScoped<vk::ImageView>>,
    images: Vec<vk::Image>,
    swapchain: Scoped<vk::SwapchainKHR, swapchain::Device>,
    plan: SwapchainPlan,
}

impl SwapchainState {
    pub fn create(
        device: &LogicalDeviceContext,
        surface: &SurfaceBinding,
        plan: SwapchainPlan,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let mut info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.raw())
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or_default());
        info = match &plan.sharing {
            ImageSharing::Exclusive => info.image_sharing_mode(vk::SharingMode::EXCLUSIVE),
            ImageSharing::Concurrent(families) => info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(families),
        };

        let loader = device.swapchain_loader();
        // SAFETY: surface and device are alive and outlive this state.
        let swapchain = unsafe {
            let raw = loader
                .create_swapchain(&info, None)
                .map_err(RenderError::swapchain("create_swapchain"))?;
            Scoped::new(raw, loader.clone(), |l, s| l.destroy_swapchain(s, None))
        };
        // SAFETY: freshly created chain.
        let images = unsafe { loader.get_swapchain_images(swapchain.raw()) }
            .map_err(RenderError::swapchain("get_swapchain_images"))?;

        let image_views = images
            .iter()
            .map(|&image| create_image_view(device.raw(), image, plan.surface_format.format))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "swapchain ready ({}x{}, {:?}, {:?}, {} images)",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.present_mode,
            images.len()
        );
        Ok(Self {
            image_views,
            images,
            swapchain,
            plan,
        })
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.swapchain.raw()
    }

    pub fn plan(&self) -> &SwapchainPlan {
        &self.plan
    }

    pub fn format(&self) -> vk::Format {
        self.plan.surface_format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_views(&self) -> impl ExactSizeIterator<Item = vk::ImageView> + '_ {
        self.image_views.iter().map(|v| v.raw())
    }

    pub(crate) fn destroy_views(&mut self) {
        self.image_views.clear();
    }

    /// Views first, then the chain.
    pub(crate) fn destroy(self) {
        let Self {
            image_views,
            swapchain,
            ..
        } = self;
        drop(image_views);
        swapchain.reset();
    }
}

fn create_image_view(
    device: &SharedDevice,
    image: vk::Image,
    format: vk::Format,
) -> Result<DeviceScoped<vk::ImageView>> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    // SAFETY: `image` belongs to a live swapchain of this device.
    unsafe {
        let raw = device
            .create_image_view(&info, None)
            .map_err(RenderError::swapchain("create_image_view"))?;
        Ok(Scoped::new(raw, device.clone(), |d, v| d.destroy_image_view(v, None)))
    }
}
