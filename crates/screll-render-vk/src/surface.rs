// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::debug;

use crate::error::{RenderError, Result};
use crate::instance::InstanceContext;
use crate::scoped::Scoped;
use crate::swapchain::SwapchainSupportDetails;

/// The presentation surface of one window, created from one instance.
pub struct SurfaceBinding {
    surface: Scoped<vk::SurfaceKHR, surface::Instance>,
}

impl SurfaceBinding {
    pub fn new(
        instance: &InstanceContext,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let loader = surface::Instance::new(instance.entry(), instance.raw());
        // SAFETY: the handles come from a live window; the surface is released
        // through the loader of the same instance, before that instance.
        let surface = unsafe {
            let raw = ash_window::create_surface(instance.entry(), instance.raw(), dh, wh, None)
                .map_err(RenderError::init("create_surface"))?;
            Scoped::new(raw, loader, |l, s| l.destroy_surface(s, None))
        };
        debug!("window surface created");
        Ok(Self { surface })
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.surface.raw()
    }

    pub fn loader(&self) -> &surface::Instance {
        self.surface.parent()
    }

    pub fn supports_present(&self, phys: vk::PhysicalDevice, family: u32) -> Result<bool, vk::Result> {
        // SAFETY: `phys` was enumerated from the instance that owns this surface.
        unsafe {
            self.loader()
                .get_physical_device_surface_support(phys, family, self.raw())
        }
    }

    /// Always a fresh query: capabilities change with the window.
    pub fn query_support(&self, phys: vk::PhysicalDevice) -> Result<SwapchainSupportDetails, vk::Result> {
        let loader = self.loader();
        let surface = self.raw();
        // SAFETY: as above.
        unsafe {
            Ok(SwapchainSupportDetails {
                capabilities: loader.get_physical_device_surface_capabilities(phys, surface)?,
                formats: loader.get_physical_device_surface_formats(phys, surface)?,
                present_modes: loader.get_physical_device_surface_present_modes(phys, surface)?,
            })
        }
    }
}
