// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::ffi::{CStr, CString};
use tracing::{debug, info};

use crate::error::{RenderError, Result};
use crate::instance::InstanceContext;
use crate::surface::SurfaceBinding;
use crate::swapchain::SwapchainSupportDetails;

/// Device extensions every candidate must expose.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// First graphics-capable family and first present-capable family,
    /// scanning in order and stopping as soon as both are known.
    pub fn resolve<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> Result<Self, vk::Result>
    where
        F: FnMut(u32) -> Result<bool, vk::Result>,
    {
        let mut indices = Self::default();
        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if indices.graphics.is_none()
                && family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics = Some(i);
            }
            if indices.present.is_none() && family.queue_count > 0 && supports_present(i)? {
                indices.present = Some(i);
            }
            if indices.is_complete() {
                break;
            }
        }
        Ok(indices)
    }

    /// Distinct family indices, ascending: one queue gets created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let mut v: Vec<u32> = self.graphics.into_iter().chain(self.present).collect();
        v.sort_unstable();
        v.dedup();
        v
    }
}

/// Everything the scorer needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceReport {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub queue_families: QueueFamilyIndices,
    pub extensions: Vec<CString>,
    pub swapchain_support: SwapchainSupportDetails,
    /// Set when one of the device queries failed.
    pub query_error: Option<vk::Result>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    QueryFailed(vk::Result),
    IncompleteQueueFamilies,
    MissingExtension(&'static CStr),
    InadequateSwapchain,
}

impl DeviceReport {
    pub fn rejection(&self) -> Option<Rejection> {
        if let Some(e) = self.query_error {
            return Some(Rejection::QueryFailed(e));
        }
        if !self.queue_families.is_complete() {
            return Some(Rejection::IncompleteQueueFamilies);
        }
        if let Some(missing) = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .find(|&&req| !self.extensions.iter().any(|e| e.as_c_str() == req))
        {
            return Some(Rejection::MissingExtension(*missing));
        }
        if !self.swapchain_support.is_adequate() {
            return Some(Rejection::InadequateSwapchain);
        }
        None
    }

    /// 0 means unusable.
    pub fn score(&self) -> u32 {
        if self.rejection().is_some() {
            return 0;
        }
        let type_weight = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 250,
            vk::PhysicalDeviceType::CPU => 100,
            _ => 10,
        };
        type_weight + self.max_image_dimension_2d / 1024
    }
}

/// Index of the highest-scoring report; earlier entries win ties.
pub fn pick_best(reports: &[DeviceReport]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, report) in reports.iter().enumerate() {
        let score = report.score();
        if score == 0 {
            continue;
        }
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// The chosen physical device and its queue families.
#[derive(Clone, Debug)]
pub struct SelectedDevice {
    pub physical: vk::PhysicalDevice,
    pub indices: QueueFamilyIndices,
    pub name: String,
}

pub struct DeviceSelector;

impl DeviceSelector {
    pub fn select(instance: &InstanceContext, surface: &SurfaceBinding) -> Result<SelectedDevice> {
        let raw = instance.raw();
        // SAFETY: plain enumeration on a live instance.
        let devices = unsafe { raw.enumerate_physical_devices() }
            .map_err(RenderError::init("enumerate_physical_devices"))?;

        let reports: Vec<_> = devices
            .iter()
            .map(|&phys| Self::report(instance, surface, phys))
            .collect();

        for report in &reports {
            match report.rejection() {
                Some(why) => debug!("skipping {:?}: {:?}", report.name, why),
                None => debug!("candidate {:?} scores {}", report.name, report.score()),
            }
        }

        let best = pick_best(&reports).ok_or(RenderError::NoSuitableDevice {
            candidates: devices.len(),
        })?;
        let report = &reports[best];
        info!(
            "selected {:?} ({:?}, graphics family {:?}, present family {:?})",
            report.name, report.device_type, report.queue_families.graphics, report.queue_families.present
        );
        Ok(SelectedDevice {
            physical: devices[best],
            indices: report.queue_families,
            name: report.name.clone(),
        })
    }

    /// Never fails: a device whose queries error out is reported as rejected.
    fn report(instance: &InstanceContext, surface: &SurfaceBinding, phys: vk::PhysicalDevice) -> DeviceReport {
        let raw = instance.raw();
        // SAFETY: `phys` came from this instance.
        let props = unsafe { raw.get_physical_device_properties(phys) };
        let mut report = DeviceReport {
            name: props
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_owned()),
            device_type: props.device_type,
            max_image_dimension_2d: props.limits.max_image_dimension2_d,
            queue_families: QueueFamilyIndices::default(),
            extensions: Vec::new(),
            swapchain_support: SwapchainSupportDetails::default(),
            query_error: None,
        };
        if let Err(e) = Self::fill(instance, surface, phys, &mut report) {
            debug!("querying {:?} failed: {e}", report.name);
            report.query_error = Some(e);
        }
        report
    }

    fn fill(
        instance: &InstanceContext,
        surface: &SurfaceBinding,
        phys: vk::PhysicalDevice,
        report: &mut DeviceReport,
    ) -> Result<(), vk::Result> {
        let raw = instance.raw();
        // SAFETY: `phys` came from this instance.
        let (families, extensions) = unsafe {
            (
                raw.get_physical_device_queue_family_properties(phys),
                raw.enumerate_device_extension_properties(phys)?,
            )
        };
        report.extensions = extensions
            .iter()
            .filter_map(|e| e.extension_name_as_c_str().ok().map(CStr::to_owned))
            .collect();
        report.queue_families = QueueFamilyIndices::resolve(&families, |i| surface.supports_present(phys, i))?;

        // Surface queries are only valid on a device that can present to it
        // and exposes the swapchain extension.
        let has_swapchain = report
            .extensions
            .iter()
            .any(|e| e.as_c_str() == ash::khr::swapchain::NAME);
        if report.queue_families.is_complete() && has_swapchain {
            report.swapchain_support = surface.query_support(phys)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn adequate_support() -> SwapchainSupportDetails {
        SwapchainSupportDetails {
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            ..Default::default()
        }
    }

    fn report(name: &str, device_type: vk::PhysicalDeviceType, max_dim: u32) -> DeviceReport {
        DeviceReport {
            name: name.to_owned(),
            device_type,
            max_image_dimension_2d: max_dim,
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            extensions: vec![ash::khr::swapchain::NAME.to_owned()],
            swapchain_support: adequate_support(),
            query_error: None,
        }
    }

    #[test]
    fn resolve_picks_first_matching_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 16),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let indices = QueueFamilyIndices::resolve(&families, |i| Ok(i >= 1)).unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.unique(), vec![1]);
    }

    #[test]
    fn resolve_allows_split_families() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1), family(vk::QueueFlags::COMPUTE, 1)];
        let indices = QueueFamilyIndices::resolve(&families, |i| Ok(i == 1)).unwrap();
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn resolve_ignores_empty_families_and_stops_early() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 2),
            family(vk::QueueFlags::GRAPHICS, 2),
        ];
        let mut asked = Vec::new();
        let indices = QueueFamilyIndices::resolve(&families, |i| {
            asked.push(i);
            Ok(true)
        })
        .unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
        assert_eq!(asked, vec![1]);
    }

    #[test]
    fn resolve_reports_incomplete() {
        let families = [family(vk::QueueFlags::COMPUTE, 4)];
        let indices = QueueFamilyIndices::resolve(&families, |_| Ok(true)).unwrap();
        assert!(!indices.is_complete());
        assert!(QueueFamilyIndices::resolve(&families, |_| Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn incomplete_families_score_zero() {
        let mut r = report("gpu", vk::PhysicalDeviceType::DISCRETE_GPU, 32768);
        r.queue_families.present = None;
        assert_eq!(r.rejection(), Some(Rejection::IncompleteQueueFamilies));
        assert_eq!(r.score(), 0);
        assert_eq!(pick_best(&[r]), None);
    }

    #[test]
    fn missing_swapchain_extension_scores_zero() {
        let mut r = report("gpu", vk::PhysicalDeviceType::DISCRETE_GPU, 32768);
        r.extensions = vec![c"VK_KHR_maintenance1".to_owned()];
        assert_eq!(r.rejection(), Some(Rejection::MissingExtension(ash::khr::swapchain::NAME)));
        assert_eq!(r.score(), 0);
    }

    #[test]
    fn empty_swapchain_support_scores_zero() {
        let mut r = report("gpu", vk::PhysicalDeviceType::INTEGRATED_GPU, 16384);
        r.swapchain_support.present_modes.clear();
        assert_eq!(r.score(), 0);
    }

    #[test]
    fn discrete_beats_integrated_regardless_of_texture_size() {
        let reports = [
            report("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU, 65536),
            report("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU, 8192),
        ];
        assert_eq!(pick_best(&reports), Some(1));
    }

    #[test]
    fn texture_size_breaks_type_ties() {
        let reports = [
            report("small", vk::PhysicalDeviceType::DISCRETE_GPU, 16384),
            report("big", vk::PhysicalDeviceType::DISCRETE_GPU, 32768),
        ];
        assert_eq!(pick_best(&reports), Some(1));
    }

    #[test]
    fn equal_scores_pick_the_first_enumerated() {
        let reports = [
            report("cpu", vk::PhysicalDeviceType::CPU, 4096),
            report("a", vk::PhysicalDeviceType::DISCRETE_GPU, 16384),
            report("b", vk::PhysicalDeviceType::DISCRETE_GPU, 16384),
        ];
        assert_eq!(pick_best(&reports), Some(1));
        for _ in 0..4 {
            assert_eq!(pick_best(&reports), Some(1));
        }
    }

    #[test]
    fn failed_queries_reject_only_that_device() {
        let mut lost = report("lost", vk::PhysicalDeviceType::DISCRETE_GPU, 65536);
        lost.queue_families.present = None;
        lost.swapchain_support = SwapchainSupportDetails::default();
        lost.query_error = Some(vk::Result::ERROR_SURFACE_LOST_KHR);
        assert_eq!(
            lost.rejection(),
            Some(Rejection::QueryFailed(vk::Result::ERROR_SURFACE_LOST_KHR))
        );
        assert_eq!(lost.score(), 0);

        let healthy = report("healthy", vk::PhysicalDeviceType::INTEGRATED_GPU, 16384);
        assert_eq!(pick_best(&[lost.clone(), healthy]), Some(1));
        assert_eq!(pick_best(&[lost]), None);
    }

    #[test]
    fn unusable_devices_are_never_selected() {
        let mut broken = report("broken", vk::PhysicalDeviceType::DISCRETE_GPU, 65536);
        broken.extensions.clear();
        let fine = report("fine", vk::PhysicalDeviceType::CPU, 0);
        assert_eq!(pick_best(&[broken.clone(), fine]), Some(1));
        assert_eq!(pick_best(&[broken]), None);
        assert_eq!(pick_best(&[]), None);
    }
}
