// SPDX-License-Identifier: CEPL-1.0
use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_void, CStr, CString};
use tracing::{debug, error, info, trace, warn};

use crate::error::{RenderError, Result};
use crate::scoped::Scoped;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Severity of a validation-layer message, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl DiagnosticSeverity {
    pub fn from_flags(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Self::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Self::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Self::Info
        } else {
            Self::Verbose
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the layer hands us a valid callback struct for the duration of the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    match DiagnosticSeverity::from_flags(severity) {
        DiagnosticSeverity::Error => error!(target: "vulkan", ?kind, "{msg}"),
        DiagnosticSeverity::Warning => warn!(target: "vulkan", ?kind, "{msg}"),
        DiagnosticSeverity::Info => debug!(target: "vulkan", ?kind, "{msg}"),
        DiagnosticSeverity::Verbose => trace!(target: "vulkan", ?kind, "{msg}"),
    }
    vk::FALSE
}

/// Owns the loader entry, the `VkInstance` and the optional debug messenger.
pub struct InstanceContext {
    // Released before the instance in Drop.
    messenger: Option<Scoped<vk::DebugUtilsMessengerEXT, debug_utils::Instance>>,
    instance: Instance,
    entry: Entry,
}

impl InstanceContext {
    pub fn new(display: RawDisplayHandle, app_name: &str, validation: bool) -> Result<Self> {
        // SAFETY: the loader library stays loaded for as long as `entry` lives.
        let entry = unsafe { Entry::load()? };

        let validation = validation && layer_available(&entry, VALIDATION_LAYER)?;

        let app_name = CString::new(app_name).unwrap_or_else(|_| c"screll".to_owned());
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Screll")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .map_err(RenderError::init("enumerate_required_extensions"))?
            .to_vec();
        if validation {
            extensions.push(debug_utils::NAME.as_ptr());
        }
        let layers = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        // SAFETY: every pointer in create_info outlives the call.
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(RenderError::init("create_instance"))?;

        let messenger = if validation {
            match create_messenger(&entry, &instance) {
                Ok(m) => Some(m),
                Err(e) => {
                    // SAFETY: nothing else was created from this instance yet.
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(
            "Vulkan instance ready ({} extensions, validation={})",
            extensions.len(),
            validation
        );
        Ok(Self {
            messenger,
            instance,
            entry,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &Instance {
        &self.instance
    }

    pub fn has_diagnostics(&self) -> bool {
        self.messenger.is_some()
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        if let Some(messenger) = self.messenger.take() {
            messenger.reset();
        }
        // SAFETY: surface and device contexts borrow this instance and are gone by now.
        unsafe { self.instance.destroy_instance(None) };
    }
}

fn layer_available(entry: &Entry, name: &CStr) -> Result<bool> {
    // SAFETY: plain enumeration call.
    let layers = unsafe { entry.enumerate_instance_layer_properties() }
        .map_err(RenderError::init("enumerate_instance_layer_properties"))?;
    let found = layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name));
    if !found {
        warn!("{name:?} requested but not installed; continuing without validation");
    }
    Ok(found)
}

fn create_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<Scoped<vk::DebugUtilsMessengerEXT, debug_utils::Instance>> {
    let loader = debug_utils::Instance::new(entry, instance);
    let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    // SAFETY: the messenger is released through the same loader before the instance.
    unsafe {
        let raw = loader
            .create_debug_utils_messenger(&info, None)
            .map_err(RenderError::init("create_debug_utils_messenger"))?;
        Ok(Scoped::new(raw, loader, |l, m| {
            l.destroy_debug_utils_messenger(m, None)
        }))
    }
}
