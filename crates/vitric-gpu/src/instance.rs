//! Vulkan instance creation and device enumeration.
//!
//! The instance and physical-device list are process-wide and initialized at
//! most once; [`initialize`] is safe to call repeatedly.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::CStr;
use std::sync::OnceLock;

/// Process-wide loader state.
pub(crate) struct VulkanGlobal {
    // Entry must be kept alive for the lifetime of the instance.
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_devices: Vec<vk::PhysicalDevice>,
    pub(crate) device_descs: Vec<String>,
}

// The instance is never torn down; it lives until process exit.
static GLOBAL: OnceLock<VulkanGlobal> = OnceLock::new();

/// Initialize the Vulkan loader, instance, and physical-device list.
///
/// Redundant calls are ignored with a warning; no work happens after the
/// first success.
pub fn initialize() -> Result<()> {
    if GLOBAL.get().is_some() {
        tracing::warn!("ignored redundant vulkan module initialization");
        return Ok(());
    }
    global().map(|_| ())
}

pub(crate) fn global() -> Result<&'static VulkanGlobal> {
    if let Some(global) = GLOBAL.get() {
        return Ok(global);
    }
    let global = create_global()?;
    // A racing second initializer loses; its instance leaks until process
    // exit, which is where the winner's goes too.
    let _ = GLOBAL.set(global);
    tracing::info!("vulkan backend initialized");
    GLOBAL
        .get()
        .ok_or_else(|| GpuError::unsupported("vulkan backend is not initialized"))
}

/// Number of enumerated physical devices.
pub fn device_count() -> Result<usize> {
    Ok(global()?.physical_devices.len())
}

/// Human-readable description of the device at `index`, or `None` when the
/// index is out of range.
pub fn describe_device(index: usize) -> Result<Option<String>> {
    Ok(global()?.device_descs.get(index).cloned())
}

/// Instance extensions the HAL can take advantage of. Presentation is out of
/// scope, so only debug tooling is requested; anything unavailable is simply
/// skipped.
fn wanted_instance_extensions() -> Vec<&'static CStr> {
    vec![ash::ext::debug_utils::NAME]
}

fn create_global() -> Result<VulkanGlobal> {
    let entry = unsafe { ash::Entry::load() }
        .map_err(|e| GpuError::unsupported(format!("failed to load vulkan: {e}")))?;

    let app_name = c"TestbenchApp";
    let engine_name = c"Vitric";
    let app_info = vk::ApplicationInfo::default()
        .application_name(app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_0);

    // Enable the wanted extensions the loader actually offers.
    let ext_props = unsafe { entry.enumerate_instance_extension_properties(None)? };
    let mut ext_names: Vec<*const i8> = Vec::new();
    for ext in wanted_instance_extensions() {
        let available = ext_props
            .iter()
            .any(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) } == ext);
        if available {
            ext_names.push(ext.as_ptr());
            tracing::debug!("enabled instance extension {}", ext.to_string_lossy());
        } else {
            tracing::debug!(
                "instance extension {} not available",
                ext.to_string_lossy()
            );
        }
    }

    // Validation layer in debug builds only.
    let layer_props = unsafe { entry.enumerate_instance_layer_properties()? };
    let mut layer_names: Vec<*const i8> = Vec::new();
    for props in &layer_props {
        let name = unsafe { CStr::from_ptr(props.layer_name.as_ptr()) };
        tracing::debug!("found layer {}", name.to_string_lossy());
        if cfg!(debug_assertions) && name == c"VK_LAYER_KHRONOS_validation" {
            layer_names.push(props.layer_name.as_ptr());
            tracing::debug!("vulkan validation layer is enabled");
        }
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&ext_names)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None)? };

    let physical_devices = unsafe { instance.enumerate_physical_devices()? };
    let device_descs = physical_devices
        .iter()
        .map(|&physdev| {
            let props = unsafe { instance.get_physical_device_properties(physdev) };
            describe_physical_device(&props)
        })
        .collect();

    Ok(VulkanGlobal {
        entry,
        instance,
        physical_devices,
        device_descs,
    })
}

fn describe_physical_device(props: &vk::PhysicalDeviceProperties) -> String {
    let dev_ty = match props.device_type {
        vk::PhysicalDeviceType::OTHER => "Other",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Unknown",
    };
    let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();
    format!(
        "{} ({}, {}.{})",
        name,
        dev_ty,
        vk::api_version_major(props.api_version),
        vk::api_version_minor(props.api_version),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_description_format() {
        let mut props = vk::PhysicalDeviceProperties::default();
        props.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        props.api_version = vk::make_api_version(0, 1, 3, 0);
        let name = b"TestGPU\0";
        props.device_name[..name.len()]
            .copy_from_slice(&name.map(|b| b as std::ffi::c_char));
        assert_eq!(
            describe_physical_device(&props),
            "TestGPU (Discrete GPU, 1.3)"
        );
    }
}
