//! Vulkan context management
//!
//! Instance, surface, physical device selection and logical device creation.
//! Each wrapper owns its Vulkan object and releases it on drop; the context
//! declares its fields so they drop surface first and instance last.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};
use thiserror::Error;

use crate::core::config::VulkanRendererConfig;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// A handle passed across the device seam is not live
    #[error("Resource not found: {kind} {id}")]
    ResourceNotFound {
        /// Kind of object looked up
        kind: &'static str,
        /// Raw handle value
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Shader binary could not be read
    #[error("Failed to load shader '{path}': {source}")]
    ShaderLoad {
        /// Path of the SPIR-V file
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },
}

impl VulkanError {
    /// Shorthand for an [`VulkanError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance with the extensions the window's display needs
    pub fn new<W: HasRawDisplayHandle>(window: &W, config: &VulkanRendererConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name = CString::new(env!("CARGO_PKG_NAME"))
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid engine name: {e}")))?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            // 1.1 for negative viewport heights
            .api_version(vk::API_VERSION_1_1);

        let mut extensions = ash_window::enumerate_required_extensions(window.raw_display_handle())
            .map_err(VulkanError::Api)?
            .to_vec();

        let validation = config.validation_enabled();
        let layer_names: Vec<CString> = if validation {
            vec![CString::new("VK_LAYER_KHRONOS_validation")
                .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?]
        } else {
            Vec::new()
        };
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }
        let layer_ptrs: Vec<*const std::os::raw::c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    log::warn!("Validation requested but the debug messenger failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Vulkan instance created (validation: {})", validation);
        Ok(Self { entry, instance, debug })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
    /// Depth attachment format supported as an optimal-tiling attachment
    pub depth_format: vk::Format,
}

impl PhysicalDeviceInfo {
    /// Select the first device with graphics, presentation and swapchain support
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", info.name());
                    return Ok(info);
                }
                Err(e) => log::debug!("Skipping physical device: {}", e),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
                graphics_family = Some(index);
            }
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::Api)?
            };
            if present_support && present_family.is_none() {
                present_family = Some(index);
            }
            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }

        let graphics_family = graphics_family
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?;
        let present_family = present_family
            .ok_or_else(|| VulkanError::InitializationFailed("No present queue family found".to_string()))?;

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed(
                "Required device extensions not supported".to_string(),
            ));
        }

        let depth_format = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ]
        .into_iter()
        .find(|&format| {
            let props = unsafe { instance.get_physical_device_format_properties(device, format) };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| VulkanError::InitializationFailed("No supported depth format".to_string()))?;

        Ok(Self {
            device,
            properties,
            features,
            memory,
            graphics_family,
            present_family,
            depth_format,
        })
    }

    /// Device name reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Index of a memory type allowed by `type_filter` with all of `properties`
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type(&self.memory, type_filter, properties)
    }
}

/// Find memory type with required properties
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0 && memory.memory_types[i as usize].property_flags.contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a logical device with graphics and present queues
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let mut families = vec![physical.graphics_family];
        if physical.present_family != physical.graphics_family {
            families.push(physical.present_family);
        }

        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical.features.sampler_anisotropy == vk::TRUE)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };
        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Window surface with RAII cleanup
pub struct WindowSurface {
    /// Surface handle
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader
    pub loader: Surface,
}

impl Drop for WindowSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Owns the core Vulkan objects
///
/// Field order is drop order: the logical device goes before the surface, the
/// surface before the instance.
pub struct VulkanContext {
    /// Logical device and queues
    pub device: LogicalDevice,
    /// Selected physical device
    pub physical: PhysicalDeviceInfo,
    /// Window surface
    pub surface: WindowSurface,
    /// Instance and debug messenger
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Create the instance, surface and device for a window
    pub fn new<W>(window: &W, config: &VulkanRendererConfig) -> VulkanResult<Self>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        let instance = VulkanInstance::new(window, config)?;

        let loader = Surface::new(&instance.entry, &instance.instance);
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
            .map_err(VulkanError::Api)?
        };
        let surface = WindowSurface { surface, loader };

        let physical = PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface.surface, &surface.loader)?;
        let device = LogicalDevice::new(&instance.instance, &physical)?;

        Ok(Self {
            device,
            physical,
            surface,
            instance,
        })
    }

    /// The raw logical device
    pub fn raw(&self) -> &Device {
        &self.device.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in memory.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        memory
    }

    #[test]
    fn test_find_memory_type_respects_filter() {
        let memory = memory_with(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        assert_eq!(find_memory_type(&memory, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(find_memory_type(&memory, 0b110, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 2);
        assert_eq!(find_memory_type(&memory, 0b111, vk::MemoryPropertyFlags::HOST_COHERENT).unwrap(), 1);
        assert!(matches!(
            find_memory_type(&memory, 0b001, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }
}
