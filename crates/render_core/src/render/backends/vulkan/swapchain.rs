//! Vulkan swapchain management
//!
//! Creation and recreation share one path; a recreation hands the retiring
//! swapchain to the driver. The swapchain owns the depth image sized with it.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use super::context::{VulkanContext, VulkanError, VulkanResult};
use super::memory::{AllocatedImage, ImageSpec};

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    depth: AllocatedImage,
}

impl Swapchain {
    /// Create a swapchain for the context's surface
    ///
    /// `old_swapchain` is retired by the driver when not null; the caller drops
    /// its wrapper afterwards.
    pub fn new(context: &VulkanContext, window_extent: vk::Extent2D, old_swapchain: vk::SwapchainKHR) -> VulkanResult<Self> {
        let physical = context.physical.device;
        let surface = context.surface.surface;
        let surface_loader = &context.surface.loader;
        let device = context.raw().clone();
        let loader = context.device.swapchain_loader.clone();

        let caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical, surface)
                .map_err(VulkanError::Api)?
        };
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical, surface)
                .map_err(VulkanError::Api)?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical, surface)
                .map_err(VulkanError::Api)?
        };

        let format = choose_surface_format(&formats)
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&caps, window_extent);
        let image_count = choose_image_count(&caps);

        let mut queue_families = vec![context.physical.graphics_family];
        let sharing_mode = if context.physical.present_family == context.physical.graphics_family {
            vk::SharingMode::EXCLUSIVE
        } else {
            queue_families.push(context.physical.present_family);
            vk::SharingMode::CONCURRENT
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { loader.create_swapchain(&create_info, None).map_err(VulkanError::Api)? };
        let images = unsafe { loader.get_swapchain_images(swapchain).map_err(VulkanError::Api)? };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(super::memory::subresource_range(vk::ImageAspectFlags::COLOR, 1));
            match unsafe { device.create_image_view(&create_info, None) } {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for view in image_views {
                            device.destroy_image_view(view, None);
                        }
                        loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(VulkanError::Api(e));
                }
            }
        }

        let depth_spec = ImageSpec {
            width: extent.width,
            height: extent.height,
            format: context.physical.depth_format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: depth_aspect(context.physical.depth_format),
            cube: false,
        };
        let depth = match AllocatedImage::new(&device, &context.physical, depth_spec) {
            Ok(depth) => depth,
            Err(e) => {
                unsafe {
                    for view in image_views {
                        device.destroy_image_view(view, None);
                    }
                    loader.destroy_swapchain(swapchain, None);
                }
                return Err(e);
            }
        };

        log::debug!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            format.format,
            present_mode
        );

        Ok(Self {
            device,
            loader,
            swapchain,
            images,
            image_views,
            format,
            extent,
            depth,
        })
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Colour images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Get image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Depth attachment sized with the swapchain
    pub fn depth(&self) -> &AllocatedImage {
        &self.depth
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get swapchain loader
    pub fn loader(&self) -> &SwapchainLoader {
        &self.loader
    }

    /// Get image count
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.depth.destroy(&self.device);
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Prefer BGRA8 unorm with sRGB non-linear colour space
///
/// Attachments drawn offscreen share this format, so a unorm format keeps
/// their readback byte-exact.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_UNORM && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox when available, otherwise FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's extent, or the window's clamped to the surface limits
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window_extent
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window_extent
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum when there is one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Aspect flags of a depth format
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_extent() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        };
        let window = vk::Extent2D { width: 5000, height: 300 };
        let extent = choose_extent(&caps, window);
        assert_eq!((extent.width, extent.height), (800, 600));

        caps.current_extent.width = u32::MAX;
        let extent = choose_extent(&caps, window);
        assert_eq!((extent.width, extent.height), (4096, 300));
    }

    #[test]
    fn test_choose_image_count() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn test_choose_format_and_mode() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let format = |formats: &[vk::SurfaceFormatKHR]| choose_surface_format(formats).map(|sf| sf.format);
        assert_eq!(format(&[srgb, unorm]), Some(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(format(&[srgb]), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(format(&[]), None);

        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO]), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert!(depth_aspect(vk::Format::D24_UNORM_S8_UINT).contains(vk::ImageAspectFlags::STENCIL));
    }
}
