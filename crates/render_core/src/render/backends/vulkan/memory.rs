//! Device memory, buffers and images
//!
//! Allocation is one `vkAllocateMemory` per object. Objects here are plain
//! data destroyed explicitly by the table that owns them.

use ash::{vk, Device};

use super::context::{PhysicalDeviceInfo, VulkanError, VulkanResult};

/// A buffer bound to its own allocation
#[derive(Debug, Clone, Copy)]
pub struct AllocatedBuffer {
    /// Buffer handle
    pub buffer: vk::Buffer,
    /// Backing memory
    pub memory: vk::DeviceMemory,
    /// Requested size in bytes
    pub size: vk::DeviceSize,
    /// Properties of the memory type actually chosen
    pub properties: vk::MemoryPropertyFlags,
}

impl AllocatedBuffer {
    /// Create a buffer, trying each property set in turn until one has a memory type
    pub fn new(
        device: &Device,
        physical: &PhysicalDeviceInfo,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        candidates: &[vk::MemoryPropertyFlags],
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let chosen = candidates.iter().find_map(|&properties| {
            physical
                .find_memory_type(requirements.memory_type_bits, properties)
                .ok()
                .map(|index| (index, physical.memory.memory_types[index as usize].property_flags))
        });
        let Some((memory_type_index, properties)) = chosen else {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(VulkanError::NoSuitableMemoryType);
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(VulkanError::Api(e));
            }
        };
        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(e));
        }

        Ok(Self {
            buffer,
            memory,
            size,
            properties,
        })
    }

    /// Copy `data` into host-visible memory at `offset`, mapping for the duration
    ///
    /// Non-coherent memory is flushed before it is unmapped.
    pub fn write(&self, device: &Device, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let base = self.map(device)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(offset as usize), data.len());
        }
        let flushed = if self.is_coherent() {
            Ok(())
        } else {
            unsafe { device.flush_mapped_memory_ranges(&[self.whole_range()]) }.map_err(VulkanError::Api)
        };
        unsafe { device.unmap_memory(self.memory) };
        flushed
    }

    /// Copy `len` bytes at `offset` out of host-visible memory
    pub fn read(&self, device: &Device, offset: vk::DeviceSize, len: usize) -> VulkanResult<Vec<u8>> {
        let base = self.map(device)?;
        let invalidated = if self.is_coherent() {
            Ok(())
        } else {
            unsafe { device.invalidate_mapped_memory_ranges(&[self.whole_range()]) }.map_err(VulkanError::Api)
        };
        let mut out = vec![0u8; len];
        if invalidated.is_ok() {
            unsafe { std::ptr::copy_nonoverlapping(base.add(offset as usize), out.as_mut_ptr(), len) };
        }
        unsafe { device.unmap_memory(self.memory) };
        invalidated.map(|()| out)
    }

    /// Map the whole allocation
    pub fn map(&self, device: &Device) -> VulkanResult<*mut u8> {
        let ptr = unsafe {
            device
                .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
        };
        Ok(ptr.cast::<u8>())
    }

    /// Host writes are visible to the device without a flush
    pub fn is_coherent(&self) -> bool {
        self.properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    fn whole_range(&self) -> vk::MappedMemoryRange {
        vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build()
    }

    /// Release the buffer and its memory
    pub fn destroy(&self, device: &Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Parameters of an image to allocate
#[derive(Debug, Clone, Copy)]
pub struct ImageSpec {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect of the view
    pub aspect: vk::ImageAspectFlags,
    /// Six-layer cube map
    pub cube: bool,
}

impl ImageSpec {
    /// Array layers the image has
    pub fn layers(&self) -> u32 {
        if self.cube {
            6
        } else {
            1
        }
    }
}

/// An image, its memory and a view over every layer
#[derive(Debug, Clone, Copy)]
pub struct AllocatedImage {
    /// Image handle
    pub image: vk::Image,
    /// Backing memory
    pub memory: vk::DeviceMemory,
    /// View used for sampling and attachments
    pub view: vk::ImageView,
    /// Creation parameters
    pub spec: ImageSpec,
}

impl AllocatedImage {
    /// Create a device-local optimal-tiling image and its view
    pub fn new(device: &Device, physical: &PhysicalDeviceInfo, spec: ImageSpec) -> VulkanResult<Self> {
        let flags = if spec.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: spec.width,
                height: spec.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(spec.layers())
            .format(spec.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(spec.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe { device.create_image(&image_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = physical
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(index);
                unsafe { device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = unsafe { device.bind_image_memory(image, memory, 0) }
            .map_err(VulkanError::Api)
            .and_then(|()| create_view(device, image, &spec));
        match view {
            Ok(view) => Ok(Self {
                image,
                memory,
                view,
                spec,
            }),
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                Err(e)
            }
        }
    }

    /// Subresource range covering every layer
    pub fn range(&self) -> vk::ImageSubresourceRange {
        subresource_range(self.spec.aspect, self.spec.layers())
    }

    /// Release the view, image and memory
    pub fn destroy(&self, device: &Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

fn create_view(device: &Device, image: vk::Image, spec: &ImageSpec) -> VulkanResult<vk::ImageView> {
    let view_type = if spec.cube {
        vk::ImageViewType::CUBE
    } else {
        vk::ImageViewType::TYPE_2D
    };
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(view_type)
        .format(spec.format)
        .subresource_range(subresource_range(spec.aspect, spec.layers()));
    unsafe { device.create_image_view(&create_info, None).map_err(VulkanError::Api) }
}

/// Single-mip subresource range over `layers` layers
pub fn subresource_range(aspect: vk::ImageAspectFlags, layers: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: layers,
    }
}

/// Access masks and pipeline stages for a layout transition
pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> (vk::AccessFlags, vk::AccessFlags, vk::PipelineStageFlags, vk::PipelineStageFlags) {
    let (src_access, src_stage) = match old {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        _ => (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER),
    };
    let (dst_access, dst_stage) = match new {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        _ => (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER),
    };
    (src_access, dst_access, src_stage, dst_stage)
}

/// Record an image layout transition
pub fn record_transition(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let (src_access, dst_access, src_stage, dst_stage) = transition_masks(old, new);
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();
    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Record commands into a throwaway command buffer, submit and wait for the queue
pub fn one_shot<F>(device: &Device, pool: vk::CommandPool, queue: vk::Queue, record: F) -> VulkanResult<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let allocate_info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(pool)
        .command_buffer_count(1);
    let command_buffer = unsafe {
        device
            .allocate_command_buffers(&allocate_info)
            .map_err(VulkanError::Api)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("command buffer allocation returned nothing"))?
    };

    let result = (|| {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        record(command_buffer);
        unsafe {
            device.end_command_buffer(command_buffer).map_err(VulkanError::Api)?;
            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
            device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            device.queue_wait_idle(queue).map_err(VulkanError::Api)
        }
    })();

    unsafe { device.free_command_buffers(pool, &[command_buffer]) };
    result
}

/// Align a flush range to the device's non-coherent atom size
///
/// Returns `(offset, size)` where `size` is `vk::WHOLE_SIZE` when the aligned
/// range would run past the end of the allocation.
pub fn align_flush_range(
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    atom: vk::DeviceSize,
    capacity: vk::DeviceSize,
) -> (vk::DeviceSize, vk::DeviceSize) {
    let atom = atom.max(1);
    let start = offset / atom * atom;
    let end = (offset + size).div_ceil(atom) * atom;
    if end >= capacity {
        (start, vk::WHOLE_SIZE)
    } else {
        (start, end - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_flush_range() {
        assert_eq!(align_flush_range(0, 64, 64, 1024), (0, 64));
        assert_eq!(align_flush_range(10, 20, 64, 1024), (0, 64));
        assert_eq!(align_flush_range(70, 100, 64, 1024), (64, 128));
        assert_eq!(align_flush_range(1000, 24, 64, 1024), (960, vk::WHOLE_SIZE));
        assert_eq!(align_flush_range(5, 3, 0, 1024), (5, 3));
    }

    #[test]
    fn test_transition_masks() {
        let (src, dst, src_stage, dst_stage) =
            transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(src, vk::AccessFlags::empty());
        assert_eq!(dst, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

        let (src, _, _, dst_stage) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(src, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_cube_spec_layers() {
        let mut spec = ImageSpec {
            width: 4,
            height: 4,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            cube: false,
        };
        assert_eq!(spec.layers(), 1);
        spec.cube = true;
        assert_eq!(spec.layers(), 6);
    }
}
