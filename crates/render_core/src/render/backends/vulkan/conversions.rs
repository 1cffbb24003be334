//! Mapping from backend-neutral descriptions to Vulkan enums and flags

use ash::vk;

use crate::render::api::*;

/// Usage flags for a buffer kind
pub fn buffer_usage(kind: BufferKind) -> vk::BufferUsageFlags {
    let transfer = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    match kind {
        BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | transfer,
        BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER | transfer,
        BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        BufferKind::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        BufferKind::Read => vk::BufferUsageFlags::TRANSFER_DST,
        BufferKind::Unknown | BufferKind::Storage => vk::BufferUsageFlags::empty(),
    }
}

/// Memory property sets to try, most preferred first
///
/// Uniform buffers ask for device-local host-visible memory and settle for
/// plain host-visible memory where no such heap exists.
pub fn memory_candidates(kind: BufferKind) -> Vec<vk::MemoryPropertyFlags> {
    let wanted = memory_flags(kind.memory_properties());
    match kind {
        BufferKind::Uniform => vec![
            wanted,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ],
        _ => vec![wanted],
    }
}

/// Neutral memory properties as Vulkan flags
pub fn memory_flags(properties: MemoryProperties) -> vk::MemoryPropertyFlags {
    let mut flags = vk::MemoryPropertyFlags::empty();
    if properties.contains(MemoryProperties::DEVICE_LOCAL) {
        flags |= vk::MemoryPropertyFlags::DEVICE_LOCAL;
    }
    if properties.contains(MemoryProperties::HOST_VISIBLE) {
        flags |= vk::MemoryPropertyFlags::HOST_VISIBLE;
    }
    if properties.contains(MemoryProperties::HOST_COHERENT) {
        flags |= vk::MemoryPropertyFlags::HOST_COHERENT;
    }
    flags
}

/// Vulkan memory flags as neutral properties
pub fn memory_properties(flags: vk::MemoryPropertyFlags) -> MemoryProperties {
    let mut properties = MemoryProperties::empty();
    properties.set(MemoryProperties::DEVICE_LOCAL, flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
    properties.set(MemoryProperties::HOST_VISIBLE, flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
    properties.set(MemoryProperties::HOST_COHERENT, flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
    properties
}

/// Sampler filter
pub fn filter(filter: TextureFilter) -> vk::Filter {
    match filter {
        TextureFilter::Nearest => vk::Filter::NEAREST,
        TextureFilter::Linear => vk::Filter::LINEAR,
    }
}

/// Sampler address mode
pub fn address_mode(repeat: TextureRepeat) -> vk::SamplerAddressMode {
    match repeat {
        TextureRepeat::Repeat => vk::SamplerAddressMode::REPEAT,
        TextureRepeat::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        TextureRepeat::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        TextureRepeat::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

/// Rasteriser cull mode
pub fn cull_mode(mode: FaceCullMode) -> vk::CullModeFlags {
    match mode {
        FaceCullMode::None => vk::CullModeFlags::NONE,
        FaceCullMode::Front => vk::CullModeFlags::FRONT,
        FaceCullMode::Back => vk::CullModeFlags::BACK,
        FaceCullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

/// Vertex attribute format; matrices span several locations and are not accepted
pub fn attribute_format(kind: AttributeType) -> Option<vk::Format> {
    Some(match kind {
        AttributeType::Float32 => vk::Format::R32_SFLOAT,
        AttributeType::Float32x2 => vk::Format::R32G32_SFLOAT,
        AttributeType::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        AttributeType::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        AttributeType::Int8 => vk::Format::R8_SINT,
        AttributeType::UInt8 => vk::Format::R8_UINT,
        AttributeType::Int16 => vk::Format::R16_SINT,
        AttributeType::UInt16 => vk::Format::R16_UINT,
        AttributeType::Int32 => vk::Format::R32_SINT,
        AttributeType::UInt32 => vk::Format::R32_UINT,
        AttributeType::Matrix4 => return None,
    })
}

/// Single shader stage
pub fn shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

/// Set of shader stages
pub fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    for (neutral, stage) in [
        (ShaderStages::VERTEX, vk::ShaderStageFlags::VERTEX),
        (ShaderStages::GEOMETRY, vk::ShaderStageFlags::GEOMETRY),
        (ShaderStages::FRAGMENT, vk::ShaderStageFlags::FRAGMENT),
        (ShaderStages::COMPUTE, vk::ShaderStageFlags::COMPUTE),
    ] {
        if stages.contains(neutral) {
            flags |= stage;
        }
    }
    flags
}

/// Descriptor type
pub fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

/// Submission wait stage
pub fn wait_stage(stage: WaitStage) -> vk::PipelineStageFlags {
    match stage {
        WaitStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        WaitStage::Transfer => vk::PipelineStageFlags::TRANSFER,
    }
}

/// Status of an acquire or present call
pub fn swapchain_status(result: Result<bool, vk::Result>) -> Result<SwapchainStatus, vk::Result> {
    match result {
        Ok(false) => Ok(SwapchainStatus::Optimal),
        Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(SwapchainStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
        Err(e) => Err(e),
    }
}

/// Expand 1-, 2- or 3-channel pixel data to RGBA
///
/// Grey values are replicated to RGB; missing alpha is opaque.
pub fn expand_to_rgba(pixels: &[u8], channels: u8) -> Option<Vec<u8>> {
    let channels = usize::from(channels);
    if channels == 0 || channels > 4 || pixels.len() % channels != 0 {
        return None;
    }
    if channels == 4 {
        return Some(pixels.to_vec());
    }
    let mut out = Vec::with_capacity(pixels.len() / channels * 4);
    for px in pixels.chunks_exact(channels) {
        match px {
            [g] => out.extend_from_slice(&[*g, *g, *g, 255]),
            [g, a] => out.extend_from_slice(&[*g, *g, *g, *a]),
            [r, g, b] => out.extend_from_slice(&[*r, *g, *b, 255]),
            _ => return None,
        }
    }
    Some(out)
}

/// Reorder a pixel read from a BGRA attachment into RGBA
pub fn to_rgba(format: vk::Format, pixel: [u8; 4]) -> [u8; 4] {
    match format {
        vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => [pixel[2], pixel[1], pixel[0], pixel[3]],
        _ => pixel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_memory_fallbacks() {
        let candidates = memory_candidates(BufferKind::Uniform);
        assert_eq!(candidates.len(), 3);
        assert!(candidates[0].contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
        assert_eq!(memory_candidates(BufferKind::Vertex), vec![vk::MemoryPropertyFlags::DEVICE_LOCAL]);
    }

    #[test]
    fn test_memory_properties_round_trip_flags() {
        let flags = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let properties = memory_properties(flags);
        assert!(properties.is_host_visible());
        assert!(!properties.needs_flush());
        assert_eq!(memory_flags(properties), flags);
    }

    #[test]
    fn test_attribute_formats() {
        assert_eq!(attribute_format(AttributeType::Float32x3), Some(vk::Format::R32G32B32_SFLOAT));
        assert_eq!(attribute_format(AttributeType::Matrix4), None);
    }

    #[test]
    fn test_swapchain_status() {
        assert_eq!(swapchain_status(Ok(false)), Ok(SwapchainStatus::Optimal));
        assert_eq!(swapchain_status(Ok(true)), Ok(SwapchainStatus::Suboptimal));
        assert_eq!(
            swapchain_status(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Ok(SwapchainStatus::OutOfDate)
        );
        assert_eq!(
            swapchain_status(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(vk::Result::ERROR_DEVICE_LOST)
        );
    }

    #[test]
    fn test_expand_to_rgba() {
        assert_eq!(expand_to_rgba(&[10, 20, 30], 3).unwrap(), vec![10, 20, 30, 255]);
        assert_eq!(expand_to_rgba(&[7], 1).unwrap(), vec![7, 7, 7, 255]);
        assert_eq!(expand_to_rgba(&[7, 128], 2).unwrap(), vec![7, 7, 7, 128]);
        assert!(expand_to_rgba(&[1, 2], 3).is_none());
        assert!(expand_to_rgba(&[1], 0).is_none());
    }

    #[test]
    fn test_bgra_swizzle() {
        assert_eq!(to_rgba(vk::Format::B8G8R8A8_UNORM, [1, 2, 3, 4]), [3, 2, 1, 4]);
        assert_eq!(to_rgba(vk::Format::R8G8B8A8_UNORM, [1, 2, 3, 4]), [1, 2, 3, 4]);
    }

    #[test]
    fn test_shader_stage_sets() {
        let flags = shader_stages(ShaderStages::VERTEX | ShaderStages::FRAGMENT);
        assert_eq!(flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(shader_stage(ShaderStage::Geometry), vk::ShaderStageFlags::GEOMETRY);
    }
}
