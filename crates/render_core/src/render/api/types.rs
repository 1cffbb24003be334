//! Backend-neutral descriptions of GPU objects
//!
//! Plain data passed across the device seam: buffer kinds and memory
//! properties, texture/sampler descriptions, pipeline and descriptor layouts,
//! render pass descriptions and swapchain status codes.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::handles::{
    BufferHandle, DescriptorSetLayoutHandle, FenceHandle, RenderPassHandle, SamplerHandle, SemaphoreHandle,
    TextureHandle,
};

/// Intended use of a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Unspecified; rejected at creation
    Unknown,
    /// Vertex data
    Vertex,
    /// Index data
    Index,
    /// Uniform blocks
    Uniform,
    /// Host-to-device upload staging
    Staging,
    /// Device-to-host readback
    Read,
    /// General storage; rejected at creation
    Storage,
}

impl BufferKind {
    /// Memory properties requested for this kind of buffer
    pub fn memory_properties(self) -> MemoryProperties {
        match self {
            Self::Vertex | Self::Index => MemoryProperties::DEVICE_LOCAL,
            Self::Uniform => MemoryProperties::DEVICE_LOCAL | MemoryProperties::HOST_VISIBLE,
            Self::Staging | Self::Read => MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            Self::Unknown | Self::Storage => MemoryProperties::empty(),
        }
    }

    /// Whether a buffer of this kind can be created
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Unknown | Self::Storage)
    }
}

bitflags! {
    /// Memory property flags of a device allocation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryProperties: u32 {
        /// Resident in device memory
        const DEVICE_LOCAL = 1 << 0;
        /// Mappable by the host
        const HOST_VISIBLE = 1 << 1;
        /// Host writes are visible without an explicit flush
        const HOST_COHERENT = 1 << 2;
    }
}

impl MemoryProperties {
    /// The host can map this memory
    pub fn is_host_visible(self) -> bool {
        self.contains(Self::HOST_VISIBLE)
    }

    /// Host writes need an explicit flush
    pub fn needs_flush(self) -> bool {
        self.is_host_visible() && !self.contains(Self::HOST_COHERENT)
    }
}

/// A device buffer as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    /// Backend handle
    pub handle: BufferHandle,
    /// Size in bytes
    pub size: u64,
    /// Memory the buffer actually landed in
    pub memory: MemoryProperties,
}

/// Dimensionality of a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureKind {
    /// Single 2D image
    Texture2D,
    /// Six-layer cube map
    Cube,
}

/// Pixel format of a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA colour
    Rgba8,
    /// Depth/stencil attachment
    Depth,
}

/// Description of a texture to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Channels per pixel in the supplied data
    pub channel_count: u8,
    /// 2D or cube
    pub kind: TextureKind,
    /// Pixel format
    pub format: TextureFormat,
    /// Any pixel has alpha below 255
    pub has_transparency: bool,
    /// Usable as a render attachment and writable after creation
    pub writeable: bool,
}

impl TextureDesc {
    /// RGBA 2D texture description
    pub fn rgba(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channel_count: 4,
            kind: TextureKind::Texture2D,
            format: TextureFormat::Rgba8,
            has_transparency: false,
            writeable: false,
        }
    }

    /// Bytes of pixel data expected for this description
    pub fn data_size(&self) -> usize {
        let layers = match self.kind {
            TextureKind::Texture2D => 1,
            TextureKind::Cube => 6,
        };
        self.width as usize * self.height as usize * usize::from(self.channel_count) * layers
    }
}

/// Sampler filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFilter {
    /// Nearest texel
    Nearest,
    /// Bilinear
    #[default]
    Linear,
}

/// Sampler addressing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureRepeat {
    /// Wrap around
    #[default]
    Repeat,
    /// Wrap around, mirroring every other tile
    MirroredRepeat,
    /// Clamp to the edge texel
    ClampToEdge,
    /// Clamp to the border colour
    ClampToBorder,
}

/// Semantic slot a texture map fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUse {
    /// Unassigned
    Unknown,
    /// Base colour
    Diffuse,
    /// Specular intensity
    Specular,
    /// Tangent-space normals
    Normal,
    /// Environment cube map
    Cubemap,
}

/// Sampler parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerDesc {
    /// Minification filter
    pub filter_minify: TextureFilter,
    /// Magnification filter
    pub filter_magnify: TextureFilter,
    /// U addressing
    pub repeat_u: TextureRepeat,
    /// V addressing
    pub repeat_v: TextureRepeat,
    /// W addressing
    pub repeat_w: TextureRepeat,
}

impl SamplerDesc {
    /// Same addressing mode on every axis
    pub fn with_repeat(repeat: TextureRepeat) -> Self {
        Self {
            repeat_u: repeat,
            repeat_v: repeat,
            repeat_w: repeat,
            ..Self::default()
        }
    }
}

/// A texture paired with the sampler that reads it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    /// Device texture
    pub texture: TextureHandle,
    /// Device sampler
    pub sampler: SamplerHandle,
}

/// A single programmable stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    /// Vertex stage
    Vertex,
    /// Geometry stage
    Geometry,
    /// Fragment stage
    Fragment,
    /// Compute stage
    Compute,
}

bitflags! {
    /// Set of programmable stages
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Geometry stage
        const GEOMETRY = 1 << 1;
        /// Fragment stage
        const FRAGMENT = 1 << 2;
        /// Compute stage
        const COMPUTE = 1 << 3;
    }
}

impl From<ShaderStage> for ShaderStages {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::VERTEX,
            ShaderStage::Geometry => Self::GEOMETRY,
            ShaderStage::Fragment => Self::FRAGMENT,
            ShaderStage::Compute => Self::COMPUTE,
        }
    }
}

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FaceCullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    #[default]
    Back,
    /// Cull everything
    FrontAndBack,
}

/// Vertex attribute data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    /// f32
    Float32,
    /// 2 x f32
    Float32x2,
    /// 3 x f32
    Float32x3,
    /// 4 x f32
    Float32x4,
    /// 4x4 f32 matrix
    Matrix4,
    /// i8
    Int8,
    /// u8
    UInt8,
    /// i16
    Int16,
    /// u16
    UInt16,
    /// i32
    Int32,
    /// u32
    UInt32,
}

impl AttributeType {
    /// Size in bytes
    pub fn size(self) -> u32 {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Float32 | Self::Int32 | Self::UInt32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
            Self::Matrix4 => 64,
        }
    }
}

/// One vertex input attribute of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttributeDesc {
    /// Shader input location
    pub location: u32,
    /// Data type
    pub kind: AttributeType,
    /// Byte offset within the vertex
    pub offset: u32,
}

/// A push-constant byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PushConstantRange {
    /// Offset in bytes, 4-byte aligned
    pub offset: u32,
    /// Size in bytes, 4-byte aligned
    pub size: u32,
}

/// A compiled shader module on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderModuleDesc {
    /// Stage the module runs in
    pub stage: ShaderStage,
    /// Path to the SPIR-V binary
    pub path: PathBuf,
}

/// Everything needed to build a graphics pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    /// Debug name
    pub name: String,
    /// Render pass the pipeline is compatible with
    pub renderpass: RenderPassHandle,
    /// Shader modules
    pub stages: Vec<ShaderModuleDesc>,
    /// Vertex attributes in location order
    pub attributes: Vec<VertexAttributeDesc>,
    /// Vertex stride in bytes
    pub stride: u32,
    /// Descriptor set layouts in set-index order
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    /// Push-constant ranges
    pub push_constant_ranges: Vec<PushConstantRange>,
    /// Face culling
    pub cull_mode: FaceCullMode,
    /// Depth testing enabled
    pub depth_test: bool,
    /// Depth writes enabled
    pub depth_write: bool,
}

/// Kind of resource bound at a descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Uniform buffer block
    UniformBuffer,
    /// Combined image sampler array
    CombinedImageSampler,
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding number
    pub binding: u32,
    /// Resource kind
    pub kind: DescriptorKind,
    /// Array length
    pub count: u32,
    /// Stages that read the binding
    pub stages: ShaderStages,
}

/// Sizing of a descriptor pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolDesc {
    /// Uniform-buffer descriptors
    pub uniform_buffers: u32,
    /// Combined image sampler descriptors
    pub samplers: u32,
    /// Maximum sets allocated at once
    pub max_sets: u32,
}

/// A single descriptor update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorWrite {
    /// Point a uniform-buffer binding at a buffer range
    UniformBuffer {
        /// Binding number
        binding: u32,
        /// Source buffer
        buffer: BufferHandle,
        /// Offset of the range
        offset: u64,
        /// Length of the range
        range: u64,
    },
    /// Fill a sampler array binding
    Samplers {
        /// Binding number
        binding: u32,
        /// Texture/sampler pairs in array order
        images: Vec<TextureBinding>,
    },
}

impl DescriptorWrite {
    /// Binding number targeted by this write
    pub fn binding(&self) -> u32 {
        match self {
            Self::UniformBuffer { binding, .. } | Self::Samplers { binding, .. } => *binding,
        }
    }
}

bitflags! {
    /// Attachments cleared when a render pass begins
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClearFlags: u8 {
        /// Clear colour
        const COLOR = 1 << 0;
        /// Clear depth
        const DEPTH = 1 << 1;
        /// Clear stencil
        const STENCIL = 1 << 2;
    }
}

/// Description of a render pass
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDesc {
    /// Pass name
    pub name: String,
    /// Clear colour
    pub clear_color: [f32; 4],
    /// Attachments to clear
    pub clear_flags: ClearFlags,
    /// The pass has a depth attachment
    pub depth_attachment: bool,
    /// A pass runs before this one in the frame
    pub has_prev_pass: bool,
    /// A pass runs after this one in the frame
    pub has_next_pass: bool,
    /// Colour attachment ends ready for presentation
    pub present_after: bool,
}

/// Pixel rectangle a pass renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderArea {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl RenderArea {
    /// Full-size area at the origin
    pub fn sized(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }
}

/// Outcome of a swapchain acquire or present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    /// Swapchain matches the surface
    Optimal,
    /// Usable, but should be recreated
    Suboptimal,
    /// Unusable until recreated
    OutOfDate,
}

/// Pipeline stage a submission waits at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    /// Colour attachment writes
    ColorAttachmentOutput,
    /// Transfer operations
    Transfer,
}

/// A frame's command buffer submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Frame slot whose command buffer is submitted
    pub frame: usize,
    /// Semaphore waited on before the wait stage
    pub wait_semaphore: SemaphoreHandle,
    /// Stage at which the wait applies
    pub wait_stage: WaitStage,
    /// Semaphore signalled on completion
    pub signal_semaphore: SemaphoreHandle,
    /// Fence signalled on completion
    pub fence: FenceHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_sizes() {
        assert_eq!(AttributeType::Float32.size(), 4);
        assert_eq!(AttributeType::Float32x2.size(), 8);
        assert_eq!(AttributeType::Float32x3.size(), 12);
        assert_eq!(AttributeType::Float32x4.size(), 16);
        assert_eq!(AttributeType::Matrix4.size(), 64);
        assert_eq!(AttributeType::UInt8.size(), 1);
        assert_eq!(AttributeType::Int16.size(), 2);
        assert_eq!(AttributeType::UInt32.size(), 4);
    }

    #[test]
    fn test_buffer_kind_memory() {
        assert!(!BufferKind::Vertex.memory_properties().is_host_visible());
        assert!(BufferKind::Staging.memory_properties().is_host_visible());
        assert!(!BufferKind::Staging.memory_properties().needs_flush());
        assert!(BufferKind::Uniform.memory_properties().needs_flush());
        assert!(!BufferKind::Storage.is_supported());
        assert!(!BufferKind::Unknown.is_supported());
    }

    #[test]
    fn test_cube_data_size() {
        let mut desc = TextureDesc::rgba(4, 4);
        assert_eq!(desc.data_size(), 64);
        desc.kind = TextureKind::Cube;
        assert_eq!(desc.data_size(), 384);
    }
}
