//! Backend device traits
//!
//! The core renderer drives the GPU exclusively through [`RenderDevice`], a
//! capability set split into object-safe sub-traits by concern. Every system
//! takes `&mut dyn RenderDevice`, so the same lifecycle logic runs against the
//! Vulkan backend and the headless backend used by tests.
//!
//! Destroy methods are infallible: releasing an unknown handle is logged by the
//! backend and otherwise ignored.

use super::error::BackendResult;
use super::handles::*;
use super::types::*;

/// Device buffer operations
pub trait BufferDevice {
    /// Create a buffer of `size` bytes for the given use
    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> BackendResult<GpuBuffer>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Persistently map a host-visible buffer
    fn map_buffer(&mut self, buffer: BufferHandle) -> BackendResult<()>;

    /// Undo [`BufferDevice::map_buffer`]
    fn unmap_buffer(&mut self, buffer: BufferHandle);

    /// Copy bytes into a host-visible buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Copy bytes out of a host-visible buffer
    fn read_buffer(&mut self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>>;

    /// Make host writes in a non-coherent range visible to the device
    fn flush_buffer(&mut self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<()>;

    /// Copy between buffers with a one-shot command buffer, blocking until the queue is idle
    fn copy_buffer(
        &mut self,
        source: BufferHandle,
        source_offset: u64,
        dest: BufferHandle,
        dest_offset: u64,
        size: u64,
    ) -> BackendResult<()>;

    /// Bind a buffer at `offset` in the current command buffer
    fn bind_buffer(&mut self, buffer: BufferHandle, kind: BufferKind, offset: u64) -> BackendResult<()>;

    /// Bind a vertex or index buffer and, unless `bind_only`, draw `element_count` elements
    fn draw_buffer(
        &mut self,
        buffer: BufferHandle,
        kind: BufferKind,
        offset: u64,
        element_count: u32,
        bind_only: bool,
    ) -> BackendResult<()>;
}

/// Texture and sampler operations
pub trait TextureDevice {
    /// Create a sampled texture from pixel data
    fn create_texture(&mut self, desc: &TextureDesc, pixels: &[u8]) -> BackendResult<TextureHandle>;

    /// Create an uninitialised texture usable as a render attachment
    fn create_writeable_texture(&mut self, desc: &TextureDesc) -> BackendResult<TextureHandle>;

    /// Recreate a writeable texture's storage at a new size
    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> BackendResult<()>;

    /// Upload bytes into a texture starting at byte `offset`
    fn write_texture(&mut self, texture: TextureHandle, offset: u32, data: &[u8]) -> BackendResult<()>;

    /// Read one RGBA pixel back to the host
    fn read_texture_pixel(&mut self, texture: TextureHandle, x: u32, y: u32) -> BackendResult<[u8; 4]>;

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDesc) -> BackendResult<SamplerHandle>;

    /// Destroy a sampler
    fn destroy_sampler(&mut self, sampler: SamplerHandle);
}

/// Pipeline, descriptor and push-constant operations
pub trait PipelineDevice {
    /// Minimum alignment of dynamic uniform-buffer offsets
    fn min_uniform_alignment(&self) -> u64;

    /// Build a graphics pipeline
    fn create_pipeline(&mut self, desc: &PipelineDesc) -> BackendResult<PipelineHandle>;

    /// Destroy a pipeline
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Bind a pipeline in the current command buffer
    fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> BackendResult<()>;

    /// Create a descriptor pool
    fn create_descriptor_pool(&mut self, desc: &DescriptorPoolDesc) -> BackendResult<DescriptorPoolHandle>;

    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle);

    /// Allocate `count` sets of one layout
    fn allocate_descriptor_sets(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        count: u32,
    ) -> BackendResult<Vec<DescriptorSetHandle>>;

    /// Return sets to their pool
    fn free_descriptor_sets(&mut self, pool: DescriptorPoolHandle, sets: &[DescriptorSetHandle]) -> BackendResult<()>;

    /// Update bindings of a set
    fn write_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> BackendResult<()>;

    /// Bind a set at `set_index` for the given pipeline
    fn bind_descriptor_set(
        &mut self,
        pipeline: PipelineHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) -> BackendResult<()>;

    /// Record a push-constant update
    fn push_constants(&mut self, pipeline: PipelineHandle, offset: u32, data: &[u8]) -> BackendResult<()>;
}

/// Render pass and render target operations
pub trait PassDevice {
    /// Create a render pass
    fn create_renderpass(&mut self, desc: &RenderPassDesc) -> BackendResult<RenderPassHandle>;

    /// Destroy a render pass
    fn destroy_renderpass(&mut self, pass: RenderPassHandle);

    /// Create a render target from attachments compatible with `pass`
    fn create_render_target(
        &mut self,
        pass: RenderPassHandle,
        attachments: &[TextureHandle],
        width: u32,
        height: u32,
    ) -> BackendResult<RenderTargetHandle>;

    /// Destroy a render target
    fn destroy_render_target(&mut self, target: RenderTargetHandle);

    /// Swapchain colour image `image_index` as an attachment
    fn window_attachment(&self, image_index: u32) -> BackendResult<TextureHandle>;

    /// The swapchain-sized depth attachment
    fn depth_attachment(&self) -> BackendResult<TextureHandle>;

    /// Begin a render pass on a target
    fn begin_renderpass(
        &mut self,
        pass: RenderPassHandle,
        target: RenderTargetHandle,
        area: RenderArea,
    ) -> BackendResult<()>;

    /// End the active render pass
    fn end_renderpass(&mut self, pass: RenderPassHandle) -> BackendResult<()>;
}

/// Synchronisation, submission and swapchain operations
pub trait FrameDevice {
    /// Create a fence, optionally already signalled
    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle>;

    /// Destroy a fence
    fn destroy_fence(&mut self, fence: FenceHandle);

    /// Create a semaphore
    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle>;

    /// Destroy a semaphore
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    /// Block until `fence` signals or `timeout_ns` elapses (timeouts are errors)
    fn wait_for_fence(&mut self, fence: FenceHandle, timeout_ns: u64) -> BackendResult<()>;

    /// Return a fence to the unsignalled state
    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()>;

    /// Acquire the next swapchain image, signalling `semaphore` when it is ready
    fn acquire_next_image(
        &mut self,
        semaphore: SemaphoreHandle,
        timeout_ns: u64,
    ) -> BackendResult<(u32, SwapchainStatus)>;

    /// Begin recording frame slot `frame`'s command buffer
    fn begin_commands(&mut self, frame: usize) -> BackendResult<()>;

    /// Finish recording frame slot `frame`'s command buffer
    fn end_commands(&mut self, frame: usize) -> BackendResult<()>;

    /// Submit a recorded command buffer to the graphics queue
    fn submit(&mut self, info: &SubmitInfo) -> BackendResult<()>;

    /// Present swapchain image `image_index` after `wait` signals
    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<SwapchainStatus>;

    /// Rebuild the swapchain and its depth attachment; returns the new image count
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> BackendResult<u32>;

    /// Number of swapchain images
    fn swapchain_image_count(&self) -> u32;

    /// Set the dynamic viewport and scissor for the current command buffer
    fn set_viewport(&mut self, width: u32, height: u32) -> BackendResult<()>;

    /// Block until the device has finished all submitted work
    fn wait_idle(&mut self) -> BackendResult<()>;
}

/// The complete backend capability set consumed by the renderer
pub trait RenderDevice: BufferDevice + TextureDevice + PipelineDevice + PassDevice + FrameDevice {
    /// Backend name for diagnostics
    fn backend_name(&self) -> &str;

    /// Current drawable size in pixels
    fn framebuffer_size(&self) -> (u32, u32);

    /// Release every device object still owned by the backend
    fn shutdown(&mut self);
}
