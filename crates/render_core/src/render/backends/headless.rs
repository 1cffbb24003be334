//! Headless render device
//!
//! An in-memory [`RenderDevice`] with no GPU behind it. Buffers and textures
//! are byte vectors, submissions complete immediately and every call is
//! recorded so tests can assert on the exact sequence the renderer issued.
//! Failures can be injected through [`HeadlessFaults`].

use std::collections::{HashMap, HashSet};

use crate::render::api::*;

/// A call observed by the headless device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    /// Buffer created
    CreateBuffer {
        /// Requested kind
        kind: BufferKind,
        /// Requested size
        size: u64,
    },
    /// Buffer destroyed
    DestroyBuffer(BufferHandle),
    /// Buffer range flushed
    FlushBuffer {
        /// Target buffer
        buffer: BufferHandle,
        /// Range start
        offset: u64,
        /// Range length
        size: u64,
    },
    /// Buffer-to-buffer copy
    CopyBuffer {
        /// Source buffer
        source: BufferHandle,
        /// Destination buffer
        dest: BufferHandle,
        /// Bytes copied
        size: u64,
    },
    /// Buffer bound
    BindBuffer {
        /// Bound buffer
        buffer: BufferHandle,
        /// Bound offset
        offset: u64,
    },
    /// Draw issued from a buffer
    Draw {
        /// Buffer drawn from
        buffer: BufferHandle,
        /// Vertex or index
        kind: BufferKind,
        /// Element count
        element_count: u32,
    },
    /// Texture created
    CreateTexture {
        /// Width
        width: u32,
        /// Height
        height: u32,
        /// Writeable texture
        writeable: bool,
    },
    /// Texture resized
    ResizeTexture(TextureHandle),
    /// Texture destroyed
    DestroyTexture(TextureHandle),
    /// Pipeline created
    CreatePipeline(String),
    /// Pipeline bound
    BindPipeline(PipelineHandle),
    /// Descriptor sets allocated
    AllocateDescriptorSets(u32),
    /// Descriptor sets freed
    FreeDescriptorSets(u32),
    /// Descriptor set written
    WriteDescriptorSet {
        /// Target set
        set: DescriptorSetHandle,
        /// Bindings written
        bindings: Vec<u32>,
    },
    /// Descriptor set bound
    BindDescriptorSet {
        /// Set index
        set_index: u32,
        /// Bound set
        set: DescriptorSetHandle,
    },
    /// Push constants recorded
    PushConstants {
        /// Range start
        offset: u32,
        /// Bytes pushed
        size: u32,
    },
    /// Render pass begun
    BeginRenderpass(RenderPassHandle),
    /// Render pass ended
    EndRenderpass(RenderPassHandle),
    /// Fence waited on
    WaitForFence(FenceHandle),
    /// Fence reset
    ResetFence(FenceHandle),
    /// Swapchain image acquired
    AcquireNextImage(u32),
    /// Command recording started
    BeginCommands(usize),
    /// Command recording finished
    EndCommands(usize),
    /// Command buffer submitted
    Submit(SubmitInfo),
    /// Image presented
    Present(u32),
    /// Swapchain rebuilt
    RecreateSwapchain {
        /// New width
        width: u32,
        /// New height
        height: u32,
    },
    /// Viewport set
    SetViewport {
        /// Width
        width: u32,
        /// Height
        height: u32,
    },
    /// Device idle wait
    WaitIdle,
}

/// Failures the headless device reports on its next matching call
#[derive(Debug, Clone, Default)]
pub struct HeadlessFaults {
    /// Status returned by the next acquire (consumed)
    pub acquire_status: Option<SwapchainStatus>,
    /// Status returned by the next present (consumed)
    pub present_status: Option<SwapchainStatus>,
    /// Every fence wait times out
    pub fence_timeout: bool,
    /// The next submit fails (consumed)
    pub submit_failure: bool,
    /// The next fence reset fails (consumed)
    pub fence_reset_failure: bool,
    /// The next idle wait fails (consumed)
    pub wait_idle_failure: bool,
}

#[derive(Debug)]
struct HeadlessBuffer {
    memory: MemoryProperties,
    data: Vec<u8>,
    mapped: bool,
}

#[derive(Debug)]
struct HeadlessTexture {
    desc: TextureDesc,
    data: Vec<u8>,
}

#[derive(Debug)]
struct HeadlessPool {
    max_sets: u32,
    allocated: u32,
}

/// In-memory implementation of [`RenderDevice`]
#[derive(Debug)]
pub struct HeadlessDevice {
    next_id: u64,
    width: u32,
    height: u32,
    image_count: u32,
    next_image: u32,
    min_uniform_alignment: u64,
    buffers: HashMap<u64, HeadlessBuffer>,
    textures: HashMap<u64, HeadlessTexture>,
    samplers: HashSet<u64>,
    pipelines: HashMap<u64, String>,
    layouts: HashSet<u64>,
    pools: HashMap<u64, HeadlessPool>,
    sets: HashMap<u64, u64>,
    passes: HashSet<u64>,
    targets: HashSet<u64>,
    fences: HashMap<u64, bool>,
    /// Semaphore id to whether it is signalled
    semaphores: HashMap<u64, bool>,
    swapchain_images: Vec<TextureHandle>,
    depth_image: Option<TextureHandle>,
    active_pass: Option<RenderPassHandle>,
    recording: Option<usize>,
    calls: Vec<DeviceCall>,
    /// Injected failures
    pub faults: HeadlessFaults,
}

impl HeadlessDevice {
    /// Default number of swapchain images
    pub const DEFAULT_IMAGE_COUNT: u32 = 3;

    /// Create a device with a `width` x `height` swapchain
    pub fn new(width: u32, height: u32) -> Self {
        let mut device = Self {
            next_id: 1,
            width,
            height,
            image_count: Self::DEFAULT_IMAGE_COUNT,
            next_image: 0,
            min_uniform_alignment: 256,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashSet::new(),
            pipelines: HashMap::new(),
            layouts: HashSet::new(),
            pools: HashMap::new(),
            sets: HashMap::new(),
            passes: HashSet::new(),
            targets: HashSet::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            swapchain_images: Vec::new(),
            depth_image: None,
            active_pass: None,
            recording: None,
            calls: Vec::new(),
            faults: HeadlessFaults::default(),
        };
        device.build_swapchain();
        device
    }

    /// Builder-style swapchain image count override
    pub fn with_image_count(mut self, count: u32) -> Self {
        self.image_count = count.max(1);
        self.build_swapchain();
        self
    }

    /// Builder-style uniform alignment override
    pub fn with_min_uniform_alignment(mut self, alignment: u64) -> Self {
        self.min_uniform_alignment = alignment.max(1);
        self
    }

    /// Every call recorded so far
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Forget recorded calls
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of recorded calls matching `predicate`
    pub fn count_calls(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    /// Buffers currently alive
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Textures currently alive, swapchain images included
    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Semaphores currently alive
    pub fn live_semaphore_count(&self) -> usize {
        self.semaphores.len()
    }

    /// Whether a semaphore has a signal nobody has waited on yet
    pub fn is_semaphore_signalled(&self, semaphore: SemaphoreHandle) -> bool {
        self.semaphores.get(&semaphore.0).copied().unwrap_or(false)
    }

    fn set_semaphore(&mut self, semaphore: SemaphoreHandle, signalled: bool) -> BackendResult<()> {
        let state = self
            .semaphores
            .get_mut(&semaphore.0)
            .ok_or_else(|| RenderError::not_found("semaphore", semaphore.to_string()))?;
        *state = signalled;
        Ok(())
    }

    /// Descriptor sets currently allocated
    pub fn live_descriptor_set_count(&self) -> usize {
        self.sets.len()
    }

    /// Overwrite one RGBA pixel of a texture, standing in for rendered output
    pub fn set_texture_pixel(&mut self, texture: TextureHandle, x: u32, y: u32, rgba: [u8; 4]) -> BackendResult<()> {
        let tex = self.texture_mut(texture)?;
        let index = pixel_index(&tex.desc, x, y)?;
        tex.data[index..index + 4].copy_from_slice(&rgba);
        Ok(())
    }

    /// Raw bytes of a texture
    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture.0).map(|tex| tex.data.as_slice())
    }

    /// Description of a texture
    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.textures.get(&texture.0).map(|tex| &tex.desc)
    }

    fn issue(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, call: DeviceCall) {
        log::trace!("headless: {:?}", call);
        self.calls.push(call);
    }

    fn build_swapchain(&mut self) {
        for image in std::mem::take(&mut self.swapchain_images) {
            self.textures.remove(&image.0);
        }
        if let Some(depth) = self.depth_image.take() {
            self.textures.remove(&depth.0);
        }

        let mut desc = TextureDesc::rgba(self.width, self.height);
        desc.writeable = true;
        for _ in 0..self.image_count {
            let id = self.issue();
            self.textures.insert(id, HeadlessTexture { data: vec![0; desc.data_size()], desc: desc.clone() });
            self.swapchain_images.push(TextureHandle(id));
        }

        let depth_desc = TextureDesc { format: TextureFormat::Depth, ..desc };
        let id = self.issue();
        self.textures.insert(id, HeadlessTexture { data: vec![0; depth_desc.data_size()], desc: depth_desc });
        self.depth_image = Some(TextureHandle(id));
        self.next_image = 0;
    }

    fn buffer(&self, buffer: BufferHandle) -> BackendResult<&HeadlessBuffer> {
        self.buffers
            .get(&buffer.0)
            .ok_or_else(|| RenderError::not_found("buffer", buffer.to_string()))
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> BackendResult<&mut HeadlessBuffer> {
        self.buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| RenderError::not_found("buffer", buffer.to_string()))
    }

    fn texture_mut(&mut self, texture: TextureHandle) -> BackendResult<&mut HeadlessTexture> {
        self.textures
            .get_mut(&texture.0)
            .ok_or_else(|| RenderError::not_found("texture", texture.to_string()))
    }
}

fn checked_range(len: usize, offset: u64, size: u64) -> BackendResult<std::ops::Range<usize>> {
    let capacity = len as u64;
    match offset.checked_add(size) {
        Some(end) if end <= capacity => Ok(offset as usize..end as usize),
        _ => Err(RenderError::OutOfRange { offset, size, capacity }),
    }
}

fn pixel_index(desc: &TextureDesc, x: u32, y: u32) -> BackendResult<usize> {
    if x >= desc.width || y >= desc.height {
        return Err(RenderError::OutOfRange {
            offset: u64::from(y) * u64::from(desc.width) + u64::from(x),
            size: 1,
            capacity: u64::from(desc.width) * u64::from(desc.height),
        });
    }
    Ok((y as usize * desc.width as usize + x as usize) * 4)
}

impl BufferDevice for HeadlessDevice {
    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> BackendResult<GpuBuffer> {
        self.record(DeviceCall::CreateBuffer { kind, size });
        if !kind.is_supported() {
            return Err(RenderError::ResourceCreationFailed(format!("unsupported buffer kind {kind:?}")));
        }
        let len = usize::try_from(size)
            .map_err(|_| RenderError::ResourceCreationFailed(format!("buffer of {size} bytes")))?;
        let memory = kind.memory_properties();
        let id = self.issue();
        self.buffers.insert(id, HeadlessBuffer { memory, data: vec![0; len], mapped: false });
        Ok(GpuBuffer { handle: BufferHandle(id), size, memory })
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.record(DeviceCall::DestroyBuffer(buffer));
        if self.buffers.remove(&buffer.0).is_none() {
            log::warn!("headless: destroy of unknown {}", buffer);
        }
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> BackendResult<()> {
        let buf = self.buffer_mut(buffer)?;
        if !buf.memory.is_host_visible() {
            return Err(RenderError::InvalidState(format!("{buffer} is not host-visible")));
        }
        buf.mapped = true;
        Ok(())
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) {
        if let Ok(buf) = self.buffer_mut(buffer) {
            buf.mapped = false;
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let buf = self.buffer_mut(buffer)?;
        if !buf.memory.is_host_visible() {
            return Err(RenderError::InvalidState(format!("{buffer} is not host-visible")));
        }
        let range = checked_range(buf.data.len(), offset, data.len() as u64)?;
        buf.data[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let buf = self.buffer(buffer)?;
        if !buf.memory.is_host_visible() {
            return Err(RenderError::InvalidState(format!("{buffer} is not host-visible")));
        }
        let range = checked_range(buf.data.len(), offset, size)?;
        Ok(buf.data[range].to_vec())
    }

    fn flush_buffer(&mut self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<()> {
        self.buffer(buffer)?;
        self.record(DeviceCall::FlushBuffer { buffer, offset, size });
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        source: BufferHandle,
        source_offset: u64,
        dest: BufferHandle,
        dest_offset: u64,
        size: u64,
    ) -> BackendResult<()> {
        self.record(DeviceCall::CopyBuffer { source, dest, size });
        let src = self.buffer(source)?;
        let bytes = src.data[checked_range(src.data.len(), source_offset, size)?].to_vec();
        let dst = self.buffer_mut(dest)?;
        let range = checked_range(dst.data.len(), dest_offset, size)?;
        dst.data[range].copy_from_slice(&bytes);
        Ok(())
    }

    fn bind_buffer(&mut self, buffer: BufferHandle, _kind: BufferKind, offset: u64) -> BackendResult<()> {
        self.buffer(buffer)?;
        self.record(DeviceCall::BindBuffer { buffer, offset });
        Ok(())
    }

    fn draw_buffer(
        &mut self,
        buffer: BufferHandle,
        kind: BufferKind,
        offset: u64,
        element_count: u32,
        bind_only: bool,
    ) -> BackendResult<()> {
        self.bind_buffer(buffer, kind, offset)?;
        if !bind_only {
            self.record(DeviceCall::Draw { buffer, kind, element_count });
        }
        Ok(())
    }
}

impl TextureDevice for HeadlessDevice {
    fn create_texture(&mut self, desc: &TextureDesc, pixels: &[u8]) -> BackendResult<TextureHandle> {
        self.record(DeviceCall::CreateTexture { width: desc.width, height: desc.height, writeable: false });
        if pixels.len() != desc.data_size() {
            return Err(RenderError::ResourceCreationFailed(format!(
                "texture data is {} bytes, expected {}",
                pixels.len(),
                desc.data_size()
            )));
        }
        let id = self.issue();
        self.textures.insert(id, HeadlessTexture { desc: desc.clone(), data: pixels.to_vec() });
        Ok(TextureHandle(id))
    }

    fn create_writeable_texture(&mut self, desc: &TextureDesc) -> BackendResult<TextureHandle> {
        self.record(DeviceCall::CreateTexture { width: desc.width, height: desc.height, writeable: true });
        let desc = TextureDesc { writeable: true, ..desc.clone() };
        let id = self.issue();
        self.textures.insert(id, HeadlessTexture { data: vec![0; desc.data_size()], desc });
        Ok(TextureHandle(id))
    }

    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> BackendResult<()> {
        self.record(DeviceCall::ResizeTexture(texture));
        let tex = self.texture_mut(texture)?;
        tex.desc.width = width;
        tex.desc.height = height;
        tex.data = vec![0; tex.desc.data_size()];
        Ok(())
    }

    fn write_texture(&mut self, texture: TextureHandle, offset: u32, data: &[u8]) -> BackendResult<()> {
        let tex = self.texture_mut(texture)?;
        let range = checked_range(tex.data.len(), u64::from(offset), data.len() as u64)?;
        tex.data[range].copy_from_slice(data);
        Ok(())
    }

    fn read_texture_pixel(&mut self, texture: TextureHandle, x: u32, y: u32) -> BackendResult<[u8; 4]> {
        let tex = self.texture_mut(texture)?;
        let index = pixel_index(&tex.desc, x, y)?;
        let mut pixel = [0; 4];
        pixel.copy_from_slice(&tex.data[index..index + 4]);
        Ok(pixel)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.record(DeviceCall::DestroyTexture(texture));
        if self.textures.remove(&texture.0).is_none() {
            log::warn!("headless: destroy of unknown {}", texture);
        }
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> BackendResult<SamplerHandle> {
        let id = self.issue();
        self.samplers.insert(id);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }
}

impl PipelineDevice for HeadlessDevice {
    fn min_uniform_alignment(&self) -> u64 {
        self.min_uniform_alignment
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> BackendResult<PipelineHandle> {
        self.record(DeviceCall::CreatePipeline(desc.name.clone()));
        if !self.passes.contains(&desc.renderpass.0) {
            return Err(RenderError::not_found("render pass", desc.renderpass.to_string()));
        }
        if let Some(layout) = desc.set_layouts.iter().find(|layout| !self.layouts.contains(&layout.0)) {
            return Err(RenderError::not_found("descriptor set layout", layout.to_string()));
        }
        let id = self.issue();
        self.pipelines.insert(id, desc.name.clone());
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline.0);
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> BackendResult<()> {
        if !self.pipelines.contains_key(&pipeline.0) {
            return Err(RenderError::not_found("pipeline", pipeline.to_string()));
        }
        self.record(DeviceCall::BindPipeline(pipeline));
        Ok(())
    }

    fn create_descriptor_pool(&mut self, desc: &DescriptorPoolDesc) -> BackendResult<DescriptorPoolHandle> {
        let id = self.issue();
        self.pools.insert(id, HeadlessPool { max_sets: desc.max_sets, allocated: 0 });
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        self.pools.remove(&pool.0);
        self.sets.retain(|_, owner| *owner != pool.0);
    }

    fn create_descriptor_set_layout(
        &mut self,
        _bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let id = self.issue();
        self.layouts.insert(id);
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        self.layouts.remove(&layout.0);
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        count: u32,
    ) -> BackendResult<Vec<DescriptorSetHandle>> {
        self.record(DeviceCall::AllocateDescriptorSets(count));
        if !self.layouts.contains(&layout.0) {
            return Err(RenderError::not_found("descriptor set layout", layout.to_string()));
        }
        let entry = self
            .pools
            .get_mut(&pool.0)
            .ok_or_else(|| RenderError::not_found("descriptor pool", pool.to_string()))?;
        if entry.allocated + count > entry.max_sets {
            return Err(RenderError::ResourceExhausted {
                kind: "descriptor set",
                capacity: entry.max_sets as usize,
            });
        }
        entry.allocated += count;

        let mut sets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = self.issue();
            self.sets.insert(id, pool.0);
            sets.push(DescriptorSetHandle(id));
        }
        Ok(sets)
    }

    fn free_descriptor_sets(&mut self, pool: DescriptorPoolHandle, sets: &[DescriptorSetHandle]) -> BackendResult<()> {
        self.record(DeviceCall::FreeDescriptorSets(sets.len() as u32));
        for set in sets {
            if self.sets.remove(&set.0).is_none() {
                return Err(RenderError::not_found("descriptor set", set.to_string()));
            }
        }
        if let Some(entry) = self.pools.get_mut(&pool.0) {
            entry.allocated = entry.allocated.saturating_sub(sets.len() as u32);
        }
        Ok(())
    }

    fn write_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> BackendResult<()> {
        if !self.sets.contains_key(&set.0) {
            return Err(RenderError::not_found("descriptor set", set.to_string()));
        }
        self.record(DeviceCall::WriteDescriptorSet {
            set,
            bindings: writes.iter().map(DescriptorWrite::binding).collect(),
        });
        Ok(())
    }

    fn bind_descriptor_set(
        &mut self,
        _pipeline: PipelineHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) -> BackendResult<()> {
        if !self.sets.contains_key(&set.0) {
            return Err(RenderError::not_found("descriptor set", set.to_string()));
        }
        self.record(DeviceCall::BindDescriptorSet { set_index, set });
        Ok(())
    }

    fn push_constants(&mut self, _pipeline: PipelineHandle, offset: u32, data: &[u8]) -> BackendResult<()> {
        self.record(DeviceCall::PushConstants { offset, size: data.len() as u32 });
        Ok(())
    }
}

impl PassDevice for HeadlessDevice {
    fn create_renderpass(&mut self, _desc: &RenderPassDesc) -> BackendResult<RenderPassHandle> {
        let id = self.issue();
        self.passes.insert(id);
        Ok(RenderPassHandle(id))
    }

    fn destroy_renderpass(&mut self, pass: RenderPassHandle) {
        self.passes.remove(&pass.0);
    }

    fn create_render_target(
        &mut self,
        pass: RenderPassHandle,
        attachments: &[TextureHandle],
        _width: u32,
        _height: u32,
    ) -> BackendResult<RenderTargetHandle> {
        if !self.passes.contains(&pass.0) {
            return Err(RenderError::not_found("render pass", pass.to_string()));
        }
        if let Some(missing) = attachments.iter().find(|a| !self.textures.contains_key(&a.0)) {
            return Err(RenderError::not_found("attachment", missing.to_string()));
        }
        let id = self.issue();
        self.targets.insert(id);
        Ok(RenderTargetHandle(id))
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.targets.remove(&target.0);
    }

    fn window_attachment(&self, image_index: u32) -> BackendResult<TextureHandle> {
        self.swapchain_images
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| RenderError::not_found("swapchain image", image_index.to_string()))
    }

    fn depth_attachment(&self) -> BackendResult<TextureHandle> {
        self.depth_image
            .ok_or_else(|| RenderError::not_found("depth attachment", "swapchain"))
    }

    fn begin_renderpass(
        &mut self,
        pass: RenderPassHandle,
        target: RenderTargetHandle,
        _area: RenderArea,
    ) -> BackendResult<()> {
        if self.active_pass.is_some() {
            return Err(RenderError::InvalidState("a render pass is already active".to_string()));
        }
        if !self.targets.contains(&target.0) {
            return Err(RenderError::not_found("render target", target.to_string()));
        }
        self.active_pass = Some(pass);
        self.record(DeviceCall::BeginRenderpass(pass));
        Ok(())
    }

    fn end_renderpass(&mut self, pass: RenderPassHandle) -> BackendResult<()> {
        if self.active_pass != Some(pass) {
            return Err(RenderError::InvalidState(format!("{pass} is not the active render pass")));
        }
        self.active_pass = None;
        self.record(DeviceCall::EndRenderpass(pass));
        Ok(())
    }
}

impl FrameDevice for HeadlessDevice {
    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let id = self.issue();
        self.fences.insert(id, signaled);
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.fences.remove(&fence.0);
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        let id = self.issue();
        self.semaphores.insert(id, false);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.semaphores.remove(&semaphore.0);
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, timeout_ns: u64) -> BackendResult<()> {
        self.record(DeviceCall::WaitForFence(fence));
        let signaled = *self
            .fences
            .get(&fence.0)
            .ok_or_else(|| RenderError::not_found("fence", fence.to_string()))?;
        if self.faults.fence_timeout || !signaled {
            return Err(RenderError::RenderingFailed(format!(
                "timed out after {timeout_ns} ns waiting for {fence}"
            )));
        }
        Ok(())
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        self.record(DeviceCall::ResetFence(fence));
        if std::mem::take(&mut self.faults.fence_reset_failure) {
            return Err(RenderError::RenderingFailed(format!("failed to reset {fence}")));
        }
        let state = self
            .fences
            .get_mut(&fence.0)
            .ok_or_else(|| RenderError::not_found("fence", fence.to_string()))?;
        *state = false;
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        semaphore: SemaphoreHandle,
        _timeout_ns: u64,
    ) -> BackendResult<(u32, SwapchainStatus)> {
        match self.semaphores.get(&semaphore.0) {
            None => return Err(RenderError::not_found("semaphore", semaphore.to_string())),
            Some(true) => {
                return Err(RenderError::InvalidState(format!(
                    "{semaphore} is still signalled from an earlier acquire"
                )))
            }
            Some(false) => {}
        }
        let status = self.faults.acquire_status.take().unwrap_or(SwapchainStatus::Optimal);
        let image = self.next_image;
        self.record(DeviceCall::AcquireNextImage(image));
        if status != SwapchainStatus::OutOfDate {
            self.next_image = (self.next_image + 1) % self.image_count;
            self.set_semaphore(semaphore, true)?;
        }
        Ok((image, status))
    }

    fn begin_commands(&mut self, frame: usize) -> BackendResult<()> {
        // Beginning resets the command buffer, dropping any unfinished recording
        if let Some(previous) = self.recording.take() {
            log::debug!("Discarding unfinished recording of frame {}", previous);
            self.active_pass = None;
        }
        self.recording = Some(frame);
        self.record(DeviceCall::BeginCommands(frame));
        Ok(())
    }

    fn end_commands(&mut self, frame: usize) -> BackendResult<()> {
        if self.recording != Some(frame) {
            return Err(RenderError::InvalidState(format!("frame {frame} is not recording")));
        }
        if self.active_pass.is_some() {
            return Err(RenderError::InvalidState("render pass still active".to_string()));
        }
        self.recording = None;
        self.record(DeviceCall::EndCommands(frame));
        Ok(())
    }

    fn submit(&mut self, info: &SubmitInfo) -> BackendResult<()> {
        self.record(DeviceCall::Submit(*info));
        if std::mem::take(&mut self.faults.submit_failure) {
            return Err(RenderError::RenderingFailed("queue submission failed".to_string()));
        }
        let state = self
            .fences
            .get_mut(&info.fence.0)
            .ok_or_else(|| RenderError::not_found("fence", info.fence.to_string()))?;
        *state = true;
        self.set_semaphore(info.wait_semaphore, false)?;
        self.set_semaphore(info.signal_semaphore, true)
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<SwapchainStatus> {
        self.record(DeviceCall::Present(image_index));
        self.set_semaphore(wait, false)?;
        Ok(self.faults.present_status.take().unwrap_or(SwapchainStatus::Optimal))
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> BackendResult<u32> {
        self.record(DeviceCall::RecreateSwapchain { width, height });
        self.width = width;
        self.height = height;
        self.build_swapchain();
        Ok(self.image_count)
    }

    fn swapchain_image_count(&self) -> u32 {
        self.image_count
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> BackendResult<()> {
        self.record(DeviceCall::SetViewport { width, height });
        Ok(())
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        self.record(DeviceCall::WaitIdle);
        if std::mem::take(&mut self.faults.wait_idle_failure) {
            return Err(RenderError::RenderingFailed("device idle wait failed".to_string()));
        }
        Ok(())
    }
}

impl RenderDevice for HeadlessDevice {
    fn backend_name(&self) -> &str {
        "headless"
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn shutdown(&mut self) {
        log::info!(
            "Headless device shutdown ({} buffers, {} textures still alive)",
            self.buffers.len(),
            self.textures.len()
        );
        self.buffers.clear();
        self.textures.clear();
        self.swapchain_images.clear();
        self.depth_image = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_local_buffers_reject_host_writes() {
        let mut device = HeadlessDevice::new(64, 64);
        let buffer = device.create_buffer(BufferKind::Vertex, 16).unwrap();
        assert!(device.write_buffer(buffer.handle, 0, &[1]).is_err());

        let staging = device.create_buffer(BufferKind::Staging, 16).unwrap();
        device.write_buffer(staging.handle, 0, &[1, 2]).unwrap();
        assert_eq!(device.read_buffer(staging.handle, 0, 2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_acquire_cycles_images() {
        let mut device = HeadlessDevice::new(64, 64).with_image_count(2);
        let semaphore = device.create_semaphore().unwrap();
        let images: Vec<u32> = (0..4)
            .map(|_| {
                let image = device.acquire_next_image(semaphore, u64::MAX).unwrap().0;
                device.present(image, semaphore).unwrap();
                image
            })
            .collect();
        assert_eq!(images, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_acquire_rejects_signalled_semaphore() {
        let mut device = HeadlessDevice::new(64, 64);
        let semaphore = device.create_semaphore().unwrap();
        device.acquire_next_image(semaphore, u64::MAX).unwrap();
        assert!(device.is_semaphore_signalled(semaphore));
        assert!(matches!(
            device.acquire_next_image(semaphore, u64::MAX),
            Err(RenderError::InvalidState(_))
        ));
    }

    #[test]
    fn test_begin_commands_resets_unfinished_recording() {
        let mut device = HeadlessDevice::new(64, 64);
        let pass = device
            .create_renderpass(&RenderPassDesc {
                name: "test".to_string(),
                clear_color: [0.0; 4],
                clear_flags: ClearFlags::COLOR,
                depth_attachment: false,
                has_prev_pass: false,
                has_next_pass: false,
                present_after: true,
            })
            .unwrap();
        let attachment = device.window_attachment(0).unwrap();
        let target = device.create_render_target(pass, &[attachment], 64, 64).unwrap();

        device.begin_commands(0).unwrap();
        device.begin_renderpass(pass, target, RenderArea::sized(64, 64)).unwrap();
        assert!(device.end_commands(0).is_err());

        device.begin_commands(0).unwrap();
        device.end_commands(0).unwrap();
    }

    #[test]
    fn test_wait_idle_fault_is_consumed() {
        let mut device = HeadlessDevice::new(64, 64);
        device.faults.wait_idle_failure = true;
        assert!(device.wait_idle().is_err());
        device.wait_idle().unwrap();
    }

    #[test]
    fn test_submit_signals_fence() {
        let mut device = HeadlessDevice::new(64, 64);
        let fence = device.create_fence(false).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        assert!(device.wait_for_fence(fence, 10).is_err());

        let info = SubmitInfo {
            frame: 0,
            wait_semaphore: semaphore,
            wait_stage: WaitStage::ColorAttachmentOutput,
            signal_semaphore: semaphore,
            fence,
        };
        device.submit(&info).unwrap();
        device.wait_for_fence(fence, 10).unwrap();
    }

    #[test]
    fn test_descriptor_pool_capacity() {
        let mut device = HeadlessDevice::new(64, 64);
        let pool = device
            .create_descriptor_pool(&DescriptorPoolDesc { uniform_buffers: 1, samplers: 1, max_sets: 2 })
            .unwrap();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let sets = device.allocate_descriptor_sets(pool, layout, 2).unwrap();
        assert!(device.allocate_descriptor_sets(pool, layout, 1).is_err());
        device.free_descriptor_sets(pool, &sets).unwrap();
        assert_eq!(device.allocate_descriptor_sets(pool, layout, 2).unwrap().len(), 2);
    }
}
