//! # Vulkan Render Device
//!
//! [`VulkanDevice`] implements the backend device traits on top of ash. Every
//! object handed to the core lives in a `slotmap` table; the opaque handle is
//! the slot key's FFI value, so stale handles are rejected rather than aliased.
//!
//! Buffer and texture operations live in `resources.rs`, pipeline, descriptor
//! and render pass operations in `pipeline.rs`.

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use slotmap::{Key, KeyData, SlotMap};

use super::context::{VulkanContext, VulkanError, VulkanResult};
use super::conversions;
use super::memory::{AllocatedBuffer, AllocatedImage};
use super::swapchain::Swapchain;
use crate::core::config::VulkanRendererConfig;
use crate::render::api::*;

slotmap::new_key_type! {
    pub(super) struct BufferKey;
    pub(super) struct TextureKey;
    pub(super) struct SamplerKey;
    pub(super) struct PipelineKey;
    pub(super) struct PoolKey;
    pub(super) struct LayoutKey;
    pub(super) struct SetKey;
    pub(super) struct PassKey;
    pub(super) struct TargetKey;
    pub(super) struct FenceKey;
    pub(super) struct SemaphoreKey;
}

/// Opaque handle value of a table key
pub(super) fn raw_handle<K: Key>(key: K) -> u64 {
    key.data().as_ffi()
}

/// Table key for an opaque handle value
pub(super) fn table_key<K: Key>(raw: u64) -> K {
    KeyData::from_ffi(raw).into()
}

/// Shared lookup with a typed not-found error
pub(super) fn lookup<'a, K: Key, V>(table: &'a SlotMap<K, V>, kind: &'static str, raw: u64) -> VulkanResult<&'a V> {
    table
        .get(table_key(raw))
        .ok_or(VulkanError::ResourceNotFound { kind, id: raw })
}

/// Mutable counterpart of [`lookup`]
pub(super) fn lookup_mut<'a, K: Key, V>(
    table: &'a mut SlotMap<K, V>,
    kind: &'static str,
    raw: u64,
) -> VulkanResult<&'a mut V> {
    table
        .get_mut(table_key(raw))
        .ok_or(VulkanError::ResourceNotFound { kind, id: raw })
}

/// A device buffer and its persistent mapping, if any
pub(super) struct VulkanBuffer {
    pub alloc: AllocatedBuffer,
    pub kind: BufferKind,
    pub mapped: Option<*mut u8>,
}

/// Where a texture's image came from
pub(super) enum TextureStorage {
    /// Created and destroyed by this device
    Owned(AllocatedImage),
    /// Owned by the swapchain
    Swapchain {
        image: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    },
}

/// A texture table entry
pub(super) struct VulkanTexture {
    pub storage: TextureStorage,
    pub desc: TextureDesc,
    /// Layout the image rests in between uses
    pub layout: vk::ImageLayout,
}

impl VulkanTexture {
    pub fn image(&self) -> vk::Image {
        match &self.storage {
            TextureStorage::Owned(alloc) => alloc.image,
            TextureStorage::Swapchain { image, .. } => *image,
        }
    }

    pub fn view(&self) -> vk::ImageView {
        match &self.storage {
            TextureStorage::Owned(alloc) => alloc.view,
            TextureStorage::Swapchain { view, .. } => *view,
        }
    }

    pub fn format(&self) -> vk::Format {
        match &self.storage {
            TextureStorage::Owned(alloc) => alloc.spec.format,
            TextureStorage::Swapchain { format, .. } => *format,
        }
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        match &self.storage {
            TextureStorage::Owned(alloc) => alloc.spec.aspect,
            TextureStorage::Swapchain { aspect, .. } => *aspect,
        }
    }
}

/// A pipeline and the layout its descriptor sets bind against
pub(super) struct VulkanPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub push_stages: vk::ShaderStageFlags,
}

/// A descriptor set and the pool it came from
pub(super) struct VulkanDescriptorSet {
    pub set: vk::DescriptorSet,
    pub pool: PoolKey,
}

/// A render pass and its clear settings
pub(super) struct VulkanRenderPass {
    pub pass: vk::RenderPass,
    pub clear_color: [f32; 4],
    pub depth: bool,
}

/// Vulkan implementation of [`RenderDevice`]
pub struct VulkanDevice {
    pub(super) buffers: SlotMap<BufferKey, VulkanBuffer>,
    pub(super) textures: SlotMap<TextureKey, VulkanTexture>,
    pub(super) samplers: SlotMap<SamplerKey, vk::Sampler>,
    pub(super) pipelines: SlotMap<PipelineKey, VulkanPipeline>,
    pub(super) pools: SlotMap<PoolKey, vk::DescriptorPool>,
    pub(super) layouts: SlotMap<LayoutKey, vk::DescriptorSetLayout>,
    pub(super) sets: SlotMap<SetKey, VulkanDescriptorSet>,
    pub(super) passes: SlotMap<PassKey, VulkanRenderPass>,
    pub(super) targets: SlotMap<TargetKey, vk::Framebuffer>,
    fences: SlotMap<FenceKey, vk::Fence>,
    semaphores: SlotMap<SemaphoreKey, vk::Semaphore>,

    window_textures: Vec<TextureKey>,
    depth_texture: Option<TextureKey>,

    pub(super) command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    recording: Option<usize>,

    framebuffer_size: (u32, u32),
    shut_down: bool,

    pub(super) swapchain: Option<Swapchain>,
    // Dropped last: every object above belongs to this context
    pub(super) context: VulkanContext,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("gpu", &self.context.physical.name())
            .field("framebuffer_size", &self.framebuffer_size)
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .field("pipelines", &self.pipelines.len())
            .finish_non_exhaustive()
    }
}

impl VulkanDevice {
    /// Bring up Vulkan for a window whose drawable is `width` x `height` pixels
    pub fn new<W>(window: &W, width: u32, height: u32, config: &VulkanRendererConfig) -> VulkanResult<Self>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        let context = VulkanContext::new(window, config)?;
        let swapchain = Swapchain::new(&context, vk::Extent2D { width, height }, vk::SwapchainKHR::null())?;

        let device = context.raw();
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.physical.graphics_family);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None).map_err(VulkanError::Api)? };

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(config.max_frames_in_flight as u32);
        let command_buffers = match unsafe { device.allocate_command_buffers(&allocate_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let extent = swapchain.extent();
        let mut this = Self {
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            pools: SlotMap::with_key(),
            layouts: SlotMap::with_key(),
            sets: SlotMap::with_key(),
            passes: SlotMap::with_key(),
            targets: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            window_textures: Vec::new(),
            depth_texture: None,
            command_pool,
            command_buffers,
            recording: None,
            framebuffer_size: (extent.width, extent.height),
            shut_down: false,
            swapchain: Some(swapchain),
            context,
        };
        this.register_swapchain_textures();

        log::info!(
            "Vulkan device ready on {} ({}x{}, {} frames in flight)",
            this.context.physical.name(),
            extent.width,
            extent.height,
            config.max_frames_in_flight
        );
        Ok(this)
    }

    /// The raw logical device
    pub(super) fn raw(&self) -> &ash::Device {
        self.context.raw()
    }

    /// Command buffer currently recording
    pub(super) fn command_buffer(&self) -> VulkanResult<vk::CommandBuffer> {
        self.recording
            .and_then(|frame| self.command_buffers.get(frame).copied())
            .ok_or_else(|| VulkanError::invalid("no command buffer is recording"))
    }

    /// Run `record` in a one-shot command buffer on the graphics queue
    pub(super) fn one_shot<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = self.raw();
        super::memory::one_shot(device, self.command_pool, self.context.device.graphics_queue, |cb| {
            record(device, cb)
        })
    }

    /// Format shared by the swapchain and every offscreen colour attachment
    pub(super) fn color_format(&self) -> vk::Format {
        self.swapchain
            .as_ref()
            .map_or(vk::Format::B8G8R8A8_UNORM, |swapchain| swapchain.format().format)
    }

    fn register_swapchain_textures(&mut self) {
        for key in self.window_textures.drain(..) {
            self.textures.remove(key);
        }
        if let Some(key) = self.depth_texture.take() {
            self.textures.remove(key);
        }

        let Some(swapchain) = &self.swapchain else {
            return;
        };
        let extent = swapchain.extent();
        let format = swapchain.format().format;
        let desc = TextureDesc {
            writeable: true,
            ..TextureDesc::rgba(extent.width, extent.height)
        };

        for (&image, &view) in swapchain.images().iter().zip(swapchain.image_views()) {
            let key = self.textures.insert(VulkanTexture {
                storage: TextureStorage::Swapchain {
                    image,
                    view,
                    format,
                    aspect: vk::ImageAspectFlags::COLOR,
                },
                desc: desc.clone(),
                layout: vk::ImageLayout::UNDEFINED,
            });
            self.window_textures.push(key);
        }

        let depth = swapchain.depth();
        let key = self.textures.insert(VulkanTexture {
            storage: TextureStorage::Swapchain {
                image: depth.image,
                view: depth.view,
                format: depth.spec.format,
                aspect: depth.spec.aspect,
            },
            desc: TextureDesc {
                format: TextureFormat::Depth,
                ..desc
            },
            layout: vk::ImageLayout::UNDEFINED,
        });
        self.depth_texture = Some(key);
    }

    fn release_all(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let device = self.context.raw().clone();
        unsafe {
            if let Err(e) = device.device_wait_idle() {
                log::warn!("Device wait before teardown failed: {:?}", e);
            }
        }

        let report = |kind: &str, count: usize| {
            if count > 0 {
                log::warn!("{} {} still live at shutdown, destroying", count, kind);
            }
        };
        report("render targets", self.targets.len());
        report("render passes", self.passes.len());
        report("pipelines", self.pipelines.len());
        report("descriptor pools", self.pools.len());
        report("descriptor set layouts", self.layouts.len());
        report("samplers", self.samplers.len());
        report("buffers", self.buffers.len());
        report("fences", self.fences.len());
        report("semaphores", self.semaphores.len());

        unsafe {
            for (_, framebuffer) in self.targets.drain() {
                device.destroy_framebuffer(framebuffer, None);
            }
            for (_, pass) in self.passes.drain() {
                device.destroy_render_pass(pass.pass, None);
            }
            for (_, pipeline) in self.pipelines.drain() {
                device.destroy_pipeline(pipeline.pipeline, None);
                device.destroy_pipeline_layout(pipeline.layout, None);
            }
            self.sets.clear();
            for (_, pool) in self.pools.drain() {
                device.destroy_descriptor_pool(pool, None);
            }
            for (_, layout) in self.layouts.drain() {
                device.destroy_descriptor_set_layout(layout, None);
            }
            for (_, sampler) in self.samplers.drain() {
                device.destroy_sampler(sampler, None);
            }
            for (_, fence) in self.fences.drain() {
                device.destroy_fence(fence, None);
            }
            for (_, semaphore) in self.semaphores.drain() {
                device.destroy_semaphore(semaphore, None);
            }
            device.free_command_buffers(self.command_pool, &self.command_buffers);
            device.destroy_command_pool(self.command_pool, None);
        }
        for (_, buffer) in self.buffers.drain() {
            if buffer.mapped.is_some() {
                unsafe { device.unmap_memory(buffer.alloc.memory) };
            }
            buffer.alloc.destroy(&device);
        }

        let mut leaked_textures = 0;
        for (_, texture) in self.textures.drain() {
            if let TextureStorage::Owned(alloc) = texture.storage {
                leaked_textures += 1;
                alloc.destroy(&device);
            }
        }
        report("textures", leaked_textures);
        self.command_buffers.clear();
        self.window_textures.clear();
        self.depth_texture = None;
        self.swapchain = None;
        log::info!("Vulkan device shut down");
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl FrameDevice for VulkanDevice {
    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.raw().create_fence(&info, None).map_err(VulkanError::Api)? };
        Ok(FenceHandle(raw_handle(self.fences.insert(fence))))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        match self.fences.remove(table_key(fence.0)) {
            Some(raw) => unsafe { self.raw().destroy_fence(raw, None) },
            None => log::warn!("destroy_fence: unknown {}", fence),
        }
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        let info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.raw().create_semaphore(&info, None).map_err(VulkanError::Api)? };
        Ok(SemaphoreHandle(raw_handle(self.semaphores.insert(semaphore))))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        match self.semaphores.remove(table_key(semaphore.0)) {
            Some(raw) => unsafe { self.raw().destroy_semaphore(raw, None) },
            None => log::warn!("destroy_semaphore: unknown {}", semaphore),
        }
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, timeout_ns: u64) -> BackendResult<()> {
        let raw = *lookup(&self.fences, "fence", fence.0)?;
        match unsafe { self.raw().wait_for_fences(&[raw], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RenderError::RenderingFailed(format!(
                "{fence} not signalled within {timeout_ns} ns"
            ))),
            Err(e) => Err(VulkanError::Api(e).into()),
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        let raw = *lookup(&self.fences, "fence", fence.0)?;
        unsafe { self.raw().reset_fences(&[raw]).map_err(VulkanError::Api)? };
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        semaphore: SemaphoreHandle,
        timeout_ns: u64,
    ) -> BackendResult<(u32, SwapchainStatus)> {
        let raw_semaphore = *lookup(&self.semaphores, "semaphore", semaphore.0)?;
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("no swapchain"))?;

        let acquired = unsafe {
            swapchain
                .loader()
                .acquire_next_image(swapchain.handle(), timeout_ns, raw_semaphore, vk::Fence::null())
        };
        let (index, result) = match acquired {
            Ok((index, suboptimal)) => (index, Ok(suboptimal)),
            Err(e) => (0, Err(e)),
        };
        let status = conversions::swapchain_status(result).map_err(VulkanError::Api)?;
        Ok((index, status))
    }

    fn begin_commands(&mut self, frame: usize) -> BackendResult<()> {
        let command_buffer = *self
            .command_buffers
            .get(frame)
            .ok_or_else(|| VulkanError::invalid(format!("frame slot {frame} out of range")))?;
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            let device = self.raw();
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        self.recording = Some(frame);
        Ok(())
    }

    fn end_commands(&mut self, frame: usize) -> BackendResult<()> {
        if self.recording != Some(frame) {
            return Err(VulkanError::invalid(format!("frame slot {frame} is not recording")).into());
        }
        let command_buffer = self.command_buffer()?;
        self.recording = None;
        unsafe { self.raw().end_command_buffer(command_buffer).map_err(VulkanError::Api)? };
        Ok(())
    }

    fn submit(&mut self, info: &SubmitInfo) -> BackendResult<()> {
        let command_buffer = *self
            .command_buffers
            .get(info.frame)
            .ok_or_else(|| VulkanError::invalid(format!("frame slot {} out of range", info.frame)))?;
        let wait = [*lookup(&self.semaphores, "semaphore", info.wait_semaphore.0)?];
        let signal = [*lookup(&self.semaphores, "semaphore", info.signal_semaphore.0)?];
        let fence = *lookup(&self.fences, "fence", info.fence.0)?;
        let stages = [conversions::wait_stage(info.wait_stage)];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal)
            .build();
        unsafe {
            self.raw()
                .queue_submit(self.context.device.graphics_queue, &[submit_info], fence)
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<SwapchainStatus> {
        let wait = [*lookup(&self.semaphores, "semaphore", wait.0)?];
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("no swapchain"))?;
        let swapchains = [swapchain.handle()];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe {
            swapchain
                .loader()
                .queue_present(self.context.device.present_queue, &present_info)
        };
        Ok(conversions::swapchain_status(result).map_err(VulkanError::Api)?)
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> BackendResult<u32> {
        unsafe { self.raw().device_wait_idle().map_err(VulkanError::Api)? };

        let old = self.swapchain.take();
        let old_handle = old.as_ref().map_or(vk::SwapchainKHR::null(), Swapchain::handle);
        match Swapchain::new(&self.context, vk::Extent2D { width, height }, old_handle) {
            Ok(swapchain) => {
                drop(old);
                let extent = swapchain.extent();
                let count = swapchain.image_count();
                self.swapchain = Some(swapchain);
                self.framebuffer_size = (extent.width, extent.height);
                self.register_swapchain_textures();
                Ok(count)
            }
            Err(e) => {
                log::error!("Swapchain recreation at {}x{} failed: {}", width, height, e);
                self.swapchain = old;
                Err(e.into())
            }
        }
    }

    fn swapchain_image_count(&self) -> u32 {
        self.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> BackendResult<()> {
        let command_buffer = self.command_buffer()?;
        // Negative height flips Y so clip space points up
        let viewport = vk::Viewport {
            x: 0.0,
            y: height as f32,
            width: width as f32,
            height: -(height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D { width, height },
        };
        unsafe {
            self.raw().cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.raw().cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        unsafe { self.raw().device_wait_idle().map_err(VulkanError::Api)? };
        Ok(())
    }
}

impl RenderDevice for VulkanDevice {
    fn backend_name(&self) -> &str {
        "vulkan"
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer_size
    }

    fn shutdown(&mut self) {
        self.release_all();
    }
}

impl VulkanDevice {
    /// Swapchain colour image `image_index` as a texture handle
    pub(super) fn window_texture(&self, image_index: u32) -> VulkanResult<TextureHandle> {
        self.window_textures
            .get(image_index as usize)
            .map(|&key| TextureHandle(raw_handle(key)))
            .ok_or_else(|| VulkanError::invalid(format!("swapchain image {image_index} out of range")))
    }

    /// Swapchain depth image as a texture handle
    pub(super) fn depth_texture(&self) -> VulkanResult<TextureHandle> {
        self.depth_texture
            .map(|key| TextureHandle(raw_handle(key)))
            .ok_or_else(|| VulkanError::invalid("no depth attachment"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_round_trip_through_tables() {
        let mut table: SlotMap<FenceKey, u32> = SlotMap::with_key();
        let key = table.insert(7);
        let handle = FenceHandle(raw_handle(key));
        assert_ne!(handle.0, 0);
        assert_eq!(*lookup(&table, "fence", handle.0).unwrap(), 7);
        *lookup_mut(&mut table, "fence", handle.0).unwrap() += 1;
        assert_eq!(table[key], 8);

        table.remove(key);
        let reused = table.insert(9);
        assert_ne!(raw_handle(reused), handle.0);
        assert!(lookup_mut(&mut table, "fence", handle.0).is_err());
        assert!(matches!(
            lookup(&table, "fence", handle.0),
            Err(VulkanError::ResourceNotFound { kind: "fence", .. })
        ));
    }
}
