//! Render buffers: device buffers with an optional free-list sub-allocator
//!
//! A [`RenderBuffer`] is the arena that vertex, index and uniform storage is
//! carved out of. Ranges are reserved with [`RenderBuffer::allocate`], filled
//! with [`RenderBuffer::load_range`] and returned with [`RenderBuffer::free`].
//!
//! When the backing memory is not host-visible, loads and reads go through an
//! ephemeral staging buffer and a blocking device copy.

use super::freelist::FreeList;
use crate::render::api::{BufferKind, GpuBuffer, RenderDevice, RenderError, RenderResult};

/// A device buffer managed as a sub-allocated arena
#[derive(Debug)]
pub struct RenderBuffer {
    name: String,
    kind: BufferKind,
    total_size: u64,
    buffer: GpuBuffer,
    freelist: Option<FreeList>,
    mapped: bool,
}

impl RenderBuffer {
    /// Create a buffer of `size` bytes; `use_freelist` enables [`RenderBuffer::allocate`]
    pub fn create(
        device: &mut dyn RenderDevice,
        name: impl Into<String>,
        kind: BufferKind,
        size: u64,
        use_freelist: bool,
    ) -> RenderResult<Self> {
        let name = name.into();
        if !kind.is_supported() {
            log::error!("Render buffer '{}' requested with unsupported kind {:?}", name, kind);
            return Err(RenderError::InvalidConfig(format!(
                "buffer kind {kind:?} cannot back a render buffer"
            )));
        }
        if size == 0 {
            return Err(RenderError::InvalidConfig(format!("render buffer '{name}' has zero size")));
        }

        let buffer = device.create_buffer(kind, size)?;
        log::debug!("Created render buffer '{}' ({:?}, {} bytes)", name, kind, size);

        Ok(Self {
            name,
            kind,
            total_size: size,
            buffer,
            freelist: use_freelist.then(|| FreeList::new(size)),
            mapped: false,
        })
    }

    /// Destroy the device buffer
    pub fn destroy(mut self, device: &mut dyn RenderDevice) {
        if self.mapped {
            self.unmap(device);
        }
        device.destroy_buffer(self.buffer.handle);
        log::debug!("Destroyed render buffer '{}'", self.name);
    }

    /// Reserve `size` bytes and return their offset
    ///
    /// Fails with [`RenderError::ResourceExhausted`] when no free block is large
    /// enough; the caller decides whether to [`RenderBuffer::resize`] and retry.
    pub fn allocate(&mut self, size: u64) -> RenderResult<u64> {
        let total_size = self.total_size;
        let Some(freelist) = self.freelist.as_mut() else {
            log::warn!("Render buffer '{}' has no free list; allocation uses offset 0", self.name);
            return if size <= total_size {
                Ok(0)
            } else {
                Err(RenderError::OutOfRange { offset: 0, size, capacity: total_size })
            };
        };

        freelist.allocate(size).ok_or_else(|| {
            log::warn!(
                "Render buffer '{}' cannot fit {} bytes ({} free)",
                self.name,
                size,
                freelist.free_space()
            );
            RenderError::ResourceExhausted {
                kind: "render buffer range",
                capacity: usize::try_from(total_size).unwrap_or(usize::MAX),
            }
        })
    }

    /// Return a range previously handed out by [`RenderBuffer::allocate`]
    pub fn free(&mut self, offset: u64, size: u64) -> RenderResult<()> {
        match self.freelist.as_mut() {
            Some(freelist) => freelist.free(offset, size),
            None => {
                log::warn!("Render buffer '{}' has no free list; free ignored", self.name);
                Ok(())
            }
        }
    }

    /// Grow the buffer, preserving its contents at identical offsets
    pub fn resize(&mut self, device: &mut dyn RenderDevice, new_size: u64) -> RenderResult<()> {
        if new_size < self.total_size {
            log::error!(
                "Render buffer '{}' cannot shrink from {} to {} bytes",
                self.name,
                self.total_size,
                new_size
            );
            return Err(RenderError::InvalidState(format!(
                "render buffer '{}' can only grow",
                self.name
            )));
        }
        if new_size == self.total_size {
            return Ok(());
        }

        let replacement = device.create_buffer(self.kind, new_size)?;
        if let Err(e) = device.copy_buffer(self.buffer.handle, 0, replacement.handle, 0, self.total_size) {
            device.destroy_buffer(replacement.handle);
            return Err(e);
        }

        if let Some(freelist) = self.freelist.as_mut() {
            freelist.resize(new_size)?;
        }

        let was_mapped = self.mapped;
        if was_mapped {
            self.unmap(device);
        }
        device.destroy_buffer(self.buffer.handle);
        self.buffer = replacement;
        self.total_size = new_size;
        if was_mapped {
            self.map(device)?;
        }

        log::debug!("Resized render buffer '{}' to {} bytes", self.name, new_size);
        Ok(())
    }

    /// Bind the buffer at `offset` in the current command buffer
    pub fn bind(&self, device: &mut dyn RenderDevice, offset: u64) -> RenderResult<()> {
        device.bind_buffer(self.buffer.handle, self.kind, offset)
    }

    /// Release a binding made with [`bind`](Self::bind)
    ///
    /// Vertex and index bindings stay in the command buffer until the next
    /// bind, so there is nothing to undo on the device.
    pub fn unbind(&self, _device: &mut dyn RenderDevice) -> RenderResult<()> {
        log::trace!("Unbound render buffer '{}'", self.name);
        Ok(())
    }

    /// Persistently map the buffer (host-visible memory only)
    pub fn map(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        if !self.buffer.memory.is_host_visible() {
            return Err(RenderError::InvalidState(format!(
                "render buffer '{}' is not host-visible and cannot be mapped",
                self.name
            )));
        }
        if !self.mapped {
            device.map_buffer(self.buffer.handle)?;
            self.mapped = true;
        }
        Ok(())
    }

    /// Undo [`RenderBuffer::map`]
    pub fn unmap(&mut self, device: &mut dyn RenderDevice) {
        if self.mapped {
            device.unmap_buffer(self.buffer.handle);
            self.mapped = false;
        }
    }

    /// Flush a host-written range; a no-op on coherent memory
    pub fn flush(&self, device: &mut dyn RenderDevice, offset: u64, size: u64) -> RenderResult<()> {
        self.check_range(offset, size)?;
        if self.buffer.memory.needs_flush() {
            device.flush_buffer(self.buffer.handle, offset, size)?;
        }
        Ok(())
    }

    /// Upload `data` at `offset`
    pub fn load_range(&self, device: &mut dyn RenderDevice, offset: u64, data: &[u8]) -> RenderResult<()> {
        let size = data.len() as u64;
        self.check_range(offset, size)?;
        if size == 0 {
            return Ok(());
        }

        if self.buffer.memory.is_host_visible() {
            device.write_buffer(self.buffer.handle, offset, data)?;
            return self.flush(device, offset, size);
        }

        let staging = device.create_buffer(BufferKind::Staging, size)?;
        let result = device
            .write_buffer(staging.handle, 0, data)
            .and_then(|()| device.copy_buffer(staging.handle, 0, self.buffer.handle, offset, size));
        device.destroy_buffer(staging.handle);
        result
    }

    /// Download `size` bytes starting at `offset`
    pub fn read_range(&self, device: &mut dyn RenderDevice, offset: u64, size: u64) -> RenderResult<Vec<u8>> {
        self.check_range(offset, size)?;
        if size == 0 {
            return Ok(Vec::new());
        }

        if self.buffer.memory.is_host_visible() {
            return device.read_buffer(self.buffer.handle, offset, size);
        }

        let readback = device.create_buffer(BufferKind::Read, size)?;
        let result = device
            .copy_buffer(self.buffer.handle, offset, readback.handle, 0, size)
            .and_then(|()| device.read_buffer(readback.handle, 0, size));
        device.destroy_buffer(readback.handle);
        result
    }

    /// Copy a range from this buffer into `dest`
    pub fn copy_range(
        &self,
        device: &mut dyn RenderDevice,
        source_offset: u64,
        dest: &RenderBuffer,
        dest_offset: u64,
        size: u64,
    ) -> RenderResult<()> {
        self.check_range(source_offset, size)?;
        dest.check_range(dest_offset, size)?;
        device.copy_buffer(self.buffer.handle, source_offset, dest.buffer.handle, dest_offset, size)
    }

    /// Bind the buffer at `offset` and, unless `bind_only`, draw `element_count` elements
    pub fn draw(
        &self,
        device: &mut dyn RenderDevice,
        offset: u64,
        element_count: u32,
        bind_only: bool,
    ) -> RenderResult<()> {
        match self.kind {
            BufferKind::Vertex | BufferKind::Index => {
                device.draw_buffer(self.buffer.handle, self.kind, offset, element_count, bind_only)
            }
            kind => Err(RenderError::InvalidState(format!(
                "render buffer '{}' of kind {kind:?} cannot be drawn",
                self.name
            ))),
        }
    }

    fn check_range(&self, offset: u64, size: u64) -> RenderResult<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.total_size => Ok(()),
            _ => Err(RenderError::OutOfRange { offset, size, capacity: self.total_size }),
        }
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffer kind
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Capacity in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// The backing device buffer
    pub fn gpu_buffer(&self) -> &GpuBuffer {
        &self.buffer
    }

    /// Whether the buffer is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Free bytes according to the free list (whole buffer when there is none)
    pub fn free_space(&self) -> u64 {
        self.freelist.as_ref().map_or(self.total_size, FreeList::free_space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{DeviceCall, HeadlessDevice};

    #[test]
    fn test_rejects_unsupported_kinds() {
        let mut device = HeadlessDevice::new(800, 600);
        assert!(RenderBuffer::create(&mut device, "bad", BufferKind::Unknown, 64, true).is_err());
        assert!(RenderBuffer::create(&mut device, "bad", BufferKind::Storage, 64, true).is_err());
        assert!(RenderBuffer::create(&mut device, "empty", BufferKind::Vertex, 0, true).is_err());
    }

    #[test]
    fn test_device_local_load_goes_through_staging() {
        let mut device = HeadlessDevice::new(800, 600);
        let buffer = RenderBuffer::create(&mut device, "vertices", BufferKind::Vertex, 256, true).unwrap();
        device.clear_calls();

        buffer.load_range(&mut device, 16, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::CreateBuffer { kind: BufferKind::Staging, .. })), 1);
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::CopyBuffer { .. })), 1);
        assert_eq!(device.live_buffer_count(), 1);

        let bytes = buffer.read_range(&mut device, 16, 4).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::CreateBuffer { kind: BufferKind::Read, .. })), 1);
        assert_eq!(device.live_buffer_count(), 1);
    }

    #[test]
    fn test_host_visible_load_writes_directly() {
        let mut device = HeadlessDevice::new(800, 600);
        let mut buffer = RenderBuffer::create(&mut device, "uniforms", BufferKind::Uniform, 256, true).unwrap();
        buffer.map(&mut device).unwrap();
        device.clear_calls();

        buffer.load_range(&mut device, 0, &[9; 8]).unwrap();
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::CopyBuffer { .. })), 0);
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::FlushBuffer { .. })), 1);
        assert_eq!(buffer.read_range(&mut device, 0, 8).unwrap(), vec![9; 8]);
    }

    #[test]
    fn test_resize_preserves_contents() {
        let mut device = HeadlessDevice::new(800, 600);
        let mut buffer = RenderBuffer::create(&mut device, "indices", BufferKind::Index, 64, true).unwrap();
        let a = buffer.allocate(32).unwrap();
        let b = buffer.allocate(32).unwrap();
        buffer.load_range(&mut device, a, &[0xAA; 32]).unwrap();
        buffer.load_range(&mut device, b, &[0xBB; 32]).unwrap();
        assert!(buffer.allocate(1).is_err());

        buffer.resize(&mut device, 128).unwrap();
        assert_eq!(buffer.total_size(), 128);
        assert_eq!(buffer.read_range(&mut device, a, 32).unwrap(), vec![0xAA; 32]);
        assert_eq!(buffer.read_range(&mut device, b, 32).unwrap(), vec![0xBB; 32]);
        assert_eq!(buffer.allocate(64).unwrap(), 64);
        assert_eq!(device.live_buffer_count(), 1);

        assert!(matches!(buffer.resize(&mut device, 100), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn test_out_of_range_load() {
        let mut device = HeadlessDevice::new(800, 600);
        let buffer = RenderBuffer::create(&mut device, "vertices", BufferKind::Vertex, 16, false).unwrap();
        let result = buffer.load_range(&mut device, 12, &[0; 8]);
        assert!(matches!(result, Err(RenderError::OutOfRange { offset: 12, size: 8, capacity: 16 })));
    }

    #[test]
    fn test_copy_range_between_buffers() {
        let mut device = HeadlessDevice::new(800, 600);
        let source = RenderBuffer::create(&mut device, "a", BufferKind::Vertex, 64, true).unwrap();
        let dest = RenderBuffer::create(&mut device, "b", BufferKind::Vertex, 64, true).unwrap();
        source.load_range(&mut device, 0, &[7; 16]).unwrap();
        source.copy_range(&mut device, 0, &dest, 32, 16).unwrap();
        assert_eq!(dest.read_range(&mut device, 32, 16).unwrap(), vec![7; 16]);
    }

    #[test]
    fn test_draw_only_vertex_and_index() {
        let mut device = HeadlessDevice::new(800, 600);
        let uniforms = RenderBuffer::create(&mut device, "u", BufferKind::Uniform, 64, false).unwrap();
        assert!(uniforms.draw(&mut device, 0, 3, false).is_err());

        let vertices = RenderBuffer::create(&mut device, "v", BufferKind::Vertex, 64, false).unwrap();
        vertices.draw(&mut device, 0, 3, false).unwrap();
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::Draw { element_count: 3, .. })), 1);
    }

    #[test]
    fn test_bind_and_unbind() {
        let mut device = HeadlessDevice::new(800, 600);
        let indices = RenderBuffer::create(&mut device, "i", BufferKind::Index, 64, false).unwrap();
        indices.bind(&mut device, 16).unwrap();
        indices.unbind(&mut device).unwrap();
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::BindBuffer { offset: 16, .. })), 1);
    }
}
