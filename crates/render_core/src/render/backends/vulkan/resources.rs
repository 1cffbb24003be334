//! Buffer and texture operations of the Vulkan device
//!
//! Host-visible buffers are written through a mapping, device-local ones only
//! through `copy_buffer`. Texture uploads stage through a temporary buffer and
//! leave the image in its resting layout: shader-read for sampled textures,
//! attachment-optimal for writeable ones.

use ash::vk;

use super::context::{VulkanError, VulkanResult};
use super::conversions;
use super::device::{lookup, lookup_mut, raw_handle, table_key, TextureStorage, VulkanBuffer, VulkanDevice, VulkanTexture};
use super::memory::{record_transition, AllocatedBuffer, AllocatedImage, ImageSpec};
use super::swapchain::depth_aspect;
use crate::render::api::*;

const RGBA: u32 = 4;

fn check_range(offset: u64, size: u64, capacity: u64) -> BackendResult<()> {
    match offset.checked_add(size) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(RenderError::OutOfRange { offset, size, capacity }),
    }
}

/// Image an upload lands in
#[derive(Debug, Clone, Copy)]
struct UploadTarget {
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    width: u32,
    layers: u32,
    /// Layout before and after the copy
    from: vk::ImageLayout,
    to: vk::ImageLayout,
}

/// A run of whole rows within one layer of an RGBA image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowSpan {
    layer: u32,
    layer_count: u32,
    first_row: u32,
    rows: u32,
}

/// Map a byte range of tightly packed RGBA data onto image rows
fn row_span(width: u32, height: u32, layers: u32, offset: u64, len: u64) -> Option<RowSpan> {
    let row_bytes = u64::from(width) * u64::from(RGBA);
    let layer_bytes = row_bytes * u64::from(height);
    if row_bytes == 0 || offset % row_bytes != 0 || len % row_bytes != 0 || len == 0 {
        return None;
    }
    if offset == 0 && len == layer_bytes * u64::from(layers) {
        return Some(RowSpan {
            layer: 0,
            layer_count: layers,
            first_row: 0,
            rows: height,
        });
    }
    let layer = offset / layer_bytes;
    let first_row = (offset % layer_bytes) / row_bytes;
    let rows = len / row_bytes;
    if layer >= u64::from(layers) || first_row + rows > u64::from(height) {
        return None;
    }
    Some(RowSpan {
        layer: layer as u32,
        layer_count: 1,
        first_row: first_row as u32,
        rows: rows as u32,
    })
}

impl VulkanDevice {
    fn image_spec(&self, desc: &TextureDesc) -> ImageSpec {
        let cube = desc.kind == TextureKind::Cube;
        match desc.format {
            TextureFormat::Depth => {
                let format = self.context.physical.depth_format;
                ImageSpec {
                    width: desc.width,
                    height: desc.height,
                    format,
                    usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                    aspect: depth_aspect(format),
                    cube,
                }
            }
            TextureFormat::Rgba8 if desc.writeable => ImageSpec {
                width: desc.width,
                height: desc.height,
                format: self.color_format(),
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
                aspect: vk::ImageAspectFlags::COLOR,
                cube,
            },
            TextureFormat::Rgba8 => ImageSpec {
                width: desc.width,
                height: desc.height,
                format: vk::Format::R8G8B8A8_UNORM,
                usage: vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
                aspect: vk::ImageAspectFlags::COLOR,
                cube,
            },
        }
    }

    fn resting_layout(desc: &TextureDesc) -> vk::ImageLayout {
        match (desc.format, desc.writeable) {
            (TextureFormat::Depth, _) => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            (TextureFormat::Rgba8, true) => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            (TextureFormat::Rgba8, false) => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    fn staging_buffer(&self, data: &[u8]) -> VulkanResult<AllocatedBuffer> {
        let staging = AllocatedBuffer::new(
            self.raw(),
            &self.context.physical,
            data.len() as vk::DeviceSize,
            conversions::buffer_usage(BufferKind::Staging),
            &conversions::memory_candidates(BufferKind::Staging),
        )?;
        if let Err(e) = staging.write(self.raw(), 0, data) {
            staging.destroy(self.raw());
            return Err(e);
        }
        Ok(staging)
    }

    /// Copy RGBA rows into an image and return it to `layout`
    fn upload_rows(&self, target: UploadTarget, span: RowSpan, data: &[u8]) -> VulkanResult<()> {
        let UploadTarget {
            image,
            aspect,
            width,
            layers,
            from,
            to,
        } = target;
        let staging = self.staging_buffer(data)?;
        let range = super::memory::subresource_range(aspect, layers);
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: 0,
                base_array_layer: span.layer,
                layer_count: span.layer_count,
            })
            .image_offset(vk::Offset3D {
                x: 0,
                y: span.first_row as i32,
                z: 0,
            })
            .image_extent(vk::Extent3D {
                width,
                height: span.rows,
                depth: 1,
            })
            .build();

        let result = self.one_shot(|device, cb| {
            record_transition(device, cb, image, range, from, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cb,
                    staging.buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            record_transition(device, cb, image, range, vk::ImageLayout::TRANSFER_DST_OPTIMAL, to);
        });
        staging.destroy(self.raw());
        result
    }

    /// Allocate an image for `desc` and bring it to its resting layout
    fn create_image(&self, desc: &TextureDesc, pixels: Option<&[u8]>) -> VulkanResult<VulkanTexture> {
        let spec = self.image_spec(desc);
        let alloc = AllocatedImage::new(self.raw(), &self.context.physical, spec)?;
        let layout = Self::resting_layout(desc);

        let prepared = match pixels {
            Some(rgba) => {
                let span = RowSpan {
                    layer: 0,
                    layer_count: spec.layers(),
                    first_row: 0,
                    rows: spec.height,
                };
                let target = UploadTarget {
                    image: alloc.image,
                    aspect: spec.aspect,
                    width: spec.width,
                    layers: spec.layers(),
                    from: vk::ImageLayout::UNDEFINED,
                    to: layout,
                };
                self.upload_rows(target, span, rgba)
            }
            None => self.one_shot(|device, cb| {
                record_transition(device, cb, alloc.image, alloc.range(), vk::ImageLayout::UNDEFINED, layout);
            }),
        };
        if let Err(e) = prepared {
            alloc.destroy(self.raw());
            return Err(e);
        }

        Ok(VulkanTexture {
            storage: TextureStorage::Owned(alloc),
            desc: desc.clone(),
            layout,
        })
    }
}

impl BufferDevice for VulkanDevice {
    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> BackendResult<GpuBuffer> {
        if !kind.is_supported() {
            return Err(RenderError::ResourceCreationFailed(format!("{kind:?} buffers are not supported")));
        }
        let alloc = AllocatedBuffer::new(
            self.raw(),
            &self.context.physical,
            size,
            conversions::buffer_usage(kind),
            &conversions::memory_candidates(kind),
        )?;
        let memory = conversions::memory_properties(alloc.properties);
        let key = self.buffers.insert(VulkanBuffer {
            alloc,
            kind,
            mapped: None,
        });
        log::trace!("Created {:?} buffer of {} bytes ({:?})", kind, size, memory);
        Ok(GpuBuffer {
            handle: BufferHandle(raw_handle(key)),
            size,
            memory,
        })
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let Some(entry) = self.buffers.remove(table_key(buffer.0)) else {
            log::warn!("destroy_buffer: unknown {}", buffer);
            return;
        };
        if entry.mapped.is_some() {
            unsafe { self.raw().unmap_memory(entry.alloc.memory) };
        }
        entry.alloc.destroy(self.raw());
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> BackendResult<()> {
        let device = self.raw().clone();
        let entry = lookup_mut(&mut self.buffers, "buffer", buffer.0)?;
        if entry.mapped.is_some() {
            return Ok(());
        }
        if !entry.alloc.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(VulkanError::invalid(format!("{buffer} is not host visible")).into());
        }
        entry.mapped = Some(entry.alloc.map(&device)?);
        Ok(())
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) {
        let device = self.raw().clone();
        match lookup_mut(&mut self.buffers, "buffer", buffer.0) {
            Ok(entry) => {
                if entry.mapped.take().is_some() {
                    unsafe { device.unmap_memory(entry.alloc.memory) };
                }
            }
            Err(e) => log::warn!("unmap_buffer: {}", e),
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let entry = lookup(&self.buffers, "buffer", buffer.0)?;
        check_range(offset, data.len() as u64, entry.alloc.size)?;
        match entry.mapped {
            Some(base) => unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(offset as usize), data.len());
            },
            None if entry.alloc.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) => {
                entry.alloc.write(self.raw(), offset, data)?;
            }
            None => return Err(VulkanError::invalid(format!("{buffer} is not host visible")).into()),
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let entry = lookup(&self.buffers, "buffer", buffer.0)?;
        check_range(offset, size, entry.alloc.size)?;
        if !entry.alloc.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(VulkanError::invalid(format!("{buffer} is not host visible")).into());
        }
        Ok(entry.alloc.read(self.raw(), offset, size as usize)?)
    }

    fn flush_buffer(&mut self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<()> {
        let entry = lookup(&self.buffers, "buffer", buffer.0)?;
        check_range(offset, size, entry.alloc.size)?;
        // Unmapped writes were flushed when they were made
        if entry.mapped.is_none() || entry.alloc.is_coherent() {
            return Ok(());
        }
        let atom = self.context.physical.properties.limits.non_coherent_atom_size;
        let (start, len) = super::memory::align_flush_range(offset, size, atom, entry.alloc.size);
        let range = vk::MappedMemoryRange::builder()
            .memory(entry.alloc.memory)
            .offset(start)
            .size(len)
            .build();
        unsafe {
            self.raw()
                .flush_mapped_memory_ranges(&[range])
                .map_err(VulkanError::Api)?;
        }
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
        let src = lookup(&self.buffers, "buffer", source.0)?.alloc;
        let dst = lookup(&self.buffers, "buffer", dest.0)?.alloc;
        check_range(source_offset, size, src.size)?;
        check_range(dest_offset, size, dst.size)?;

        let region = vk::BufferCopy {
            src_offset: source_offset,
            dst_offset: dest_offset,
            size,
        };
        self.one_shot(|device, cb| unsafe {
            device.cmd_copy_buffer(cb, src.buffer, dst.buffer, &[region]);
        })?;
        Ok(())
    }

    fn bind_buffer(&mut self, buffer: BufferHandle, kind: BufferKind, offset: u64) -> BackendResult<()> {
        let cb = self.command_buffer()?;
        let raw = lookup(&self.buffers, "buffer", buffer.0)?.alloc.buffer;
        unsafe {
            match kind {
                BufferKind::Vertex => self.raw().cmd_bind_vertex_buffers(cb, 0, &[raw], &[offset]),
                BufferKind::Index => self.raw().cmd_bind_index_buffer(cb, raw, offset, vk::IndexType::UINT32),
                other => {
                    return Err(VulkanError::invalid(format!("cannot bind a {other:?} buffer for drawing")).into());
                }
            }
        }
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
        if bind_only {
            return Ok(());
        }
        let cb = self.command_buffer()?;
        unsafe {
            match kind {
                BufferKind::Index => self.raw().cmd_draw_indexed(cb, element_count, 1, 0, 0, 0),
                _ => self.raw().cmd_draw(cb, element_count, 1, 0, 0),
            }
        }
        Ok(())
    }
}

impl TextureDevice for VulkanDevice {
    fn create_texture(&mut self, desc: &TextureDesc, pixels: &[u8]) -> BackendResult<TextureHandle> {
        if desc.format == TextureFormat::Depth {
            return Err(RenderError::ResourceCreationFailed(
                "depth textures cannot be created from pixel data".to_string(),
            ));
        }
        if pixels.len() != desc.data_size() {
            return Err(RenderError::ResourceCreationFailed(format!(
                "texture data is {} bytes, expected {}",
                pixels.len(),
                desc.data_size()
            )));
        }
        let rgba = conversions::expand_to_rgba(pixels, desc.channel_count).ok_or_else(|| {
            RenderError::ResourceCreationFailed(format!("unsupported channel count {}", desc.channel_count))
        })?;

        let texture = self.create_image(desc, Some(&rgba))?;
        let key = self.textures.insert(texture);
        Ok(TextureHandle(raw_handle(key)))
    }

    fn create_writeable_texture(&mut self, desc: &TextureDesc) -> BackendResult<TextureHandle> {
        let desc = TextureDesc {
            writeable: true,
            ..desc.clone()
        };
        let texture = self.create_image(&desc, None)?;
        let key = self.textures.insert(texture);
        Ok(TextureHandle(raw_handle(key)))
    }

    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> BackendResult<()> {
        let entry = lookup(&self.textures, "texture", texture.0)?;
        if !matches!(entry.storage, TextureStorage::Owned(_)) {
            return Err(VulkanError::invalid("swapchain images are resized with the swapchain").into());
        }
        let desc = TextureDesc {
            width,
            height,
            ..entry.desc.clone()
        };

        let replacement = self.create_image(&desc, None)?;
        let device = self.raw().clone();
        let entry = lookup_mut(&mut self.textures, "texture", texture.0)?;
        let old = std::mem::replace(entry, replacement);
        if let TextureStorage::Owned(alloc) = old.storage {
            alloc.destroy(&device);
        }
        Ok(())
    }

    fn write_texture(&mut self, texture: TextureHandle, offset: u32, data: &[u8]) -> BackendResult<()> {
        let entry = lookup(&self.textures, "texture", texture.0)?;
        let desc = &entry.desc;
        if desc.format == TextureFormat::Depth {
            return Err(VulkanError::invalid("depth textures cannot be written").into());
        }
        let channels = u32::from(desc.channel_count.max(1));
        let rgba = conversions::expand_to_rgba(data, desc.channel_count)
            .ok_or_else(|| VulkanError::invalid(format!("{} bytes is not whole pixels", data.len())))?;
        let rgba_offset = u64::from(offset / channels * RGBA);
        let layers = if desc.kind == TextureKind::Cube { 6 } else { 1 };

        let span = row_span(desc.width, desc.height, layers, rgba_offset, rgba.len() as u64).ok_or_else(|| {
            VulkanError::invalid(format!(
                "write of {} bytes at {} does not cover whole rows of {}",
                data.len(),
                offset,
                texture
            ))
        })?;
        let target = UploadTarget {
            image: entry.image(),
            aspect: entry.aspect(),
            width: desc.width,
            layers,
            from: entry.layout,
            to: entry.layout,
        };
        self.upload_rows(target, span, &rgba)?;
        Ok(())
    }

    fn read_texture_pixel(&mut self, texture: TextureHandle, x: u32, y: u32) -> BackendResult<[u8; 4]> {
        let entry = lookup(&self.textures, "texture", texture.0)?;
        if x >= entry.desc.width || y >= entry.desc.height {
            return Err(RenderError::OutOfRange {
                offset: u64::from(y) * u64::from(entry.desc.width) + u64::from(x),
                size: 1,
                capacity: u64::from(entry.desc.width) * u64::from(entry.desc.height),
            });
        }
        if entry.desc.format == TextureFormat::Depth {
            return Err(VulkanError::invalid("depth textures cannot be read back").into());
        }
        // Attachments that have never been rendered to hold nothing readable
        if entry.layout == vk::ImageLayout::UNDEFINED {
            return Ok([0; 4]);
        }

        let image = entry.image();
        let layout = entry.layout;
        let format = entry.format();
        let range = super::memory::subresource_range(entry.aspect(), 1);

        let readback = AllocatedBuffer::new(
            self.raw(),
            &self.context.physical,
            u64::from(RGBA),
            conversions::buffer_usage(BufferKind::Read),
            &conversions::memory_candidates(BufferKind::Read),
        )?;
        let region = vk::BufferImageCopy::builder()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D {
                x: x as i32,
                y: y as i32,
                z: 0,
            })
            .image_extent(vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            })
            .build();

        let copied = self.one_shot(|device, cb| {
            record_transition(device, cb, image, range, layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            unsafe {
                device.cmd_copy_image_to_buffer(
                    cb,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    readback.buffer,
                    &[region],
                );
            }
            record_transition(device, cb, image, range, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, layout);
        });
        let bytes = copied.and_then(|()| readback.read(self.raw(), 0, RGBA as usize));
        readback.destroy(self.raw());

        let bytes = bytes?;
        let pixel = [bytes[0], bytes[1], bytes[2], bytes[3]];
        Ok(conversions::to_rgba(format, pixel))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let key = table_key(texture.0);
        match self.textures.get(key).map(|entry| &entry.storage) {
            None => log::warn!("destroy_texture: unknown {}", texture),
            Some(TextureStorage::Swapchain { .. }) => {
                log::warn!("destroy_texture: {} belongs to the swapchain, ignored", texture);
            }
            Some(TextureStorage::Owned(_)) => {
                if let Some(VulkanTexture {
                    storage: TextureStorage::Owned(alloc),
                    ..
                }) = self.textures.remove(key)
                {
                    alloc.destroy(self.raw());
                }
            }
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> BackendResult<SamplerHandle> {
        let info = vk::SamplerCreateInfo::builder()
            .min_filter(conversions::filter(desc.filter_minify))
            .mag_filter(conversions::filter(desc.filter_magnify))
            .address_mode_u(conversions::address_mode(desc.repeat_u))
            .address_mode_v(conversions::address_mode(desc.repeat_v))
            .address_mode_w(conversions::address_mode(desc.repeat_w))
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);
        let sampler = unsafe { self.raw().create_sampler(&info, None).map_err(VulkanError::Api)? };
        Ok(SamplerHandle(raw_handle(self.samplers.insert(sampler))))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        match self.samplers.remove(table_key(sampler.0)) {
            Some(raw) => unsafe { self.raw().destroy_sampler(raw, None) },
            None => log::warn!("destroy_sampler: unknown {}", sampler),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_span_full_image() {
        let span = row_span(4, 2, 6, 0, 4 * 4 * 2 * 6).unwrap();
        assert_eq!(span.layer_count, 6);
        assert_eq!(span.rows, 2);
    }

    #[test]
    fn test_row_span_partial_rows() {
        // 4x4 RGBA: 16 bytes per row, 64 per layer
        let span = row_span(4, 4, 1, 32, 32).unwrap();
        assert_eq!(
            span,
            RowSpan {
                layer: 0,
                layer_count: 1,
                first_row: 2,
                rows: 2
            }
        );
        let span = row_span(4, 4, 6, 64 * 3 + 16, 16).unwrap();
        assert_eq!((span.layer, span.first_row, span.rows), (3, 1, 1));
    }

    #[test]
    fn test_row_span_rejects_partial_rows() {
        assert!(row_span(4, 4, 1, 4, 16).is_none());
        assert!(row_span(4, 4, 1, 0, 8).is_none());
        assert!(row_span(4, 4, 1, 48, 32).is_none());
        assert!(row_span(4, 4, 1, 0, 0).is_none());
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(0, 16, 16).is_ok());
        assert!(matches!(
            check_range(8, 16, 16),
            Err(RenderError::OutOfRange { offset: 8, size: 16, capacity: 16 })
        ));
        assert!(check_range(u64::MAX, 2, 16).is_err());
    }
}
