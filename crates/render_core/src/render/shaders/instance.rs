//! Instance slot pool
//!
//! Every shader with instance-scope uniforms owns a fixed table of instance
//! slots, one per material, skybox or pickable object using the shader. A slot
//! owns a private range of the shader's uniform buffer and one descriptor set
//! per frame in flight.

use crate::render::api::{
    DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, RenderDevice, RenderError, RenderResult,
    TextureBinding,
};
use crate::render::arena::RenderBuffer;

/// Instance slots available per shader
pub const MAX_INSTANCES: usize = 1024;

/// Index of an instance slot within its shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

/// A live instance slot
#[derive(Debug, Clone)]
pub struct InstanceSlot {
    /// Start of this instance's uniform range
    pub ubo_offset: u64,
    /// One descriptor set per frame in flight
    pub descriptor_sets: Vec<DescriptorSetHandle>,
    /// Generation last written into each frame's uniform descriptor (`None` = never)
    pub ubo_generations: Vec<Option<u32>>,
    /// Current generation of the instance's uniform binding
    pub generation: u32,
    /// Instance texture maps by sampler location
    pub texture_maps: Vec<Option<TextureBinding>>,
}

/// What an instance acquire needs from its shader
pub(crate) struct InstanceResources<'a> {
    pub uniform_buffer: &'a mut RenderBuffer,
    pub ubo_stride: u64,
    pub descriptor_pool: DescriptorPoolHandle,
    pub layout: Option<DescriptorSetLayoutHandle>,
    pub frames_in_flight: usize,
    pub texture_count: usize,
}

/// Fixed-capacity table of instance slots
#[derive(Debug)]
pub struct InstanceSlotPool {
    slots: Vec<Option<InstanceSlot>>,
}

impl InstanceSlotPool {
    /// Create a pool with `capacity` free slots
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![None; capacity] }
    }

    /// Claim the first free slot
    ///
    /// Reserves the slot's uniform range and allocates one descriptor set per
    /// frame in flight. Nothing is left claimed if any step fails.
    pub(crate) fn acquire(
        &mut self,
        device: &mut dyn RenderDevice,
        resources: InstanceResources<'_>,
        texture_maps: &[Option<TextureBinding>],
    ) -> RenderResult<InstanceId> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            log::error!("No free instance slot (capacity {})", self.slots.len());
            return Err(RenderError::ResourceExhausted { kind: "instance slot", capacity: self.slots.len() });
        };

        let ubo_offset = if resources.ubo_stride > 0 {
            resources.uniform_buffer.allocate(resources.ubo_stride)?
        } else {
            0
        };

        let descriptor_sets = match resources.layout {
            Some(layout) => {
                match device.allocate_descriptor_sets(resources.descriptor_pool, layout, resources.frames_in_flight as u32) {
                    Ok(sets) => sets,
                    Err(e) => {
                        if resources.ubo_stride > 0 {
                            resources.uniform_buffer.free(ubo_offset, resources.ubo_stride)?;
                        }
                        return Err(e);
                    }
                }
            }
            None => Vec::new(),
        };

        let mut maps = vec![None; resources.texture_count];
        for (slot, map) in maps.iter_mut().zip(texture_maps) {
            *slot = *map;
        }

        self.slots[index] = Some(InstanceSlot {
            ubo_offset,
            descriptor_sets,
            ubo_generations: vec![None; resources.frames_in_flight],
            generation: 0,
            texture_maps: maps,
        });
        Ok(InstanceId(index as u32))
    }

    /// Return a slot to the pool
    ///
    /// Waits for the device to go idle first so no frame in flight still
    /// references the slot's descriptor sets.
    pub(crate) fn release(
        &mut self,
        device: &mut dyn RenderDevice,
        id: InstanceId,
        uniform_buffer: &mut RenderBuffer,
        ubo_stride: u64,
        descriptor_pool: DescriptorPoolHandle,
    ) -> RenderResult<()> {
        if self.get(id).is_none() {
            return Err(RenderError::not_found("instance slot", id.0.to_string()));
        }
        // The slot stays claimed if the wait fails so the release can be retried
        device.wait_idle()?;
        let Some(slot) = self.slots.get_mut(id.0 as usize).and_then(Option::take) else {
            return Err(RenderError::not_found("instance slot", id.0.to_string()));
        };

        let sets = if slot.descriptor_sets.is_empty() {
            Ok(())
        } else {
            device.free_descriptor_sets(descriptor_pool, &slot.descriptor_sets)
        };
        let range = if ubo_stride > 0 {
            uniform_buffer.free(slot.ubo_offset, ubo_stride)
        } else {
            Ok(())
        };
        sets.and(range)
    }

    /// A live slot
    pub fn get(&self, id: InstanceId) -> Option<&InstanceSlot> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// A live slot, mutably
    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut InstanceSlot> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Number of claimed slots
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
