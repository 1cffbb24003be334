//! Render pass registry
//!
//! Creates the configured passes in order and owns their render targets. A
//! pass drawing to the window gets one target per swapchain image; a pass with
//! view-owned targets receives its attachments from the view that renders it.

use std::collections::HashMap;

use crate::core::config::RenderPassConfig;
use crate::render::api::*;

/// A created render pass and its targets
#[derive(Debug, Clone)]
pub struct RenderPass {
    /// Configuration the pass was created from
    pub config: RenderPassConfig,
    /// Device pass object
    pub handle: RenderPassHandle,
    /// Area rendered each frame
    pub area: RenderArea,
    /// One target per swapchain image, or the view's targets
    pub targets: Vec<RenderTargetHandle>,
}

impl RenderPass {
    /// Pass name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Target used with swapchain image `image_index`
    pub fn target(&self, image_index: u32) -> RenderResult<RenderTargetHandle> {
        if self.targets.is_empty() {
            return Err(RenderError::InvalidState(format!("render pass '{}' has no targets", self.config.name)));
        }
        Ok(self.targets[image_index as usize % self.targets.len()])
    }

    fn destroy_targets(&mut self, device: &mut dyn RenderDevice) {
        for target in self.targets.drain(..) {
            device.destroy_render_target(target);
        }
    }
}

/// Every configured render pass, in execution order
#[derive(Debug, Default)]
pub struct RenderPassRegistry {
    passes: Vec<RenderPass>,
    lookup: HashMap<String, usize>,
}

impl RenderPassRegistry {
    /// Create the passes
    ///
    /// Passes drawing to the window are chained: each knows whether another
    /// window pass runs before or after it.
    pub fn new(device: &mut dyn RenderDevice, configs: &[RenderPassConfig]) -> RenderResult<Self> {
        let window_passes: Vec<usize> = configs
            .iter()
            .enumerate()
            .filter(|(_, config)| !config.view_targets)
            .map(|(index, _)| index)
            .collect();
        let (width, height) = device.framebuffer_size();

        let mut registry = Self::default();
        for (index, config) in configs.iter().enumerate() {
            if registry.lookup.contains_key(&config.name) {
                registry.destroy(device);
                return Err(RenderError::InvalidConfig(format!("duplicate render pass '{}'", config.name)));
            }
            let position = window_passes.iter().position(|&i| i == index);
            let desc = RenderPassDesc {
                name: config.name.clone(),
                clear_color: config.clear_value,
                clear_flags: config.clear_flags(),
                depth_attachment: config.depth_attachment,
                has_prev_pass: position.is_some_and(|p| p > 0),
                has_next_pass: position.is_some_and(|p| p + 1 < window_passes.len()),
                present_after: config.present_after,
            };
            let handle = match device.create_renderpass(&desc) {
                Ok(handle) => handle,
                Err(e) => {
                    log::error!("Failed to create render pass '{}': {}", config.name, e);
                    registry.destroy(device);
                    return Err(e);
                }
            };
            log::debug!("Created render pass '{}'", config.name);
            registry.lookup.insert(config.name.clone(), registry.passes.len());
            registry.passes.push(RenderPass {
                config: config.clone(),
                handle,
                area: RenderArea::sized(width, height),
                targets: Vec::new(),
            });
        }
        Ok(registry)
    }

    /// Rebuild the targets of every window pass for the current swapchain
    pub fn regenerate_targets(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        let (width, height) = device.framebuffer_size();
        let image_count = device.swapchain_image_count();
        for pass in self.passes.iter_mut().filter(|pass| !pass.config.view_targets) {
            pass.destroy_targets(device);
            pass.area = RenderArea::sized(width, height);
            for image in 0..image_count {
                let mut attachments = vec![device.window_attachment(image)?];
                if pass.config.depth_attachment {
                    attachments.push(device.depth_attachment()?);
                }
                let target = device.create_render_target(pass.handle, &attachments, width, height)?;
                pass.targets.push(target);
            }
            log::debug!("Regenerated {} targets for pass '{}' at {}x{}", image_count, pass.config.name, width, height);
        }
        Ok(())
    }

    /// Replace a view-owned pass's targets with ones built from `attachments`
    pub fn set_view_targets(
        &mut self,
        device: &mut dyn RenderDevice,
        name: &str,
        attachments: &[Vec<TextureHandle>],
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        let pass = self.get_mut(name).ok_or_else(|| RenderError::not_found("render pass", name))?;
        pass.destroy_targets(device);
        pass.area = RenderArea::sized(width, height);
        for set in attachments {
            let target = device.create_render_target(pass.handle, set, width, height)?;
            pass.targets.push(target);
        }
        Ok(())
    }

    /// Pass by name
    pub fn get(&self, name: &str) -> Option<&RenderPass> {
        self.lookup.get(name).map(|&index| &self.passes[index])
    }

    /// Mutable pass by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut RenderPass> {
        let index = *self.lookup.get(name)?;
        self.passes.get_mut(index)
    }

    /// Every pass, in execution order
    pub fn iter(&self) -> impl Iterator<Item = &RenderPass> {
        self.passes.iter()
    }

    /// Number of passes
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Whether no passes exist
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Destroy every target and pass
    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        for mut pass in self.passes.drain(..) {
            pass.destroy_targets(device);
            device.destroy_renderpass(pass.handle);
        }
        self.lookup.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RendererConfig;
    use crate::render::backends::headless::HeadlessDevice;

    #[test]
    fn test_builtin_passes_chain() {
        let mut device = HeadlessDevice::new(320, 200);
        let registry = RenderPassRegistry::new(&mut device, &RendererConfig::default().passes).unwrap();
        assert_eq!(registry.len(), 5);

        let skybox = registry.get(RendererConfig::SKYBOX_PASS).unwrap();
        assert!(skybox.config.clear_flags().contains(ClearFlags::COLOR));
        assert_eq!(skybox.area, RenderArea::sized(320, 200));
        assert!(registry.get("Renderpass.Missing").is_none());
    }

    #[test]
    fn test_duplicate_pass_rejected() {
        let mut device = HeadlessDevice::new(64, 64);
        let configs = vec![RenderPassConfig::new("a"), RenderPassConfig::new("a")];
        assert!(matches!(RenderPassRegistry::new(&mut device, &configs), Err(RenderError::InvalidConfig(_))));
    }

    #[test]
    fn test_regenerate_window_targets() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut registry = RenderPassRegistry::new(&mut device, &RendererConfig::default().passes).unwrap();
        registry.regenerate_targets(&mut device).unwrap();

        let world = registry.get(RendererConfig::WORLD_PASS).unwrap();
        assert_eq!(world.targets.len(), 3);
        assert_ne!(world.target(0).unwrap(), world.target(1).unwrap());
        assert_eq!(world.target(3).unwrap(), world.target(0).unwrap());

        let pick = registry.get(RendererConfig::WORLD_PICK_PASS).unwrap();
        assert!(pick.targets.is_empty());
        assert!(pick.target(0).is_err());

        device.recreate_swapchain(128, 32).unwrap();
        registry.regenerate_targets(&mut device).unwrap();
        let world = registry.get(RendererConfig::WORLD_PASS).unwrap();
        assert_eq!(world.targets.len(), 3);
        assert_eq!(world.area, RenderArea::sized(128, 32));
    }

    #[test]
    fn test_view_targets() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut registry = RenderPassRegistry::new(&mut device, &RendererConfig::default().passes).unwrap();
        let mut desc = TextureDesc::rgba(16, 16);
        desc.writeable = true;
        let colour = device.create_writeable_texture(&desc).unwrap();

        registry
            .set_view_targets(&mut device, RendererConfig::UI_PICK_PASS, &[vec![colour]], 16, 16)
            .unwrap();
        let pass = registry.get(RendererConfig::UI_PICK_PASS).unwrap();
        assert_eq!(pass.targets.len(), 1);
        assert_eq!(pass.area, RenderArea::sized(16, 16));
        assert!(registry.set_view_targets(&mut device, "missing", &[], 1, 1).is_err());
    }
}
