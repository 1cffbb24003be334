//! Render view system
//!
//! Owns the configured views in render order, builds one packet per view each
//! frame and renders them.

use std::collections::HashMap;

use super::packet::{RenderViewPacket, SceneData};
use super::*;
use crate::core::config::RenderViewConfig;

/// Every render view, in render order
#[derive(Debug, Default)]
pub struct RenderViewSystem {
    views: Vec<Box<dyn RenderView>>,
    lookup: HashMap<String, usize>,
}

impl RenderViewSystem {
    /// Create every configured view
    ///
    /// On failure the views created so far are destroyed.
    pub fn new(configs: &[RenderViewConfig], setup: &mut ViewSetup<'_>) -> RenderResult<Self> {
        let mut system = Self::default();
        for config in configs {
            if let Err(e) = system.register(config, setup) {
                log::error!("Failed to create render view '{}': {}", config.name, e);
                system.destroy(setup);
                return Err(e);
            }
        }
        log::info!("Render view system ready with {} views", system.views.len());
        Ok(system)
    }

    /// Create a view and append it to the render order
    pub fn register(&mut self, config: &RenderViewConfig, setup: &mut ViewSetup<'_>) -> RenderResult<()> {
        if self.lookup.contains_key(&config.name) {
            return Err(RenderError::InvalidConfig(format!("duplicate render view '{}'", config.name)));
        }
        let view = create_view(config, setup)?;
        self.lookup.insert(config.name.clone(), self.views.len());
        self.views.push(view);
        Ok(())
    }

    /// View by name
    pub fn get(&self, name: &str) -> Option<&dyn RenderView> {
        self.lookup.get(name).map(|&index| self.views[index].as_ref())
    }

    /// Number of views
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Whether there are no views
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Object under the mouse reported by the first picking view
    pub fn hovered_id(&self) -> Option<u32> {
        self.views.iter().find_map(|view| view.hovered_id())
    }

    /// Build one packet per view, in render order
    pub fn build_packets(&self, context: PacketContext<'_>, scene: &SceneData<'_>) -> RenderResult<Vec<RenderViewPacket>> {
        self.views
            .iter()
            .map(|view| view.on_build_packet(context, scene))
            .collect()
    }

    /// Render packets with the views that built them, destroying each afterwards
    pub fn render(
        &mut self,
        context: &mut RenderContext<'_>,
        packets: Vec<RenderViewPacket>,
        frame_number: u64,
        image_index: u32,
    ) -> RenderResult<()> {
        for mut packet in packets {
            let index = *self
                .lookup
                .get(&packet.view)
                .ok_or_else(|| RenderError::not_found("render view", packet.view.clone()))?;
            let view = &mut self.views[index];
            let result = view.on_render(context, &packet, frame_number, image_index);
            view.on_destroy_packet(&mut packet);
            if let Err(e) = result {
                log::error!("Render view '{}' failed: {}", packet.view, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Propagate a framebuffer size change to every view
    pub fn on_resize(&mut self, width: u32, height: u32) {
        for view in &mut self.views {
            view.on_resize(width, height);
        }
    }

    /// Rebuild view-owned attachments
    pub fn regenerate_attachments(&mut self, setup: &mut ViewSetup<'_>) -> RenderResult<()> {
        for view in &mut self.views {
            view.regenerate_attachments(setup)?;
        }
        Ok(())
    }

    /// Destroy every view
    pub fn destroy(&mut self, setup: &mut ViewSetup<'_>) {
        for mut view in self.views.drain(..).rev() {
            view.on_destroy(setup);
        }
        self.lookup.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::render::backends::headless::DeviceCall;
    use crate::render::camera::Camera;

    fn views(h: &mut Harness) -> RenderViewSystem {
        let configs = h.config.views.clone();
        RenderViewSystem::new(&configs, &mut h.setup()).unwrap()
    }

    #[test]
    fn test_builtin_views_in_order() {
        let mut h = Harness::new();
        let system = views(&mut h);
        assert_eq!(system.len(), 4);
        assert_eq!(system.get("world").unwrap().kind(), RenderViewKind::World);
        assert_eq!(system.get("pick").unwrap().passes().len(), 2);
        assert!(system.get("missing").is_none());
    }

    #[test]
    fn test_unknown_pass_rolls_back() {
        let mut h = Harness::new();
        let mut configs = h.config.views.clone();
        configs[3].passes[1] = "Renderpass.Missing".to_string();
        let textures = h.device.live_texture_count();
        assert!(RenderViewSystem::new(&configs, &mut h.setup()).is_err());
        assert_eq!(h.device.live_texture_count(), textures);
    }

    #[test]
    fn test_duplicate_view_rejected() {
        let mut h = Harness::new();
        let mut system = views(&mut h);
        let config = h.config.views[1].clone();
        assert!(matches!(system.register(&config, &mut h.setup()), Err(RenderError::InvalidConfig(_))));
    }

    #[test]
    fn test_frame_renders_every_pass() {
        let mut h = Harness::new();
        let mut system = views(&mut h);
        let camera = Camera::default();
        let packets = system.build_packets(h.packet_context(), &SceneData::empty(&camera)).unwrap();
        assert_eq!(packets.len(), 4);

        let image = h.begin_frame();
        h.device.clear_calls();
        system.render(&mut h.context(), packets, 1, image).unwrap();
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::BeginRenderpass(_))), 5);
        assert_eq!(system.hovered_id(), None);
        h.frame.end_frame(&mut h.device).unwrap();
    }

    #[test]
    fn test_packet_for_unknown_view() {
        let mut h = Harness::new();
        let mut system = views(&mut h);
        let image = h.begin_frame();
        let packets = vec![RenderViewPacket::new("ghost")];
        assert!(matches!(
            system.render(&mut h.context(), packets, 1, image),
            Err(RenderError::NotFound { .. })
        ));
    }
}
