//! # Renderer Frontend
//!
//! [`Renderer`] owns the device and every rendering system and drives one
//! frame at a time. There is no global state: applications hold the renderer
//! and pass scene data in each frame.

use crate::assets::MeshLoader;
use crate::core::config::RendererConfig;
use crate::render::api::*;
use crate::render::frame::FrameCoordinator;
use crate::render::passes::RenderPassRegistry;
use crate::render::resources::{
    GeometryConfig, GeometryId, GeometrySystem, MaterialContext, MaterialId, MaterialSystem, TextureId, TextureSystem,
};
use crate::render::shaders::ShaderSystem;
use crate::render::views::{PacketContext, RenderContext, RenderViewSystem, SceneData, Skybox, ViewSetup};

/// Main renderer facade
///
/// ## Responsibilities
///
/// - **Frame Lifecycle**: begin, render every view, submit and present
/// - **Resize Handling**: swapchain rebuild and render-target regeneration
/// - **Resource Access**: acquire and release textures, materials and geometries
///
/// ## Design Notes
///
/// Every subsystem is a field, so a frame borrows them disjointly instead of
/// going through shared handles. Systems are brought up in dependency order
/// and torn down in reverse by [`Renderer::shutdown`].
#[derive(Debug)]
pub struct Renderer<D: RenderDevice> {
    config: RendererConfig,
    device: D,
    frame: FrameCoordinator,
    passes: RenderPassRegistry,
    shaders: ShaderSystem,
    textures: TextureSystem,
    materials: MaterialSystem,
    geometries: GeometrySystem,
    views: RenderViewSystem,

    /// Frames rendered so far; stamps global and instance uniform uploads
    frame_number: u64,
}

impl<D: RenderDevice> Renderer<D> {
    /// Bring up every system on `device`
    pub fn new(config: RendererConfig, mut device: D) -> RenderResult<Self> {
        config.validate().map_err(|e| {
            log::error!("Renderer configuration rejected: {}", e);
            RenderError::InvalidConfig(e)
        })?;
        log::info!(
            "Initializing renderer '{}' on the {} backend",
            config.renderer.application_name,
            device.backend_name()
        );

        let frame = FrameCoordinator::new(&mut device, config.renderer.max_frames_in_flight)?;
        let mut passes = RenderPassRegistry::new(&mut device, &config.passes)?;
        passes.regenerate_targets(&mut device)?;

        let mut shaders = ShaderSystem::new(
            config.shaders.clone(),
            &config.resources.root_path,
            config.renderer.max_frames_in_flight,
        )?;
        let mut textures = TextureSystem::new(&mut device, &config.resources)?;
        shaders.set_default_texture(textures.default_binding());

        let views = {
            let mut setup = ViewSetup {
                device: &mut device,
                passes: &mut passes,
                shaders: &mut shaders,
            };
            RenderViewSystem::new(&config.views, &mut setup)?
        };

        let materials = MaterialSystem::new(&mut device, &config.resources, &mut shaders, &mut textures)?;
        let geometries = GeometrySystem::new(
            &mut device,
            &config.resources,
            config.renderer.vertex_buffer_size,
            config.renderer.index_buffer_size,
            materials.default_material(),
        )?;

        log::info!("Renderer ready");
        Ok(Self {
            config,
            device,
            frame,
            passes,
            shaders,
            textures,
            materials,
            geometries,
            views,
            frame_number: 0,
        })
    }

    /// Record a framebuffer size change; applied on the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        self.frame.resize(width, height);
        self.views.on_resize(width, height);
    }

    /// Render one frame of `scene`
    ///
    /// Returns `Ok(false)` when the frame was skipped for a swapchain rebuild.
    pub fn draw_frame(&mut self, scene: &SceneData<'_>) -> RenderResult<bool> {
        let info = self.frame.begin_frame(&mut self.device)?;
        if self.frame.take_targets_dirty() {
            self.refresh_targets()?;
        }
        let Some(info) = info else {
            return Ok(false);
        };

        self.shaders.begin_frame(info.frame_index);
        self.frame_number += 1;

        let packets = self.views.build_packets(
            PacketContext {
                geometries: &self.geometries,
                materials: &self.materials,
            },
            scene,
        );
        let rendered = packets.and_then(|packets| {
            let mut context = RenderContext {
                device: &mut self.device,
                frame: &mut self.frame,
                passes: &mut self.passes,
                shaders: &mut self.shaders,
                textures: &mut self.textures,
                materials: &mut self.materials,
                geometries: &self.geometries,
            };
            self.views.render(&mut context, packets, self.frame_number, info.image_index)
        });

        // The frame is closed even when a view failed so its fence is re-armed
        let ended = self.frame.end_frame(&mut self.device);
        rendered?;
        ended?;
        Ok(true)
    }

    fn refresh_targets(&mut self) -> RenderResult<()> {
        let (width, height) = self.frame.framebuffer_size();
        log::debug!("Regenerating render targets at {}x{}", width, height);
        self.passes.regenerate_targets(&mut self.device)?;
        self.views.on_resize(width, height);
        let mut setup = ViewSetup {
            device: &mut self.device,
            passes: &mut self.passes,
            shaders: &mut self.shaders,
        };
        self.views.regenerate_attachments(&mut setup)
    }

    /// Acquire a 2D texture by name
    pub fn acquire_texture(&mut self, name: &str, auto_release: bool) -> RenderResult<TextureId> {
        self.textures.acquire(&mut self.device, name, auto_release)
    }

    /// Release a texture by name
    pub fn release_texture(&mut self, name: &str) {
        self.textures.release(&mut self.device, name);
    }

    /// Acquire a material by name, loading `<root>/materials/<name>` on first use
    pub fn acquire_material(&mut self, name: &str) -> RenderResult<MaterialId> {
        self.materials
            .acquire(&mut self.device, &mut self.shaders, &mut self.textures, name)
    }

    /// Release a material by name
    pub fn release_material(&mut self, name: &str) {
        self.materials
            .release(&mut self.device, &mut self.shaders, &mut self.textures, name);
    }

    /// Upload a geometry, or take another reference to an already resident one
    pub fn acquire_geometry(&mut self, config: &GeometryConfig) -> RenderResult<GeometryId> {
        let context = MaterialContext {
            shaders: &mut self.shaders,
            textures: &mut self.textures,
            materials: &mut self.materials,
        };
        self.geometries.acquire_from_config(&mut self.device, context, config)
    }

    /// Load `models/<name>.dsm` and acquire each of its geometries
    ///
    /// Geometries acquired before a failure stay acquired.
    pub fn load_mesh(&mut self, name: &str) -> RenderResult<Vec<GeometryId>> {
        let mesh = MeshLoader::load(&self.config.resources.root_path, name)?;
        mesh.geometries
            .iter()
            .map(|geometry| self.acquire_geometry(geometry))
            .collect()
    }

    /// Release a geometry by name
    pub fn release_geometry(&mut self, name: &str) {
        let context = MaterialContext {
            shaders: &mut self.shaders,
            textures: &mut self.textures,
            materials: &mut self.materials,
        };
        self.geometries.release(&mut self.device, context, name);
    }

    /// Create a skybox from the cube map `name`
    pub fn create_skybox(&mut self, cubemap_name: &str) -> RenderResult<Skybox> {
        let context = MaterialContext {
            shaders: &mut self.shaders,
            textures: &mut self.textures,
            materials: &mut self.materials,
        };
        Skybox::create(&mut self.device, &mut self.geometries, context, cubemap_name)
    }

    /// Release a skybox's resources
    pub fn destroy_skybox(&mut self, skybox: Skybox) {
        let context = MaterialContext {
            shaders: &mut self.shaders,
            textures: &mut self.textures,
            materials: &mut self.materials,
        };
        skybox.destroy(&mut self.device, &mut self.geometries, context);
    }

    /// Object under the mouse as of the last rendered frame
    pub fn hovered_id(&self) -> Option<u32> {
        self.views.hovered_id()
    }

    /// Frames rendered so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Configuration the renderer was built from
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Backend device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable backend device
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Frame coordinator
    pub fn frame(&self) -> &FrameCoordinator {
        &self.frame
    }

    /// Render pass registry
    pub fn passes(&self) -> &RenderPassRegistry {
        &self.passes
    }

    /// Shader registry
    pub fn shaders(&self) -> &ShaderSystem {
        &self.shaders
    }

    /// Texture cache
    pub fn textures(&self) -> &TextureSystem {
        &self.textures
    }

    /// Material cache
    pub fn materials(&self) -> &MaterialSystem {
        &self.materials
    }

    /// Geometry cache
    pub fn geometries(&self) -> &GeometrySystem {
        &self.geometries
    }

    /// Render views
    pub fn views(&self) -> &RenderViewSystem {
        &self.views
    }

    /// Wait for the device and destroy every system in reverse creation order
    pub fn shutdown(mut self) -> D {
        log::info!("Shutting down renderer after {} frames", self.frame_number);
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device wait before shutdown failed: {}", e);
        }

        let mut setup = ViewSetup {
            device: &mut self.device,
            passes: &mut self.passes,
            shaders: &mut self.shaders,
        };
        self.views.destroy(&mut setup);

        let Self {
            mut device,
            mut frame,
            mut passes,
            mut shaders,
            mut textures,
            mut materials,
            geometries,
            ..
        } = self;
        let context = MaterialContext {
            shaders: &mut shaders,
            textures: &mut textures,
            materials: &mut materials,
        };
        geometries.shutdown(&mut device, context);
        materials.shutdown(&mut device, &mut shaders, &mut textures);
        textures.shutdown(&mut device);
        shaders.shutdown(&mut device);
        passes.destroy(&mut device);
        frame.shutdown(&mut device);
        device.shutdown();
        device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Transform, Vec3};
    use crate::render::backends::headless::{DeviceCall, HeadlessDevice};
    use crate::render::camera::Camera;
    use crate::render::resources::generate_cube_config;
    use crate::render::views::Mesh;

    fn renderer() -> (tempfile::TempDir, Renderer<HeadlessDevice>) {
        let root = tempfile::tempdir().unwrap();
        let mut config = RendererConfig::default().with_resource_root(root.path());
        config.renderer = config.renderer.with_geometry_buffers(64 * 1024, 16 * 1024);
        let renderer = Renderer::new(config, HeadlessDevice::new(640, 480)).unwrap();
        (root, renderer)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RendererConfig::default();
        config.renderer.max_frames_in_flight = 0;
        let result = Renderer::new(config, HeadlessDevice::new(64, 64));
        assert!(matches!(result, Err(RenderError::InvalidConfig(_))));
    }

    #[test]
    fn test_frames_advance() {
        let (_root, mut renderer) = renderer();
        let cube = renderer
            .acquire_geometry(&generate_cube_config(1.0, 1.0, 1.0, 1.0, 1.0, "cube", ""))
            .unwrap();
        let meshes = vec![Mesh::new(1, vec![cube]).with_transform(Transform::from_position(Vec3::new(0.0, 0.0, -4.0)))];
        let camera = Camera::default();
        let scene = SceneData {
            world_meshes: &meshes,
            ..SceneData::empty(&camera)
        };

        for _ in 0..3 {
            assert!(renderer.draw_frame(&scene).unwrap());
        }
        assert_eq!(renderer.frame_number(), 3);
        assert_eq!(renderer.frame().current_frame(), 3 % 2);
        assert_eq!(renderer.device().count_calls(|c| matches!(c, DeviceCall::Present(_))), 3);
    }

    #[test]
    fn test_resize_skips_frame_and_regenerates_targets() {
        let (_root, mut renderer) = renderer();
        let camera = Camera::default();
        let scene = SceneData::empty(&camera);

        renderer.resize(320, 200);
        assert!(!renderer.draw_frame(&scene).unwrap());
        let world = renderer.passes().get(RendererConfig::WORLD_PASS).unwrap();
        assert_eq!(world.area, RenderArea::sized(320, 200));
        let pick = renderer.passes().get(RendererConfig::WORLD_PICK_PASS).unwrap();
        assert_eq!(pick.area, RenderArea::sized(320, 200));

        assert!(renderer.draw_frame(&scene).unwrap());
        assert_eq!(renderer.frame_number(), 1);
    }

    #[test]
    fn test_load_mesh_acquires_every_geometry() {
        let (root, mut renderer) = renderer();
        let models = root.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        let parts = [
            generate_cube_config(1.0, 1.0, 1.0, 1.0, 1.0, "ship_hull", ""),
            generate_cube_config(0.5, 0.5, 2.0, 1.0, 1.0, "ship_wing", ""),
        ];
        crate::assets::mesh_cache::save_mesh_cache(models.join("ship.dsm"), "ship", &parts).unwrap();

        let ids = renderer.load_mesh("ship").unwrap();
        assert_eq!(ids.len(), 2);
        assert!(renderer.geometries().id("ship_wing").is_some());
        assert!(matches!(renderer.load_mesh("missing"), Err(RenderError::MeshCache(_))));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let (_root, mut renderer) = renderer();
        let camera = Camera::default();
        renderer.draw_frame(&SceneData::empty(&camera)).unwrap();

        let device = renderer.shutdown();
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_descriptor_set_count(), 0);
    }
}
