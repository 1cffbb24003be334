//! Skybox view
//!
//! Draws a cube around the camera sampling a cube map. The view matrix loses
//! its translation so the sky never gets closer.

use super::packet::{PacketExtension, RenderViewPacket, SceneData};
use super::*;
use crate::core::config::RenderViewConfig;
use crate::foundation::math::{Mat4, Mat4Ext};
use crate::render::resources::{generate_cube_config, GeometryId, GeometrySystem, MaterialContext, TextureMap};
use crate::render::shaders::{InstanceId, UniformIndex, UniformValue, BUILTIN_SKYBOX_SHADER};

/// Edge length of the skybox cube
pub const SKYBOX_CUBE_SIZE: f32 = 10.0;

/// A cube map with the geometry and instance slot it is drawn with
#[derive(Debug, Clone, PartialEq)]
pub struct Skybox {
    /// Cube map sampled by the shader
    pub cubemap: TextureMap,
    /// Cube map texture name
    pub texture_name: String,
    /// Cube geometry
    pub geometry: GeometryId,
    /// Cube geometry name
    pub geometry_name: String,
    /// Shader the instance belongs to
    pub shader: ShaderId,
    /// Instance slot on the skybox shader
    pub instance: InstanceId,
}

impl Skybox {
    /// Load the cube map `name` and claim a skybox shader instance
    ///
    /// The skybox shader must already be registered.
    pub fn create(
        device: &mut dyn RenderDevice,
        geometries: &mut GeometrySystem,
        materials: MaterialContext<'_>,
        cubemap_name: &str,
    ) -> RenderResult<Self> {
        let MaterialContext { shaders, textures, materials } = materials;
        let shader = shaders
            .get_id(BUILTIN_SKYBOX_SHADER)
            .ok_or_else(|| RenderError::not_found("shader", BUILTIN_SKYBOX_SHADER))?;

        let texture = textures.acquire_cube(device, cubemap_name, true)?;
        let sampler = SamplerDesc::with_repeat(TextureRepeat::ClampToEdge);
        let cubemap = match textures.acquire_map(device, texture, TextureUse::Cubemap, sampler) {
            Ok(map) => map,
            Err(e) => {
                textures.release(device, cubemap_name);
                return Err(e);
            }
        };

        let geometry_name = format!("skybox_{cubemap_name}");
        let config = generate_cube_config(
            SKYBOX_CUBE_SIZE,
            SKYBOX_CUBE_SIZE,
            SKYBOX_CUBE_SIZE,
            1.0,
            1.0,
            &geometry_name,
            "",
        );
        let context = MaterialContext {
            shaders: &mut *shaders,
            textures: &mut *textures,
            materials: &mut *materials,
        };
        let geometry = match geometries.acquire_from_config(device, context, &config) {
            Ok(id) => id,
            Err(e) => {
                textures.release_map(device, &cubemap);
                textures.release(device, cubemap_name);
                return Err(e);
            }
        };

        let binding = textures.binding(&cubemap);
        let instance = match shaders.acquire_instance_resources(device, shader, &[Some(binding)]) {
            Ok(instance) => instance,
            Err(e) => {
                let context = MaterialContext { shaders, textures: &mut *textures, materials };
                geometries.release(device, context, &geometry_name);
                textures.release_map(device, &cubemap);
                textures.release(device, cubemap_name);
                return Err(e);
            }
        };

        log::info!("Created skybox from cube map '{}'", cubemap_name);
        Ok(Self {
            cubemap,
            texture_name: cubemap_name.to_string(),
            geometry,
            geometry_name,
            shader,
            instance,
        })
    }

    /// Release the instance, geometry and cube map
    pub fn destroy(self, device: &mut dyn RenderDevice, geometries: &mut GeometrySystem, materials: MaterialContext<'_>) {
        let MaterialContext { shaders, textures, materials } = materials;
        if let Err(e) = shaders.release_instance_resources(device, self.shader, self.instance) {
            log::warn!("Failed to release skybox instance: {}", e);
        }
        textures.release_map(device, &self.cubemap);
        textures.release(device, &self.texture_name);
        let context = MaterialContext { shaders, textures, materials };
        geometries.release(device, context, &self.geometry_name);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SkyboxLocations {
    projection: Option<UniformIndex>,
    view: Option<UniformIndex>,
    cube_texture: Option<UniformIndex>,
}

/// Cube-mapped background view
#[derive(Debug)]
pub struct SkyboxView {
    name: String,
    passes: Vec<String>,
    shader: ShaderId,
    locations: SkyboxLocations,
    width: u32,
    height: u32,
    fov: f32,
    near: f32,
    far: f32,
    instance_stamp: Option<(InstanceId, u64)>,
}

impl SkyboxView {
    /// Create the view, creating its shader if it is not registered yet
    pub fn create(config: &RenderViewConfig, setup: &mut ViewSetup<'_>) -> RenderResult<Self> {
        let shader_name = config.custom_shader_name.as_deref().unwrap_or(BUILTIN_SKYBOX_SHADER);
        let shader = view_shader(setup, shader_name)?;
        let locations = SkyboxLocations {
            projection: setup.shaders.uniform_index(shader, "projection"),
            view: setup.shaders.uniform_index(shader, "view"),
            cube_texture: setup.shaders.uniform_index(shader, "cube_texture"),
        };
        let (width, height) = setup.device.framebuffer_size();
        Ok(Self {
            name: config.name.clone(),
            passes: config.passes.clone(),
            shader,
            locations,
            width,
            height,
            fov: super::world::WORLD_FOV_DEGREES.to_radians(),
            near: super::world::WORLD_NEAR_CLIP,
            far: super::world::WORLD_FAR_CLIP,
            instance_stamp: None,
        })
    }

    fn set(
        context: &mut RenderContext<'_>,
        index: Option<UniformIndex>,
        name: &str,
        value: UniformValue<'_>,
    ) -> RenderResult<()> {
        let index = index.ok_or_else(|| RenderError::not_found("uniform", name))?;
        context.shaders.set_uniform(context.device, index, value)
    }

    fn apply_globals(&self, context: &mut RenderContext<'_>, packet: &RenderViewPacket, frame_number: u64) -> RenderResult<()> {
        let applied = context
            .shaders
            .get(self.shader)
            .is_some_and(|shader| shader.render_frame_number() == Some(frame_number));
        if applied {
            return Ok(());
        }
        context.shaders.bind_global()?;
        Self::set(context, self.locations.projection, "projection", UniformValue::matrix(&packet.projection_matrix))?;
        Self::set(context, self.locations.view, "view", UniformValue::matrix(&packet.view_matrix))?;
        context.shaders.apply_global(context.device, true)?;
        context.shaders.set_render_frame_number(self.shader, frame_number)
    }

    fn apply_instance(&self, context: &mut RenderContext<'_>, skybox: &Skybox, needs_update: bool) -> RenderResult<()> {
        context.shaders.bind_instance(skybox.instance)?;
        if needs_update {
            let binding = context.textures.binding(&skybox.cubemap);
            Self::set(context, self.locations.cube_texture, "cube_texture", UniformValue::Texture(binding))?;
        }
        context.shaders.apply_instance(context.device, needs_update)
    }

    fn draw(&mut self, context: &mut RenderContext<'_>, packet: &RenderViewPacket, frame_number: u64) -> RenderResult<()> {
        let PacketExtension::Skybox(skybox) = &packet.extension else {
            return Ok(());
        };
        context.shaders.use_shader(context.device, self.shader)?;
        self.apply_globals(context, packet, frame_number)?;

        let needs_update = self.instance_stamp != Some((skybox.instance, frame_number));
        if let Err(e) = self.apply_instance(context, skybox, needs_update) {
            log::warn!("Failed to apply skybox instance, skipping draw: {}", e);
            return Ok(());
        }
        self.instance_stamp = Some((skybox.instance, frame_number));
        context.geometries.draw(context.device, skybox.geometry)
    }
}

impl RenderView for SkyboxView {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RenderViewKind {
        RenderViewKind::Skybox
    }

    fn passes(&self) -> &[String] {
        &self.passes
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn on_build_packet(&self, _context: PacketContext<'_>, scene: &SceneData<'_>) -> RenderResult<RenderViewPacket> {
        let mut packet = RenderViewPacket::new(&self.name);
        packet.projection_matrix =
            Mat4::perspective_rh_zo(self.fov, aspect_ratio(self.width, self.height), self.near, self.far);
        packet.view_matrix = scene.camera.view_matrix().without_translation();
        packet.view_position = scene.camera.position;
        if let Some(skybox) = scene.skybox {
            packet.extension = PacketExtension::Skybox(skybox.clone());
        }
        Ok(packet)
    }

    fn on_render(
        &mut self,
        context: &mut RenderContext<'_>,
        packet: &RenderViewPacket,
        frame_number: u64,
        image_index: u32,
    ) -> RenderResult<()> {
        let passes = self.passes.clone();
        for name in &passes {
            let pass = begin_pass(context, name, image_index)?;
            let result = self.draw(context, packet, frame_number);
            end_pass(context, pass, result)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::assets::image_loader::image_path;
    use crate::render::backends::headless::DeviceCall;
    use crate::render::camera::Camera;
    use crate::render::resources::textures::CUBE_FACE_SUFFIXES;

    fn write_cube(h: &Harness, name: &str) {
        let dir = h.root().join("textures");
        std::fs::create_dir_all(&dir).unwrap();
        for suffix in CUBE_FACE_SUFFIXES {
            image::RgbaImage::from_pixel(2, 2, image::Rgba([40, 80, 200, 255]))
                .save(image_path(&dir, &format!("{name}{suffix}")))
                .unwrap();
        }
    }

    fn skybox(h: &mut Harness, name: &str) -> Skybox {
        let context = MaterialContext {
            shaders: &mut h.shaders,
            textures: &mut h.textures,
            materials: &mut h.materials,
        };
        Skybox::create(&mut h.device, &mut h.geometries, context, name).unwrap()
    }

    #[test]
    fn test_skybox_requires_shader() {
        let mut h = Harness::new();
        write_cube(&h, "sky");
        let context = MaterialContext {
            shaders: &mut h.shaders,
            textures: &mut h.textures,
            materials: &mut h.materials,
        };
        let result = Skybox::create(&mut h.device, &mut h.geometries, context, "sky");
        assert!(matches!(result, Err(RenderError::NotFound { .. })));
        assert!(h.textures.id("sky").is_none());
    }

    #[test]
    fn test_render_skybox() {
        let mut h = Harness::new();
        write_cube(&h, "sky");
        let config = h.view_config(RenderViewKind::Skybox);
        let mut view = SkyboxView::create(&config, &mut h.setup()).unwrap();
        let sky = skybox(&mut h, "sky");
        assert_eq!(h.textures.reference_count("sky"), Some(1));

        let mut camera = Camera::default();
        camera.set_position(crate::foundation::math::Vec3::new(50.0, 20.0, 10.0));
        let scene = SceneData {
            skybox: Some(&sky),
            ..SceneData::empty(&camera)
        };
        let packet = view.on_build_packet(h.packet_context(), &scene).unwrap();
        assert_eq!(packet.view_matrix[(0, 3)], 0.0);
        assert!(matches!(packet.extension, PacketExtension::Skybox(_)));

        let image = h.begin_frame();
        h.device.clear_calls();
        view.on_render(&mut h.context(), &packet, 1, image).unwrap();
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::Draw { .. })), 1);
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::WriteDescriptorSet { .. })), 2);

        let mut packet = packet;
        view.on_destroy_packet(&mut packet);
        assert_eq!(packet.extension, PacketExtension::None);

        let context = MaterialContext {
            shaders: &mut h.shaders,
            textures: &mut h.textures,
            materials: &mut h.materials,
        };
        sky.destroy(&mut h.device, &mut h.geometries, context);
        assert!(h.textures.id("sky").is_none());
        assert!(h.geometries.id("skybox_sky").is_none());
    }

    #[test]
    fn test_no_skybox_draws_nothing() {
        let mut h = Harness::new();
        let config = h.view_config(RenderViewKind::Skybox);
        let mut view = SkyboxView::create(&config, &mut h.setup()).unwrap();
        let camera = Camera::default();
        let packet = view.on_build_packet(h.packet_context(), &SceneData::empty(&camera)).unwrap();

        let image = h.begin_frame();
        h.device.clear_calls();
        view.on_render(&mut h.context(), &packet, 1, image).unwrap();
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::BeginRenderpass(_))), 1);
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::Draw { .. })), 0);
    }
}
