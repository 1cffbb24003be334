//! World view
//!
//! Draws lit scene geometry with its materials. Opaque geometry is drawn in
//! submission order; transparent geometry follows, ordered by camera distance.

use std::cmp::Ordering;

use super::packet::{collect_geometries, GeometryRenderData, RenderViewPacket, SceneData};
use super::*;
use crate::core::config::RenderViewConfig;
use crate::foundation::math::{Mat4, Mat4Ext, Point3, Vec4};
use crate::render::resources::GlobalUniforms;
use crate::render::shaders::BUILTIN_WORLD_SHADER;

/// Vertical field of view of the world projection, in degrees
pub const WORLD_FOV_DEGREES: f32 = 45.0;
/// Near clip distance
pub const WORLD_NEAR_CLIP: f32 = 0.1;
/// Far clip distance
pub const WORLD_FAR_CLIP: f32 = 1000.0;

/// Lit 3D geometry view
#[derive(Debug)]
pub struct WorldView {
    name: String,
    passes: Vec<String>,
    shader: ShaderId,
    width: u32,
    height: u32,
    projection: Mat4,
    ambient_colour: Vec4,
}

impl WorldView {
    /// Create the view, creating its shader if it is not registered yet
    pub fn create(config: &RenderViewConfig, setup: &mut ViewSetup<'_>) -> RenderResult<Self> {
        let shader_name = config.custom_shader_name.as_deref().unwrap_or(BUILTIN_WORLD_SHADER);
        let shader = view_shader(setup, shader_name)?;
        let (width, height) = setup.device.framebuffer_size();
        Ok(Self {
            name: config.name.clone(),
            passes: config.passes.clone(),
            shader,
            width,
            height,
            projection: world_projection(width, height),
            ambient_colour: Vec4::new(0.25, 0.25, 0.25, 1.0),
        })
    }

    /// Set the ambient light colour applied to every material
    pub fn set_ambient_colour(&mut self, colour: Vec4) {
        self.ambient_colour = colour;
    }

    /// Current projection matrix
    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }

    fn draw(&self, context: &mut RenderContext<'_>, packet: &RenderViewPacket, frame_number: u64) -> RenderResult<()> {
        context.shaders.use_shader(context.device, self.shader)?;
        let globals = GlobalUniforms {
            projection: packet.projection_matrix,
            view: packet.view_matrix,
            ambient_colour: packet.ambient_colour,
            view_position: packet.view_position,
            mode: packet.render_mode,
        };
        context
            .materials
            .apply_global(context.device, context.shaders, self.shader, frame_number, &globals)?;

        for draw in &packet.geometries {
            draw_material_geometry(context, draw, frame_number)?;
        }
        Ok(())
    }
}

/// Apply a geometry's material and draw it
///
/// Material failures skip the draw; device failures while drawing propagate.
pub(crate) fn draw_material_geometry(
    context: &mut RenderContext<'_>,
    draw: &GeometryRenderData,
    frame_number: u64,
) -> RenderResult<()> {
    let Some(geometry) = context.geometries.get(draw.geometry) else {
        log::warn!("Skipping draw of unloaded geometry {:?}", draw.geometry);
        return Ok(());
    };
    let material = geometry.material;
    let needs_update = context
        .materials
        .get(material)
        .map_or(true, |m| m.needs_update(frame_number));

    let applied = context
        .materials
        .apply_instance(context.device, context.shaders, context.textures, material, needs_update)
        .and_then(|()| {
            context
                .materials
                .apply_local(context.device, context.shaders, material, &draw.model)
        });
    if let Err(e) = applied {
        log::warn!("Failed to apply material for geometry '{}', skipping draw: {}", geometry.name, e);
        return Ok(());
    }
    if needs_update {
        context.materials.mark_applied(material, frame_number);
    }
    context.geometries.draw(context.device, draw.geometry)
}

fn world_projection(width: u32, height: u32) -> Mat4 {
    Mat4::perspective_rh_zo(
        WORLD_FOV_DEGREES.to_radians(),
        aspect_ratio(width, height),
        WORLD_NEAR_CLIP,
        WORLD_FAR_CLIP,
    )
}

/// Order transparent draws by their distance to the camera
///
/// Draws at equal distance may come out in either order.
pub fn sort_by_distance(draws: &mut [(f32, GeometryRenderData)]) {
    draws.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
}

impl RenderView for WorldView {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RenderViewKind {
        RenderViewKind::World
    }

    fn passes(&self) -> &[String] {
        &self.passes
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        self.width = width;
        self.height = height;
        self.projection = world_projection(width, height);
        log::debug!("World view '{}' resized to {}x{}", self.name, width, height);
    }

    fn on_build_packet(&self, context: PacketContext<'_>, scene: &SceneData<'_>) -> RenderResult<RenderViewPacket> {
        let mut packet = RenderViewPacket::new(&self.name);
        packet.projection_matrix = self.projection;
        packet.view_matrix = scene.camera.view_matrix();
        packet.view_position = scene.camera.position;
        packet.ambient_colour = self.ambient_colour;
        packet.render_mode = scene.render_mode;

        let mut transparent = Vec::new();
        for draw in collect_geometries(scene.world_meshes) {
            let Some(geometry) = context.geometries.get(draw.geometry) else {
                log::warn!("World view '{}': mesh {} references an unloaded geometry", self.name, draw.unique_id);
                continue;
            };
            let is_transparent = context
                .materials
                .get(geometry.material)
                .is_some_and(|material| material.has_transparency);
            if is_transparent {
                let center = draw.model.transform_point(&Point3::from(geometry.center));
                let distance = (center.coords - scene.camera.position).norm();
                transparent.push((distance, draw));
            } else {
                packet.geometries.push(draw);
            }
        }

        sort_by_distance(&mut transparent);
        packet.geometries.extend(transparent.into_iter().map(|(_, draw)| draw));
        Ok(packet)
    }

    fn on_render(
        &mut self,
        context: &mut RenderContext<'_>,
        packet: &RenderViewPacket,
        frame_number: u64,
        image_index: u32,
    ) -> RenderResult<()> {
        for name in &self.passes {
            let pass = begin_pass(context, name, image_index)?;
            let result = self.draw(context, packet, frame_number);
            end_pass(context, pass, result)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::packet::Mesh;
    use super::super::test_support::Harness;
    use super::*;
    use crate::foundation::math::{Transform, Vec3};
    use crate::render::backends::headless::DeviceCall;
    use crate::render::camera::Camera;
    use crate::render::resources::{generate_plane_config, GeometryId, MaterialConfig, MaterialContext};
    use approx::assert_relative_eq;

    fn draw_at(distance: f32) -> (f32, GeometryRenderData) {
        (
            distance,
            GeometryRenderData {
                model: Mat4::identity(),
                geometry: GeometryId::default(),
                unique_id: distance as u32,
            },
        )
    }

    #[test]
    fn test_sort_by_distance_ascending() {
        let mut draws = vec![draw_at(5.0), draw_at(1.0), draw_at(3.0)];
        sort_by_distance(&mut draws);
        let order: Vec<u32> = draws.iter().map(|(_, d)| d.unique_id).collect();
        assert_eq!(order, vec![1, 3, 5]);
    }

    fn load_plane(h: &mut Harness, name: &str, material: &str) -> GeometryId {
        let config = generate_plane_config(1.0, 1.0, 1, 1, 1.0, 1.0, name, material);
        let context = MaterialContext {
            shaders: &mut h.shaders,
            textures: &mut h.textures,
            materials: &mut h.materials,
        };
        let geometries = &mut h.geometries;
        geometries.acquire_from_config(&mut h.device, context, &config).unwrap()
    }

    fn transparent_material(h: &mut Harness, name: &str) {
        let config = MaterialConfig {
            diffuse_colour: [1.0, 1.0, 1.0, 0.5],
            ..MaterialConfig::new(name)
        };
        let id = h
            .materials
            .acquire_from_config(&mut h.device, &mut h.shaders, &mut h.textures, &config)
            .unwrap();
        assert!(h.materials.get(id).unwrap().has_transparency);
    }

    #[test]
    fn test_transparent_after_opaque_by_distance() {
        let mut h = Harness::new();
        transparent_material(&mut h, "glass");
        let opaque = load_plane(&mut h, "opaque", "");
        let glass = load_plane(&mut h, "glass_plane", "glass");

        let at = |id: u32, z: f32, geometry: GeometryId| {
            Mesh::new(id, vec![geometry]).with_transform(Transform::from_position(Vec3::new(0.0, 0.0, z)))
        };
        // Camera at the origin; distances 5, 1 and 3
        let meshes = vec![at(1, -5.0, glass), at(2, -1.0, glass), at(3, -3.0, glass), at(4, -2.0, opaque)];
        let mut camera = Camera::default();
        camera.set_position(Vec3::zeros());
        camera.look_at(Vec3::new(0.0, 0.0, -1.0), Vec3::y());
        let scene = SceneData {
            world_meshes: &meshes,
            ..SceneData::empty(&camera)
        };

        let config = h.view_config(RenderViewKind::World);
        let view = WorldView::create(&config, &mut h.setup()).unwrap();
        let packet = view.on_build_packet(h.packet_context(), &scene).unwrap();
        let order: Vec<u32> = packet.geometries.iter().map(|d| d.unique_id).collect();
        assert_eq!(order, vec![4, 2, 3, 1]);
    }

    #[test]
    fn test_render_applies_globals_once_per_frame() {
        let mut h = Harness::new();
        let plane = load_plane(&mut h, "plane", "");
        let meshes = vec![Mesh::new(1, vec![plane]), Mesh::new(2, vec![plane])];
        let camera = Camera::default();
        let scene = SceneData {
            world_meshes: &meshes,
            ..SceneData::empty(&camera)
        };

        let config = h.view_config(RenderViewKind::World);
        let mut view = WorldView::create(&config, &mut h.setup()).unwrap();
        let packet = view.on_build_packet(h.packet_context(), &scene).unwrap();
        let image = h.begin_frame();
        h.device.clear_calls();

        view.on_render(&mut h.context(), &packet, 1, image).unwrap();
        let global_writes = |h: &Harness| {
            h.device
                .count_calls(|c| matches!(c, DeviceCall::BindDescriptorSet { set_index: 0, .. }))
        };
        assert_eq!(global_writes(&h), 1);
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::Draw { .. })), 2);
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::BeginRenderpass(_))), 1);
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::EndRenderpass(_))), 1);

        // The default material was written once for both draws
        let default = h.materials.default_material();
        assert!(!h.materials.get(default).unwrap().needs_update(1));
    }

    #[test]
    fn test_unloaded_geometry_skipped() {
        let mut h = Harness::new();
        let plane = load_plane(&mut h, "plane", "");
        let config = h.view_config(RenderViewKind::World);
        let mut view = WorldView::create(&config, &mut h.setup()).unwrap();

        let camera = Camera::default();
        let meshes = vec![Mesh::new(1, vec![plane])];
        let scene = SceneData {
            world_meshes: &meshes,
            ..SceneData::empty(&camera)
        };
        let packet = view.on_build_packet(h.packet_context(), &scene).unwrap();
        {
            let context = MaterialContext {
                shaders: &mut h.shaders,
                textures: &mut h.textures,
                materials: &mut h.materials,
            };
            h.geometries.release(&mut h.device, context, "plane");
        }

        let image = h.begin_frame();
        h.device.clear_calls();
        view.on_render(&mut h.context(), &packet, 1, image).unwrap();
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::Draw { .. })), 0);
    }

    #[test]
    fn test_resize_recomputes_projection() {
        let mut h = Harness::new();
        let config = h.view_config(RenderViewKind::World);
        let mut view = WorldView::create(&config, &mut h.setup()).unwrap();
        let before = *view.projection();
        view.on_resize(400, 400);
        assert_relative_eq!(view.projection()[(0, 0)], view.projection()[(1, 1)], epsilon = 1e-6);
        assert!(before != *view.projection());
    }
}
