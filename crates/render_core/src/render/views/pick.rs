//! Pick view
//!
//! Renders every world and UI mesh into an offscreen colour target using a
//! flat colour derived from the mesh's unique id, then reads back the pixel
//! under the mouse to find the hovered object. Pure white means nothing.

use super::packet::{collect_geometries, GeometryRenderData, PacketExtension, RenderViewPacket, SceneData};
use super::ui::ui_projection;
use super::world::{WORLD_FAR_CLIP, WORLD_FOV_DEGREES, WORLD_NEAR_CLIP};
use super::*;
use crate::core::config::RenderViewConfig;
use crate::foundation::math::{utils, Mat4, Mat4Ext};
use crate::render::shaders::{
    InstanceId, UniformIndex, UniformValue, BUILTIN_UI_PICK_SHADER, BUILTIN_WORLD_PICK_SHADER,
};

/// Id decoded from a pure white pixel
pub const NO_PICK_ID: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, Default)]
struct PickLocations {
    projection: Option<UniformIndex>,
    view: Option<UniformIndex>,
    id_colour: Option<UniformIndex>,
    model: Option<UniformIndex>,
}

/// One pick shader and the instance slots it holds, indexed by unique id
#[derive(Debug)]
struct PickShader {
    id: ShaderId,
    locations: PickLocations,
    instances: Vec<InstanceId>,
    instance_frames: Vec<Option<u64>>,
    /// Set once the shader runs out of instance slots; cleared on release
    capped: bool,
}

impl PickShader {
    fn create(setup: &mut ViewSetup<'_>, name: &str) -> RenderResult<Self> {
        let id = view_shader(setup, name)?;
        let locations = PickLocations {
            projection: setup.shaders.uniform_index(id, "projection"),
            view: setup.shaders.uniform_index(id, "view"),
            id_colour: setup.shaders.uniform_index(id, "id_colour"),
            model: setup.shaders.uniform_index(id, "model"),
        };
        Ok(Self {
            id,
            locations,
            instances: Vec::new(),
            instance_frames: Vec::new(),
            capped: false,
        })
    }

    /// Claim instance slots until every id up to `highest_id` has one
    fn grow(&mut self, context: &mut RenderContext<'_>, highest_id: u32) {
        let wanted = highest_id as usize + 1;
        if self.capped {
            return;
        }
        while self.instances.len() < wanted {
            match context.shaders.acquire_instance_resources(context.device, self.id, &[]) {
                Ok(instance) => {
                    self.instances.push(instance);
                    self.instance_frames.push(None);
                }
                Err(e) => {
                    log::warn!("Pick instances capped at {}: {}", self.instances.len(), e);
                    self.capped = true;
                    return;
                }
            }
        }
    }

    fn set(&self, context: &mut RenderContext<'_>, index: Option<UniformIndex>, name: &str, value: UniformValue<'_>) -> RenderResult<()> {
        let index = index.ok_or_else(|| RenderError::not_found("uniform", name))?;
        context.shaders.set_uniform(context.device, index, value)
    }

    fn apply_globals(
        &self,
        context: &mut RenderContext<'_>,
        projection: &Mat4,
        view: &Mat4,
        frame_number: u64,
    ) -> RenderResult<()> {
        context.shaders.use_shader(context.device, self.id)?;
        let applied = context
            .shaders
            .get(self.id)
            .is_some_and(|shader| shader.render_frame_number() == Some(frame_number));
        if applied {
            return Ok(());
        }
        context.shaders.bind_global()?;
        self.set(context, self.locations.projection, "projection", UniformValue::matrix(projection))?;
        self.set(context, self.locations.view, "view", UniformValue::matrix(view))?;
        context.shaders.apply_global(context.device, true)?;
        context.shaders.set_render_frame_number(self.id, frame_number)
    }

    fn apply_object(&mut self, context: &mut RenderContext<'_>, draw: &GeometryRenderData, frame_number: u64) -> RenderResult<()> {
        let slot = draw.unique_id as usize;
        let instance = *self
            .instances
            .get(slot)
            .ok_or_else(|| RenderError::not_found("pick instance", draw.unique_id.to_string()))?;
        let needs_update = self.instance_frames[slot] != Some(frame_number);

        context.shaders.bind_instance(instance)?;
        if needs_update {
            let colour = utils::id_to_color(draw.unique_id);
            self.set(context, self.locations.id_colour, "id_colour", UniformValue::vec3(&colour))?;
        }
        context.shaders.apply_instance(context.device, needs_update)?;
        self.instance_frames[slot] = Some(frame_number);
        self.set(context, self.locations.model, "model", UniformValue::matrix(&draw.model))
    }

    fn draw(
        &mut self,
        context: &mut RenderContext<'_>,
        draws: &[GeometryRenderData],
        projection: &Mat4,
        view: &Mat4,
        frame_number: u64,
    ) -> RenderResult<()> {
        self.apply_globals(context, projection, view, frame_number)?;
        for draw in draws {
            if let Err(e) = self.apply_object(context, draw, frame_number) {
                log::warn!("Skipping pick draw of object {}: {}", draw.unique_id, e);
                continue;
            }
            if context.geometries.get(draw.geometry).is_none() {
                log::warn!("Skipping pick draw of unloaded geometry {:?}", draw.geometry);
                continue;
            }
            context.geometries.draw(context.device, draw.geometry)?;
        }
        Ok(())
    }

    fn release(&mut self, setup: &mut ViewSetup<'_>) {
        for instance in self.instances.drain(..) {
            if let Err(e) = setup.shaders.release_instance_resources(setup.device, self.id, instance) {
                log::warn!("Failed to release pick instance {}: {}", instance.0, e);
            }
        }
        self.instance_frames.clear();
        self.capped = false;
    }
}

/// Offscreen attachments the pick passes render into
#[derive(Debug, Clone, Copy)]
struct PickAttachments {
    colour: TextureHandle,
    depth: TextureHandle,
    width: u32,
    height: u32,
}

/// Mouse picking view
#[derive(Debug)]
pub struct PickView {
    name: String,
    passes: Vec<String>,
    world: PickShader,
    ui: PickShader,
    attachments: Option<PickAttachments>,
    width: u32,
    height: u32,
    hovered_id: Option<u32>,
}

impl PickView {
    /// Create the view's shaders and offscreen attachments
    ///
    /// The first configured pass draws world meshes, the second UI meshes.
    pub fn create(config: &RenderViewConfig, setup: &mut ViewSetup<'_>) -> RenderResult<Self> {
        if config.passes.len() != 2 {
            return Err(RenderError::InvalidConfig(format!(
                "pick view '{}' needs a world pass and a UI pass, got {}",
                config.name,
                config.passes.len()
            )));
        }
        let world_name = config.custom_shader_name.as_deref().unwrap_or(BUILTIN_WORLD_PICK_SHADER);
        let (width, height) = setup.device.framebuffer_size();
        let mut view = Self {
            name: config.name.clone(),
            passes: config.passes.clone(),
            world: PickShader::create(setup, world_name)?,
            ui: PickShader::create(setup, BUILTIN_UI_PICK_SHADER)?,
            attachments: None,
            width,
            height,
            hovered_id: None,
        };
        view.regenerate_attachments(setup)?;
        Ok(view)
    }

    /// Colour attachment the ids are rendered into
    pub fn colour_attachment(&self) -> Option<TextureHandle> {
        self.attachments.map(|a| a.colour)
    }

    /// Instance slots held per pick shader
    pub fn instance_count(&self) -> usize {
        self.world.instances.len()
    }

    fn read_hovered(&self, device: &mut dyn RenderDevice, mouse: Option<(i32, i32)>) -> RenderResult<Option<u32>> {
        let (Some((x, y)), Some(attachments)) = (mouse, self.attachments) else {
            return Ok(None);
        };
        if attachments.width == 0 || attachments.height == 0 {
            return Ok(None);
        }
        let x = x.clamp(0, attachments.width as i32 - 1) as u32;
        let y = y.clamp(0, attachments.height as i32 - 1) as u32;
        let [r, g, b, _] = device.read_texture_pixel(attachments.colour, x, y)?;
        let id = utils::rgb_to_id(r, g, b);
        Ok((id != NO_PICK_ID).then_some(id))
    }
}

impl RenderView for PickView {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RenderViewKind {
        RenderViewKind::Pick
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
        packet.projection_matrix = Mat4::perspective_rh_zo(
            WORLD_FOV_DEGREES.to_radians(),
            aspect_ratio(self.width, self.height),
            WORLD_NEAR_CLIP,
            WORLD_FAR_CLIP,
        );
        packet.view_matrix = scene.camera.view_matrix();
        packet.view_position = scene.camera.position;
        packet.geometries = collect_geometries(scene.world_meshes);

        let ui_geometries = collect_geometries(scene.ui_meshes);
        let highest_id = packet
            .geometries
            .iter()
            .chain(&ui_geometries)
            .map(|draw| draw.unique_id)
            .max()
            .unwrap_or(0);
        packet.extension = PacketExtension::Pick {
            ui_geometries,
            ui_projection: ui_projection(self.width, self.height),
            ui_view: Mat4::identity(),
            highest_id,
            mouse: scene.mouse,
        };
        Ok(packet)
    }

    fn on_render(
        &mut self,
        context: &mut RenderContext<'_>,
        packet: &RenderViewPacket,
        frame_number: u64,
        image_index: u32,
    ) -> RenderResult<()> {
        let PacketExtension::Pick { ui_geometries, ui_projection, ui_view, highest_id, mouse } = &packet.extension
        else {
            return Err(RenderError::InvalidState(format!("pick view '{}' got a packet without pick data", self.name)));
        };
        self.world.grow(context, *highest_id);
        self.ui.grow(context, *highest_id);

        let world_pass = begin_pass(context, &self.passes[0], image_index)?;
        let result = self.world.draw(
            context,
            &packet.geometries,
            &packet.projection_matrix,
            &packet.view_matrix,
            frame_number,
        );
        end_pass(context, world_pass, result)?;

        let ui_pass = begin_pass(context, &self.passes[1], image_index)?;
        let result = self.ui.draw(context, ui_geometries, ui_projection, ui_view, frame_number);
        end_pass(context, ui_pass, result)?;

        self.hovered_id = self.read_hovered(context.device, *mouse)?;
        if let Some(id) = self.hovered_id {
            log::trace!("Pick view '{}' hovering object {}", self.name, id);
        }
        Ok(())
    }

    fn hovered_id(&self) -> Option<u32> {
        self.hovered_id
    }

    fn regenerate_attachments(&mut self, setup: &mut ViewSetup<'_>) -> RenderResult<()> {
        let (width, height) = (self.width, self.height);
        let attachments = match self.attachments {
            Some(existing) if existing.width == width && existing.height == height => existing,
            Some(existing) => {
                setup.device.resize_texture(existing.colour, width, height)?;
                setup.device.resize_texture(existing.depth, width, height)?;
                PickAttachments { width, height, ..existing }
            }
            None => {
                let mut desc = TextureDesc::rgba(width, height);
                desc.writeable = true;
                let colour = setup.device.create_writeable_texture(&desc)?;
                desc.format = TextureFormat::Depth;
                let depth = match setup.device.create_writeable_texture(&desc) {
                    Ok(depth) => depth,
                    Err(e) => {
                        setup.device.destroy_texture(colour);
                        return Err(e);
                    }
                };
                PickAttachments { colour, depth, width, height }
            }
        };
        self.attachments = Some(attachments);

        let world_pass = &self.passes[0];
        let ui_pass = &self.passes[1];
        setup.passes.set_view_targets(
            setup.device,
            world_pass,
            &[vec![attachments.colour, attachments.depth]],
            width,
            height,
        )?;
        setup
            .passes
            .set_view_targets(setup.device, ui_pass, &[vec![attachments.colour]], width, height)?;
        log::debug!("Pick view '{}' attachments at {}x{}", self.name, width, height);
        Ok(())
    }

    fn on_destroy(&mut self, setup: &mut ViewSetup<'_>) {
        self.world.release(setup);
        self.ui.release(setup);
        if let Some(attachments) = self.attachments.take() {
            setup.device.destroy_texture(attachments.colour);
            setup.device.destroy_texture(attachments.depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::packet::Mesh;
    use super::super::test_support::Harness;
    use super::*;
    use crate::render::backends::headless::DeviceCall;
    use crate::render::camera::Camera;
    use crate::render::shaders::MAX_INSTANCES;

    fn pick_view(h: &mut Harness) -> PickView {
        let config = h.view_config(RenderViewKind::Pick);
        PickView::create(&config, &mut h.setup()).unwrap()
    }

    #[test]
    fn test_create_builds_view_targets() {
        let mut h = Harness::new();
        let before = h.device.live_texture_count();
        let view = pick_view(&mut h);
        assert_eq!(h.device.live_texture_count(), before + 2);
        for pass in view.passes() {
            assert_eq!(h.passes.get(pass).unwrap().targets.len(), 1);
        }
    }

    #[test]
    fn test_requires_two_passes() {
        let mut h = Harness::new();
        let mut config = h.view_config(RenderViewKind::Pick);
        config.passes.pop();
        assert!(matches!(PickView::create(&config, &mut h.setup()), Err(RenderError::InvalidConfig(_))));
    }

    #[test]
    fn test_render_grows_instances_and_reads_hovered_id() {
        let mut h = Harness::new();
        let mut view = pick_view(&mut h);
        let world = vec![Mesh::new(5, vec![h.geometries.default_geometry()])];
        let ui = vec![Mesh::new(2, vec![h.geometries.default_geometry_2d()])];
        let camera = Camera::default();
        let scene = SceneData {
            world_meshes: &world,
            ui_meshes: &ui,
            mouse: Some((10_000, -5)),
            ..SceneData::empty(&camera)
        };
        let packet = view.on_build_packet(h.packet_context(), &scene).unwrap();

        // Mouse clamps to the top-right pixel
        let colour = view.colour_attachment().unwrap();
        let (r, g, b) = utils::id_to_rgb(5);
        h.device.set_texture_pixel(colour, 799, 0, [r, g, b, 255]).unwrap();

        let image = h.begin_frame();
        h.device.clear_calls();
        view.on_render(&mut h.context(), &packet, 1, image).unwrap();
        assert_eq!(view.instance_count(), 6);
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::Draw { .. })), 2);
        assert_eq!(view.hovered_id(), Some(5));

        h.device.set_texture_pixel(colour, 799, 0, [255, 255, 255, 255]).unwrap();
        h.frame.end_frame(&mut h.device).unwrap();
        let image = h.begin_frame();
        view.on_render(&mut h.context(), &packet, 2, image).unwrap();
        assert_eq!(view.hovered_id(), None);
    }

    #[test]
    fn test_instance_cap_is_remembered() {
        let mut h = Harness::new();
        let mut view = pick_view(&mut h);
        let world = vec![Mesh::new(MAX_INSTANCES as u32 + 10, vec![h.geometries.default_geometry()])];
        let camera = Camera::default();
        let scene = SceneData {
            world_meshes: &world,
            ..SceneData::empty(&camera)
        };
        let packet = view.on_build_packet(h.packet_context(), &scene).unwrap();

        let image = h.begin_frame();
        view.on_render(&mut h.context(), &packet, 1, image).unwrap();
        assert_eq!(view.instance_count(), MAX_INSTANCES);
        h.frame.end_frame(&mut h.device).unwrap();

        let image = h.begin_frame();
        h.device.clear_calls();
        view.on_render(&mut h.context(), &packet, 2, image).unwrap();
        assert_eq!(h.device.count_calls(|c| matches!(c, DeviceCall::AllocateDescriptorSets(_))), 0);
        assert_eq!(view.instance_count(), MAX_INSTANCES);
    }

    #[test]
    fn test_resize_and_destroy() {
        let mut h = Harness::new();
        let mut view = pick_view(&mut h);
        let colour = view.colour_attachment().unwrap();
        view.on_resize(320, 240);
        view.regenerate_attachments(&mut h.setup()).unwrap();
        assert_eq!(h.device.texture_desc(colour).unwrap().width, 320);
        assert_eq!(h.passes.get(&view.passes()[0]).unwrap().area, RenderArea::sized(320, 240));

        let before = h.device.live_texture_count();
        view.on_destroy(&mut h.setup());
        assert_eq!(h.device.live_texture_count(), before - 2);
        assert_eq!(view.instance_count(), 0);
    }
}
