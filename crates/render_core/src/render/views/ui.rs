//! UI view
//!
//! Screen-space meshes drawn with an orthographic projection whose origin is
//! the top-left corner of the framebuffer.

use super::packet::{collect_geometries, RenderViewPacket, SceneData};
use super::world::draw_material_geometry;
use super::*;
use crate::core::config::RenderViewConfig;
use crate::foundation::math::{Mat4, Mat4Ext};
use crate::render::resources::GlobalUniforms;
use crate::render::shaders::BUILTIN_UI_SHADER;

/// Near clip of the UI projection
pub const UI_NEAR_CLIP: f32 = -100.0;
/// Far clip of the UI projection
pub const UI_FAR_CLIP: f32 = 100.0;

/// Pixel-space projection for a framebuffer
pub fn ui_projection(width: u32, height: u32) -> Mat4 {
    Mat4::orthographic_rh_zo(0.0, width as f32, height as f32, 0.0, UI_NEAR_CLIP, UI_FAR_CLIP)
}

/// Screen-space UI view
#[derive(Debug)]
pub struct UiView {
    name: String,
    passes: Vec<String>,
    shader: ShaderId,
    projection: Mat4,
    view: Mat4,
}

impl UiView {
    /// Create the view, creating its shader if it is not registered yet
    pub fn create(config: &RenderViewConfig, setup: &mut ViewSetup<'_>) -> RenderResult<Self> {
        let shader_name = config.custom_shader_name.as_deref().unwrap_or(BUILTIN_UI_SHADER);
        let shader = view_shader(setup, shader_name)?;
        let (width, height) = setup.device.framebuffer_size();
        Ok(Self {
            name: config.name.clone(),
            passes: config.passes.clone(),
            shader,
            projection: ui_projection(width, height),
            view: Mat4::identity(),
        })
    }

    fn draw(&self, context: &mut RenderContext<'_>, packet: &RenderViewPacket, frame_number: u64) -> RenderResult<()> {
        context.shaders.use_shader(context.device, self.shader)?;
        let globals = GlobalUniforms {
            projection: packet.projection_matrix,
            view: packet.view_matrix,
            ..GlobalUniforms::default()
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

impl RenderView for UiView {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RenderViewKind {
        RenderViewKind::Ui
    }

    fn passes(&self) -> &[String] {
        &self.passes
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.projection = ui_projection(width, height);
    }

    fn on_build_packet(&self, _context: PacketContext<'_>, scene: &SceneData<'_>) -> RenderResult<RenderViewPacket> {
        let mut packet = RenderViewPacket::new(&self.name);
        packet.projection_matrix = self.projection;
        packet.view_matrix = self.view;
        packet.geometries = collect_geometries(scene.ui_meshes);
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
