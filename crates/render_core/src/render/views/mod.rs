//! # Render Views
//!
//! A render view turns per-frame scene data into draws on one or more render
//! passes. The set of views is closed: world, UI, skybox and pick. Each view
//! follows the same protocol:
//!
//! 1. **Create**: compile the view's shader(s) and cache uniform indices
//! 2. **Build packet**: gather geometry and matrices for this frame
//! 3. **Render**: bind the shader, apply globals once per frame, draw
//! 4. **Destroy packet**: drop the packet's transient lists
//!
//! ## Error Handling
//!
//! Failing to use a view's shader or to apply its globals aborts that view's
//! render and returns the error. A failure applying one material or instance
//! only skips that draw and logs a warning.

pub mod packet;
pub mod pick;
pub mod skybox;
pub mod system;
pub mod ui;
pub mod world;

use serde::{Deserialize, Serialize};

use crate::core::config::RenderViewConfig;
use crate::render::api::*;
use crate::render::frame::FrameCoordinator;
use crate::render::passes::RenderPassRegistry;
use crate::render::resources::{GeometrySystem, MaterialSystem, TextureSystem};
use crate::render::shaders::{ShaderId, ShaderSystem};

pub use packet::{GeometryRenderData, Mesh, PacketExtension, RenderViewPacket, SceneData};
pub use pick::PickView;
pub use skybox::{Skybox, SkyboxView};
pub use system::RenderViewSystem;
pub use ui::UiView;
pub use world::WorldView;

/// Built-in view implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderViewKind {
    /// Lit 3D scene geometry
    World,
    /// Screen-space UI meshes
    Ui,
    /// Cube-mapped background
    Skybox,
    /// Object ids rendered offscreen for mouse picking
    Pick,
}

/// Systems a view is created and resized with
pub struct ViewSetup<'a> {
    /// Backend device
    pub device: &'a mut dyn RenderDevice,
    /// Render passes and their targets
    pub passes: &'a mut RenderPassRegistry,
    /// Shader registry
    pub shaders: &'a mut ShaderSystem,
}

/// Renderer systems a view renders with
///
/// Built by the frontend for each frame from disjoint borrows of its own
/// fields.
pub struct RenderContext<'a> {
    /// Backend device
    pub device: &'a mut dyn RenderDevice,
    /// Frame state machine; passes begin and end through it
    pub frame: &'a mut FrameCoordinator,
    /// Render passes and their targets
    pub passes: &'a mut RenderPassRegistry,
    /// Shader registry
    pub shaders: &'a mut ShaderSystem,
    /// Texture cache
    pub textures: &'a mut TextureSystem,
    /// Material cache
    pub materials: &'a mut MaterialSystem,
    /// Geometry cache and arenas
    pub geometries: &'a GeometrySystem,
}

impl RenderContext<'_> {
    /// Narrow to the systems used for creation and resizing
    pub fn setup(&mut self) -> ViewSetup<'_> {
        ViewSetup {
            device: &mut *self.device,
            passes: &mut *self.passes,
            shaders: &mut *self.shaders,
        }
    }
}

/// Read-only systems a packet is built from
#[derive(Clone, Copy)]
pub struct PacketContext<'a> {
    /// Geometry cache
    pub geometries: &'a GeometrySystem,
    /// Material cache
    pub materials: &'a MaterialSystem,
}

/// Capability set shared by every view kind
pub trait RenderView: std::fmt::Debug {
    /// View name
    fn name(&self) -> &str;

    /// Which implementation this is
    fn kind(&self) -> RenderViewKind;

    /// Names of the passes the view renders, in order
    fn passes(&self) -> &[String];

    /// React to a framebuffer size change
    fn on_resize(&mut self, width: u32, height: u32);

    /// Gather the draws for one frame
    fn on_build_packet(&self, context: PacketContext<'_>, scene: &SceneData<'_>) -> RenderResult<RenderViewPacket>;

    /// Record the packet's draws into the open frame
    fn on_render(
        &mut self,
        context: &mut RenderContext<'_>,
        packet: &RenderViewPacket,
        frame_number: u64,
        image_index: u32,
    ) -> RenderResult<()>;

    /// Release the packet's transient allocations
    fn on_destroy_packet(&self, packet: &mut RenderViewPacket) {
        packet.geometries.clear();
        packet.geometries.shrink_to_fit();
        packet.extension = PacketExtension::None;
    }

    /// Unique id of the object under the mouse, for views that pick
    fn hovered_id(&self) -> Option<u32> {
        None
    }

    /// Rebuild any attachments the view owns after a resize or swapchain rebuild
    fn regenerate_attachments(&mut self, _setup: &mut ViewSetup<'_>) -> RenderResult<()> {
        Ok(())
    }

    /// Release everything the view created
    fn on_destroy(&mut self, _setup: &mut ViewSetup<'_>) {}
}

/// Instantiate the view named by a configuration
pub fn create_view(config: &RenderViewConfig, setup: &mut ViewSetup<'_>) -> RenderResult<Box<dyn RenderView>> {
    if config.passes.is_empty() {
        log::error!("Render view '{}' has no passes", config.name);
        return Err(RenderError::InvalidConfig(format!("render view '{}' has no passes", config.name)));
    }
    for pass in &config.passes {
        if setup.passes.get(pass).is_none() {
            log::error!("Render view '{}' references unknown pass '{}'", config.name, pass);
            return Err(RenderError::not_found("render pass", pass.clone()));
        }
    }
    let view: Box<dyn RenderView> = match config.kind {
        RenderViewKind::World => Box::new(WorldView::create(config, setup)?),
        RenderViewKind::Ui => Box::new(UiView::create(config, setup)?),
        RenderViewKind::Skybox => Box::new(SkyboxView::create(config, setup)?),
        RenderViewKind::Pick => Box::new(PickView::create(config, setup)?),
    };
    log::info!("Created {:?} render view '{}'", config.kind, config.name);
    Ok(view)
}

/// The registered shader called `name`, creating it on its configured pass if needed
pub(crate) fn view_shader(setup: &mut ViewSetup<'_>, name: &str) -> RenderResult<ShaderId> {
    if let Some(id) = setup.shaders.get_id(name) {
        return Ok(id);
    }
    let config = setup.shaders.resolve_config(name)?;
    let pass = setup
        .passes
        .get(&config.renderpass)
        .ok_or_else(|| RenderError::not_found("render pass", config.renderpass.clone()))?;
    setup.shaders.create(setup.device, pass.handle, &config)
}

/// Begin the named pass on the target for `image_index`
pub(crate) fn begin_pass(context: &mut RenderContext<'_>, name: &str, image_index: u32) -> RenderResult<RenderPassHandle> {
    let pass = context.passes.get(name).ok_or_else(|| RenderError::not_found("render pass", name))?;
    let (handle, target, area) = (pass.handle, pass.target(image_index)?, pass.area);
    context.frame.begin_renderpass(context.device, handle, target, area)?;
    Ok(handle)
}

/// Close a pass opened with [`begin_pass`], keeping the draw result
pub(crate) fn end_pass(
    context: &mut RenderContext<'_>,
    pass: RenderPassHandle,
    result: RenderResult<()>,
) -> RenderResult<()> {
    context.frame.end_renderpass(context.device, pass)?;
    result
}

/// Projection aspect ratio for a framebuffer size
pub(crate) fn aspect_ratio(width: u32, height: u32) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}
