//! Per-frame view input and output
//!
//! [`SceneData`] is what the application hands the renderer each frame. A view
//! reduces it to a [`RenderViewPacket`]: a flat draw list plus the matrices
//! its globals need. Packets only reference resources; destroying one never
//! touches the geometries or materials it lists.

use crate::foundation::math::{Mat4, Transform, Vec3, Vec4};
use crate::render::camera::Camera;
use crate::render::resources::GeometryId;

use super::skybox::Skybox;

/// A drawable: one or more geometries sharing a transform
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Id written by the pick view; unique across world and UI meshes
    pub unique_id: u32,
    /// Placement in world (or screen) space
    pub transform: Transform,
    /// Geometries drawn with this transform
    pub geometries: Vec<GeometryId>,
}

impl Mesh {
    /// Mesh with an identity transform
    pub fn new(unique_id: u32, geometries: Vec<GeometryId>) -> Self {
        Self {
            unique_id,
            transform: Transform::default(),
            geometries,
        }
    }

    /// Builder-style transform override
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

/// Everything the views may draw this frame
#[derive(Debug, Clone, Copy)]
pub struct SceneData<'a> {
    /// Camera for the world, skybox and world pick passes
    pub camera: &'a Camera,
    /// 3D meshes
    pub world_meshes: &'a [Mesh],
    /// Screen-space meshes
    pub ui_meshes: &'a [Mesh],
    /// Background cube map, if any
    pub skybox: Option<&'a Skybox>,
    /// Mouse position in framebuffer pixels
    pub mouse: Option<(i32, i32)>,
    /// Debug render mode for the world shader
    pub render_mode: u32,
}

impl<'a> SceneData<'a> {
    /// A scene with nothing to draw
    pub fn empty(camera: &'a Camera) -> Self {
        Self {
            camera,
            world_meshes: &[],
            ui_meshes: &[],
            skybox: None,
            mouse: None,
            render_mode: 0,
        }
    }
}

/// One geometry draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryRenderData {
    /// Model matrix
    pub model: Mat4,
    /// Geometry to draw
    pub geometry: GeometryId,
    /// Owning mesh's unique id
    pub unique_id: u32,
}

/// View-specific packet data
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PacketExtension {
    /// No extra data
    #[default]
    None,
    /// Skybox to draw
    Skybox(Skybox),
    /// Pick passes' draw lists
    Pick {
        /// UI draws; the world draws are the packet's geometries
        ui_geometries: Vec<GeometryRenderData>,
        /// UI projection
        ui_projection: Mat4,
        /// UI view
        ui_view: Mat4,
        /// Largest unique id drawn
        highest_id: u32,
        /// Mouse position at build time
        mouse: Option<(i32, i32)>,
    },
}

/// Everything a view needs to render one frame
#[derive(Debug, Clone, PartialEq)]
pub struct RenderViewPacket {
    /// Name of the view that built the packet
    pub view: String,
    /// View matrix
    pub view_matrix: Mat4,
    /// Projection matrix
    pub projection_matrix: Mat4,
    /// Camera position
    pub view_position: Vec3,
    /// Ambient light colour
    pub ambient_colour: Vec4,
    /// Debug render mode
    pub render_mode: u32,
    /// Draws in submission order
    pub geometries: Vec<GeometryRenderData>,
    /// View-specific data
    pub extension: PacketExtension,
}

impl RenderViewPacket {
    /// Packet with identity matrices and no draws
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            view: view.into(),
            view_matrix: Mat4::identity(),
            projection_matrix: Mat4::identity(),
            view_position: Vec3::zeros(),
            ambient_colour: Vec4::new(0.25, 0.25, 0.25, 1.0),
            render_mode: 0,
            geometries: Vec::new(),
            extension: PacketExtension::None,
        }
    }
}

/// Flatten meshes into one draw per geometry
pub fn collect_geometries(meshes: &[Mesh]) -> Vec<GeometryRenderData> {
    meshes
        .iter()
        .flat_map(|mesh| {
            let model = mesh.transform.to_matrix();
            mesh.geometries.iter().map(move |&geometry| GeometryRenderData {
                model,
                geometry,
                unique_id: mesh.unique_id,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_collect_geometries_shares_model() {
        let ids = [GeometryId::default(), GeometryId::default()];
        let meshes = vec![
            Mesh::new(7, ids.to_vec()).with_transform(Transform::from_position(Vec3::new(1.0, 0.0, 0.0))),
            Mesh::new(9, vec![ids[0]]),
        ];
        let draws = collect_geometries(&meshes);
        assert_eq!(draws.len(), 3);
        assert_eq!(draws[1].unique_id, 7);
        assert_relative_eq!(draws[1].model[(0, 3)], 1.0);
        assert_eq!(draws[2].unique_id, 9);
    }
}
