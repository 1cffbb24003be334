//! Math utilities and types
//!
//! Thin aliases over nalgebra plus the projection and colour-packing helpers the
//! render views need. Projections are right-handed with a `[0, 1]` depth range;
//! the Vulkan backend flips the viewport so clip-space Y points up.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Position, rotation and scale of a drawable
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in world space
    pub position: Vec3,
    /// Rotation quaternion
    pub rotation: Quat,
    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a transform with only a translation
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Builder-style scale override
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Convert to a model matrix (translation * rotation * scale)
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Math utility functions
pub mod utils {
    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees.to_radians()
    }

    /// Pack the low 24 bits of `id` into an RGB triple
    pub fn id_to_rgb(id: u32) -> (u8, u8, u8) {
        (
            ((id >> 16) & 0xFF) as u8,
            ((id >> 8) & 0xFF) as u8,
            (id & 0xFF) as u8,
        )
    }

    /// Inverse of [`id_to_rgb`]
    pub fn rgb_to_id(r: u8, g: u8, b: u8) -> u32 {
        (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
    }

    /// Normalised colour vector for an id, as written into id-colour uniforms
    pub fn id_to_color(id: u32) -> super::Vec3 {
        let (r, g, b) = id_to_rgb(id);
        super::Vec3::new(f32::from(r) / 255.0, f32::from(g) / 255.0, f32::from(b) / 255.0)
    }
}

/// Projection and view helpers for `Mat4`
pub trait Mat4Ext {
    /// Right-handed perspective projection with depth mapped to `[0, 1]`
    fn perspective_rh_zo(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Right-handed orthographic projection with depth mapped to `[0, 1]`
    fn orthographic_rh_zo(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4;

    /// Right-handed look-at view matrix
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Copy of a view matrix with its translation removed (skybox rendering)
    fn without_translation(&self) -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn perspective_rh_zo(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        let tan_half_fovy = (fov_y * 0.5).tan();
        let mut result = Mat4::zeros();
        result[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
        result[(1, 1)] = 1.0 / tan_half_fovy;
        result[(2, 2)] = far / (near - far);
        result[(2, 3)] = (near * far) / (near - far);
        result[(3, 2)] = -1.0;
        result
    }

    fn orthographic_rh_zo(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
        let mut result = Mat4::identity();
        result[(0, 0)] = 2.0 / (right - left);
        result[(1, 1)] = 2.0 / (top - bottom);
        result[(2, 2)] = -1.0 / (far - near);
        result[(0, 3)] = -(right + left) / (right - left);
        result[(1, 3)] = -(top + bottom) / (top - bottom);
        result[(2, 3)] = -near / (far - near);
        result
    }

    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        Mat4::look_at_rh(&Point3::from(eye), &Point3::from(target), &up)
    }

    fn without_translation(&self) -> Mat4 {
        let mut result = *self;
        result[(0, 3)] = 0.0;
        result[(1, 3)] = 0.0;
        result[(2, 3)] = 0.0;
        result
    }
}
