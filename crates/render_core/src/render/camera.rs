//! # Camera
//!
//! Look-at camera feeding the world, skybox and pick views. The camera only
//! owns its placement and lens; the aspect ratio comes from the view that
//! renders it, so one camera can serve views of different sizes.

use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3};

/// Perspective camera with a look-at orientation
///
/// # Coordinate System
/// Right-handed and Y-up in view space, looking down -Z. Projections map depth
/// to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,

    /// Point the camera is looking at in world space
    pub target: Vec3,

    /// Up vector for camera orientation (typically [0, 1, 0])
    pub up: Vec3,

    /// Vertical field of view in radians
    pub fov: f32,

    /// Distance to near clipping plane
    pub near: f32,

    /// Distance to far clipping plane
    pub far: f32,
}

impl Camera {
    /// Create a perspective camera looking at the origin
    ///
    /// # Arguments
    /// * `position` - Camera position in world space
    /// * `fov_degrees` - Vertical field of view in degrees
    /// * `near` - Distance to near clipping plane (must be > 0)
    /// * `far` - Distance to far clipping plane (must be > near)
    pub fn perspective(position: Vec3, fov_degrees: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target: Vec3::zeros(),
            up: Vec3::y(),
            fov: utils::deg_to_rad(fov_degrees),
            near,
            far,
        }
    }

    /// Update camera position in world space
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        log::trace!("Camera position updated to: {:?}", position);
    }

    /// Point the camera at `target` with a custom up vector
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        self.target = target;
        self.up = up;
        log::trace!("Camera look_at updated - target: {:?}, up: {:?}", target, up);
    }

    /// World-to-camera transform
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at(self.position, self.target, self.up)
    }

    /// Perspective projection for a viewport of the given aspect ratio
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh_zo(self.fov, aspect, self.near, self.far)
    }

    /// Distance from the camera to a world-space point
    pub fn distance_to(&self, point: &Vec3) -> f32 {
        (point - self.position).norm()
    }
}

impl Default for Camera {
    /// Camera above and behind the origin with a 45 degree lens
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 3.0, 3.0),
            target: Vec3::zeros(),
            up: Vec3::y(),
            fov: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_view_moves_target_onto_negative_z() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 10.0), 45.0, 0.1, 100.0);
        let target = camera.view_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(target.z, -10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_distance() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 5.0), 45.0, 0.1, 100.0);
        assert_relative_eq!(camera.distance_to(&Vec3::new(0.0, 0.0, 2.0)), 3.0);
    }

    #[test]
    fn test_default_lens() {
        let camera = Camera::default();
        assert_relative_eq!(camera.fov, utils::deg_to_rad(45.0));
        assert_relative_eq!(camera.far, 1000.0);
    }
}
