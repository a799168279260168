//! Perspective camera
//!
//! View space is right-handed and Y-up. The projection maps straight into
//! Vulkan clip space (Y down, depth `[0, 1]`), so shaders need no extra flip.

use crate::foundation::math::{utils, Mat4, Point3, Vec3};

/// 3D perspective camera looking at a target point
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Point the camera is looking at in world space
    pub target: Vec3,
    /// Up vector for camera orientation
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Aspect ratio (width / height)
    pub aspect: f32,
    /// Distance to the near clipping plane
    pub near: f32,
    /// Distance to the far clipping plane
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(Vec3::new(0.0, 2.0, 5.0), 60.0, 16.0 / 9.0, 0.1, 100.0)
    }
}

impl Camera {
    /// Create a perspective camera looking at the origin with +Y up
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target: Vec3::zeros(),
            up: Vec3::new(0.0, 1.0, 0.0),
            fov_y: utils::deg_to_rad(fov_degrees),
            aspect,
            near,
            far,
        }
    }

    /// Point the camera at `target` with the given up vector
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        self.target = target;
        self.up = up;
    }

    /// Update the aspect ratio from a framebuffer size
    ///
    /// Zero-sized framebuffers (minimized windows) leave the ratio untouched.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let aspect = width as f32 / height as f32;
        if (self.aspect - aspect).abs() > 0.01 {
            log::debug!("Camera aspect ratio changed: {:.3} -> {:.3}", self.aspect, aspect);
        }
        self.aspect = aspect;
    }

    /// World-to-view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(&Point3::from(self.position), &Point3::from(self.target), &self.up)
    }

    /// View-to-clip matrix in Vulkan conventions
    pub fn projection_matrix(&self) -> Mat4 {
        utils::vulkan_perspective(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Combined projection × view
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_view_moves_target_onto_negative_z() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 5.0), 60.0, 1.0, 0.1, 100.0);
        let target = camera.view_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(target, Vec4::new(0.0, 0.0, -5.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_target_projects_to_screen_center() {
        let mut camera = Camera::perspective(Vec3::new(3.0, 4.0, 5.0), 45.0, 1.5, 0.1, 100.0);
        camera.look_at(Vec3::new(1.0, 0.0, -1.0), Vec3::new(0.0, 1.0, 0.0));

        let clip = camera.view_projection() * Vec4::new(1.0, 0.0, -1.0, 1.0);
        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-5);
        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
    }

    #[test]
    fn test_world_up_is_screen_up() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 5.0), 60.0, 1.0, 0.1, 100.0);
        let clip = camera.view_projection() * Vec4::new(0.0, 1.0, 0.0, 1.0);
        // Vulkan NDC has +Y pointing down
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_set_viewport_ignores_zero_size() {
        let mut camera = Camera::default();
        camera.set_viewport(800, 400);
        assert_relative_eq!(camera.aspect, 2.0);
        camera.set_viewport(0, 400);
        assert_relative_eq!(camera.aspect, 2.0);
    }
}
