//! Camera and view/projection management.
//!
//! World space is right-handed with +Y up; an unrotated camera looks down -Z.
//! Projection matrices target Vulkan clip space: depth in `[0, 1]` and the Y
//! axis flipped so that +Y ends up at the top of the screen.

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::config::{CameraConfig, ProjectionKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in radians
        fov_y: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        /// Half of the visible height in world units; width follows the aspect
        half_height: f32,
        near: f32,
        far: f32,
    },
}

impl Projection {
    pub fn from_config(config: &CameraConfig) -> Self {
        match config.projection {
            ProjectionKind::Perspective => Projection::Perspective {
                fov_y: config.fov_degrees.to_radians(),
                near: config.near,
                far: config.far,
            },
            ProjectionKind::Orthographic => Projection::Orthographic {
                half_height: config.ortho_half_height,
                near: config.near,
                far: config.far,
            },
        }
    }
}

/// Camera for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    /// Euler angles in radians: x = pitch, y = yaw, z = roll
    rotation: Vec3,
    projection: Projection,
    aspect: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(
            Vec3::ZERO,
            Vec3::ZERO,
            Projection::Perspective {
                fov_y: 50f32.to_radians(),
                near: 0.1,
                far: 100.0,
            },
        )
    }
}

impl Camera {
    pub fn new(position: Vec3, rotation: Vec3, projection: Projection) -> Self {
        Self {
            position,
            rotation,
            projection,
            aspect: 1.0,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn set_position_rotation(&mut self, position: Vec3, rotation: Vec3) {
        self.position = position;
        self.rotation = rotation;
    }

    /// Zero or negative ratios (minimized window) are ignored.
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.rotation.y, self.rotation.x, self.rotation.z)
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation() * Vec3::NEG_Z
    }

    pub fn up(&self) -> Vec3 {
        self.orientation() * Vec3::Y
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), self.up())
    }

    pub fn projection_matrix(&self) -> Mat4 {
        let mut projection = match self.projection {
            Projection::Perspective { fov_y, near, far } => {
                Mat4::perspective_rh(fov_y, self.aspect, near, far)
            }
            Projection::Orthographic {
                half_height,
                near,
                far,
            } => {
                let half_width = half_height * self.aspect;
                Mat4::orthographic_rh(-half_width, half_width, -half_height, half_height, near, far)
            }
        };
        // Vulkan's framebuffer Y points down
        projection.y_axis.y *= -1.0;
        projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    fn to_ndc(m: Mat4, p: Vec3) -> Vec3 {
        let clip = m * p.extend(1.0);
        clip.truncate() / clip.w
    }

    fn unit_ortho() -> Projection {
        Projection::Orthographic {
            half_height: 1.0,
            near: 0.0,
            far: 10.0,
        }
    }

    #[test]
    fn unrotated_camera_looks_down_negative_z() {
        let camera = Camera::default();
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_Z, 1e-6));
        assert!(camera.up().abs_diff_eq(Vec3::Y, 1e-6));
        assert!(camera.view_matrix().abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn yaw_turns_left() {
        let mut camera = Camera::default();
        camera.set_position_rotation(Vec3::ZERO, Vec3::new(0.0, FRAC_PI_2, 0.0));
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_X, 1e-6));
        assert!(camera.up().abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn positive_pitch_looks_up() {
        let mut camera = Camera::default();
        camera.set_position_rotation(Vec3::ZERO, Vec3::new(0.3, 0.0, 0.0));
        assert!(camera.forward().y > 0.0);
    }

    #[test]
    fn view_moves_world_opposite_to_camera() {
        let mut camera = Camera::default();
        camera.set_position_rotation(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO);
        let p = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert!(p.abs_diff_eq(Vec3::new(0.0, 0.0, -3.0), 1e-6));
    }

    #[test]
    fn perspective_depth_range_is_zero_to_one() {
        let camera = Camera::new(
            Vec3::ZERO,
            Vec3::ZERO,
            Projection::Perspective {
                fov_y: 1.0,
                near: 0.5,
                far: 20.0,
            },
        );
        let proj = camera.projection_matrix();
        assert_relative_eq!(to_ndc(proj, Vec3::new(0.0, 0.0, -0.5)).z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(to_ndc(proj, Vec3::new(0.0, 0.0, -20.0)).z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = Camera::default();
        let above = to_ndc(camera.projection_matrix(), Vec3::new(0.0, 0.5, -2.0));
        assert!(above.y < 0.0, "points above the camera land in the top half");

        let ortho = Camera::new(Vec3::ZERO, Vec3::ZERO, unit_ortho());
        let above = to_ndc(ortho.projection_matrix(), Vec3::new(0.0, 1.0, -1.0));
        assert_relative_eq!(above.y, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn orthographic_width_follows_aspect() {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::ZERO, unit_ortho());
        camera.set_aspect_ratio(2.0);
        let edge = to_ndc(camera.projection_matrix(), Vec3::new(2.0, 0.0, -1.0));
        assert_relative_eq!(edge.x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn invalid_aspect_is_ignored() {
        let mut camera = Camera::default();
        camera.set_aspect_ratio(1.5);
        let expected = camera.projection_matrix();

        camera.set_aspect_ratio(0.0);
        camera.set_aspect_ratio(f32::NAN);
        assert!(camera.projection_matrix().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn projection_from_config() {
        let mut config = CameraConfig::default();
        assert_eq!(
            Projection::from_config(&config),
            Projection::Perspective {
                fov_y: 50f32.to_radians(),
                near: 0.1,
                far: 100.0,
            }
        );

        config.projection = ProjectionKind::Orthographic;
        config.ortho_half_height = 2.0;
        assert_eq!(
            Projection::from_config(&config),
            Projection::Orthographic {
                half_height: 2.0,
                near: 0.1,
                far: 100.0,
            }
        );
    }
}
