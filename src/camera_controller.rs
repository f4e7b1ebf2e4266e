//! Fly-camera driven by the keyboard.
//!
//! Arrow keys look around, WASD moves in the horizontal plane and E/Q move
//! along world up/down.

use glam::Vec3;
use std::f32::consts::PI;
use winit::keyboard::KeyCode;

use crate::camera::Camera;
use crate::config::CameraConfig;
use crate::input::InputState;

/// Keeps the camera from flipping over the vertical axis.
const PITCH_LIMIT: f32 = 1.5;

#[derive(Debug, Clone)]
pub struct CameraController {
    pub move_speed: f32,
    pub look_speed: f32,
}

impl CameraController {
    pub fn new(move_speed: f32, look_speed: f32) -> Self {
        Self {
            move_speed,
            look_speed,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(config.move_speed, config.look_speed)
    }

    pub fn update(&self, dt: f32, input: &InputState, camera: &mut Camera) {
        let axis = |positive: KeyCode, negative: KeyCode| -> f32 {
            let mut value = 0.0;
            if input.is_key_pressed(positive) {
                value += 1.0;
            }
            if input.is_key_pressed(negative) {
                value -= 1.0;
            }
            value
        };

        let look = Vec3::new(
            axis(KeyCode::ArrowUp, KeyCode::ArrowDown),
            axis(KeyCode::ArrowLeft, KeyCode::ArrowRight),
            0.0,
        );

        let mut rotation = camera.rotation();
        if look != Vec3::ZERO {
            rotation += look.normalize() * self.look_speed * dt;
            rotation.x = rotation.x.clamp(-PITCH_LIMIT, PITCH_LIMIT);
            rotation.y = wrap_angle(rotation.y);
        }

        // Movement ignores pitch so W never digs into the ground
        let yaw = rotation.y;
        let forward = Vec3::new(-yaw.sin(), 0.0, -yaw.cos());
        let right = Vec3::new(yaw.cos(), 0.0, -yaw.sin());

        let direction = forward * axis(KeyCode::KeyW, KeyCode::KeyS)
            + right * axis(KeyCode::KeyD, KeyCode::KeyA)
            + Vec3::Y * axis(KeyCode::KeyE, KeyCode::KeyQ);

        let mut position = camera.position();
        if direction.length_squared() > f32::EPSILON {
            position += direction.normalize() * self.move_speed * dt;
        }

        camera.set_position_rotation(position, rotation);
    }
}

/// Wrap to `[-PI, PI)`.
fn wrap_angle(angle: f32) -> f32 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn setup() -> (CameraController, InputState, Camera) {
        (CameraController::new(2.0, 1.0), InputState::new(), Camera::default())
    }

    #[test]
    fn idle_input_leaves_camera_alone() {
        let (controller, input, mut camera) = setup();
        camera.set_position_rotation(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.1, 0.2, 0.0));
        controller.update(0.5, &input, &mut camera);
        assert_eq!(camera.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(camera.rotation(), Vec3::new(0.1, 0.2, 0.0));
    }

    #[test]
    fn w_moves_along_view_direction() {
        let (controller, mut input, mut camera) = setup();
        input.press(KeyCode::KeyW);
        controller.update(0.5, &input, &mut camera);
        assert!(camera.position().abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-6));
    }

    #[test]
    fn diagonal_motion_is_not_faster() {
        let (controller, mut input, mut camera) = setup();
        input.press(KeyCode::KeyW);
        input.press(KeyCode::KeyD);
        input.press(KeyCode::KeyE);
        controller.update(1.0, &input, &mut camera);
        assert_relative_eq!(camera.position().length(), 2.0, epsilon = 1e-5);
    }

    #[test]
    fn opposite_keys_cancel() {
        let (controller, mut input, mut camera) = setup();
        input.press(KeyCode::KeyA);
        input.press(KeyCode::KeyD);
        input.press(KeyCode::ArrowLeft);
        input.press(KeyCode::ArrowRight);
        controller.update(1.0, &input, &mut camera);
        assert_eq!(camera.position(), Vec3::ZERO);
        assert_eq!(camera.rotation(), Vec3::ZERO);
    }

    #[test]
    fn movement_follows_yaw() {
        let (controller, mut input, mut camera) = setup();
        camera.set_position_rotation(Vec3::ZERO, Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0));
        input.press(KeyCode::KeyW);
        controller.update(1.0, &input, &mut camera);
        assert!(camera.position().abs_diff_eq(Vec3::new(-2.0, 0.0, 0.0), 1e-5));
    }

    #[test]
    fn pitch_is_clamped() {
        let (controller, mut input, mut camera) = setup();
        input.press(KeyCode::ArrowUp);
        controller.update(10.0, &input, &mut camera);
        assert_relative_eq!(camera.rotation().x, PITCH_LIMIT);
    }

    #[test]
    fn yaw_wraps() {
        assert_relative_eq!(wrap_angle(PI + 0.5), -PI + 0.5, epsilon = 1e-5);
        assert_relative_eq!(wrap_angle(-PI - 0.5), PI - 0.5, epsilon = 1e-5);
        assert_relative_eq!(wrap_angle(0.25), 0.25, epsilon = 1e-6);
    }
}
