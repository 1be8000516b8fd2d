use std::f32::consts::{FRAC_PI_2, PI};

use crate::types::*;
use strum_macros::{Display, EnumString};

const MOVE_SPEED: f32 = 1.0;
/// Camera updates assume a fixed 60 Hz step.
pub const FRAME_DELTA: f32 = 1.0 / 60.0;
const DRAG_SENSITIVITY: f32 = 10.0;
const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.01;
/// Radians the world turns per arrow key press.
pub const WORLD_ROTATION_STEP: f32 = 0.025;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Key {
    W,
    A,
    S,
    D,
    Left,
    Right,
    /// Cycles the render mode.
    R,
}

/// Discrete input, fed to [`Controls::handle_event`] in arrival order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    KeyPressed(Key),
    KeyReleased(Key),
    /// Cursor movement with the left button held, in pixels.
    Drag { dx: f32, dy: f32 },
    /// Wheel notches, positive zooms in.
    Wheel(f32),
}

/// Orbit camera looking at a target point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Point,
    pub target: Point,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect_ratio: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Camera {
    pub fn new(aspect_ratio: f32) -> Self {
        Self {
            eye: Point::new(0.0, 0.0, 3.0),
            target: Point::origin(),
            up: Vec3::y(),
            fov: 37.5,
            aspect_ratio,
            z_near: 1.0,
            z_far: 1000.0,
        }
    }

    /// Applies one frame of accumulated input. `viewport` is the target size in pixels.
    pub fn update(self, controls: &Controls, viewport: [f32; 2], zoom_scale: f32) -> Self {
        let [width, height] = [viewport[0].max(1.0), viewport[1].max(1.0)];
        let aspect = width / height;

        let front = (self.target - self.eye).normalize();
        let (Some(side), up) = orthonormal_basis(&front, &self.up) else {
            return self;
        };

        let yaw = -DRAG_SENSITIVITY * (controls.drag[0] / width) * PI / aspect;
        let pitch = (DRAG_SENSITIVITY * (controls.drag[1] / height) * PI)
            .clamp(-PITCH_LIMIT, PITCH_LIMIT);
        let rotation = Quat::from_axis_angle(&up, yaw) * Quat::from_axis_angle(&side, pitch);
        let distance = (self.eye - self.target).norm();
        let direction = (rotation * front).normalize();
        let mut eye = self.target - direction * distance;
        let mut target = self.target;

        let mut movement = Vec3::zeros();
        if controls.move_up {
            movement += up.into_inner();
        }
        if controls.move_down {
            movement -= up.into_inner();
        }
        if controls.move_left {
            movement += side.into_inner();
        }
        if controls.move_right {
            movement -= side.into_inner();
        }
        if controls.wheel > 0.0 {
            movement += front;
        }
        if controls.wheel < 0.0 {
            movement -= front;
        }

        if movement.norm_squared() > 0.0 {
            let zooming = controls.wheel != 0.0;
            let scale = if zooming {
                zoom_scale * MOVE_SPEED * FRAME_DELTA
            } else {
                MOVE_SPEED * FRAME_DELTA
            };
            let movement = movement.normalize() * scale;
            eye += movement;
            // Zooming only moves the eye, panning carries the target along.
            if !zooming {
                target += movement;
            }
        }

        Self {
            eye,
            target,
            up: up.into_inner(),
            ..self
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(&self.eye, &self.target, &self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        OPENGL_TO_VULKAN_DEPTH
            * Mat4::new_perspective(
                self.aspect_ratio,
                self.fov.to_radians(),
                self.z_near,
                self.z_far,
            )
    }
}

/// Screen-space side axis and re-orthogonalized up axis for a view direction.
fn orthonormal_basis(front: &Vec3, up: &Vec3) -> (Option<UniVec3>, UniVec3) {
    let side = UniVec3::try_new(up.cross(front), f32::EPSILON);
    let up = side
        .and_then(|side| UniVec3::try_new(front.cross(&side), f32::EPSILON))
        .unwrap_or_else(Vec3::y_axis);
    (side, up)
}

#[rustfmt::skip]
const OPENGL_TO_VULKAN_DEPTH: Mat4 = Mat4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.5,
    0.0, 0.0, 0.0, 1.0,
);

/// Input accumulated between two camera updates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Controls {
    pub move_up: bool,
    pub move_down: bool,
    pub move_left: bool,
    pub move_right: bool,
    pub drag: [f32; 2],
    pub wheel: f32,
    /// World rotation around Y requested by the arrow keys, in radians.
    pub world_rotation: f32,
    pub mode_toggles: u32,
}

impl Controls {
    /// Clears per-frame input. Held keys stay held.
    pub fn reset(self) -> Self {
        Self {
            drag: [0.0; 2],
            wheel: 0.0,
            world_rotation: 0.0,
            mode_toggles: 0,
            ..self
        }
    }

    pub fn handle_event(self, event: &InputEvent) -> Self {
        let mut new_state = self;

        match *event {
            InputEvent::KeyPressed(key) => match key {
                Key::W => new_state.move_up = true,
                Key::S => new_state.move_down = true,
                Key::A => new_state.move_left = true,
                Key::D => new_state.move_right = true,
                Key::Right => new_state.world_rotation += WORLD_ROTATION_STEP,
                Key::Left => new_state.world_rotation -= WORLD_ROTATION_STEP,
                Key::R => new_state.mode_toggles += 1,
            },
            InputEvent::KeyReleased(key) => match key {
                Key::W => new_state.move_up = false,
                Key::S => new_state.move_down = false,
                Key::A => new_state.move_left = false,
                Key::D => new_state.move_right = false,
                Key::Left | Key::Right | Key::R => {}
            },
            InputEvent::Drag { dx, dy } => {
                new_state.drag = [self.drag[0] + dx, self.drag[1] + dy];
            }
            InputEvent::Wheel(notches) => new_state.wheel += notches,
        }

        new_state
    }
}

/// Horizontal drag, in pixels, that turns the camera by `yaw` radians around its up axis.
pub fn drag_for_yaw(yaw: f32, viewport: [f32; 2]) -> f32 {
    let [width, height] = [viewport[0].max(1.0), viewport[1].max(1.0)];
    -yaw * width * (width / height) / (DRAG_SENSITIVITY * PI)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWPORT: [f32; 2] = [1280.0, 720.0];
    const EPS: f32 = 1e-4;

    fn camera() -> Camera {
        Camera::new(VIEWPORT[0] / VIEWPORT[1])
    }

    fn controls(events: &[InputEvent]) -> Controls {
        events
            .iter()
            .fold(Controls::default(), |controls, event| controls.handle_event(event))
    }

    #[test]
    fn default_camera_looks_at_the_origin() {
        let view = camera().view_matrix();
        let origin = view.transform_point(&Point::origin());
        assert!((origin - Point::new(0.0, 0.0, -3.0)).norm() < EPS);
    }

    #[test]
    fn drag_orbits_at_a_constant_distance() {
        let moved = camera().update(
            &controls(&[InputEvent::Drag { dx: 120.0, dy: 40.0 }]),
            VIEWPORT,
            10.0,
        );
        assert!(((moved.eye - moved.target).norm() - 3.0).abs() < EPS);
        assert_ne!(moved.eye, camera().eye);
        assert_eq!(moved.target, Point::origin());
    }

    #[test]
    fn pitch_stops_short_of_the_pole() {
        let moved = camera().update(
            &controls(&[InputEvent::Drag { dx: 0.0, dy: 1.0e6 }]),
            VIEWPORT,
            10.0,
        );
        let direction = (moved.target - moved.eye).normalize();
        let angle = direction.dot(&Vec3::y()).abs().acos();
        assert!(angle >= 0.01 - EPS, "{angle}");
    }

    #[test]
    fn yaw_drag_helper_turns_by_the_requested_angle() {
        let yaw = 10f32.to_radians();
        let moved = camera().update(
            &controls(&[InputEvent::Drag {
                dx: drag_for_yaw(yaw, VIEWPORT),
                dy: 0.0,
            }]),
            VIEWPORT,
            10.0,
        );
        let before = (camera().target - camera().eye).normalize();
        let after = (moved.target - moved.eye).normalize();
        assert!((before.dot(&after).acos() - yaw).abs() < 1e-3);
    }

    #[test]
    fn panning_moves_eye_and_target_together() {
        let moved = camera().update(&controls(&[InputEvent::KeyPressed(Key::W)]), VIEWPORT, 10.0);
        let step = MOVE_SPEED * FRAME_DELTA;
        assert!((moved.eye - Point::new(0.0, step, 3.0)).norm() < EPS);
        assert!((moved.target - Point::new(0.0, step, 0.0)).norm() < EPS);
    }

    #[test]
    fn a_and_d_pan_in_screen_space() {
        let left = camera().update(&controls(&[InputEvent::KeyPressed(Key::A)]), VIEWPORT, 10.0);
        let right = camera().update(&controls(&[InputEvent::KeyPressed(Key::D)]), VIEWPORT, 10.0);
        assert!(left.eye.x < 0.0);
        assert!(right.eye.x > 0.0);
    }

    #[test]
    fn wheel_zooms_the_eye_by_the_zoom_scale() {
        let zoomed = camera().update(&controls(&[InputEvent::Wheel(1.0)]), VIEWPORT, 10.0);
        let step = 10.0 * MOVE_SPEED * FRAME_DELTA;
        assert!((zoomed.eye - Point::new(0.0, 0.0, 3.0 - step)).norm() < EPS);
        assert_eq!(zoomed.target, Point::origin());

        let still = camera().update(&controls(&[InputEvent::Wheel(-1.0)]), VIEWPORT, 0.0);
        assert!((still.eye - camera().eye).norm() < EPS);
    }

    #[test]
    fn reset_keeps_held_keys() {
        let controls = controls(&[
            InputEvent::KeyPressed(Key::W),
            InputEvent::KeyPressed(Key::Right),
            InputEvent::KeyPressed(Key::R),
            InputEvent::Drag { dx: 1.0, dy: 2.0 },
            InputEvent::Wheel(1.0),
        ]);
        assert!((controls.world_rotation - WORLD_ROTATION_STEP).abs() < EPS);
        assert_eq!(controls.mode_toggles, 1);

        let reset = controls.reset();
        assert!(reset.move_up);
        assert_eq!(reset.drag, [0.0; 2]);
        assert_eq!(reset.wheel, 0.0);
        assert_eq!(reset.world_rotation, 0.0);
        assert_eq!(reset.mode_toggles, 0);

        let released = reset.handle_event(&InputEvent::KeyReleased(Key::W));
        assert!(!released.move_up);
    }
}
