use std::f32::consts::PI;

use glam::{Mat4, Vec2, Vec3};

const EPS: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveCamera {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    target: Vec3,
    projection: Mat4,
}

impl PerspectiveCamera {
    pub fn new(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self {
            fov,
            aspect,
            near,
            far,
            position: Vec3::ZERO,
            target: Vec3::NEG_Z,
            projection: Mat4::IDENTITY,
        };
        camera.update_projection();
        camera
    }

    /// Updates the aspect ratio for a viewport; a zero height keeps the old ratio.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
        self.update_projection();
    }

    pub fn update_projection(&mut self) {
        self.projection = Mat4::perspective_rh(self.fov.to_radians(), self.aspect, self.near, self.far);
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, Vec3::Y)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view()
    }
}

/// Orbits the camera around a focus target. Input accumulates into pending
/// deltas that [`OrbitControls::update`] applies, gradually when damping is on.
#[derive(Debug, Clone)]
pub struct OrbitControls {
    pub target: Vec3,
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    enabled: bool,
    rotate_delta: Vec2,
    dolly_scale: f32,
}

impl OrbitControls {
    pub fn new(target: Vec3) -> Self {
        Self {
            target,
            enable_damping: false,
            damping_factor: 0.05,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            enabled: true,
            rotate_delta: Vec2::ZERO,
            dolly_scale: 1.0,
        }
    }

    /// Moves the focus point. The camera keeps its position and turns to face it.
    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
    }

    /// Queues a rotation in radians: `x` around the vertical axis, `y` towards the poles.
    pub fn rotate(&mut self, delta: Vec2) {
        if self.enabled {
            self.rotate_delta += delta;
        }
    }

    /// Queues a distance change; values above 1 move away from the target.
    pub fn dolly(&mut self, scale: f32) {
        if self.enabled && scale > 0.0 {
            self.dolly_scale *= scale;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_pending_motion(&self) -> bool {
        self.rotate_delta.length_squared() > EPS * EPS
    }

    /// Applies pending input and re-aims the camera. Returns whether the camera moved.
    pub fn update(&mut self, camera: &mut PerspectiveCamera, dt: f32) -> bool {
        if !self.enabled {
            return false;
        }

        let offset = camera.position - self.target;
        let mut radius = offset.length().max(EPS);
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = (offset.y / radius).clamp(-1.0, 1.0).acos();

        let applied = if self.enable_damping {
            let retention = (1.0 - self.damping_factor).powf(dt.max(0.0) * 60.0);
            let applied = self.rotate_delta * (1.0 - retention);
            self.rotate_delta *= retention;
            applied
        } else {
            std::mem::replace(&mut self.rotate_delta, Vec2::ZERO)
        };
        theta += applied.x;
        phi = (phi + applied.y).clamp(EPS, PI - EPS);

        radius = (radius * self.dolly_scale).clamp(self.min_distance.max(EPS), self.max_distance);
        self.dolly_scale = 1.0;

        let position = self.target
            + radius * Vec3::new(phi.sin() * theta.sin(), phi.cos(), phi.sin() * theta.cos());
        let moved = position.distance(camera.position) > EPS || camera.target() != self.target;
        camera.position = position;
        camera.look_at(self.target);
        moved
    }

    pub fn dispose(&mut self) {
        self.enabled = false;
        self.rotate_delta = Vec2::ZERO;
        self.dolly_scale = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> PerspectiveCamera {
        let mut camera = PerspectiveCamera::new(50.0, 800.0 / 600.0, 0.1, 1000.0);
        camera.position = Vec3::new(-50.0, 20.0, 70.0);
        camera.look_at(Vec3::new(0.0, 50.0, 0.0));
        camera
    }

    #[test]
    fn viewport_sets_aspect_and_ignores_zero_height() {
        let mut camera = camera();
        camera.set_viewport(1024, 512);
        assert_eq!(camera.aspect, 2.0);
        camera.set_viewport(1024, 0);
        assert_eq!(camera.aspect, 2.0);
        assert!(camera.projection().is_finite());
    }

    #[test]
    fn retargeting_keeps_camera_position() {
        let mut camera = camera();
        let mut controls = OrbitControls::new(Vec3::new(0.0, 50.0, 0.0));
        let before = camera.position;

        controls.set_target(Vec3::new(10.0, 40.0, -5.0));
        controls.update(&mut camera, 1.0 / 60.0);

        assert!(camera.position.distance(before) < 1e-3);
        assert_eq!(camera.target(), Vec3::new(10.0, 40.0, -5.0));
    }

    #[test]
    fn damping_spreads_rotation_over_frames() {
        let mut camera = camera();
        let mut controls = OrbitControls::new(Vec3::new(0.0, 50.0, 0.0));
        controls.enable_damping = true;
        controls.rotate(Vec2::new(0.5, 0.0));

        assert!(controls.update(&mut camera, 1.0 / 60.0));
        assert!(controls.has_pending_motion());

        for _ in 0..600 {
            controls.update(&mut camera, 1.0 / 60.0);
        }
        assert!(!controls.has_pending_motion());
    }

    #[test]
    fn disposed_controls_ignore_input() {
        let mut camera = camera();
        let mut controls = OrbitControls::new(Vec3::ZERO);
        controls.dispose();
        controls.rotate(Vec2::ONE);
        assert!(!controls.update(&mut camera, 0.1));
        assert_eq!(camera.position, Vec3::new(-50.0, 20.0, 70.0));
    }
}
