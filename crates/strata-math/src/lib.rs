// SPDX-License-Identifier: CEPL-1.0
//! Transforms for the animated scene.
//!
//! Clip space follows Vulkan conventions: depth in `[0, 1]`, and the
//! renderer flips Y through a negative-height viewport, so projections here
//! are plain right-handed matrices (`perspective_rh`, `[0, 1]` depth).
pub use glam::{Mat4, Vec3};

/// Radians per second around the spin axis.
pub const SPIN_RATE: f32 = 0.9;

#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(2.2, 1.6, 2.8),
            target: Vec3::ZERO,
            fov_y: 45f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, Vec3::Y)
    }

    /// `aspect` is width / height; callers never pass a zero-height surface.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }
}

/// Model matrix for the cube after `elapsed` seconds.
pub fn spin(elapsed: f32) -> Mat4 {
    let angle = elapsed * SPIN_RATE;
    Mat4::from_axis_angle(Vec3::new(0.3, 1.0, 0.2).normalize(), angle)
}

/// Full model-view-projection for the spinning cube.
pub fn spin_mvp(camera: &Camera, elapsed: f32, width: u32, height: u32) -> Mat4 {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    camera.projection(aspect) * camera.view() * spin(elapsed)
}
