//! Orbit camera for the preview renderer.

use glam::{Mat4, Vec3};

use crate::kernel::types::BoundingBox;

/// Orbit parameters driving the preview camera.
#[derive(Debug, Clone, Copy)]
pub struct CameraParams {
    /// Horizontal orbit angle in radians (0 = front).
    pub azimuth: f32,
    /// Vertical orbit angle in radians (positive = looking down).
    pub elevation: f32,
    /// Distance from the camera to the target point.
    pub distance: f32,
    /// Target point the camera looks at.
    pub target: Vec3,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            azimuth: 0.3,
            elevation: 0.6,
            distance: 500.0,
            target: Vec3::ZERO,
        }
    }
}

impl CameraParams {
    pub fn eye(&self) -> Vec3 {
        self.target
            + Vec3::new(
                self.distance * self.azimuth.sin() * self.elevation.cos(),
                self.distance * self.azimuth.cos() * self.elevation.cos(),
                self.distance * self.elevation.sin(),
            )
    }

    /// Frame a bounding box: aim at its center from a distance covering the
    /// largest extent.
    pub fn framing(bbox: &BoundingBox) -> Self {
        let extent = bbox.size().max_element().max(1.0);
        Self {
            target: bbox.center(),
            distance: extent * 1.8,
            ..Self::default()
        }
    }
}

/// Resolved camera basis for ray generation.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub origin: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub fov_factor: f32,
}

impl Camera {
    pub fn look_at(eye: Vec3, target: Vec3, fov_deg: f32) -> Self {
        let forward = (target - eye).normalize();
        let world_up = Vec3::Z;
        let right = forward.cross(world_up).normalize();
        let up = right.cross(forward);
        let fov_factor = (fov_deg.to_radians() * 0.5).tan();
        Self {
            origin: eye,
            forward,
            right,
            up,
            fov_factor,
        }
    }

    pub fn from_params(params: &CameraParams, fov_deg: f32) -> Self {
        Self::look_at(params.eye(), params.target, fov_deg)
    }

    /// Ray direction for normalized screen coordinates `u, v` in [-1, 1].
    pub fn ray(&self, u: f32, v: f32, aspect: f32) -> Vec3 {
        (self.forward
            + self.right * (u * self.fov_factor * aspect)
            + self.up * (v * self.fov_factor))
            .normalize()
    }

    /// Model-view-projection matrix for rasterized overlays.
    pub fn model_view_perspective(&self, aspect: f32, near: f32, far: f32) -> Mat4 {
        let fov_y = 2.0 * self.fov_factor.atan();
        let projection = Mat4::perspective_rh(fov_y, aspect, near, far);
        let view = Mat4::look_at_rh(self.origin, self.origin + self.forward, self.up);
        projection * view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_at_basis_is_orthonormal() {
        let cam = Camera::look_at(Vec3::new(10.0, 0.0, 5.0), Vec3::ZERO, 45.0);
        assert!((cam.forward.length() - 1.0).abs() < 1e-5);
        assert!(cam.forward.dot(cam.right).abs() < 1e-5);
        assert!(cam.forward.dot(cam.up).abs() < 1e-5);
        assert!(cam.right.dot(cam.up).abs() < 1e-5);
    }

    #[test]
    fn central_ray_is_forward() {
        let cam = Camera::look_at(Vec3::new(0.0, -10.0, 0.0), Vec3::ZERO, 50.0);
        let ray = cam.ray(0.0, 0.0, 1.0);
        assert!((ray - cam.forward).length() < 1e-5);
    }

    #[test]
    fn framing_covers_the_box() {
        let bbox = BoundingBox::new(Vec3::ZERO, Vec3::splat(50.0));
        let params = CameraParams::framing(&bbox);
        assert_eq!(params.target, Vec3::splat(25.0));
        assert!(params.distance >= 50.0);
    }
}
