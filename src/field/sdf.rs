//! The opaque model-kernel interface.
//!
//! The compiler frontend hands the engine a pure function evaluating the
//! signed distance field of the user model at a point. Everything downstream
//! (slicing, raymarching, precompute, bounding-box discovery) only sees this
//! trait.

use glam::Vec3;

/// A signed distance field: negative inside, positive outside, zero on the
/// surface. Implemented for every `Fn(Vec3) -> f32 + Sync`.
pub trait Sdf: Sync {
    fn eval(&self, pos: Vec3) -> f32;
}

impl<F: Fn(Vec3) -> f32 + Sync> Sdf for F {
    fn eval(&self, pos: Vec3) -> f32 {
        self(pos)
    }
}

/// Exact sphere SDF centered at the origin.
pub fn sphere(radius: f32) -> impl Sdf {
    move |pos: Vec3| pos.length() - radius
}

/// Gyroid surface with the given cell period and wall thickness; a standard
/// lattice infill test field.
pub fn gyroid(period: f32, thickness: f32) -> impl Sdf {
    let k = std::f32::consts::TAU / period;
    move |pos: Vec3| {
        let p = pos * k;
        let g = p.x.sin() * p.y.cos() + p.y.sin() * p.z.cos() + p.z.sin() * p.x.cos();
        g.abs() / k - thickness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_sdf_signs() {
        let s = sphere(2.0);
        assert!(s.eval(Vec3::ZERO) < 0.0);
        assert!((s.eval(Vec3::new(2.0, 0.0, 0.0))).abs() < 1e-6);
        assert!(s.eval(Vec3::new(5.0, 0.0, 0.0)) > 0.0);
    }

    #[test]
    fn gyroid_is_periodic() {
        let g = gyroid(10.0, 0.4);
        let p = Vec3::new(1.3, 2.7, 0.4);
        let shifted = p + Vec3::new(10.0, 0.0, 0.0);
        assert!((g.eval(p) - g.eval(shifted)).abs() < 1e-4);
    }
}
