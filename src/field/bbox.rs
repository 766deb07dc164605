//! Bounding-box discovery for implicit models of unknown extent.
//!
//! Seeds a grid of points on each face of a large initial box and projects
//! every seed onto the surface along the negated gradient. The union of the
//! projected points bounds the model; repeating the process with the
//! improved box as the next seed region tightens it. Disconnected
//! components entirely outside the initial box are missed; that is a
//! limitation of the method, not a defect.

use glam::Vec3;

use crate::field::sdf::Sdf;
use crate::kernel::types::BoundingBox;

/// Seeds per face edge (10x10 per face).
const FACE_STEPS: i32 = 10;
/// Half extent of the initial search box.
const INITIAL_EXTENT: f32 = 1000.0;
/// Finite-difference step for gradient estimation.
const GRADIENT_EPS: f32 = 1e-4;
/// Growth below this threshold terminates the iteration early.
const CONVERGENCE_EPS: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BboxError {
    /// Surface projection produced no positive bound at all.
    BoundingBoxUnavailable,
}

impl std::fmt::Display for BboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BboxError::BoundingBoxUnavailable => {
                write!(f, "surface projection produced no usable bound")
            }
        }
    }
}

impl std::error::Error for BboxError {}

/// Result of a discovery run. `partial` is set when at least one face kept
/// its seed-box value because no ray from it crossed the surface; callers
/// may retry with a larger seed box.
#[derive(Debug, Clone, Copy)]
pub struct BboxDiscovery {
    pub bounds: BoundingBox,
    pub partial: bool,
    pub iterations: u32,
}

/// Single sphere-trace step chain toward the zero level set.
pub fn ray_cast(mut pos: Vec3, direction: Vec3, model: &dyn Sdf, max_iterations: u32) -> Vec3 {
    let tolerance = 1e-8f32;
    let mut sdf = model.eval(pos);
    let mut i = 0;
    while sdf.abs() > tolerance && i < max_iterations {
        pos += direction * sdf;
        sdf = model.eval(pos);
        i += 1;
    }
    pos
}

/// Surface normal by 4-point finite differences (tetrahedron offsets).
pub fn surface_normal(pos: Vec3, model: &dyn Sdf) -> Vec3 {
    let x = 1.0f32;
    let y = -1.0f32;
    let xyy = Vec3::new(x, y, y);
    let yyx = Vec3::new(y, y, x);
    let yxy = Vec3::new(y, x, y);
    let xxx = Vec3::new(x, x, x);

    let normal = xyy * model.eval(pos + xyy * GRADIENT_EPS)
        + yyx * model.eval(pos + yyx * GRADIENT_EPS)
        + yxy * model.eval(pos + yxy * GRADIENT_EPS)
        + xxx * model.eval(pos + xxx * GRADIENT_EPS);
    normal.normalize_or_zero()
}

/// One projection step along the negated gradient.
pub fn move_to_surface(pos: Vec3, model: &dyn Sdf) -> Vec3 {
    let direction = -surface_normal(pos, model);
    ray_cast(pos, direction, model, 1)
}

struct FaceSweep {
    bounds: BoundingBox,
    /// Per-face validity: [-z, +z, -x, +x, -y, +y].
    face_valid: [bool; 6],
}

impl FaceSweep {
    fn any_projection(&self) -> bool {
        self.face_valid.iter().any(|&v| v)
    }
}

/// Project the seed grid of all six faces of `bbox` and return the AABB of
/// the projected points, tracking which faces answered at all.
fn improve_bounding_box(bbox: &BoundingBox, model: &dyn Sdf) -> FaceSweep {
    let steps = FACE_STEPS;
    let inc = bbox.size() / steps as f32;

    let mut sweep = FaceSweep {
        bounds: BoundingBox::empty(),
        face_valid: [false; 6],
    };

    let mut project = |seed: Vec3, face: usize, sweep: &mut FaceSweep| {
        let projected = move_to_surface(seed, model);
        if !projected.is_finite() {
            return;
        }
        // A face answered when some seed got closer to the surface, or
        // already sits on it.
        let residual = model.eval(projected).abs();
        if residual < model.eval(seed).abs() || residual <= 1e-6 {
            sweep.face_valid[face] = true;
        }
        sweep.bounds.extend(projected);
    };

    // Bottom and top faces.
    for y in 0..steps {
        for x in 0..steps {
            let fx = bbox.min.x + x as f32 * inc.x;
            let fy = bbox.min.y + y as f32 * inc.y;
            project(Vec3::new(fx, fy, bbox.min.z), 0, &mut sweep);
            project(Vec3::new(fx, fy, bbox.max.z), 1, &mut sweep);
        }
    }
    // Left and right faces.
    for y in 0..steps {
        for z in 0..steps {
            let fy = bbox.min.y + y as f32 * inc.y;
            let fz = bbox.min.z + z as f32 * inc.z;
            project(Vec3::new(bbox.min.x, fy, fz), 2, &mut sweep);
            project(Vec3::new(bbox.max.x, fy, fz), 3, &mut sweep);
        }
    }
    // Front and back faces.
    for x in 0..steps {
        for z in 0..steps {
            let fx = bbox.min.x + x as f32 * inc.x;
            let fz = bbox.min.z + z as f32 * inc.z;
            project(Vec3::new(fx, bbox.min.y, fz), 4, &mut sweep);
            project(Vec3::new(fx, bbox.max.y, fz), 5, &mut sweep);
        }
    }

    sweep
}

/// Discover a tight AABB of `model` by iterated surface projection.
///
/// Runs `num_iterations` improvement passes (at least one), re-seeding from
/// the improved box each time and stopping early once no face moves by more
/// than the convergence threshold. Faces the surface never answered keep the
/// seed-box value and flag the result as partial.
pub fn determine_bbox(model: &dyn Sdf, num_iterations: u32) -> Result<BboxDiscovery, BboxError> {
    let mut bbox = BoundingBox::from_center_half_extents(Vec3::ZERO, Vec3::splat(INITIAL_EXTENT));
    let mut partial = false;
    let mut iterations = 0;

    for _ in 0..num_iterations.max(1) {
        let sweep = improve_bounding_box(&bbox, model);
        iterations += 1;

        if !sweep.any_projection() {
            return Err(BboxError::BoundingBoxUnavailable);
        }

        let mut next = sweep.bounds;
        // Faces the surface never answered keep the seed-box value.
        for face in 0..6 {
            if sweep.face_valid[face] {
                continue;
            }
            partial = true;
            match face {
                0 => next.min.z = bbox.min.z,
                1 => next.max.z = bbox.max.z,
                2 => next.min.x = bbox.min.x,
                3 => next.max.x = bbox.max.x,
                4 => next.min.y = bbox.min.y,
                _ => next.max.y = bbox.max.y,
            }
        }
        if !next.is_valid() {
            partial = true;
            next = bbox;
        }

        let growth = (next.min - bbox.min)
            .abs()
            .max((next.max - bbox.max).abs())
            .max_element();
        bbox = next;
        if growth <= CONVERGENCE_EPS {
            break;
        }
    }

    if partial {
        log::warn!("bounding-box discovery is partial; consider a larger seed box");
    }

    Ok(BboxDiscovery {
        bounds: bbox,
        partial,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::sdf::sphere;

    #[test]
    fn ray_cast_lands_on_sphere_surface() {
        let model = sphere(12.34);
        let hit = ray_cast(
            Vec3::new(-50.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            &model,
            1000,
        );
        assert!(model.eval(hit).abs() < 1e-3);
    }

    #[test]
    fn surface_normal_of_centered_sphere_points_outward() {
        let model = sphere(12.34);
        let normal = surface_normal(Vec3::new(-50.0, 0.0, 0.0), &model);
        assert!((normal.x + 1.0).abs() < 1e-4);
        assert!(normal.y.abs() < 1e-4);
        assert!(normal.z.abs() < 1e-4);
    }

    #[test]
    fn move_to_surface_reduces_distance() {
        let model = sphere(12.34);
        for seed in [
            Vec3::new(-50.0, 0.0, 0.0),
            Vec3::new(50.0, 0.0, 0.0),
            Vec3::new(-50.0, 50.0, 0.0),
            Vec3::new(0.0, 0.0, 50.0),
            Vec3::new(0.0, 0.0, 0.1),
        ] {
            let moved = move_to_surface(seed, &model);
            assert!(model.eval(moved).abs() < model.eval(seed).abs());
        }
    }

    #[test]
    fn sphere_bbox_matches_diameter() {
        let radius = 12.34f32;
        let model = sphere(radius);
        let result = determine_bbox(&model, 10).unwrap();
        assert!(!result.partial);

        let size = result.bounds.size();
        let diameter = 2.0 * radius;
        assert!((size.x - diameter).abs() <= 1e-4, "width {}", size.x);
        assert!((size.y - diameter).abs() <= 1e-4, "length {}", size.y);
        assert!((size.z - diameter).abs() <= 1e-4, "height {}", size.z);
        assert!((result.bounds.max.x - radius).abs() <= 1e-4);
        assert!((result.bounds.min.x + radius).abs() <= 1e-4);
    }

    #[test]
    fn off_center_sphere_is_enclosed() {
        let center = Vec3::new(30.0, -12.0, 8.0);
        let model = move |pos: Vec3| (pos - center).length() - 5.0;
        let result = determine_bbox(&model, 10).unwrap();
        let b = result.bounds;
        assert!((b.center() - center).length() < 1e-2);
        assert!((b.size().x - 10.0).abs() < 1e-2);
    }
}
