//! Precomputed SDF volume.
//!
//! A low-resolution scalar cube over the build volume whose values bound the
//! true SDF magnitude from below, letting the raymarcher take safe steps
//! without touching the model kernel. When the feature is disabled a
//! single-voxel dummy stays allocated so kernel signatures remain uniform.

use glam::Vec3;
use rayon::prelude::*;

use crate::field::sdf::Sdf;
use crate::kernel::types::{ApproximationMode, BoundingBox};

pub const DEFAULT_RESOLUTION: usize = 128;

/// 3D scalar grid with its world bounding box.
#[derive(Debug, Clone)]
pub struct PreComputedSdf {
    resolution: usize,
    values: Vec<f32>,
    bbox: BoundingBox,
    enabled: bool,
}

impl Default for PreComputedSdf {
    fn default() -> Self {
        Self::disabled()
    }
}

impl PreComputedSdf {
    /// The single-voxel placeholder used while the feature is off.
    pub fn disabled() -> Self {
        Self {
            resolution: 1,
            values: vec![f32::MAX],
            bbox: BoundingBox::empty(),
            enabled: false,
        }
    }

    pub fn new(resolution: usize) -> Self {
        let resolution = resolution.max(1);
        Self {
            resolution,
            values: vec![f32::MAX; resolution * resolution * resolution],
            bbox: BoundingBox::empty(),
            enabled: true,
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn voxel_count(&self) -> usize {
        self.values.len()
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Edge lengths of one cell.
    pub fn cell_size(&self) -> Vec3 {
        self.bbox.size() / self.resolution as f32
    }

    /// Fill the grid by evaluating `model` at every voxel center, slabs in
    /// parallel. The grid box is stored for the raymarcher's
    /// inside-the-volume test.
    pub fn compute(&mut self, model: &dyn Sdf, bbox: BoundingBox) {
        debug_assert!(bbox.is_valid());
        self.bbox = bbox;
        let n = self.resolution;
        let cell = bbox.size() / n as f32;
        let origin = bbox.min + cell * 0.5;

        self.values
            .par_chunks_exact_mut(n * n)
            .enumerate()
            .for_each(|(z, slab)| {
                let pz = origin.z + z as f32 * cell.z;
                for y in 0..n {
                    let py = origin.y + y as f32 * cell.y;
                    for x in 0..n {
                        let px = origin.x + x as f32 * cell.x;
                        slab[y * n + x] = model.eval(Vec3::new(px, py, pz));
                    }
                }
            });

        log::info!(
            "precomputed SDF: {}^3 voxels over {:?}..{:?}",
            n,
            bbox.min,
            bbox.max
        );
    }

    /// Replace the grid contents with externally computed values (device
    /// readback path). The value count must match the grid.
    pub fn replace_values(&mut self, values: &[f32], bbox: BoundingBox) {
        debug_assert_eq!(values.len(), self.values.len());
        let n = self.values.len().min(values.len());
        self.values[..n].copy_from_slice(&values[..n]);
        self.bbox = bbox;
    }

    fn value_at(&self, x: usize, y: usize, z: usize) -> f32 {
        let n = self.resolution;
        self.values[(z * n + y) * n + x]
    }

    /// Continuous grid coordinates of a world position (cell-center based).
    fn grid_coords(&self, pos: Vec3) -> Vec3 {
        let cell = self.cell_size();
        (pos - self.bbox.min) / cell - Vec3::splat(0.5)
    }

    /// Nearest-voxel sample; clamps to the grid.
    pub fn sample_nearest(&self, pos: Vec3) -> f32 {
        let n = self.resolution as i32;
        let g = self.grid_coords(pos);
        let x = (g.x.round() as i32).clamp(0, n - 1) as usize;
        let y = (g.y.round() as i32).clamp(0, n - 1) as usize;
        let z = (g.z.round() as i32).clamp(0, n - 1) as usize;
        self.value_at(x, y, z)
    }

    /// Trilinear sample; clamps to the grid.
    pub fn sample_trilinear(&self, pos: Vec3) -> f32 {
        let n = self.resolution as i32;
        let g = self.grid_coords(pos);

        let x0 = (g.x.floor() as i32).clamp(0, n - 1);
        let y0 = (g.y.floor() as i32).clamp(0, n - 1);
        let z0 = (g.z.floor() as i32).clamp(0, n - 1);
        let x1 = (x0 + 1).min(n - 1);
        let y1 = (y0 + 1).min(n - 1);
        let z1 = (z0 + 1).min(n - 1);

        let fx = (g.x - x0 as f32).clamp(0.0, 1.0);
        let fy = (g.y - y0 as f32).clamp(0.0, 1.0);
        let fz = (g.z - z0 as f32).clamp(0.0, 1.0);

        let (x0, y0, z0) = (x0 as usize, y0 as usize, z0 as usize);
        let (x1, y1, z1) = (x1 as usize, y1 as usize, z1 as usize);

        let c000 = self.value_at(x0, y0, z0);
        let c100 = self.value_at(x1, y0, z0);
        let c010 = self.value_at(x0, y1, z0);
        let c110 = self.value_at(x1, y1, z0);
        let c001 = self.value_at(x0, y0, z1);
        let c101 = self.value_at(x1, y0, z1);
        let c011 = self.value_at(x0, y1, z1);
        let c111 = self.value_at(x1, y1, z1);

        let c00 = c000 + (c100 - c000) * fx;
        let c10 = c010 + (c110 - c010) * fx;
        let c01 = c001 + (c101 - c001) * fx;
        let c11 = c011 + (c111 - c011) * fx;

        let c0 = c00 + (c10 - c00) * fy;
        let c1 = c01 + (c11 - c01) * fy;
        c0 + (c1 - c0) * fz
    }

    /// Sample honoring the approximation mode: nearest when interpolation is
    /// disabled, trilinear otherwise. Outside the grid box the caller should
    /// fall back to direct evaluation.
    pub fn sample(&self, pos: Vec3, mode: ApproximationMode) -> f32 {
        if mode.contains(ApproximationMode::DISABLE_INTERPOLATION) {
            self.sample_nearest(pos)
        } else {
            self.sample_trilinear(pos)
        }
    }

    pub fn contains(&self, pos: Vec3) -> bool {
        self.bbox.is_valid() && self.bbox.contains(pos)
    }
}
