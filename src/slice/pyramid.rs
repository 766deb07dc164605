//! Coarse-to-fine distance pyramid for one Z slice.
//!
//! The coarsest level evaluates the model kernel at every pixel. Every finer
//! level re-evaluates only pixels whose coarse ancestors sit inside the
//! branch threshold around the iso value and interpolates the rest, so the
//! finest level carries exact distances in every neighborhood of the
//! contour at a fraction of the evaluations.

use glam::{Vec2, Vec3};
use rayon::prelude::*;

use crate::field::sdf::Sdf;

/// Contour vertices per millimetre at nominal quality.
pub const VERTICES_PER_MM: f32 = 40.0;
/// Super-sampling factor applied to the finest level.
pub const SUPER_SAMPLING: f32 = 0.5;
/// Resolution divisor per pyramid level, coarse to fine.
const LEVEL_DIVISORS: [u32; 4] = [32, 8, 2, 1];
/// Per-axis resolution clamp.
const MIN_AXIS: u32 = 16;
const MAX_AXIS: u32 = 8192;

/// XY rectangle a slice is rendered into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippingArea {
    pub min: Vec2,
    pub max: Vec2,
}

impl ClippingArea {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite()
            && self.max.is_finite()
            && self.max.x > self.min.x
            && self.max.y > self.min.y
    }

    pub fn dilated(&self, margin: f32) -> ClippingArea {
        ClippingArea {
            min: self.min - Vec2::splat(margin),
            max: self.max + Vec2::splat(margin),
        }
    }
}

/// One pixel of a distance map. `flag` is 1.0 on branch pixels (exact
/// evaluation required below this level) and 0.0 on interpolated ones.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DistancePixel {
    pub distance: f32,
    pub flag: f32,
}

impl DistancePixel {
    pub fn is_branch(&self) -> bool {
        self.flag != 0.0
    }
}

/// 2D image of `{distance, flag}` pairs over a clipping area.
#[derive(Debug, Clone)]
pub struct DistanceMap {
    width: u32,
    height: u32,
    area: ClippingArea,
    pixels: Vec<DistancePixel>,
}

impl DistanceMap {
    pub fn new(width: u32, height: u32, area: ClippingArea) -> Self {
        Self {
            width,
            height,
            area,
            pixels: vec![DistancePixel::default(); (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn area(&self) -> &ClippingArea {
        &self.area
    }

    pub fn pixel(&self, x: u32, y: u32) -> DistancePixel {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, value: DistancePixel) {
        self.pixels[(y * self.width + x) as usize] = value;
    }

    pub fn pixels(&self) -> &[DistancePixel] {
        &self.pixels
    }

    pub fn pixel_size(&self) -> Vec2 {
        self.area.size() / Vec2::new(self.width as f32, self.height as f32)
    }

    /// World position of a pixel center.
    pub fn position(&self, x: u32, y: u32) -> Vec2 {
        self.area.min + (Vec2::new(x as f32, y as f32) + Vec2::splat(0.5)) * self.pixel_size()
    }

    /// Continuous pixel coordinates of a world position.
    pub fn to_pixel_coords(&self, pos: Vec2) -> Vec2 {
        (pos - self.area.min) / self.pixel_size() - Vec2::splat(0.5)
    }

    fn clamped(&self, x: i32, y: i32) -> DistancePixel {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.pixel(x, y)
    }

    /// Bilinear distance interpolation at a world position; also reports
    /// whether any of the four taps is a branch pixel.
    pub fn sample(&self, pos: Vec2) -> (f32, bool) {
        let g = self.to_pixel_coords(pos);
        let x0 = g.x.floor() as i32;
        let y0 = g.y.floor() as i32;
        let fx = (g.x - x0 as f32).clamp(0.0, 1.0);
        let fy = (g.y - y0 as f32).clamp(0.0, 1.0);

        let p00 = self.clamped(x0, y0);
        let p10 = self.clamped(x0 + 1, y0);
        let p01 = self.clamped(x0, y0 + 1);
        let p11 = self.clamped(x0 + 1, y0 + 1);

        let d0 = p00.distance + (p10.distance - p00.distance) * fx;
        let d1 = p01.distance + (p11.distance - p01.distance) * fx;
        let distance = d0 + (d1 - d0) * fy;
        let branch =
            p00.is_branch() || p10.is_branch() || p01.is_branch() || p11.is_branch();
        (distance, branch)
    }
}

/// Per-layer pyramid resolutions, coarse to fine.
pub fn layer_resolutions(area: &ClippingArea) -> [(u32, u32); 4] {
    let size = area.size();
    let mut out = [(0u32, 0u32); 4];
    for (i, divisor) in LEVEL_DIVISORS.iter().enumerate() {
        let w = (size.x * VERTICES_PER_MM * SUPER_SAMPLING / *divisor as f32).ceil() as u32;
        let h = (size.y * VERTICES_PER_MM * SUPER_SAMPLING / *divisor as f32).ceil() as u32;
        out[i] = (w.clamp(MIN_AXIS, MAX_AXIS), h.clamp(MIN_AXIS, MAX_AXIS));
    }
    out
}

/// Branch threshold for a level: pixels this close to the iso value must be
/// evaluated exactly at finer levels.
pub fn branch_threshold(
    area: &ClippingArea,
    resolution: (u32, u32),
    grid_size: (u32, u32),
    iso_value: f32,
) -> f32 {
    let size = area.size();
    let pixel = (size.x / resolution.0 as f32).max(size.y / resolution.1 as f32);
    let grid_cell = (size.x / grid_size.0 as f32).max(size.y / grid_size.1 as f32);
    iso_value.abs() + pixel.max(grid_cell) * 2.0
}

/// The four mip levels of one slice.
pub struct SlicePyramid {
    levels: Vec<DistanceMap>,
}

impl SlicePyramid {
    /// Render the full pyramid for the slice at `z_mm`.
    pub fn render(
        model: &dyn Sdf,
        area: ClippingArea,
        iso_value: f32,
        z_mm: f32,
        grid_size: (u32, u32),
    ) -> Self {
        let resolutions = layer_resolutions(&area);

        let mut levels = Vec::with_capacity(resolutions.len());
        let threshold = branch_threshold(&area, resolutions[0], grid_size, iso_value);
        levels.push(render_coarsest(model, area, resolutions[0], threshold, z_mm));

        for res in &resolutions[1..] {
            let threshold = branch_threshold(&area, *res, grid_size, iso_value);
            let finer = render_level(model, levels.last().unwrap(), *res, threshold, z_mm);
            levels.push(finer);
        }

        Self { levels }
    }

    /// Render only the coarsest level.
    pub fn render_first_level(
        model: &dyn Sdf,
        area: ClippingArea,
        iso_value: f32,
        z_mm: f32,
        grid_size: (u32, u32),
    ) -> DistanceMap {
        let resolutions = layer_resolutions(&area);
        let threshold = branch_threshold(&area, resolutions[0], grid_size, iso_value);
        render_coarsest(model, area, resolutions[0], threshold, z_mm)
    }

    pub fn levels(&self) -> &[DistanceMap] {
        &self.levels
    }

    pub fn finest(&self) -> &DistanceMap {
        self.levels.last().expect("pyramid has at least one level")
    }

    pub fn coarsest(&self) -> &DistanceMap {
        self.levels.first().expect("pyramid has at least one level")
    }
}

fn pixel_center(area: &ClippingArea, resolution: (u32, u32), x: u32, y: u32) -> Vec2 {
    let pixel = area.size() / Vec2::new(resolution.0 as f32, resolution.1 as f32);
    area.min + (Vec2::new(x as f32, y as f32) + Vec2::splat(0.5)) * pixel
}

fn render_coarsest(
    model: &dyn Sdf,
    area: ClippingArea,
    resolution: (u32, u32),
    threshold: f32,
    z_mm: f32,
) -> DistanceMap {
    let mut map = DistanceMap::new(resolution.0, resolution.1, area);

    map.pixels
        .par_chunks_exact_mut(resolution.0 as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.iter_mut().enumerate() {
                let pos = pixel_center(&area, resolution, x as u32, y as u32);
                let distance = model.eval(Vec3::new(pos.x, pos.y, z_mm));
                *px = DistancePixel {
                    distance,
                    flag: if distance.abs() <= threshold { 1.0 } else { 0.0 },
                };
            }
        });
    map
}

fn render_level(
    model: &dyn Sdf,
    coarser: &DistanceMap,
    resolution: (u32, u32),
    threshold: f32,
    z_mm: f32,
) -> DistanceMap {
    let area = *coarser.area();
    let mut map = DistanceMap::new(resolution.0, resolution.1, area);

    map.pixels
        .par_chunks_exact_mut(resolution.0 as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.iter_mut().enumerate() {
                let pos = pixel_center(&area, resolution, x as u32, y as u32);
                let (interpolated, near_branch) = coarser.sample(pos);
                let (distance, exact) = if near_branch {
                    (model.eval(Vec3::new(pos.x, pos.y, z_mm)), true)
                } else {
                    (interpolated, false)
                };
                *px = DistancePixel {
                    distance,
                    flag: if exact && distance.abs() <= threshold {
                        1.0
                    } else {
                        0.0
                    },
                };
            }
        });
    map
}
