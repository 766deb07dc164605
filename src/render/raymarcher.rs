//! Progressive sphere-tracing raymarcher.
//!
//! Renders scanline batches so interaction stays responsive: every batch
//! re-checks the dirty flag and a restart begins at line zero. The step
//! length honors the approximation mode: the precomputed SDF volume serves
//! as a safe lower bound in hybrid mode and as the only source in
//! precomp-only mode.

use glam::Vec3;
use rayon::prelude::*;

use crate::field::precomp::PreComputedSdf;
use crate::field::sdf::Sdf;
use crate::kernel::types::{ApproximationMode, RenderingSettings};
use crate::render::camera::Camera;

/// Scanlines rendered per batch when the camera is at rest.
const LINES_PER_BATCH: usize = 64;
/// Surface hit tolerance.
const HIT_EPS: f32 = 1e-3;

pub struct Raymarcher {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    current_line: usize,
    rendering_step_size: usize,
    dirty: bool,
    is_moving: bool,
    max_march_dist: f32,
}

impl Raymarcher {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width * height * 4],
            current_line: 0,
            rendering_step_size: LINES_PER_BATCH,
            dirty: true,
            is_moving: false,
            max_march_dist: 2000.0,
        }
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.pixels = vec![0u8; width * height * 4];
        self.invalidate();
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// RGBA8 framebuffer.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mark the image stale; the next batch restarts from line zero.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn is_complete(&self) -> bool {
        !self.dirty && self.current_line >= self.height
    }

    pub fn is_moving(&self) -> bool {
        self.is_moving
    }

    /// Camera motion halves the batch size so the preview stays fluid.
    pub fn set_moving(&mut self, moving: bool) {
        self.is_moving = moving;
        self.rendering_step_size = if moving {
            LINES_PER_BATCH / 2
        } else {
            LINES_PER_BATCH
        };
    }

    pub fn set_max_march_distance(&mut self, distance: f32) {
        self.max_march_dist = distance.max(1.0);
    }

    /// Render the next scanline batch. Returns true while more batches
    /// remain. A dirty image restarts at line zero before rendering.
    pub fn render_batch(
        &mut self,
        model: &dyn Sdf,
        precomp: &PreComputedSdf,
        settings: &RenderingSettings,
        camera: &Camera,
    ) -> bool {
        if self.dirty {
            self.current_line = 0;
            self.dirty = false;
        }
        if self.current_line >= self.height {
            return false;
        }

        let start = self.current_line;
        let end = (start + self.rendering_step_size).min(self.height);
        self.render_lines(model, precomp, settings, camera, start, end);
        self.current_line = end;
        self.current_line < self.height
    }

    /// Render the whole image in one call.
    pub fn render_full(
        &mut self,
        model: &dyn Sdf,
        precomp: &PreComputedSdf,
        settings: &RenderingSettings,
        camera: &Camera,
    ) {
        self.dirty = false;
        self.current_line = 0;
        self.render_lines(model, precomp, settings, camera, 0, self.height);
        self.current_line = self.height;
    }

    fn render_lines(
        &mut self,
        model: &dyn Sdf,
        precomp: &PreComputedSdf,
        settings: &RenderingSettings,
        camera: &Camera,
        start_line: usize,
        end_line: usize,
    ) {
        let width = self.width;
        let height = self.height;
        let aspect = width as f32 / height as f32;
        let mode = settings.approximation();
        let quality = settings.quality;
        let max_march_dist = self.max_march_dist;

        let row_bytes = width * 4;
        let light_dir = Vec3::new(0.5, 0.3, 0.8).normalize();

        self.pixels[start_line * row_bytes..end_line * row_bytes]
            .par_chunks_exact_mut(row_bytes)
            .enumerate()
            .for_each(|(row, row_buf)| {
                let py = start_line + row;
                let v = -((py as f32 + 0.5) / height as f32 * 2.0 - 1.0);

                for px in 0..width {
                    let u = (px as f32 + 0.5) / width as f32 * 2.0 - 1.0;
                    let ray_dir = camera.ray(u, v, aspect);

                    let max_steps = ((128.0 * quality) as usize).clamp(16, 512);
                    let mut t = 0.0f32;
                    let mut hit = false;
                    for _ in 0..max_steps {
                        let p = camera.origin + ray_dir * t;
                        let d = field_sample(model, precomp, mode, p);
                        if d < HIT_EPS {
                            hit = true;
                            break;
                        }
                        t += d;
                        if t > max_march_dist {
                            break;
                        }
                    }

                    let (r, g, b) = if hit {
                        let hit_pos = camera.origin + ray_dir * t;
                        let n = field_normal(model, precomp, mode, hit_pos, settings.normal_offset);
                        let n_dot_l = n.dot(light_dir).max(0.0);
                        let base = Vec3::new(0.65, 0.72, 0.80);
                        let col = base * (0.2 + 0.8 * n_dot_l);
                        (
                            (col.x.clamp(0.0, 1.0) * 255.0) as u8,
                            (col.y.clamp(0.0, 1.0) * 255.0) as u8,
                            (col.z.clamp(0.0, 1.0) * 255.0) as u8,
                        )
                    } else {
                        (31, 33, 41)
                    };

                    let idx = px * 4;
                    row_buf[idx] = r;
                    row_buf[idx + 1] = g;
                    row_buf[idx + 2] = b;
                    row_buf[idx + 3] = 255;
                }
            });
    }
}

/// One field sample honoring the approximation mode.
fn field_sample(
    model: &dyn Sdf,
    precomp: &PreComputedSdf,
    mode: ApproximationMode,
    p: Vec3,
) -> f32 {
    if mode.contains(ApproximationMode::ONLY_PRECOMP_SDF) && precomp.contains(p) {
        return precomp.sample(p, mode);
    }
    if mode.contains(ApproximationMode::HYBRID) && precomp.contains(p) {
        let coarse = precomp.sample(p, mode);
        let threshold = 2.0 * precomp.cell_size().max_element();
        if coarse.abs() > threshold {
            // Safe step: the coarse value bounds the true distance.
            return coarse;
        }
    }
    model.eval(p)
}

fn field_normal(
    model: &dyn Sdf,
    precomp: &PreComputedSdf,
    mode: ApproximationMode,
    p: Vec3,
    offset: f32,
) -> Vec3 {
    let e = offset.max(1e-4);
    let dx = field_sample(model, precomp, mode, p + Vec3::X * e)
        - field_sample(model, precomp, mode, p - Vec3::X * e);
    let dy = field_sample(model, precomp, mode, p + Vec3::Y * e)
        - field_sample(model, precomp, mode, p - Vec3::Y * e);
    let dz = field_sample(model, precomp, mode, p + Vec3::Z * e)
        - field_sample(model, precomp, mode, p - Vec3::Z * e);
    Vec3::new(dx, dy, dz).normalize_or_zero()
}
