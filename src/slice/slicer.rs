//! Slicer driver.
//!
//! Owns the clipping area and iso value, renders the per-layer pyramid,
//! derives up/down-skin distances for overhang analysis, snaps vertex
//! buffers onto the surface for bounding-box refinement and polishes
//! extracted contours with 2D smoothing passes.

use glam::{Vec2, Vec3};
use rayon::prelude::*;

use crate::field::bbox::move_to_surface;
use crate::field::sdf::Sdf;
use crate::slice::contour::{ContourExtractor, MarchingSquaresStates, PolyLine};
use crate::slice::jfa::JfaMap;
use crate::slice::pyramid::{ClippingArea, DistanceMap, DistancePixel, SlicePyramid};

/// 2D gradient estimation step.
const GRADIENT_EPS: f32 = 1e-4;
/// Z-march step count for skin distance probes.
const SKIN_STEPS: u32 = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SliceError {
    /// Clipping area is non-finite or inverted; the previous valid area
    /// stays in effect.
    InvalidClippingArea,
}

impl std::fmt::Display for SliceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SliceError::InvalidClippingArea => write!(f, "invalid clipping area"),
        }
    }
}

impl std::error::Error for SliceError {}

pub struct Slicer {
    clipping_area: ClippingArea,
    grid_size: (u32, u32),
    iso_value: f32,
    weight_mid_point: f32,
}

impl Default for Slicer {
    fn default() -> Self {
        Self {
            clipping_area: ClippingArea::new(Vec2::ZERO, Vec2::splat(400.0)),
            grid_size: (128, 128),
            iso_value: 0.0,
            weight_mid_point: 0.5,
        }
    }
}

impl Slicer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clipping_area(&self) -> &ClippingArea {
        &self.clipping_area
    }

    /// Replace the clipping area; invalid areas are rejected and the last
    /// valid one stays in effect.
    pub fn set_clipping_area(&mut self, area: ClippingArea) -> Result<(), SliceError> {
        if !area.is_valid() {
            log::warn!(
                "rejecting clipping area {:?}..{:?}; keeping {:?}..{:?}",
                area.min,
                area.max,
                self.clipping_area.min,
                self.clipping_area.max
            );
            return Err(SliceError::InvalidClippingArea);
        }
        self.clipping_area = area;
        Ok(())
    }

    pub fn set_iso_value(&mut self, iso_value: f32) {
        self.iso_value = iso_value;
    }

    pub fn set_weight_mid_point(&mut self, weight: f32) {
        self.weight_mid_point = weight.clamp(0.0, 1.0);
    }

    /// Render the distance pyramid of the slice at `z_mm`.
    pub fn render_layers(&self, model: &dyn Sdf, z_mm: f32) -> Result<SlicePyramid, SliceError> {
        if !self.clipping_area.is_valid() {
            return Err(SliceError::InvalidClippingArea);
        }
        Ok(SlicePyramid::render(
            model,
            self.clipping_area,
            self.iso_value,
            z_mm,
            self.grid_size,
        ))
    }

    /// Render only the coarsest pyramid level; enough for previews and for
    /// deciding whether the layer intersects the model at all.
    pub fn render_first_layer(
        &self,
        model: &dyn Sdf,
        z_mm: f32,
    ) -> Result<DistanceMap, SliceError> {
        if !self.clipping_area.is_valid() {
            return Err(SliceError::InvalidClippingArea);
        }
        Ok(SlicePyramid::render_first_level(
            model,
            self.clipping_area,
            self.iso_value,
            z_mm,
            self.grid_size,
        ))
    }

    /// Marching-squares state image of the slice at `z_mm`.
    pub fn compute_marching_square_states(
        &self,
        model: &dyn Sdf,
        z_mm: f32,
    ) -> Result<MarchingSquaresStates, SliceError> {
        let pyramid = self.render_layers(model, z_mm)?;
        Ok(MarchingSquaresStates::from_distance_map(
            pyramid.finest(),
            self.iso_value,
        ))
    }

    /// Extract and polish the contours of the slice at `z_mm`.
    pub fn contours(&self, model: &dyn Sdf, z_mm: f32) -> Result<Vec<PolyLine>, SliceError> {
        let pyramid = self.render_layers(model, z_mm)?;
        let mut contours = ContourExtractor::new(self.iso_value).extract(pyramid.finest());
        for polyline in &mut contours {
            if polyline.closed && polyline.vertices.len() >= 3 {
                polyline.vertices =
                    self.adopt_vertex_positions_2d(model, &polyline.vertices, z_mm);
            }
        }
        Ok(contours)
    }

    /// Unsigned distance-to-contour map of the slice via jump flooding,
    /// optionally united with the previous layer's negated distances so
    /// overhang contours survive into the next layer.
    pub fn render_distance_map_jfa(
        &self,
        model: &dyn Sdf,
        z_mm: f32,
        previous: Option<&DistanceMap>,
    ) -> Result<DistanceMap, SliceError> {
        let pyramid = self.render_layers(model, z_mm)?;
        let finest = pyramid.finest();
        let band = finest.pixel_size().max_element();
        let mut jfa = JfaMap::seed_from_distance_map(finest, self.iso_value - band, self.iso_value + band);
        jfa.flood();
        Ok(match previous {
            Some(previous) if previous.width() == finest.width() => {
                jfa.to_distance_map_unite_negative(previous)
            }
            _ => jfa.to_distance_map(),
        })
    }

    /// Distance from each slice pixel down to the next surface below
    /// (down-skin); pixels with no surface underneath report `f32::MAX`.
    pub fn render_down_skin_distance(
        &self,
        model: &dyn Sdf,
        resolution: (u32, u32),
        z_mm: f32,
    ) -> Result<DistanceMap, SliceError> {
        self.render_skin_distance(model, resolution, z_mm, -1.0)
    }

    /// Distance up to the next surface above (up-skin).
    pub fn render_up_skin_distance(
        &self,
        model: &dyn Sdf,
        resolution: (u32, u32),
        z_mm: f32,
    ) -> Result<DistanceMap, SliceError> {
        self.render_skin_distance(model, resolution, z_mm, 1.0)
    }

    fn render_skin_distance(
        &self,
        model: &dyn Sdf,
        resolution: (u32, u32),
        z_mm: f32,
        direction: f32,
    ) -> Result<DistanceMap, SliceError> {
        if !self.clipping_area.is_valid() {
            return Err(SliceError::InvalidClippingArea);
        }
        let area = self.clipping_area;
        let mut map = DistanceMap::new(resolution.0, resolution.1, area);
        let step = area.size().max_element() / SKIN_STEPS as f32;
        let width = resolution.0;

        let rows: Vec<Vec<DistancePixel>> = (0..resolution.1)
            .into_par_iter()
            .map(|y| {
                (0..width)
                    .map(|x| {
                        let pixel = area.min
                            + (Vec2::new(x as f32, y as f32) + Vec2::splat(0.5))
                                * (area.size()
                                    / Vec2::new(resolution.0 as f32, resolution.1 as f32));
                        let start = Vec3::new(pixel.x, pixel.y, z_mm);
                        let start_sign = model.eval(start).signum();
                        let mut traveled = f32::MAX;
                        for i in 1..=SKIN_STEPS {
                            let z = z_mm + direction * i as f32 * step;
                            let sample = model.eval(Vec3::new(pixel.x, pixel.y, z));
                            if sample.signum() != start_sign {
                                traveled = i as f32 * step;
                                break;
                            }
                        }
                        DistancePixel {
                            distance: traveled,
                            flag: 0.0,
                        }
                    })
                    .collect()
            })
            .collect();

        for (y, row) in rows.into_iter().enumerate() {
            for (x, px) in row.into_iter().enumerate() {
                map.set_pixel(x as u32, y as u32, px);
            }
        }
        Ok(map)
    }

    /// Project every point of the buffer onto the model surface. Input and
    /// output must be the same length.
    pub fn move_points_to_surface(
        &self,
        model: &dyn Sdf,
        input: &[Vec3],
        output: &mut Vec<Vec3>,
    ) -> Result<(), SliceError> {
        output.clear();
        output.extend(input.iter().map(|&p| {
            let mut pos = p;
            for _ in 0..4 {
                pos = move_to_surface(pos, model);
            }
            pos
        }));
        Ok(())
    }

    /// Snap mesh vertices to the surface with a single projection step so
    /// the mesh topology survives.
    pub fn adopt_mesh_vertices_to_surface(
        &self,
        model: &dyn Sdf,
        input: &[Vec3],
        output: &mut Vec<Vec3>,
    ) -> Result<(), SliceError> {
        output.clear();
        output.extend(input.iter().map(|&p| move_to_surface(p, model)));
        Ok(())
    }

    /// Contour polishing: three ping-pong smoothing passes with increasing
    /// iteration counts (1, 6, 11) followed by a final pass of 5, each
    /// iteration blending toward the neighbour midpoint and re-projecting
    /// onto the iso line at `z_mm`.
    pub fn adopt_vertex_positions_2d(
        &self,
        model: &dyn Sdf,
        vertices: &[Vec2],
        z_mm: f32,
    ) -> Vec<Vec2> {
        let mut front = vertices.to_vec();
        let mut back = vertices.to_vec();

        for pass in 0..3 {
            let num_iterations = 1 + pass * 5;
            smooth_pass(model, &front, &mut back, z_mm, self.weight_mid_point, num_iterations, self.iso_value);
            smooth_pass(model, &back, &mut front, z_mm, self.weight_mid_point, num_iterations, self.iso_value);
        }
        smooth_pass(model, &front, &mut back, z_mm, self.weight_mid_point, 5, self.iso_value);
        back
    }
}

fn gradient_2d(model: &dyn Sdf, pos: Vec2, z_mm: f32) -> Vec2 {
    let dx = model.eval(Vec3::new(pos.x + GRADIENT_EPS, pos.y, z_mm))
        - model.eval(Vec3::new(pos.x - GRADIENT_EPS, pos.y, z_mm));
    let dy = model.eval(Vec3::new(pos.x, pos.y + GRADIENT_EPS, z_mm))
        - model.eval(Vec3::new(pos.x, pos.y - GRADIENT_EPS, z_mm));
    Vec2::new(dx, dy) / (2.0 * GRADIENT_EPS)
}

fn smooth_pass(
    model: &dyn Sdf,
    input: &[Vec2],
    output: &mut [Vec2],
    z_mm: f32,
    weight_mid_point: f32,
    num_iterations: u32,
    iso_value: f32,
) {
    debug_assert_eq!(input.len(), output.len());
    let n = input.len();
    output.copy_from_slice(input);
    if n < 3 {
        return;
    }

    for _ in 0..num_iterations {
        let snapshot = output.to_vec();
        for i in 0..n {
            let prev = snapshot[(i + n - 1) % n];
            let next = snapshot[(i + 1) % n];
            let mid = (prev + next) * 0.5;
            let mut pos = snapshot[i].lerp(mid, weight_mid_point);

            // Pull back to the iso line along the 2D gradient.
            let grad = gradient_2d(model, pos, z_mm);
            let len = grad.length();
            if len > 1e-9 {
                let distance = model.eval(Vec3::new(pos.x, pos.y, z_mm)) - iso_value;
                pos -= grad / len * distance;
            }
            output[i] = pos;
        }
    }
}
