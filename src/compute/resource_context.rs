//! Shared per-engine resource state: build and clipping areas, rendering
//! settings, camera, the precomputed SDF volume and the parameter/command
//! buffers every kernel dispatch consumes.

use std::time::Instant;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::field::precomp::{PreComputedSdf, DEFAULT_RESOLUTION};
use crate::kernel::types::{BoundingBox, Command, RenderingSettings};
use crate::slice::pyramid::{layer_resolutions, ClippingArea};

/// Build-area side lengths are clamped to this range (mm).
pub const BUILD_AREA_MIN_MM: f32 = 1.0;
pub const BUILD_AREA_MAX_MM: f32 = 1000.0;

/// Sentinel marking "no contour in this cell" in vertex buffers.
pub const INVALID_VERTEX: f32 = f32::MAX;

pub struct ResourceContext {
    clipping_area: ClippingArea,
    build_area: ClippingArea,
    build_height_mm: f32,
    grid_size: (u32, u32),

    rendering_settings: RenderingSettings,
    eye_position: Vec3,
    model_view_perspective: Mat4,
    start: Instant,

    pre_comp_sdf: PreComputedSdf,
    pre_comp_sdf_bbox: BoundingBox,

    parameters: Vec<f32>,
    commands: Vec<Command>,

    contour_vertices: Vec<Vec4>,
    contour_vertices_back: Vec<Vec4>,
}

impl Default for ResourceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceContext {
    pub fn new() -> Self {
        let build_area = ClippingArea::new(Vec2::ZERO, Vec2::splat(400.0));
        Self {
            clipping_area: build_area,
            build_area,
            build_height_mm: 400.0,
            grid_size: (128, 128),
            rendering_settings: RenderingSettings::default(),
            eye_position: Vec3::splat(500.0),
            model_view_perspective: Mat4::IDENTITY,
            start: Instant::now(),
            pre_comp_sdf: PreComputedSdf::disabled(),
            pre_comp_sdf_bbox: BoundingBox::empty(),
            parameters: Vec::new(),
            commands: Vec::new(),
            contour_vertices: Vec::new(),
            contour_vertices_back: Vec::new(),
        }
    }

    // ── Areas ──

    pub fn build_area(&self) -> &ClippingArea {
        &self.build_area
    }

    /// The fixed machine workspace as a volume.
    pub fn build_volume(&self) -> BoundingBox {
        BoundingBox::new(
            Vec3::new(self.build_area.min.x, self.build_area.min.y, 0.0),
            Vec3::new(self.build_area.max.x, self.build_area.max.y, self.build_height_mm),
        )
    }

    /// Resize the build area; side lengths clamp to the supported range.
    pub fn set_build_area_size(&mut self, width_mm: f32, depth_mm: f32, height_mm: f32) {
        let w = width_mm.clamp(BUILD_AREA_MIN_MM, BUILD_AREA_MAX_MM);
        let d = depth_mm.clamp(BUILD_AREA_MIN_MM, BUILD_AREA_MAX_MM);
        self.build_area = ClippingArea::new(Vec2::ZERO, Vec2::new(w, d));
        self.build_height_mm = height_mm.clamp(BUILD_AREA_MIN_MM, BUILD_AREA_MAX_MM);
    }

    pub fn clipping_area(&self) -> &ClippingArea {
        &self.clipping_area
    }

    /// Replace the clipping area, optionally dilated by a margin. Invalid
    /// areas are ignored and the previous one stays in effect.
    pub fn set_clipping_area(&mut self, area: ClippingArea, margin: f32) -> bool {
        let dilated = area.dilated(margin);
        if !dilated.is_valid() {
            log::warn!("ignoring invalid clipping area");
            return false;
        }
        self.clipping_area = dilated;
        true
    }

    pub fn grid_size(&self) -> (u32, u32) {
        self.grid_size
    }

    /// Pyramid resolutions of the current clipping area, coarse to fine.
    pub fn mip_map_resolutions(&self) -> [(u32, u32); 4] {
        layer_resolutions(&self.clipping_area)
    }

    // ── Settings and camera ──

    pub fn rendering_settings(&self) -> &RenderingSettings {
        &self.rendering_settings
    }

    pub fn rendering_settings_mut(&mut self) -> &mut RenderingSettings {
        &mut self.rendering_settings
    }

    pub fn time_s(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    pub fn eye_position(&self) -> Vec3 {
        self.eye_position
    }

    pub fn set_eye_position(&mut self, eye: Vec3) {
        self.eye_position = eye;
    }

    pub fn model_view_perspective(&self) -> &Mat4 {
        &self.model_view_perspective
    }

    pub fn set_model_view_perspective(&mut self, mvp: Mat4) {
        self.model_view_perspective = mvp;
    }

    // ── Precomputed SDF ──

    pub fn pre_comp_sdf(&self) -> &PreComputedSdf {
        &self.pre_comp_sdf
    }

    pub fn pre_comp_sdf_mut(&mut self) -> &mut PreComputedSdf {
        &mut self.pre_comp_sdf
    }

    /// Allocate the precompute volume at the given cube resolution.
    pub fn allocate_pre_computed_sdf(&mut self, resolution: usize) {
        self.pre_comp_sdf = PreComputedSdf::new(resolution);
    }

    pub fn allocate_default_pre_computed_sdf(&mut self) {
        self.allocate_pre_computed_sdf(DEFAULT_RESOLUTION);
    }

    /// Shrink back to the single-voxel dummy.
    pub fn release_pre_computed_sdf(&mut self) {
        self.pre_comp_sdf = PreComputedSdf::disabled();
        self.pre_comp_sdf_bbox = BoundingBox::empty();
    }

    pub fn pre_comp_sdf_bbox(&self) -> &BoundingBox {
        &self.pre_comp_sdf_bbox
    }

    pub fn set_pre_comp_sdf_bbox(&mut self, bbox: BoundingBox) {
        self.pre_comp_sdf_bbox = bbox;
    }

    // ── Parameter and command buffers ──

    pub fn parameters(&self) -> &[f32] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Vec<f32> {
        &mut self.parameters
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn set_commands(&mut self, commands: Vec<Command>) {
        self.commands = commands;
    }

    // ── Contour vertex buffers (front/back) ──

    pub fn contour_vertices(&self) -> &[Vec4] {
        &self.contour_vertices
    }

    pub fn contour_vertices_mut(&mut self) -> &mut Vec<Vec4> {
        &mut self.contour_vertices
    }

    pub fn contour_vertices_back_mut(&mut self) -> &mut Vec<Vec4> {
        &mut self.contour_vertices_back
    }

    pub fn swap_contour_vertices(&mut self) {
        std::mem::swap(&mut self.contour_vertices, &mut self.contour_vertices_back);
    }
}
