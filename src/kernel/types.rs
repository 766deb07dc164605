//! Core data model: bounding boxes, lattice primitives, rendering settings
//! and the command tape.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

// ── Bounding box ──

/// Axis-aligned bounding box.
///
/// The empty box has `min = +INF, max = -INF` so that extending it by any
/// point yields that point. A box is valid iff all components are finite and
/// `min <= max` on every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box spanning a center point and half extents.
    pub fn from_center_half_extents(center: Vec3, half: Vec3) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && !self.is_empty()
    }

    /// Componentwise min/max union.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Surface area, with negative extents clamped to zero so degenerate
    /// boxes from float drift never report negative area.
    pub fn surface_area(&self) -> f32 {
        let d = (self.max - self.min).max(Vec3::ZERO);
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Euclidean distance from a point to the box surface (0 inside).
    pub fn distance_to(&self, point: Vec3) -> f32 {
        let dx = (self.min.x - point.x).max(point.x - self.max.x).max(0.0);
        let dy = (self.min.y - point.y).max(point.y - self.max.y).max(0.0);
        let dz = (self.min.z - point.z).max(point.z - self.max.z).max(0.0);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Grow every face outward by `margin`.
    pub fn dilated(&self, margin: f32) -> BoundingBox {
        BoundingBox {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    pub fn to_gpu(&self) -> GpuBoundingBox {
        GpuBoundingBox {
            min: [self.min.x, self.min.y, self.min.z, 0.0],
            max: [self.max.x, self.max.y, self.max.z, 0.0],
        }
    }
}

/// Device layout of [`BoundingBox`]: two 16-byte float4 blocks.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuBoundingBox {
    pub min: [f32; 4],
    pub max: [f32; 4],
}

impl GpuBoundingBox {
    pub fn to_host(&self) -> BoundingBox {
        BoundingBox {
            min: Vec3::new(self.min[0], self.min[1], self.min[2]),
            max: Vec3::new(self.max[0], self.max[1], self.max[2]),
        }
    }
}

// ── Lattice primitives ──

/// End-cap geometry of a beam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapStyle {
    #[default]
    Hemisphere = 0,
    Sphere = 1,
    Butt = 2,
}

impl CapStyle {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => CapStyle::Sphere,
            2 => CapStyle::Butt,
            _ => CapStyle::Hemisphere,
        }
    }
}

/// Conical capsule: two endpoints, two radii, two cap styles.
///
/// A zero-length beam degenerates to a ball of radius
/// `max(start_radius, end_radius)` at `start_pos`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamData {
    pub start_pos: Vec3,
    pub end_pos: Vec3,
    pub start_radius: f32,
    pub end_radius: f32,
    pub start_cap_style: CapStyle,
    pub end_cap_style: CapStyle,
    pub material_id: i32,
}

impl BeamData {
    pub fn new(start_pos: Vec3, end_pos: Vec3, start_radius: f32, end_radius: f32) -> Self {
        Self {
            start_pos,
            end_pos,
            start_radius,
            end_radius,
            start_cap_style: CapStyle::Hemisphere,
            end_cap_style: CapStyle::Hemisphere,
            material_id: 0,
        }
    }

    pub fn max_radius(&self) -> f32 {
        self.start_radius.max(self.end_radius)
    }

    /// Minkowski sum of the segment with the larger radius.
    pub fn bounds(&self) -> BoundingBox {
        let r = Vec3::splat(self.max_radius());
        BoundingBox {
            min: self.start_pos.min(self.end_pos) - r,
            max: self.start_pos.max(self.end_pos) + r,
        }
    }

    /// Signed distance from `point` to the beam surface. The radius is
    /// interpolated linearly along the clamped segment parameter; beams
    /// shorter than 1e-6 are treated as balls.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        let axis = self.end_pos - self.start_pos;
        let length = axis.length();
        if length < 1e-6 {
            return (point - self.start_pos).length() - self.max_radius();
        }
        let dir = axis / length;
        let t = (point - self.start_pos).dot(dir).clamp(0.0, length);
        let closest = self.start_pos + dir * t;
        let radius = self.start_radius + (self.end_radius - self.start_radius) * (t / length);
        (point - closest).length() - radius
    }
}

/// Sphere primitive at a lattice vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BallData {
    pub position: Vec3,
    pub radius: f32,
    pub material_id: i32,
}

impl BallData {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            material_id: 0,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min: self.position - Vec3::splat(self.radius),
            max: self.position + Vec3::splat(self.radius),
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        (point - self.position).length() - self.radius
    }
}

// ── Payload decode tags ──

/// How the kernel decodes a meta range of the primitive payload.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveType {
    #[default]
    OuterPolygon = 0,
    InnerPolygon = 1,
    Beams = 2,
    MeshTriangles = 3,
    MeshKdRootNode = 4,
    MeshKdNode = 5,
    Lines = 6,
    LevelSet = 7,
    LevelSetBinary = 8,
    LevelSetFaceIndices = 9,
    LevelSetGrayscale8 = 10,
    ImageStack = 11,
    /// Beam lattice root node (BVH acceleration).
    BeamLattice = 12,
    Beam = 13,
    Ball = 14,
    BeamBvhNode = 15,
    /// Primitive index mapping for BVH traversal.
    PrimitiveIndices = 16,
    /// Voxel grid with primitive indices.
    BeamLatticeVoxelIndex = 17,
    /// Voxel grid with primitive types.
    BeamLatticeVoxelType = 18,
}

impl PrimitiveType {
    pub fn from_i32(value: i32) -> Option<Self> {
        use PrimitiveType::*;
        Some(match value {
            0 => OuterPolygon,
            1 => InnerPolygon,
            2 => Beams,
            3 => MeshTriangles,
            4 => MeshKdRootNode,
            5 => MeshKdNode,
            6 => Lines,
            7 => LevelSet,
            8 => LevelSetBinary,
            9 => LevelSetFaceIndices,
            10 => LevelSetGrayscale8,
            11 => ImageStack,
            12 => BeamLattice,
            13 => Beam,
            14 => Ball,
            15 => BeamBvhNode,
            16 => PrimitiveIndices,
            17 => BeamLatticeVoxelIndex,
            18 => BeamLatticeVoxelType,
            _ => return None,
        })
    }
}

// ── Rendering settings ──

/// Raymarch acceleration mode. The values are bit flags so
/// `DISABLE_INTERPOLATION` can be combined with the sampling modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproximationMode(pub u32);

impl ApproximationMode {
    pub const FULL_MODEL: ApproximationMode = ApproximationMode(1 << 0);
    pub const HYBRID: ApproximationMode = ApproximationMode(1 << 1);
    pub const ONLY_PRECOMP_SDF: ApproximationMode = ApproximationMode(1 << 2);
    pub const DISABLE_INTERPOLATION: ApproximationMode = ApproximationMode(1 << 3);

    pub fn contains(&self, other: ApproximationMode) -> bool {
        self.0 & other.0 != 0
    }

    pub fn with(&self, other: ApproximationMode) -> ApproximationMode {
        ApproximationMode(self.0 | other.0)
    }
}

impl Default for ApproximationMode {
    fn default() -> Self {
        ApproximationMode::FULL_MODEL
    }
}

/// Preview toggles packed into the settings flags word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderingFlags(pub u32);

impl RenderingFlags {
    pub const SHOW_BUILD_PLATE: RenderingFlags = RenderingFlags(1 << 0);
    pub const CUT_OFF_OBJECT: RenderingFlags = RenderingFlags(1 << 1);
    pub const SHOW_FIELD: RenderingFlags = RenderingFlags(1 << 2);
    pub const SHOW_STACK: RenderingFlags = RenderingFlags(1 << 3);
    pub const SHOW_COORDINATE_SYSTEM: RenderingFlags = RenderingFlags(1 << 4);

    pub fn contains(&self, other: RenderingFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn set(&mut self, other: RenderingFlags, enabled: bool) {
        if enabled {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

pub const QUALITY_MIN: f32 = 0.05;
pub const QUALITY_MAX: f32 = 2.0;

/// Per-dispatch rendering parameters; layout matches the kernel argument
/// block (eight 4-byte words).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RenderingSettings {
    pub time_s: f32,
    pub z_mm: f32,
    pub flags: u32,
    pub approximation: u32,
    pub quality: f32,
    pub weight_dist_to_nb: f32,
    pub weight_mid_point: f32,
    pub normal_offset: f32,
}

impl Default for RenderingSettings {
    fn default() -> Self {
        Self {
            time_s: 0.0,
            z_mm: 0.0,
            flags: RenderingFlags::SHOW_BUILD_PLATE.0,
            approximation: ApproximationMode::FULL_MODEL.0,
            quality: 1.0,
            weight_dist_to_nb: 0.5,
            weight_mid_point: 0.5,
            normal_offset: 1e-3,
        }
    }
}

impl RenderingSettings {
    pub fn set_approximation(&mut self, mode: ApproximationMode) {
        self.approximation = mode.0;
    }

    pub fn approximation(&self) -> ApproximationMode {
        ApproximationMode(self.approximation)
    }

    pub fn set_quality(&mut self, quality: f32) {
        self.quality = quality.clamp(QUALITY_MIN, QUALITY_MAX);
    }
}

// ── Command tape ──

/// One instruction of the command-stream representation of a compiled
/// model. Kernels interpret the tape when the model is not inlined into the
/// program source.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Command {
    pub kind: i32,
    pub id: i32,
    pub placeholder: [i32; 2],
    pub args: [i32; 32],
    pub output: [i32; 32],
}

impl Default for Command {
    fn default() -> Self {
        Self {
            kind: CommandKind::End as i32,
            id: 0,
            placeholder: [0; 2],
            args: [0; 32],
            output: [0; 32],
        }
    }
}

impl Command {
    pub fn new(kind: CommandKind, id: i32) -> Self {
        Self {
            kind: kind as i32,
            id,
            ..Self::default()
        }
    }
}

/// Instruction set of the command tape. Only the subset the graph lowering
/// emits is listed; the numbering leaves room for the full scalar/vector/
/// matrix families.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    End = 0,
    ConstantScalar = 1,
    ConstantVector = 2,
    ComposeVector = 4,
    DecomposeVector = 10,
    AdditionScalar = 11,
    AdditionVector = 12,
    MultiplicationScalar = 14,
    SubtractionScalar = 17,
    DivisionScalar = 20,
    DotProduct = 23,
    CrossProduct = 24,
    MinScalar = 58,
    MaxScalar = 61,
    AbsScalar = 64,
    SqrtScalar = 67,
    Length = 114,
    Resource = 115,
    Transformation = 116,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_box_absorbs_any_point() {
        let mut bb = BoundingBox::empty();
        assert!(bb.is_empty());
        bb.extend(Vec3::new(1.0, -2.0, 3.0));
        assert_eq!(bb.min, Vec3::new(1.0, -2.0, 3.0));
        assert_eq!(bb.max, Vec3::new(1.0, -2.0, 3.0));
        assert!(bb.is_valid());
    }

    #[test]
    fn union_is_componentwise() {
        let a = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        let b = BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(0.5));
        let u = a.union(&b);
        assert_eq!(u.min, Vec3::splat(-1.0));
        assert_eq!(u.max, Vec3::ONE);
    }

    #[test]
    fn surface_area_clamps_degenerate_extents() {
        let degenerate = BoundingBox::new(Vec3::ONE, Vec3::ZERO);
        assert_eq!(degenerate.surface_area(), 0.0);
        let unit = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(unit.surface_area(), 6.0);
    }

    #[test]
    fn distance_to_box_is_zero_inside() {
        let bb = BoundingBox::new(Vec3::ZERO, Vec3::splat(2.0));
        assert_eq!(bb.distance_to(Vec3::ONE), 0.0);
        assert!((bb.distance_to(Vec3::new(3.0, 1.0, 1.0)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_length_beam_degenerates_to_ball() {
        let beam = BeamData::new(Vec3::splat(1.0), Vec3::splat(1.0), 0.5, 0.8);
        let d = beam.signed_distance(Vec3::new(3.0, 1.0, 1.0));
        assert!((d - (2.0 - 0.8)).abs() < 1e-6);
    }

    #[test]
    fn beam_distance_interpolates_radius() {
        let beam = BeamData::new(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 1.0, 3.0);
        // Query above the midpoint: interpolated radius is 2.0.
        let d = beam.signed_distance(Vec3::new(5.0, 4.0, 0.0));
        assert!((d - 2.0).abs() < 1e-5);
    }

    #[test]
    fn beam_bounds_use_max_radius() {
        let beam = BeamData::new(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0), 0.5, 1.5);
        let bb = beam.bounds();
        assert_eq!(bb.min, Vec3::new(-1.5, -1.5, -1.5));
        assert_eq!(bb.max, Vec3::new(5.5, 1.5, 1.5));
    }

    #[test]
    fn quality_is_clamped() {
        let mut settings = RenderingSettings::default();
        settings.set_quality(10.0);
        assert_eq!(settings.quality, QUALITY_MAX);
        settings.set_quality(0.0);
        assert_eq!(settings.quality, QUALITY_MIN);
    }

    #[test]
    fn primitive_type_round_trips() {
        for v in 0..=18 {
            let t = PrimitiveType::from_i32(v).unwrap();
            assert_eq!(t as i32, v);
        }
        assert!(PrimitiveType::from_i32(19).is_none());
    }
}
