//! Beam-lattice resource: builds the BVH (or the voxel index grids) and
//! serializes everything into the payload.
//!
//! Layout: one BeamLattice root meta carrying the serialized BVH nodes,
//! a PrimitiveIndices meta mapping reordered BVH slots back to source
//! primitives, then Beam and Ball metas with the raw primitive floats.
//! With voxel acceleration enabled the index (and optional type) grids are
//! appended as dense blocks over their active bounds.

use crate::accel::beam_bvh::{BeamBvhBuilder, BuildParams, BuildStats, PrimitiveKind};
use crate::accel::sparse_grid::SparseGrid;
use crate::accel::voxel_index::{VoxelIndexBuilder, VoxelIndexSettings};
use crate::kernel::payload::PrimitiveBuffer;
use crate::kernel::types::{BallData, BeamData, BoundingBox, PrimitiveType};

pub struct BeamLatticeResource {
    beams: Vec<BeamData>,
    balls: Vec<BallData>,
    bvh_params: BuildParams,
    build_stats: BuildStats,
    use_voxel_acceleration: bool,
    voxel_settings: VoxelIndexSettings,
}

impl BeamLatticeResource {
    /// A lattice needs at least one primitive.
    pub fn new(beams: Vec<BeamData>, balls: Vec<BallData>) -> Option<Self> {
        if beams.is_empty() && balls.is_empty() {
            return None;
        }
        Some(Self {
            beams,
            balls,
            bvh_params: BuildParams::default(),
            build_stats: BuildStats::default(),
            use_voxel_acceleration: false,
            voxel_settings: VoxelIndexSettings::default(),
        })
    }

    pub fn beams(&self) -> &[BeamData] {
        &self.beams
    }

    pub fn balls(&self) -> &[BallData] {
        &self.balls
    }

    pub fn set_bvh_params(&mut self, params: BuildParams) {
        self.bvh_params = params;
    }

    pub fn set_voxel_acceleration(&mut self, enabled: bool, settings: VoxelIndexSettings) {
        self.use_voxel_acceleration = enabled;
        self.voxel_settings = settings;
    }

    pub fn build_stats(&self) -> &BuildStats {
        &self.build_stats
    }

    pub fn build_payload(&mut self) -> PrimitiveBuffer {
        let mut payload = PrimitiveBuffer::default();
        self.write_bvh(&mut payload);
        self.write_beams(&mut payload);
        self.write_balls(&mut payload);
        if self.use_voxel_acceleration {
            self.write_voxel_grids(&mut payload);
        }
        payload
    }

    fn write_bvh(&mut self, payload: &mut PrimitiveBuffer) {
        let mut builder = BeamBvhBuilder::new();
        let (nodes, primitives) = builder.build(&self.beams, &self.balls, &self.bvh_params);
        self.build_stats = *builder.last_build_stats();

        let mut meta = payload.open_meta(PrimitiveType::BeamLattice);
        if let Some(root) = nodes.first() {
            meta.set_bounds(&root.bounds());
        }
        for node in &nodes {
            let bounds = node.bounds();
            payload.data.extend_from_slice(&[
                bounds.min.x,
                bounds.min.y,
                bounds.min.z,
                bounds.max.x,
                bounds.max.y,
                bounds.max.z,
                node.left_child as f32,
                node.right_child as f32,
                node.primitive_start as f32,
                node.primitive_count as f32,
            ]);
        }
        payload.close_meta(meta);

        // Mapping from BVH slots back to source arrays: (kind, index).
        let map_meta = payload.open_meta(PrimitiveType::PrimitiveIndices);
        for prim in &primitives {
            let kind = match prim.kind {
                PrimitiveKind::Beam => 0.0,
                PrimitiveKind::Ball => 1.0,
            };
            payload.data.push(kind);
            payload.data.push(prim.index as f32);
        }
        payload.close_meta(map_meta);
    }

    fn write_beams(&self, payload: &mut PrimitiveBuffer) {
        if self.beams.is_empty() {
            return;
        }
        let mut meta = payload.open_meta(PrimitiveType::Beam);
        let mut bounds = BoundingBox::empty();
        for beam in &self.beams {
            bounds = bounds.union(&beam.bounds());
            payload.data.extend_from_slice(&[
                beam.start_pos.x,
                beam.start_pos.y,
                beam.start_pos.z,
                beam.end_pos.x,
                beam.end_pos.y,
                beam.end_pos.z,
                beam.start_radius,
                beam.end_radius,
                beam.start_cap_style as i32 as f32,
                beam.end_cap_style as i32 as f32,
                beam.material_id as f32,
            ]);
        }
        meta.set_bounds(&bounds);
        payload.close_meta(meta);
    }

    fn write_balls(&self, payload: &mut PrimitiveBuffer) {
        if self.balls.is_empty() {
            return;
        }
        let mut meta = payload.open_meta(PrimitiveType::Ball);
        let mut bounds = BoundingBox::empty();
        for ball in &self.balls {
            bounds = bounds.union(&ball.bounds());
            payload.data.extend_from_slice(&[
                ball.position.x,
                ball.position.y,
                ball.position.z,
                ball.radius,
                ball.material_id as f32,
            ]);
        }
        meta.set_bounds(&bounds);
        payload.close_meta(meta);
    }

    fn write_voxel_grids(&self, payload: &mut PrimitiveBuffer) {
        let mut builder = VoxelIndexBuilder::new();
        let (index_grid, type_grid) =
            builder.build(&self.beams, &self.balls, &self.voxel_settings);

        if let Some(grid) = index_grid {
            write_grid_block(payload, &grid, PrimitiveType::BeamLatticeVoxelIndex);
        }
        if let Some(grid) = type_grid {
            write_grid_block(payload, &grid, PrimitiveType::BeamLatticeVoxelType);
        }
    }
}

/// Dense serialization of a sparse grid over its active bounds:
/// `(min.xyz, dims.xyz, voxel_size, background, values…)`.
fn write_grid_block(
    payload: &mut PrimitiveBuffer,
    grid: &SparseGrid<i32>,
    primitive_type: PrimitiveType,
) {
    let Some((min, max)) = grid.active_bounds() else {
        return;
    };
    let dims = (
        (max.0 - min.0 + 1) as usize,
        (max.1 - min.1 + 1) as usize,
        (max.2 - min.2 + 1) as usize,
    );

    let meta = payload.open_meta(primitive_type);
    payload.data.extend_from_slice(&[
        min.0 as f32,
        min.1 as f32,
        min.2 as f32,
        dims.0 as f32,
        dims.1 as f32,
        dims.2 as f32,
        grid.voxel_size(),
        grid.background() as f32,
    ]);
    for z in min.2..=max.2 {
        for y in min.1..=max.1 {
            for x in min.0..=max.0 {
                payload.data.push(grid.value((x, y, z)) as f32);
            }
        }
    }
    payload.close_meta(meta);
}
