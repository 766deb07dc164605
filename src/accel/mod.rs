//! Acceleration structures for beam-lattice distance queries.
//!
//! Two alternatives are offered: a SAH bounding-volume hierarchy
//! ([`beam_bvh`]) for log-time traversal, and a sparse voxel index grid
//! ([`voxel_index`]) that precomputes the closest primitive per voxel.

pub mod beam_bvh;
pub mod sparse_grid;
pub mod voxel_index;

pub use beam_bvh::{
    closest_primitive, BeamBvhBuilder, BeamBvhNode, BeamPrimitive, BuildParams, BuildStats,
    PrimitiveKind, QueryResult,
};
pub use sparse_grid::SparseGrid;
pub use voxel_index::{VoxelIndexBuilder, VoxelIndexSettings, VoxelIndexStats};
