//! Closest-primitive voxel index grids for beam lattices.
//!
//! Each active voxel of the index grid stores the index of the closest
//! primitive within `max_distance` of its center; a second grid (or the
//! sign bit of the index) carries the primitive type. Phase 1 walks every
//! voxel of the dilated lattice bounds with conservative AABB rejection and
//! is the reference path; phase 2 iterates primitives instead and stamps
//! their influence regions, which may deviate slightly near region borders.

use std::time::Instant;

use glam::Vec3;
use rayon::prelude::*;

use crate::accel::sparse_grid::SparseGrid;
use crate::kernel::types::{BallData, BeamData, BoundingBox};

/// Primitive type stored in the type grid: 0 = beam, 1 = ball.
pub const TYPE_BEAM: i32 = 0;
pub const TYPE_BALL: i32 = 1;

/// Rejection tests stay conservative by at least this world-unit margin.
const CONSERVATIVE_MARGIN: f32 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct VoxelIndexSettings {
    /// Voxel edge length in world units.
    pub voxel_size: f32,
    /// Maximum distance for a voxel to be assigned a primitive.
    pub max_distance: f32,
    /// Store primitive types in a separate grid instead of the index grid.
    pub separate_beam_ball_grids: bool,
    /// Encode the type in bit 31 of the index (only without separate grids).
    pub encode_type_in_index: bool,
    /// 1 = reference bounds-culling walk, 2 = primitive-centric stamping.
    pub optimization_phase: u32,
}

impl Default for VoxelIndexSettings {
    fn default() -> Self {
        Self {
            voxel_size: 0.5,
            max_distance: 10.0,
            separate_beam_ball_grids: true,
            encode_type_in_index: false,
            optimization_phase: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VoxelIndexStats {
    /// Voxels visited in the dilated range.
    pub total_voxels: u64,
    pub active_voxels: u64,
    pub average_distance: f32,
    pub max_distance: f32,
    pub memory_usage_bytes: usize,
    pub build_time_seconds: f32,
}

/// Cached beam AABB for rejection tests, keeping the source index.
#[derive(Debug, Clone, Copy)]
struct BeamBounds {
    min: Vec3,
    max: Vec3,
    beam_index: usize,
}

#[derive(Debug, Clone, Copy)]
struct BallBounds {
    center: Vec3,
    radius: f32,
    ball_index: usize,
}

/// Builder for the voxel index grids; keeps the stats of the last build.
#[derive(Default)]
pub struct VoxelIndexBuilder {
    last_stats: VoxelIndexStats,
}

impl VoxelIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_build_stats(&self) -> &VoxelIndexStats {
        &self.last_stats
    }

    /// Number of voxels the dilated range would visit. Callers are expected
    /// to guard against runaway grids (1e7 cells is a sane ceiling); the
    /// builder itself does not abort.
    pub fn estimate_cell_count(
        beams: &[BeamData],
        balls: &[BallData],
        settings: &VoxelIndexSettings,
    ) -> u64 {
        match voxel_range(beams, balls, settings) {
            Some((min, max)) => {
                let dx = (max.0 - min.0 + 1) as u64;
                let dy = (max.1 - min.1 + 1) as u64;
                let dz = (max.2 - min.2 + 1) as u64;
                dx * dy * dz
            }
            None => 0,
        }
    }

    /// Build `(index_grid, type_grid)`. Empty input yields `(None, None)`.
    pub fn build(
        &mut self,
        beams: &[BeamData],
        balls: &[BallData],
        settings: &VoxelIndexSettings,
    ) -> (Option<SparseGrid<i32>>, Option<SparseGrid<i32>>) {
        let start_time = Instant::now();
        self.last_stats = VoxelIndexStats::default();

        if beams.is_empty() && balls.is_empty() {
            return (None, None);
        }

        let mut index_grid = SparseGrid::new(settings.voxel_size, 0);
        index_grid.set_name("beam_lattice_primitive_indices");
        let mut type_grid = if settings.separate_beam_ball_grids {
            let mut grid = SparseGrid::new(settings.voxel_size, -1);
            grid.set_name("beam_lattice_primitive_types");
            Some(grid)
        } else {
            None
        };

        let assignments = match settings.optimization_phase {
            2 => stamp_primitive_regions(beams, balls, settings),
            _ => walk_voxel_range(beams, balls, settings, &mut self.last_stats),
        };

        let mut total_distance = 0.0f64;
        for assignment in &assignments {
            let encoded =
                if settings.encode_type_in_index && !settings.separate_beam_ball_grids {
                    if assignment.primitive_type == TYPE_BALL {
                        assignment.index | (1 << 31)
                    } else {
                        assignment.index
                    }
                } else {
                    assignment.index
                };
            index_grid.set_value(assignment.coord, encoded);
            if let Some(grid) = type_grid.as_mut() {
                grid.set_value(assignment.coord, assignment.primitive_type);
            }

            self.last_stats.active_voxels += 1;
            total_distance += assignment.distance.abs() as f64;
            self.last_stats.max_distance =
                self.last_stats.max_distance.max(assignment.distance.abs());
        }

        if self.last_stats.active_voxels > 0 {
            self.last_stats.average_distance =
                (total_distance / self.last_stats.active_voxels as f64) as f32;
        }

        index_grid.prune();
        if let Some(grid) = type_grid.as_mut() {
            grid.prune();
        }

        self.last_stats.memory_usage_bytes = index_grid.memory_usage_bytes()
            + type_grid.as_ref().map_or(0, |g| g.memory_usage_bytes());
        self.last_stats.build_time_seconds = start_time.elapsed().as_secs_f32();

        log::info!(
            "voxel index built: {} active voxels in {:.2} s ({} KiB)",
            self.last_stats.active_voxels,
            self.last_stats.build_time_seconds,
            self.last_stats.memory_usage_bytes / 1024
        );

        (Some(index_grid), type_grid)
    }
}

struct VoxelAssignment {
    coord: (i32, i32, i32),
    index: i32,
    primitive_type: i32,
    distance: f32,
}

fn lattice_bounds(beams: &[BeamData], balls: &[BallData]) -> BoundingBox {
    let mut bounds = BoundingBox::empty();
    for beam in beams {
        bounds.extend(beam.start_pos);
        bounds.extend(beam.end_pos);
    }
    for ball in balls {
        bounds.extend(ball.position + Vec3::splat(ball.radius));
        bounds.extend(ball.position - Vec3::splat(ball.radius));
    }
    bounds
}

/// Index range of the lattice bounds, expanded on every side by
/// `ceil(max_distance / voxel_size) + 2` voxels of margin.
fn voxel_range(
    beams: &[BeamData],
    balls: &[BallData],
    settings: &VoxelIndexSettings,
) -> Option<((i32, i32, i32), (i32, i32, i32))> {
    if beams.is_empty() && balls.is_empty() {
        return None;
    }
    let bounds = lattice_bounds(beams, balls);
    let grid: SparseGrid<i32> = SparseGrid::new(settings.voxel_size, 0);
    let min = grid.world_to_index(bounds.min);
    let max = grid.world_to_index(bounds.max);
    let margin = (settings.max_distance / settings.voxel_size).ceil() as i32 + 2;
    Some((
        (min.0 - margin, min.1 - margin, min.2 - margin),
        (max.0 + margin, max.1 + margin, max.2 + margin),
    ))
}

fn precompute_beam_bounds(beams: &[BeamData]) -> Vec<BeamBounds> {
    beams
        .iter()
        .enumerate()
        .map(|(i, beam)| {
            let bb = beam.bounds();
            BeamBounds {
                min: bb.min,
                max: bb.max,
                beam_index: i,
            }
        })
        .collect()
}

fn precompute_ball_bounds(balls: &[BallData]) -> Vec<BallBounds> {
    balls
        .iter()
        .enumerate()
        .map(|(i, ball)| BallBounds {
            center: ball.position,
            radius: ball.radius,
            ball_index: i,
        })
        .collect()
}

/// Closest primitive within `max_dist` of `point`, `(index, type, distance)`.
///
/// Beams are examined before balls, each in caller order; equal distances
/// resolve to the earlier primitive because updates require a strictly
/// smaller distance. Rejection boxes are expanded by the running best
/// distance plus [`CONSERVATIVE_MARGIN`] so the pruning can never change
/// the result.
fn find_closest_primitive(
    point: Vec3,
    beam_bounds: &[BeamBounds],
    ball_bounds: &[BallBounds],
    beams: &[BeamData],
    balls: &[BallData],
    max_dist: f32,
) -> Option<(i32, i32, f32)> {
    let mut best_dist = max_dist;
    let mut best: Option<(i32, i32)> = None;

    for bb in beam_bounds {
        let margin = best_dist + CONSERVATIVE_MARGIN;
        if point.x < bb.min.x - margin
            || point.x > bb.max.x + margin
            || point.y < bb.min.y - margin
            || point.y > bb.max.y + margin
            || point.z < bb.min.z - margin
            || point.z > bb.max.z + margin
        {
            continue;
        }
        let d = beams[bb.beam_index].signed_distance(point);
        if d < best_dist {
            best_dist = d;
            best = Some((bb.beam_index as i32, TYPE_BEAM));
        }
    }

    for bb in ball_bounds {
        // Same per-axis box test as for beams: outside the ball's AABB by
        // more than the margin on any axis implies the surface is out of
        // reach too.
        let margin = bb.radius + best_dist + CONSERVATIVE_MARGIN;
        if point.x < bb.center.x - margin
            || point.x > bb.center.x + margin
            || point.y < bb.center.y - margin
            || point.y > bb.center.y + margin
            || point.z < bb.center.z - margin
            || point.z > bb.center.z + margin
        {
            continue;
        }
        let d = balls[bb.ball_index].signed_distance(point);
        if d < best_dist {
            best_dist = d;
            best = Some((bb.ball_index as i32, TYPE_BALL));
        }
    }

    best.map(|(index, ty)| (index, ty, best_dist))
}

/// Phase 1: visit every voxel of the dilated range, x-slabs in parallel.
fn walk_voxel_range(
    beams: &[BeamData],
    balls: &[BallData],
    settings: &VoxelIndexSettings,
    stats: &mut VoxelIndexStats,
) -> Vec<VoxelAssignment> {
    let Some((min, max)) = voxel_range(beams, balls, settings) else {
        return Vec::new();
    };

    stats.total_voxels = ((max.0 - min.0 + 1) as u64)
        * ((max.1 - min.1 + 1) as u64)
        * ((max.2 - min.2 + 1) as u64);

    let beam_bounds = precompute_beam_bounds(beams);
    let ball_bounds = precompute_ball_bounds(balls);
    let probe: SparseGrid<i32> = SparseGrid::new(settings.voxel_size, 0);

    (min.0..=max.0)
        .into_par_iter()
        .flat_map_iter(|x| {
            let beam_bounds = &beam_bounds;
            let ball_bounds = &ball_bounds;
            let probe = &probe;
            (min.1..=max.1).flat_map(move |y| {
                (min.2..=max.2).filter_map(move |z| {
                    let coord = (x, y, z);
                    let pos = probe.index_to_world(coord);
                    find_closest_primitive(
                        pos,
                        beam_bounds,
                        ball_bounds,
                        beams,
                        balls,
                        settings.max_distance,
                    )
                    .map(|(index, primitive_type, distance)| VoxelAssignment {
                        coord,
                        index,
                        primitive_type,
                        distance,
                    })
                })
            })
        })
        .collect()
}

/// Phase 2: iterate primitives and stamp their influence regions, keeping
/// the smallest distance per voxel. Same beam-before-ball ordering as phase
/// 1, so exact ties resolve identically; coverage near region borders may
/// differ from the reference by up to the stamping margin.
fn stamp_primitive_regions(
    beams: &[BeamData],
    balls: &[BallData],
    settings: &VoxelIndexSettings,
) -> Vec<VoxelAssignment> {
    use std::collections::HashMap;

    let probe: SparseGrid<i32> = SparseGrid::new(settings.voxel_size, 0);
    let mut best: HashMap<(i32, i32, i32), (f32, i32, i32)> = HashMap::new();

    let mut stamp = |region: BoundingBox, index: i32, ty: i32, distance_fn: &dyn Fn(Vec3) -> f32| {
        let dilated = region.dilated(settings.max_distance + settings.voxel_size);
        let lo = probe.world_to_index(dilated.min);
        let hi = probe.world_to_index(dilated.max);
        for x in lo.0..=hi.0 {
            for y in lo.1..=hi.1 {
                for z in lo.2..=hi.2 {
                    let coord = (x, y, z);
                    let d = distance_fn(probe.index_to_world(coord));
                    if d > settings.max_distance {
                        continue;
                    }
                    match best.get_mut(&coord) {
                        Some(entry) if d >= entry.0 => {}
                        Some(entry) => *entry = (d, index, ty),
                        None => {
                            best.insert(coord, (d, index, ty));
                        }
                    }
                }
            }
        }
    };

    for (i, beam) in beams.iter().enumerate() {
        stamp(beam.bounds(), i as i32, TYPE_BEAM, &|p| beam.signed_distance(p));
    }
    for (i, ball) in balls.iter().enumerate() {
        stamp(ball.bounds(), i as i32, TYPE_BALL, &|p| ball.signed_distance(p));
    }

    best.into_iter()
        .map(|(coord, (distance, index, primitive_type))| VoxelAssignment {
            coord,
            index,
            primitive_type,
            distance,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_beams_one_ball() -> (Vec<BeamData>, Vec<BallData>) {
        let beams = vec![
            BeamData::new(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 1.0, 1.0),
            BeamData::new(Vec3::new(0.0, 8.0, 0.0), Vec3::new(10.0, 8.0, 0.0), 1.0, 1.0),
        ];
        let balls = vec![BallData::new(Vec3::new(5.0, 4.0, 0.0), 1.5)];
        (beams, balls)
    }

    fn settings() -> VoxelIndexSettings {
        VoxelIndexSettings {
            voxel_size: 1.0,
            max_distance: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn empty_input_yields_no_grids() {
        let mut builder = VoxelIndexBuilder::new();
        let (index, types) = builder.build(&[], &[], &settings());
        assert!(index.is_none());
        assert!(types.is_none());
    }

    #[test]
    fn active_voxels_are_within_max_distance() {
        let (beams, balls) = two_beams_one_ball();
        let mut builder = VoxelIndexBuilder::new();
        let (index, types) = builder.build(&beams, &balls, &settings());
        let index = index.unwrap();
        let types = types.unwrap();

        assert!(index.active_voxel_count() > 0);
        for (coord, stored) in index.iter() {
            let pos = index.index_to_world(coord);
            let ty = types.value(coord);
            let d = match ty {
                TYPE_BEAM => beams[stored as usize].signed_distance(pos),
                TYPE_BALL => balls[stored as usize].signed_distance(pos),
                other => panic!("unexpected type {other}"),
            };
            assert!(d <= settings().max_distance + 1e-5);
        }
    }

    #[test]
    fn stored_primitive_is_the_closest() {
        let (beams, balls) = two_beams_one_ball();
        let mut builder = VoxelIndexBuilder::new();
        let (index, types) = builder.build(&beams, &balls, &settings());
        let index = index.unwrap();
        let types = types.unwrap();

        for (coord, stored) in index.iter() {
            let pos = index.index_to_world(coord);
            let stored_d = match types.value(coord) {
                TYPE_BEAM => beams[stored as usize].signed_distance(pos),
                _ => balls[stored as usize].signed_distance(pos),
            };
            let brute = beams
                .iter()
                .map(|b| b.signed_distance(pos))
                .chain(balls.iter().map(|b| b.signed_distance(pos)))
                .fold(f32::INFINITY, f32::min);
            assert!((stored_d - brute).abs() < 1e-5);
        }
    }

    #[test]
    fn type_encoding_in_sign_bit() {
        let (beams, balls) = two_beams_one_ball();
        let encoded_settings = VoxelIndexSettings {
            separate_beam_ball_grids: false,
            encode_type_in_index: true,
            ..settings()
        };
        let mut builder = VoxelIndexBuilder::new();
        let (index, types) = builder.build(&beams, &balls, &encoded_settings);
        assert!(types.is_none());
        let index = index.unwrap();

        let mut saw_ball = false;
        for (coord, stored) in index.iter() {
            if stored & (1 << 31) != 0 {
                saw_ball = true;
                let ball_index = (stored & !(1 << 31)) as usize;
                let pos = index.index_to_world(coord);
                assert!(balls[ball_index].signed_distance(pos) <= encoded_settings.max_distance + 1e-5);
            }
        }
        assert!(saw_ball, "ball assignments should appear near the ball");
    }

    #[test]
    fn interior_voxels_far_from_lattice_are_inactive() {
        let (beams, balls) = two_beams_one_ball();
        let mut builder = VoxelIndexBuilder::new();
        let (index, _) = builder.build(&beams, &balls, &settings());
        let index = index.unwrap();

        // A point well outside max_distance of everything.
        let far = index.world_to_index(Vec3::new(5.0, 4.0, 30.0));
        assert!(!index.is_active(far));
        assert_eq!(index.value(far), 0);
    }

    #[test]
    fn diagonal_ball_within_range_is_not_culled() {
        // Query point diagonal to a ball: the Euclidean surface distance is
        // 1.9 (inside max_distance 2.0) while the component sum of the
        // offset exceeds radius plus the rejection margin, so a Manhattan
        // cull would wrongly drop the ball.
        let balls = vec![BallData::new(Vec3::ZERO, 1.0)];
        let ball_bounds = precompute_ball_bounds(&balls);
        let half = 2.9 / std::f32::consts::SQRT_2;
        let point = Vec3::new(half, half, 0.0);

        let hit = find_closest_primitive(point, &[], &ball_bounds, &[], &balls, 2.0);
        let (index, ty, distance) = hit.expect("ball is within max distance");
        assert_eq!(index, 0);
        assert_eq!(ty, TYPE_BALL);
        assert!((distance - 1.9).abs() < 1e-5);
    }

    #[test]
    fn tie_breaks_resolve_to_earlier_primitive() {
        // Two identical beams: every voxel must store index 0.
        let beam = BeamData::new(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0), 1.0, 1.0);
        let beams = vec![beam, beam];
        let mut builder = VoxelIndexBuilder::new();
        let (index, _) = builder.build(&beams, &[], &settings());
        for (_, stored) in index.unwrap().iter() {
            assert_eq!(stored, 0);
        }
    }

    #[test]
    fn estimate_counts_dilated_range() {
        let (beams, balls) = two_beams_one_ball();
        let estimate = VoxelIndexBuilder::estimate_cell_count(&beams, &balls, &settings());
        assert!(estimate > 0);
        let mut builder = VoxelIndexBuilder::new();
        builder.build(&beams, &balls, &settings());
        assert_eq!(builder.last_build_stats().total_voxels, estimate);
    }

    // Stress scenario; run with `cargo test --release -- --ignored`.
    #[test]
    #[ignore]
    fn ten_thousand_random_beams_build_quickly() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        let beams: Vec<BeamData> = (0..10_000)
            .map(|_| {
                let start = Vec3::new(
                    rng.gen_range(0.0..200.0),
                    rng.gen_range(0.0..200.0),
                    rng.gen_range(0.0..200.0),
                );
                let dir = Vec3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                );
                BeamData::new(
                    start,
                    start + dir * rng.gen_range(2.0..8.0),
                    rng.gen_range(0.2..1.0),
                    rng.gen_range(0.2..1.0),
                )
            })
            .collect();

        let stress_settings = VoxelIndexSettings {
            voxel_size: 2.0,
            max_distance: 5.0,
            ..Default::default()
        };
        let mut builder = VoxelIndexBuilder::new();
        let (index, _) = builder.build(&beams, &[], &stress_settings);
        let stats = builder.last_build_stats();

        assert!(index.unwrap().active_voxel_count() >= 10_000);
        assert!(
            stats.build_time_seconds < 10.0,
            "build took {:.1} s",
            stats.build_time_seconds
        );
        assert!(stats.memory_usage_bytes < 100 * 1024 * 1024);
        let throughput = 10_000.0 / stats.build_time_seconds;
        assert!(throughput >= 1000.0, "throughput {throughput:.0} beams/s");
    }

    #[test]
    fn phase2_matches_phase1_within_tolerance() {
        let (beams, balls) = two_beams_one_ball();
        let mut builder = VoxelIndexBuilder::new();
        let (reference, _) = builder.build(&beams, &balls, &settings());
        let reference = reference.unwrap();

        let phase2_settings = VoxelIndexSettings {
            optimization_phase: 2,
            ..settings()
        };
        let (fast, _) = builder.build(&beams, &balls, &phase2_settings);
        let fast = fast.unwrap();

        let ref_count = reference.active_voxel_count() as f32;
        let fast_count = fast.active_voxel_count() as f32;
        assert!(
            (ref_count - fast_count).abs() / ref_count <= 0.2,
            "phase 2 deviates too far: {ref_count} vs {fast_count}"
        );
    }
}
