//! SAH bounding-volume hierarchy over beam and ball primitives.
//!
//! The builder flattens beams (first) and balls (second) into a single
//! primitive array, then partitions it in place so that every leaf
//! references a contiguous `[start, start + count)` slice. Node 0 is the
//! root; children of internal nodes are indices into the same node array.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::kernel::types::{BallData, BeamData, BoundingBox};

/// Number of candidate split positions sampled per axis.
const SPLIT_SAMPLES: usize = 32;

/// BVH node; device layout is four 16-byte blocks.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BeamBvhNode {
    pub bounds_min: [f32; 4],
    pub bounds_max: [f32; 4],
    /// Index of the left child, -1 for leaves.
    pub left_child: i32,
    /// Index of the right child, -1 for leaves.
    pub right_child: i32,
    /// First primitive index, for leaves.
    pub primitive_start: i32,
    /// Primitive count, for leaves.
    pub primitive_count: i32,
    pub depth: i32,
    pub _pad: [i32; 3],
}

impl Default for BeamBvhNode {
    fn default() -> Self {
        Self {
            bounds_min: [0.0; 4],
            bounds_max: [0.0; 4],
            left_child: -1,
            right_child: -1,
            primitive_start: 0,
            primitive_count: 0,
            depth: 0,
            _pad: [0; 3],
        }
    }
}

impl BeamBvhNode {
    pub fn is_leaf(&self) -> bool {
        self.left_child == -1 && self.right_child == -1
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min: Vec3::new(self.bounds_min[0], self.bounds_min[1], self.bounds_min[2]),
            max: Vec3::new(self.bounds_max[0], self.bounds_max[1], self.bounds_max[2]),
        }
    }

    fn set_bounds(&mut self, bounds: &BoundingBox) {
        self.bounds_min = [bounds.min.x, bounds.min.y, bounds.min.z, 0.0];
        self.bounds_max = [bounds.max.x, bounds.max.y, bounds.max.z, 0.0];
    }
}

/// Kind of primitive a [`BeamPrimitive`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Beam,
    Ball,
}

/// Build-time view of one primitive: its kind, index into the caller's
/// beam/ball array, bounds and centroid.
#[derive(Debug, Clone, Copy)]
pub struct BeamPrimitive {
    pub kind: PrimitiveKind,
    pub index: i32,
    pub bounds: BoundingBox,
    pub centroid: Vec3,
}

impl BeamPrimitive {
    fn new(kind: PrimitiveKind, index: i32, bounds: BoundingBox) -> Self {
        Self {
            kind,
            index,
            bounds,
            centroid: bounds.center(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BuildParams {
    pub max_depth: i32,
    pub max_primitives_per_leaf: usize,
    pub traversal_cost: f32,
    pub intersection_cost: f32,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            max_depth: 20,
            max_primitives_per_leaf: 4,
            traversal_cost: 1.0,
            intersection_cost: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildStats {
    pub total_nodes: usize,
    pub leaf_nodes: usize,
    pub max_depth: i32,
    pub avg_depth: f32,
    pub sah_cost: f32,
}

struct BuildContext {
    primitives: Vec<BeamPrimitive>,
    scene_bounds: BoundingBox,
    centroid_bounds: BoundingBox,
}

/// SAH BVH builder; reusable across builds, keeps the stats of the last one.
#[derive(Default)]
pub struct BeamBvhBuilder {
    last_stats: BuildStats,
}

impl BeamBvhBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the node array. Leaves index into the reordered primitive array
    /// returned alongside; empty input yields empty output and zero stats.
    pub fn build(
        &mut self,
        beams: &[BeamData],
        balls: &[BallData],
        params: &BuildParams,
    ) -> (Vec<BeamBvhNode>, Vec<BeamPrimitive>) {
        if beams.is_empty() && balls.is_empty() {
            self.last_stats = BuildStats::default();
            return (Vec::new(), Vec::new());
        }

        let mut context = create_build_context(beams, balls);
        let mut nodes = Vec::new();
        let count = context.primitives.len();
        build_recursive(&mut context, 0, count, 0, &mut nodes, params);

        self.last_stats = compute_stats(&nodes, &context.scene_bounds, params);
        log::debug!(
            "beam BVH built: {} nodes ({} leaves), max depth {}, {} primitives",
            self.last_stats.total_nodes,
            self.last_stats.leaf_nodes,
            self.last_stats.max_depth,
            count
        );
        (nodes, context.primitives)
    }

    pub fn last_build_stats(&self) -> &BuildStats {
        &self.last_stats
    }
}

fn create_build_context(beams: &[BeamData], balls: &[BallData]) -> BuildContext {
    let mut primitives = Vec::with_capacity(beams.len() + balls.len());
    let mut scene_bounds = BoundingBox::empty();
    let mut centroid_bounds = BoundingBox::empty();

    for (i, beam) in beams.iter().enumerate() {
        let prim = BeamPrimitive::new(PrimitiveKind::Beam, i as i32, beam.bounds());
        scene_bounds = scene_bounds.union(&prim.bounds);
        centroid_bounds.extend(prim.centroid);
        primitives.push(prim);
    }
    for (i, ball) in balls.iter().enumerate() {
        let prim = BeamPrimitive::new(PrimitiveKind::Ball, i as i32, ball.bounds());
        scene_bounds = scene_bounds.union(&prim.bounds);
        centroid_bounds.extend(prim.centroid);
        primitives.push(prim);
    }

    BuildContext {
        primitives,
        scene_bounds,
        centroid_bounds,
    }
}

fn range_bounds(primitives: &[BeamPrimitive]) -> BoundingBox {
    primitives
        .iter()
        .fold(BoundingBox::empty(), |acc, p| acc.union(&p.bounds))
}

fn axis_value(centroid: Vec3, axis: usize) -> f32 {
    match axis {
        0 => centroid.x,
        1 => centroid.y,
        _ => centroid.z,
    }
}

/// SAH cost of splitting `[start, end)` at `pos` on `axis`. Empty partitions
/// and a zero-area scene cost infinity so the caller falls back to the
/// midpoint split.
fn evaluate_sah(
    context: &BuildContext,
    start: usize,
    end: usize,
    axis: usize,
    pos: f32,
    params: &BuildParams,
) -> f32 {
    let mut left_bounds = BoundingBox::empty();
    let mut right_bounds = BoundingBox::empty();
    let mut left_count = 0usize;
    let mut right_count = 0usize;

    for prim in &context.primitives[start..end] {
        if axis_value(prim.centroid, axis) < pos {
            left_count += 1;
            left_bounds = left_bounds.union(&prim.bounds);
        } else {
            right_count += 1;
            right_bounds = right_bounds.union(&prim.bounds);
        }
    }

    if left_count == 0 || right_count == 0 {
        return f32::INFINITY;
    }

    let total_area = context.scene_bounds.surface_area();
    if total_area <= 0.0 {
        return f32::INFINITY;
    }

    params.traversal_cost
        + params.intersection_cost
            * (left_count as f32 * left_bounds.surface_area()
                + right_count as f32 * right_bounds.surface_area())
            / total_area
}

/// Pick the cheapest (axis, position) over sampled split candidates, sort
/// the real range by that axis and return the partition index.
fn find_best_split(
    context: &mut BuildContext,
    start: usize,
    end: usize,
    params: &BuildParams,
) -> usize {
    let mut best_cost = f32::INFINITY;
    let mut best_axis = 0usize;
    let mut best_pos = 0.0f32;

    for axis in 0..3 {
        let mut sorted: Vec<BeamPrimitive> = context.primitives[start..end].to_vec();
        sorted.sort_by(|a, b| {
            axis_value(a.centroid, axis).total_cmp(&axis_value(b.centroid, axis))
        });

        let num_samples = SPLIT_SAMPLES.min(sorted.len() - 1);
        for i in 1..=num_samples {
            let sample_index = i * sorted.len() / (num_samples + 1);
            let pos = axis_value(sorted[sample_index].centroid, axis);
            let cost = evaluate_sah(context, start, end, axis, pos, params);
            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
                best_pos = pos;
            }
        }
    }

    context.primitives[start..end].sort_by(|a, b| {
        axis_value(a.centroid, best_axis).total_cmp(&axis_value(b.centroid, best_axis))
    });

    for i in (start + 1)..end {
        if axis_value(context.primitives[i].centroid, best_axis) >= best_pos {
            return i;
        }
    }

    (start + end) / 2
}

fn build_recursive(
    context: &mut BuildContext,
    start: usize,
    end: usize,
    depth: i32,
    nodes: &mut Vec<BeamBvhNode>,
    params: &BuildParams,
) -> i32 {
    debug_assert!(start < end);

    let node_index = nodes.len() as i32;
    let mut node = BeamBvhNode {
        depth,
        ..Default::default()
    };
    node.set_bounds(&range_bounds(&context.primitives[start..end]));
    nodes.push(node);

    let primitive_count = end - start;
    if primitive_count <= params.max_primitives_per_leaf || depth >= params.max_depth {
        let node = &mut nodes[node_index as usize];
        node.primitive_start = start as i32;
        node.primitive_count = primitive_count as i32;
        return node_index;
    }

    let mut split = find_best_split(context, start, end, params);
    if split <= start || split >= end {
        split = (start + end) / 2;
    }

    let left = build_recursive(context, start, split, depth + 1, nodes, params);
    let right = build_recursive(context, split, end, depth + 1, nodes, params);
    nodes[node_index as usize].left_child = left;
    nodes[node_index as usize].right_child = right;

    node_index
}

/// Result of a closest-primitive query.
#[derive(Debug, Clone, Copy)]
pub struct QueryResult {
    pub kind: PrimitiveKind,
    /// Index into the caller's beam or ball array.
    pub index: i32,
    pub distance: f32,
    /// Leaf primitives whose exact distance was evaluated.
    pub primitives_visited: usize,
    /// Tree nodes touched.
    pub nodes_visited: usize,
}

/// Closest primitive to `point`, pruning subtrees whose bounds cannot beat
/// the running best distance. Visits the nearer child first so pruning
/// stays effective.
pub fn closest_primitive(
    nodes: &[BeamBvhNode],
    primitives: &[BeamPrimitive],
    beams: &[BeamData],
    balls: &[BallData],
    point: Vec3,
) -> Option<QueryResult> {
    if nodes.is_empty() {
        return None;
    }

    let mut best: Option<(PrimitiveKind, i32, f32)> = None;
    let mut best_dist = f32::INFINITY;
    let mut primitives_visited = 0usize;
    let mut nodes_visited = 0usize;

    let mut stack = vec![0i32];
    while let Some(node_index) = stack.pop() {
        let node = &nodes[node_index as usize];
        nodes_visited += 1;

        // Points outside a box are at least box-distance away from every
        // surface inside it, so such subtrees cannot improve the best. A
        // zero box distance (point inside) never prunes: signed distances
        // inside may go arbitrarily negative.
        if node.bounds().distance_to(point) > best_dist.max(0.0) {
            continue;
        }

        if node.is_leaf() {
            let start = node.primitive_start as usize;
            let end = start + node.primitive_count as usize;
            for prim in &primitives[start..end] {
                let d = match prim.kind {
                    PrimitiveKind::Beam => beams[prim.index as usize].signed_distance(point),
                    PrimitiveKind::Ball => balls[prim.index as usize].signed_distance(point),
                };
                primitives_visited += 1;
                if d < best_dist {
                    best_dist = d;
                    best = Some((prim.kind, prim.index, d));
                }
            }
            continue;
        }

        let left = node.left_child;
        let right = node.right_child;
        let left_dist = nodes[left as usize].bounds().distance_to(point);
        let right_dist = nodes[right as usize].bounds().distance_to(point);
        // Push the farther child first so the nearer one is processed next.
        if left_dist <= right_dist {
            stack.push(right);
            stack.push(left);
        } else {
            stack.push(left);
            stack.push(right);
        }
    }

    best.map(|(kind, index, distance)| QueryResult {
        kind,
        index,
        distance,
        primitives_visited,
        nodes_visited,
    })
}

fn compute_stats(
    nodes: &[BeamBvhNode],
    scene_bounds: &BoundingBox,
    params: &BuildParams,
) -> BuildStats {
    let mut stats = BuildStats {
        total_nodes: nodes.len(),
        ..Default::default()
    };
    if nodes.is_empty() {
        return stats;
    }

    let scene_area = scene_bounds.surface_area();
    let mut total_depth = 0i64;
    for node in nodes {
        if node.is_leaf() {
            stats.leaf_nodes += 1;
            if scene_area > 0.0 {
                stats.sah_cost += params.intersection_cost
                    * node.primitive_count as f32
                    * node.bounds().surface_area()
                    / scene_area;
            }
        } else if scene_area > 0.0 {
            stats.sah_cost += params.traversal_cost * node.bounds().surface_area() / scene_area;
        }
        stats.max_depth = stats.max_depth.max(node.depth);
        total_depth += node.depth as i64;
    }
    stats.avg_depth = total_depth as f32 / nodes.len() as f32;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_lattice() -> (Vec<BeamData>, Vec<BallData>) {
        // 3x3 grid of vertical beams plus horizontal connectors (13 beams)
        // and 4 interior balls.
        let mut beams = Vec::new();
        for x in 0..3 {
            for y in 0..3 {
                let base = Vec3::new(x as f32 * 10.0, y as f32 * 10.0, 0.0);
                beams.push(BeamData::new(base, base + Vec3::new(0.0, 0.0, 10.0), 0.5, 0.5));
            }
        }
        for i in 0..4 {
            let start = Vec3::new(i as f32 * 5.0, 0.0, 10.0);
            beams.push(BeamData::new(start, start + Vec3::new(5.0, 10.0, 0.0), 0.4, 0.6));
        }
        let balls = (0..4)
            .map(|i| BallData::new(Vec3::new(5.0 + (i % 2) as f32 * 10.0, 5.0 + (i / 2) as f32 * 10.0, 5.0), 1.0))
            .collect();
        (beams, balls)
    }

    #[test]
    fn empty_input_builds_empty_tree() {
        let mut builder = BeamBvhBuilder::new();
        let (nodes, primitives) = builder.build(&[], &[], &BuildParams::default());
        assert!(nodes.is_empty());
        assert!(primitives.is_empty());
        assert_eq!(builder.last_build_stats().total_nodes, 0);
    }

    #[test]
    fn node_count_matches_leaf_count() {
        let (beams, balls) = grid_lattice();
        let mut builder = BeamBvhBuilder::new();
        let (nodes, _) = builder.build(&beams, &balls, &BuildParams::default());
        let stats = builder.last_build_stats();
        assert_eq!(stats.total_nodes, 2 * stats.leaf_nodes - 1);
    }

    #[test]
    fn grid_lattice_tree_shape() {
        let (beams, balls) = grid_lattice();
        assert_eq!(beams.len(), 13);
        assert_eq!(balls.len(), 4);

        let mut builder = BeamBvhBuilder::new();
        let (nodes, primitives) = builder.build(&beams, &balls, &BuildParams::default());
        let stats = builder.last_build_stats();

        assert!(!nodes.is_empty());
        assert!(stats.leaf_nodes >= 1 && stats.leaf_nodes <= 17);
        assert!(stats.max_depth <= 6, "max depth {}", stats.max_depth);
        assert!(stats.total_nodes <= 2 * primitives.len() - 1);
    }

    #[test]
    fn parent_bounds_enclose_children() {
        let (beams, balls) = grid_lattice();
        let mut builder = BeamBvhBuilder::new();
        let (nodes, _) = builder.build(&beams, &balls, &BuildParams::default());

        for node in &nodes {
            if node.is_leaf() {
                continue;
            }
            let parent = node.bounds();
            for child in [node.left_child, node.right_child] {
                let child_bounds = nodes[child as usize].bounds();
                let union = parent.union(&child_bounds);
                assert!((union.min - parent.min).abs().max_element() < 1e-5);
                assert!((union.max - parent.max).abs().max_element() < 1e-5);
                assert!(child_bounds.surface_area() <= parent.surface_area() + 1e-4);
            }
        }
    }

    #[test]
    fn leaves_partition_the_primitive_array() {
        let (beams, balls) = grid_lattice();
        let mut builder = BeamBvhBuilder::new();
        let (nodes, primitives) = builder.build(&beams, &balls, &BuildParams::default());

        let mut covered = vec![false; primitives.len()];
        for node in nodes.iter().filter(|n| n.is_leaf()) {
            let start = node.primitive_start as usize;
            let count = node.primitive_count as usize;
            for slot in &mut covered[start..start + count] {
                assert!(!*slot, "leaf ranges overlap");
                *slot = true;
            }
        }
        assert!(covered.iter().all(|&c| c), "leaf ranges must cover all primitives");
    }

    #[test]
    fn leaf_bounds_enclose_their_primitives() {
        let (beams, balls) = grid_lattice();
        let mut builder = BeamBvhBuilder::new();
        let (nodes, primitives) = builder.build(&beams, &balls, &BuildParams::default());

        for node in nodes.iter().filter(|n| n.is_leaf()) {
            let bounds = node.bounds();
            let start = node.primitive_start as usize;
            let end = start + node.primitive_count as usize;
            for prim in &primitives[start..end] {
                let union = bounds.union(&prim.bounds);
                assert!((union.min - bounds.min).abs().max_element() < 1e-5);
                assert!((union.max - bounds.max).abs().max_element() < 1e-5);
            }
        }
    }

    #[test]
    fn query_matches_brute_force() {
        let (beams, balls) = grid_lattice();
        let mut builder = BeamBvhBuilder::new();
        let (nodes, primitives) = builder.build(&beams, &balls, &BuildParams::default());

        for point in [
            Vec3::new(5.0, 5.0, 5.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(21.0, 18.0, 11.0),
            Vec3::new(-3.0, 12.0, 4.0),
        ] {
            let result = closest_primitive(&nodes, &primitives, &beams, &balls, point).unwrap();
            let brute = beams
                .iter()
                .map(|b| b.signed_distance(point))
                .chain(balls.iter().map(|b| b.signed_distance(point)))
                .fold(f32::INFINITY, f32::min);
            assert!(
                (result.distance - brute).abs() < 1e-5,
                "query {point:?}: {} vs brute {brute}",
                result.distance
            );
        }
    }

    #[test]
    fn query_visits_a_fraction_of_the_primitives() {
        let (beams, balls) = grid_lattice();
        let mut builder = BeamBvhBuilder::new();
        let (nodes, primitives) = builder.build(&beams, &balls, &BuildParams::default());
        let total = primitives.len();

        // Query points sitting on lattice members prune aggressively.
        for point in [Vec3::new(0.0, 0.0, 5.0), Vec3::new(20.0, 20.0, 5.0)] {
            let result = closest_primitive(&nodes, &primitives, &beams, &balls, point).unwrap();
            assert!(
                result.primitives_visited <= total * 3 / 4,
                "visited {} of {} primitives at {point:?}",
                result.primitives_visited,
                total
            );
        }
    }

    #[test]
    fn query_on_empty_tree_is_none() {
        assert!(closest_primitive(&[], &[], &[], &[], Vec3::ZERO).is_none());
    }

    #[test]
    fn coplanar_input_falls_back_to_midpoint() {
        // All centroids on one plane with zero-height boxes: scene surface
        // area is nonzero but splits can degenerate; the build must still
        // terminate with valid leaves.
        let beams: Vec<BeamData> = (0..16)
            .map(|i| {
                let p = Vec3::new(i as f32, 0.0, 0.0);
                BeamData::new(p, p, 0.0, 0.0)
            })
            .collect();
        let mut builder = BeamBvhBuilder::new();
        let (nodes, primitives) = builder.build(&beams, &[], &BuildParams::default());
        assert!(!nodes.is_empty());
        let covered: usize = nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.primitive_count as usize)
            .sum();
        assert_eq!(covered, primitives.len());
    }
}
