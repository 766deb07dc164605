//! Sparse 3D grid with a uniform linear transform.
//!
//! Voxels off the active set report the background value; `prune` drops
//! active voxels that have decayed back to the background so memory tracks
//! the live set.

use std::collections::HashMap;

use glam::Vec3;

/// Integer voxel coordinate.
pub type Coord = (i32, i32, i32);

#[derive(Debug, Clone)]
pub struct SparseGrid<T> {
    voxel_size: f32,
    background: T,
    cells: HashMap<Coord, T>,
    name: String,
}

impl<T: Copy + PartialEq> SparseGrid<T> {
    pub fn new(voxel_size: f32, background: T) -> Self {
        debug_assert!(voxel_size > 0.0);
        Self {
            voxel_size,
            background,
            cells: HashMap::new(),
            name: String::new(),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn background(&self) -> T {
        self.background
    }

    /// World position of the voxel center.
    pub fn index_to_world(&self, coord: Coord) -> Vec3 {
        Vec3::new(coord.0 as f32, coord.1 as f32, coord.2 as f32) * self.voxel_size
    }

    /// Voxel whose center is nearest to the world position.
    pub fn world_to_index(&self, pos: Vec3) -> Coord {
        let scaled = pos / self.voxel_size;
        (
            scaled.x.round() as i32,
            scaled.y.round() as i32,
            scaled.z.round() as i32,
        )
    }

    pub fn value(&self, coord: Coord) -> T {
        self.cells.get(&coord).copied().unwrap_or(self.background)
    }

    pub fn is_active(&self, coord: Coord) -> bool {
        self.cells.contains_key(&coord)
    }

    pub fn set_value(&mut self, coord: Coord, value: T) {
        self.cells.insert(coord, value);
    }

    pub fn active_voxel_count(&self) -> usize {
        self.cells.len()
    }

    /// Drop active voxels equal to the background and release slack
    /// capacity.
    pub fn prune(&mut self) {
        let background = self.background;
        self.cells.retain(|_, v| *v != background);
        self.cells.shrink_to_fit();
    }

    /// Approximate resident size of the active set.
    pub fn memory_usage_bytes(&self) -> usize {
        self.cells.capacity() * (std::mem::size_of::<Coord>() + std::mem::size_of::<T>())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Coord, T)> + '_ {
        self.cells.iter().map(|(&c, &v)| (c, v))
    }

    /// Inclusive coordinate range of the active set, or `None` when empty.
    pub fn active_bounds(&self) -> Option<(Coord, Coord)> {
        let mut iter = self.cells.keys();
        let first = *iter.next()?;
        let mut min = first;
        let mut max = first;
        for &(x, y, z) in iter {
            min = (min.0.min(x), min.1.min(y), min.2.min(z));
            max = (max.0.max(x), max.1.max(y), max.2.max(z));
        }
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_reported_for_inactive_voxels() {
        let grid: SparseGrid<i32> = SparseGrid::new(0.5, -1);
        assert_eq!(grid.value((3, -2, 7)), -1);
        assert!(!grid.is_active((3, -2, 7)));
    }

    #[test]
    fn world_index_round_trip() {
        let grid: SparseGrid<i32> = SparseGrid::new(2.0, 0);
        let coord = (3, -1, 5);
        let world = grid.index_to_world(coord);
        assert_eq!(grid.world_to_index(world), coord);
    }

    #[test]
    fn prune_removes_background_values() {
        let mut grid: SparseGrid<i32> = SparseGrid::new(1.0, 0);
        grid.set_value((0, 0, 0), 5);
        grid.set_value((1, 0, 0), 0);
        assert_eq!(grid.active_voxel_count(), 2);
        grid.prune();
        assert_eq!(grid.active_voxel_count(), 1);
        assert_eq!(grid.value((0, 0, 0)), 5);
    }

    #[test]
    fn active_bounds_span_the_active_set() {
        let mut grid: SparseGrid<i32> = SparseGrid::new(1.0, 0);
        assert!(grid.active_bounds().is_none());
        grid.set_value((-2, 0, 3), 1);
        grid.set_value((4, -1, 0), 2);
        let (min, max) = grid.active_bounds().unwrap();
        assert_eq!(min, (-2, -1, 0));
        assert_eq!(max, (4, 0, 3));
    }
}
