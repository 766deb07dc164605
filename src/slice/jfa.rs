//! Jump-flood contour seeding.
//!
//! Pixels inside the iso band write their own normalized coordinate; the
//! flood then propagates the nearest seed to every pixel in O(log N)
//! passes with step lengths N/2, N/4, ..., 1. Converting the seed
//! coordinates back to world space yields an unsigned distance-to-contour
//! map that can be united with the previous layer.

use glam::Vec2;
use rayon::prelude::*;

use crate::slice::pyramid::{ClippingArea, DistanceMap, DistancePixel};

/// Sentinel for "no seed known yet".
pub const INVALID_SEED: Vec2 = Vec2::splat(f32::MAX);

/// 2D image of normalized seed coordinates in `[0, 1]^2`.
#[derive(Debug, Clone)]
pub struct JfaMap {
    width: u32,
    height: u32,
    area: ClippingArea,
    seeds: Vec<Vec2>,
}

impl JfaMap {
    /// Seed from a distance map: pixels whose distance lies in
    /// `[lower, upper]` record their own coordinate.
    pub fn seed_from_distance_map(map: &DistanceMap, lower: f32, upper: f32) -> Self {
        let width = map.width();
        let height = map.height();
        let inv = Vec2::new(1.0 / width as f32, 1.0 / height as f32);

        let seeds = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).map(move |x| (x, y))
            })
            .map(|(x, y)| {
                let d = map.pixel(x, y).distance;
                if d >= lower && d <= upper {
                    (Vec2::new(x as f32 + 0.5, y as f32 + 0.5)) * inv
                } else {
                    INVALID_SEED
                }
            })
            .collect();

        Self {
            width,
            height,
            area: *map.area(),
            seeds,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn seed(&self, x: u32, y: u32) -> Vec2 {
        self.seeds[(y * self.width + x) as usize]
    }

    pub fn seed_count(&self) -> usize {
        self.seeds.iter().filter(|s| **s != INVALID_SEED).count()
    }

    fn normalized_pos(&self, x: u32, y: u32) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        )
    }

    /// Run the full flood: afterwards every pixel stores the coordinate of
    /// its nearest seed (in normalized space, aspect-corrected).
    pub fn flood(&mut self) {
        let mut step = (self.width.max(self.height) / 2).max(1);
        let aspect = self.aspect_scale();
        loop {
            self.flood_pass(step as i32, aspect);
            if step == 1 {
                break;
            }
            step /= 2;
        }
    }

    /// Normalized coordinates are aspect-corrected into world proportions so
    /// "nearest" matches Euclidean distance on non-square areas.
    fn aspect_scale(&self) -> Vec2 {
        self.area.size()
    }

    fn flood_pass(&mut self, step: i32, aspect: Vec2) {
        let width = self.width as i32;
        let height = self.height as i32;
        let back = self.seeds.clone();
        let probe = &back;

        self.seeds
            .par_chunks_exact_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, slot) in row.iter_mut().enumerate() {
                    let pos = Vec2::new(
                        (x as f32 + 0.5) / width as f32,
                        (y as f32 + 0.5) / height as f32,
                    );
                    let mut best = *slot;
                    let mut best_dist = seed_distance(pos, best, aspect);

                    for dy in [-step, 0, step] {
                        for dx in [-step, 0, step] {
                            let nx = x as i32 + dx;
                            let ny = y as i32 + dy;
                            if nx < 0 || ny < 0 || nx >= width || ny >= height {
                                continue;
                            }
                            let candidate = probe[(ny * width + nx) as usize];
                            let dist = seed_distance(pos, candidate, aspect);
                            if dist < best_dist {
                                best_dist = dist;
                                best = candidate;
                            }
                        }
                    }
                    *slot = best;
                }
            });
    }

    /// Unsigned Euclidean distance to the nearest seed, in world units.
    pub fn to_distance_map(&self) -> DistanceMap {
        let mut map = DistanceMap::new(self.width, self.height, self.area);
        let size = self.area.size();
        for y in 0..self.height {
            for x in 0..self.width {
                let seed = self.seed(x, y);
                let distance = if seed == INVALID_SEED {
                    f32::MAX
                } else {
                    ((self.normalized_pos(x, y) - seed) * size).length()
                };
                map.set_pixel(x, y, DistancePixel { distance, flag: 0.0 });
            }
        }
        map
    }

    /// Distance reconstruction united (min) with the previous layer's
    /// negated distances, preserving negative contours of overhangs.
    pub fn to_distance_map_unite_negative(&self, previous: &DistanceMap) -> DistanceMap {
        let mut map = self.to_distance_map();
        for y in 0..map.height() {
            for x in 0..map.width() {
                let mut px = map.pixel(x, y);
                let prev = previous.pixel(x, y).distance;
                px.distance = px.distance.min(-prev);
                map.set_pixel(x, y, px);
            }
        }
        map
    }
}

fn seed_distance(pos: Vec2, seed: Vec2, aspect: Vec2) -> f32 {
    if seed == INVALID_SEED {
        return f32::MAX;
    }
    ((pos - seed) * aspect).length_squared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn band_map(width: u32, height: u32) -> DistanceMap {
        // Distance field of a vertical line at x = 0 over [-8, 8]^2.
        let area = ClippingArea::new(Vec2::splat(-8.0), Vec2::splat(8.0));
        let mut map = DistanceMap::new(width, height, area);
        for y in 0..height {
            for x in 0..width {
                let pos = map.position(x, y);
                map.set_pixel(
                    x,
                    y,
                    DistancePixel {
                        distance: pos.x,
                        flag: 0.0,
                    },
                );
            }
        }
        map
    }

    #[test]
    fn seeding_selects_the_band() {
        let map = band_map(64, 64);
        let half_px = map.pixel_size().x * 0.5;
        let jfa = JfaMap::seed_from_distance_map(&map, -half_px, half_px);
        let seeds = jfa.seed_count();
        // One column of the image sits inside the band.
        assert!(seeds >= 64 && seeds <= 128, "{seeds} seeds");
    }

    #[test]
    fn flood_propagates_nearest_seed_everywhere() {
        let map = band_map(64, 64);
        let half_px = map.pixel_size().x * 0.5;
        let mut jfa = JfaMap::seed_from_distance_map(&map, -half_px, half_px);
        jfa.flood();

        for y in 0..jfa.height() {
            for x in 0..jfa.width() {
                assert_ne!(jfa.seed(x, y), INVALID_SEED, "unseeded pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn reconstructed_distances_match_the_band() {
        let map = band_map(64, 64);
        let half_px = map.pixel_size().x * 0.5;
        let mut jfa = JfaMap::seed_from_distance_map(&map, -half_px, half_px);
        jfa.flood();
        let dist = jfa.to_distance_map();

        let tolerance = map.pixel_size().x * 1.5;
        for y in (0..dist.height()).step_by(7) {
            for x in (0..dist.width()).step_by(7) {
                let pos = dist.position(x, y);
                let expected = pos.x.abs();
                let got = dist.pixel(x, y).distance;
                assert!(
                    (got - expected).abs() <= tolerance,
                    "({x}, {y}): {got} vs {expected}"
                );
            }
        }
    }

    #[test]
    fn unite_negative_keeps_overhang_contours() {
        let map = band_map(32, 32);
        let half_px = map.pixel_size().x * 0.5;
        let mut jfa = JfaMap::seed_from_distance_map(&map, -half_px, half_px);
        jfa.flood();

        // Previous layer strongly inside everywhere: negated it dominates.
        let area = *map.area();
        let mut previous = DistanceMap::new(32, 32, area);
        for y in 0..32 {
            for x in 0..32 {
                previous.set_pixel(x, y, DistancePixel { distance: 5.0, flag: 0.0 });
            }
        }
        let united = jfa.to_distance_map_unite_negative(&previous);
        for y in (0..32).step_by(5) {
            for x in (0..32).step_by(5) {
                assert!(united.pixel(x, y).distance <= -5.0 + 1e-6);
            }
        }
    }
}
