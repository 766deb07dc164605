//! Marching-squares contour extraction.
//!
//! A states image records the 4-bit corner-sign code of every cell of the
//! finest distance map; the extractor turns the crossed cells into oriented
//! segments (interior on the left of the travel direction) and stitches
//! them into closed polylines. Counter-clockwise loops are outer contours,
//! clockwise loops are holes.

use std::collections::HashMap;

use glam::Vec2;

use crate::slice::pyramid::DistanceMap;

/// Classification of a polyline for the slice writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContourMode {
    Inner = 0,
    Outer = 1,
    OpenLine = 2,
    ExcludeFromSlice = 3,
}

/// One extracted contour.
#[derive(Debug, Clone)]
pub struct PolyLine {
    pub vertices: Vec<Vec2>,
    pub contour_mode: ContourMode,
    pub closed: bool,
}

impl PolyLine {
    /// Shoelace area; positive for counter-clockwise loops.
    pub fn signed_area(&self) -> f32 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let mut area = 0.0;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            area += a.x * b.y - b.x * a.y;
        }
        area * 0.5
    }

    pub fn bounds(&self) -> (Vec2, Vec2) {
        let mut min = Vec2::splat(f32::MAX);
        let mut max = Vec2::splat(f32::MIN);
        for v in &self.vertices {
            min = min.min(*v);
            max = max.max(*v);
        }
        (min, max)
    }
}

/// 2D byte image of 0..15 corner-sign codes; one cell per pixel pair of the
/// source map.
#[derive(Debug, Clone)]
pub struct MarchingSquaresStates {
    width: u32,
    height: u32,
    states: Vec<u8>,
}

impl MarchingSquaresStates {
    /// Compute the code image from a distance map against `iso_value`.
    /// Corner bits: 0 = (x, y), 1 = (x+1, y), 2 = (x+1, y+1), 3 = (x, y+1);
    /// a bit is set when the corner lies inside (distance < iso).
    pub fn from_distance_map(map: &DistanceMap, iso_value: f32) -> Self {
        let width = map.width().saturating_sub(1);
        let height = map.height().saturating_sub(1);
        let mut states = vec![0u8; (width * height) as usize];

        for y in 0..height {
            for x in 0..width {
                let mut code = 0u8;
                if map.pixel(x, y).distance < iso_value {
                    code |= 1;
                }
                if map.pixel(x + 1, y).distance < iso_value {
                    code |= 2;
                }
                if map.pixel(x + 1, y + 1).distance < iso_value {
                    code |= 4;
                }
                if map.pixel(x, y + 1).distance < iso_value {
                    code |= 8;
                }
                states[(y * width + x) as usize] = code;
            }
        }

        Self {
            width,
            height,
            states,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn state(&self, x: u32, y: u32) -> u8 {
        self.states[(y * self.width + x) as usize]
    }

    pub fn crossed_cell_count(&self) -> usize {
        self.states.iter().filter(|&&s| s != 0 && s != 15).count()
    }
}

/// Cell-edge identity used to stitch segments; `vertical` edges sit between
/// `(x, y)` and `(x, y + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EdgeKey {
    x: u32,
    y: u32,
    vertical: bool,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    from: EdgeKey,
    to: EdgeKey,
    from_pos: Vec2,
    to_pos: Vec2,
}

/// Extracts polylines from the finest distance map.
pub struct ContourExtractor {
    iso_value: f32,
}

impl Default for ContourExtractor {
    fn default() -> Self {
        Self { iso_value: 0.0 }
    }
}

impl ContourExtractor {
    pub fn new(iso_value: f32) -> Self {
        Self { iso_value }
    }

    pub fn extract(&self, map: &DistanceMap) -> Vec<PolyLine> {
        let segments = self.collect_segments(map);
        stitch_segments(segments)
    }

    /// Oriented segments per crossed cell. Edges of cell (x, y):
    /// bottom = H(x, y), right = V(x+1, y), top = H(x, y+1), left = V(x, y).
    fn collect_segments(&self, map: &DistanceMap) -> Vec<Segment> {
        let iso = self.iso_value;
        let mut segments = Vec::new();
        if map.width() < 2 || map.height() < 2 {
            return segments;
        }

        for y in 0..map.height() - 1 {
            for x in 0..map.width() - 1 {
                let d0 = map.pixel(x, y).distance;
                let d1 = map.pixel(x + 1, y).distance;
                let d2 = map.pixel(x + 1, y + 1).distance;
                let d3 = map.pixel(x, y + 1).distance;

                let mut code = 0u8;
                if d0 < iso {
                    code |= 1;
                }
                if d1 < iso {
                    code |= 2;
                }
                if d2 < iso {
                    code |= 4;
                }
                if d3 < iso {
                    code |= 8;
                }
                if code == 0 || code == 15 {
                    continue;
                }

                let bottom = EdgeKey { x, y, vertical: false };
                let right = EdgeKey { x: x + 1, y, vertical: true };
                let top = EdgeKey { x, y: y + 1, vertical: false };
                let left = EdgeKey { x, y, vertical: true };

                let p0 = map.position(x, y);
                let p1 = map.position(x + 1, y);
                let p2 = map.position(x + 1, y + 1);
                let p3 = map.position(x, y + 1);

                let bottom_pos = crossing(p0, p1, d0, d1, iso);
                let right_pos = crossing(p1, p2, d1, d2, iso);
                let top_pos = crossing(p3, p2, d3, d2, iso);
                let left_pos = crossing(p0, p3, d0, d3, iso);

                let mut emit = |from: EdgeKey, from_pos: Vec2, to: EdgeKey, to_pos: Vec2| {
                    segments.push(Segment {
                        from,
                        to,
                        from_pos,
                        to_pos,
                    });
                };

                match code {
                    1 => emit(bottom, bottom_pos, left, left_pos),
                    2 => emit(right, right_pos, bottom, bottom_pos),
                    3 => emit(right, right_pos, left, left_pos),
                    4 => emit(top, top_pos, right, right_pos),
                    5 => {
                        // Saddle: resolve by the cell-center average.
                        let center = (d0 + d1 + d2 + d3) * 0.25;
                        if center < iso {
                            emit(bottom, bottom_pos, right, right_pos);
                            emit(top, top_pos, left, left_pos);
                        } else {
                            emit(bottom, bottom_pos, left, left_pos);
                            emit(top, top_pos, right, right_pos);
                        }
                    }
                    6 => emit(top, top_pos, bottom, bottom_pos),
                    7 => emit(top, top_pos, left, left_pos),
                    8 => emit(left, left_pos, top, top_pos),
                    9 => emit(bottom, bottom_pos, top, top_pos),
                    10 => {
                        let center = (d0 + d1 + d2 + d3) * 0.25;
                        if center < iso {
                            emit(left, left_pos, bottom, bottom_pos);
                            emit(right, right_pos, top, top_pos);
                        } else {
                            emit(right, right_pos, bottom, bottom_pos);
                            emit(left, left_pos, top, top_pos);
                        }
                    }
                    11 => emit(right, right_pos, top, top_pos),
                    12 => emit(left, left_pos, right, right_pos),
                    13 => emit(bottom, bottom_pos, right, right_pos),
                    14 => emit(left, left_pos, bottom, bottom_pos),
                    _ => {}
                }
            }
        }

        segments
    }
}

fn crossing(a: Vec2, b: Vec2, da: f32, db: f32, iso: f32) -> Vec2 {
    let denom = db - da;
    let t = if denom.abs() < 1e-12 {
        0.5
    } else {
        ((iso - da) / denom).clamp(0.0, 1.0)
    };
    a + (b - a) * t
}

/// Link segments end-to-end into polylines; loops are classified by their
/// signed area, dead ends become open lines.
fn stitch_segments(segments: Vec<Segment>) -> Vec<PolyLine> {
    let mut by_from: HashMap<EdgeKey, Vec<usize>> = HashMap::new();
    for (i, seg) in segments.iter().enumerate() {
        by_from.entry(seg.from).or_default().push(i);
    }

    let mut used = vec![false; segments.len()];
    let mut polylines = Vec::new();

    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;

        let mut vertices = vec![segments[start].from_pos, segments[start].to_pos];
        let start_key = segments[start].from;
        let mut cursor = segments[start].to;
        let mut closed = false;

        while let Some(next) = take_unused(&by_from, &mut used, cursor) {
            if segments[next].to == start_key {
                used[next] = true;
                closed = true;
                break;
            }
            used[next] = true;
            vertices.push(segments[next].to_pos);
            cursor = segments[next].to;
        }

        let mut polyline = PolyLine {
            vertices,
            contour_mode: ContourMode::OpenLine,
            closed,
        };
        if closed {
            polyline.contour_mode = if polyline.signed_area() >= 0.0 {
                ContourMode::Outer
            } else {
                ContourMode::Inner
            };
        }
        polylines.push(polyline);
    }

    polylines
}

fn take_unused(
    by_from: &HashMap<EdgeKey, Vec<usize>>,
    used: &mut [bool],
    key: EdgeKey,
) -> Option<usize> {
    by_from
        .get(&key)?
        .iter()
        .copied()
        .find(|&i| !used[i])
}
