//! Narrow-band level-set resource.
//!
//! A sparse scalar grid (distances stored only near the surface) flattened
//! into the payload as a dense block over its active bounds:
//! `(min.xyz, dims.xyz, voxel_size, background, values…)`. The 8-bit
//! variant quantizes values into the narrow band to shrink the payload.

use crate::accel::sparse_grid::SparseGrid;
use crate::kernel::payload::PrimitiveBuffer;
use crate::kernel::types::PrimitiveType;

/// Serialization variant of a level-set grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSetFormat {
    /// Full float distances.
    Float,
    /// Inside/outside only (1.0 / 0.0).
    Binary,
    /// Grid values are nearest-face indices, not distances.
    FaceIndices,
    /// Distances quantized to 8 bits over the narrow band.
    Grayscale8,
}

pub struct LevelSetResource {
    grid: SparseGrid<f32>,
    format: LevelSetFormat,
    /// Narrow-band half width used for quantization.
    band_width: f32,
}

impl LevelSetResource {
    pub fn new(grid: SparseGrid<f32>, format: LevelSetFormat) -> Self {
        let band_width = grid.background().abs().max(1e-3);
        Self {
            grid,
            format,
            band_width,
        }
    }

    pub fn grid(&self) -> &SparseGrid<f32> {
        &self.grid
    }

    pub fn format(&self) -> LevelSetFormat {
        self.format
    }

    pub fn build_payload(&mut self) -> PrimitiveBuffer {
        let mut payload = PrimitiveBuffer::default();
        let Some((min, max)) = self.grid.active_bounds() else {
            return payload;
        };
        let dims = (
            (max.0 - min.0 + 1) as usize,
            (max.1 - min.1 + 1) as usize,
            (max.2 - min.2 + 1) as usize,
        );

        let primitive_type = match self.format {
            LevelSetFormat::Float => PrimitiveType::LevelSet,
            LevelSetFormat::Binary => PrimitiveType::LevelSetBinary,
            LevelSetFormat::FaceIndices => PrimitiveType::LevelSetFaceIndices,
            LevelSetFormat::Grayscale8 => PrimitiveType::LevelSetGrayscale8,
        };

        let mut meta = payload.open_meta(primitive_type);
        meta.scaling = self.grid.voxel_size();
        payload.data.extend_from_slice(&[
            min.0 as f32,
            min.1 as f32,
            min.2 as f32,
            dims.0 as f32,
            dims.1 as f32,
            dims.2 as f32,
            self.grid.voxel_size(),
            self.grid.background(),
        ]);

        for z in min.2..=max.2 {
            for y in min.1..=max.1 {
                for x in min.0..=max.0 {
                    let value = self.grid.value((x, y, z));
                    payload.data.push(match self.format {
                        LevelSetFormat::Float => value,
                        LevelSetFormat::Binary => {
                            if value < 0.0 {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        LevelSetFormat::FaceIndices => value.round(),
                        LevelSetFormat::Grayscale8 => {
                            let normalized =
                                (value / self.band_width).clamp(-1.0, 1.0) * 0.5 + 0.5;
                            (normalized * 255.0).round()
                        }
                    });
                }
            }
        }
        payload.close_meta(meta);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band_grid() -> SparseGrid<f32> {
        // Narrow band around a plane at z = 0, background 3.0.
        let mut grid = SparseGrid::new(1.0, 3.0);
        for x in -2..=2 {
            for y in -2..=2 {
                for z in -1..=1 {
                    grid.set_value((x, y, z), z as f32);
                }
            }
        }
        grid
    }

    #[test]
    fn float_payload_carries_header_and_values() {
        let mut resource = LevelSetResource::new(band_grid(), LevelSetFormat::Float);
        let payload = resource.build_payload();
        assert_eq!(payload.meta.len(), 1);
        let meta = &payload.meta[0];
        assert_eq!(meta.primitive_type().unwrap(), PrimitiveType::LevelSet);
        // Header (8 floats) + 5*5*3 values.
        assert_eq!(meta.len(), 8 + 75);
        // Header dims.
        assert_eq!(&payload.data[3..6], &[5.0, 5.0, 3.0]);
    }

    #[test]
    fn binary_payload_is_inside_outside() {
        let mut resource = LevelSetResource::new(band_grid(), LevelSetFormat::Binary);
        let payload = resource.build_payload();
        for &v in &payload.data[8..] {
            assert!(v == 0.0 || v == 1.0);
        }
    }

    #[test]
    fn grayscale_quantizes_to_byte_range() {
        let mut resource = LevelSetResource::new(band_grid(), LevelSetFormat::Grayscale8);
        let payload = resource.build_payload();
        for &v in &payload.data[8..] {
            assert!((0.0..=255.0).contains(&v));
            assert_eq!(v, v.round());
        }
    }

    #[test]
    fn empty_grid_builds_empty_payload() {
        let grid: SparseGrid<f32> = SparseGrid::new(1.0, 3.0);
        let mut resource = LevelSetResource::new(grid, LevelSetFormat::Float);
        assert!(resource.build_payload().meta.is_empty());
    }
}
