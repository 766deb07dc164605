//! Flat primitive payload consumed by the model kernel.
//!
//! Producers serialize their geometry into `{meta, data}` pairs; `meta`
//! entries tag typed `[start, end)` slices of the float `data` array.
//! Resources build a local [`PrimitiveBuffer`] and the global [`Primitives`]
//! concatenates them, shifting every range by the current data length.

use bytemuck::{Pod, Zeroable};

use crate::kernel::types::{BoundingBox, GpuBoundingBox, PrimitiveType};

/// Tagged slice descriptor; device layout is six 16-byte blocks.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PrimitiveMeta {
    pub center: [f32; 4],
    /// Left child for kd nodes.
    pub start: i32,
    /// Right child for kd nodes.
    pub end: i32,
    pub scaling: f32,
    pub primitive_type: i32,
    pub bounding_box: GpuBoundingBox,
    pub approximation_top: [f32; 4],
    pub approximation_bottom: [f32; 4],
}

impl Default for PrimitiveMeta {
    fn default() -> Self {
        Self {
            center: [0.0; 4],
            start: 0,
            end: 0,
            scaling: 1.0,
            primitive_type: PrimitiveType::OuterPolygon as i32,
            bounding_box: BoundingBox::empty().to_gpu(),
            approximation_top: [0.0; 4],
            approximation_bottom: [0.0; 4],
        }
    }
}

impl PrimitiveMeta {
    pub fn new(primitive_type: PrimitiveType) -> Self {
        Self {
            primitive_type: primitive_type as i32,
            ..Self::default()
        }
    }

    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        PrimitiveType::from_i32(self.primitive_type)
    }

    pub fn set_bounds(&mut self, bounds: &BoundingBox) {
        self.bounding_box = bounds.to_gpu();
        let c = bounds.center();
        self.center = [c.x, c.y, c.z, 0.0];
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounding_box.to_host()
    }

    pub fn len(&self) -> i32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Local payload of one producer before it is appended to the global
/// payload.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveBuffer {
    pub meta: Vec<PrimitiveMeta>,
    pub data: Vec<f32>,
}

impl PrimitiveBuffer {
    /// Begin a meta entry whose data range starts at the current end of
    /// `data`; finish it with [`PrimitiveBuffer::close_meta`].
    pub fn open_meta(&mut self, primitive_type: PrimitiveType) -> PrimitiveMeta {
        let mut meta = PrimitiveMeta::new(primitive_type);
        meta.start = self.data.len() as i32;
        meta
    }

    pub fn close_meta(&mut self, mut meta: PrimitiveMeta) {
        meta.end = self.data.len() as i32;
        self.meta.push(meta);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// A meta entry has `end < start`; the payload was left unchanged.
    InvalidPrimitiveMeta { start: i32, end: i32 },
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::InvalidPrimitiveMeta { start, end } => {
                write!(f, "inverted primitive meta range [{start}, {end})")
            }
        }
    }
}

impl std::error::Error for PayloadError {}

/// Global payload the kernel consumes.
#[derive(Debug, Clone, Default)]
pub struct Primitives {
    pub meta: Vec<PrimitiveMeta>,
    pub data: Vec<f32>,
}

impl Primitives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.meta.clear();
        self.data.clear();
    }

    /// Concatenate `source`, shifting every meta range by the current data
    /// length. Any inverted range aborts without mutating the payload.
    pub fn add(&mut self, source: &PrimitiveBuffer) -> Result<(), PayloadError> {
        for meta in &source.meta {
            if meta.end - meta.start < 0 {
                log::error!(
                    "rejecting payload append: meta range [{}, {}) is inverted",
                    meta.start,
                    meta.end
                );
                return Err(PayloadError::InvalidPrimitiveMeta {
                    start: meta.start,
                    end: meta.end,
                });
            }
        }

        let offset = self.data.len() as i32;
        for meta in &source.meta {
            let mut shifted = *meta;
            shifted.start = meta.start + offset;
            shifted.end = shifted.start + (meta.end - meta.start);
            self.meta.push(shifted);
        }
        self.data.extend_from_slice(&source.data);
        Ok(())
    }

    pub fn meta_count(&self) -> usize {
        self.meta.len()
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }
}
