//! Resources: CPU-side geometry sources serialized into the primitive
//! payload.
//!
//! Each resource owns its local payload and bookkeeping. The kind is a
//! tagged enum (behavior differences are a `match`, not dispatch through a
//! vtable) and the manager owns all of them keyed by [`ResourceKey`].

pub mod beam_lattice;
pub mod image_stack;
pub mod key;
pub mod level_set;
pub mod manager;
pub mod mesh;

pub use beam_lattice::BeamLatticeResource;
pub use image_stack::{ImageLayer, ImageStackResource};
pub use key::{ResourceId, ResourceKey};
pub use level_set::{LevelSetFormat, LevelSetResource};
pub use manager::{DeletionReport, ResourceManager};
pub use mesh::{MeshResource, StlResource, Triangle};

use crate::kernel::payload::{PayloadError, PrimitiveBuffer, Primitives};

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceError {
    ResourceNotFound(String),
    IoError(String),
    UnsupportedPixelFormat(String),
    InvalidPayload(PayloadError),
}

impl std::fmt::Display for ResourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceError::ResourceNotFound(name) => write!(f, "resource not found: {name}"),
            ResourceError::IoError(msg) => write!(f, "io error: {msg}"),
            ResourceError::UnsupportedPixelFormat(msg) => {
                write!(f, "unsupported pixel format: {msg}")
            }
            ResourceError::InvalidPayload(err) => write!(f, "invalid payload: {err}"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<PayloadError> for ResourceError {
    fn from(err: PayloadError) -> Self {
        ResourceError::InvalidPayload(err)
    }
}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        ResourceError::IoError(err.to_string())
    }
}

/// Geometry source of a resource.
pub enum ResourceKind {
    Mesh(MeshResource),
    LevelSet(LevelSetResource),
    ImageStack(ImageStackResource),
    BeamLattice(BeamLatticeResource),
    Stl(StlResource),
}

/// One managed resource: its kind, cached payload and bookkeeping.
pub struct Resource {
    key: ResourceKey,
    kind: ResourceKind,
    payload: PrimitiveBuffer,
    already_loaded: bool,
    in_use: bool,
    start_index: usize,
    end_index: usize,
}

impl Resource {
    pub fn new(key: ResourceKey, kind: ResourceKind) -> Self {
        Self {
            key,
            kind,
            payload: PrimitiveBuffer::default(),
            already_loaded: false,
            in_use: true,
            start_index: 0,
            end_index: 0,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Serialize the source geometry into the cached payload. Idempotent:
    /// the second call returns `false` and does no work.
    pub fn load(&mut self) -> Result<bool, ResourceError> {
        if self.already_loaded {
            return Ok(false);
        }
        self.payload = match &mut self.kind {
            ResourceKind::Mesh(mesh) => mesh.build_payload(),
            ResourceKind::LevelSet(grid) => grid.build_payload(),
            ResourceKind::ImageStack(stack) => stack.build_payload()?,
            ResourceKind::BeamLattice(lattice) => lattice.build_payload(),
            ResourceKind::Stl(stl) => stl.build_payload()?,
        };
        self.already_loaded = true;
        Ok(true)
    }

    /// Append the cached payload to the global one, recording the owned
    /// meta slice for later splicing.
    pub fn write(&mut self, primitives: &mut Primitives) -> Result<(), ResourceError> {
        self.start_index = primitives.meta_count();
        primitives.add(&self.payload)?;
        self.end_index = primitives.meta_count();
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.already_loaded
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Exclude from (or include in) the next rebuild; the cached payload
    /// stays intact either way.
    pub fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    /// Meta slice `[start, end)` of the global payload owned by this
    /// resource after the last write.
    pub fn meta_range(&self) -> (usize, usize) {
        (self.start_index, self.end_index)
    }
}
