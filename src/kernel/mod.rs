//! Types shared between the host and the compute kernels.
//!
//! Everything the kernel reads crosses the device boundary either as a flat
//! float array (the primitive payload) or as one of the `#[repr(C)]` Pod
//! structs defined here. Host-side code uses glam vectors and converts at
//! the boundary.

pub mod payload;
pub mod types;

pub use payload::{PayloadError, PrimitiveBuffer, PrimitiveMeta, Primitives};
pub use types::{
    ApproximationMode, BallData, BeamData, BoundingBox, CapStyle, Command, CommandKind,
    PrimitiveType, RenderingFlags, RenderingSettings,
};
