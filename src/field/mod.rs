//! Scalar-field evaluation: the opaque model kernel interface, bounding-box
//! discovery by surface projection, and the precomputed SDF volume that
//! seeds raymarching.

pub mod bbox;
pub mod precomp;
pub mod sdf;

pub use bbox::{determine_bbox, BboxDiscovery, BboxError};
pub use precomp::PreComputedSdf;
pub use sdf::{gyroid, sphere, Sdf};
