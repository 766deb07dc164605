//! Per-layer slicing: the coarse-to-fine distance pyramid, jump-flood
//! contour seeding, marching-squares contour extraction and the slicer
//! driver that ties them to the model kernel.

pub mod contour;
pub mod jfa;
pub mod pyramid;
pub mod slicer;

pub use contour::{ContourExtractor, ContourMode, MarchingSquaresStates, PolyLine};
pub use jfa::JfaMap;
pub use pyramid::{ClippingArea, DistanceMap, DistancePixel, SlicePyramid};
pub use slicer::{SliceError, Slicer};
