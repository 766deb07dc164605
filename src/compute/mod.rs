//! Device plumbing: the owning compute context, typed buffers and images
//! with byte accounting, the hash-keyed kernel program cache and the
//! `ComputeCore` coordinator that ties programs, resources and the compute
//! token together.

pub mod buffer;
pub mod context;
pub mod core;
pub mod image;
pub mod program;
pub mod resource_context;

pub use buffer::Buffer;
pub use context::{ComputeContext, ComputeError};
pub use core::{ComputeCore, ComputeToken, ProgramManager, SharedComputeCore};
pub use image::{Image2d, Image3d, PixelType};
pub use program::{KernelProgram, ProgramState};
pub use resource_context::ResourceContext;
