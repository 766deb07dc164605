//! File interfaces: the CLI 1.x ASCII slice format and the beam-lattice
//! export block for container formats.

pub mod beam_export;
pub mod cli;

pub use beam_export::{BallMode, BeamLatticeBlock, CapMode};
pub use cli::{CliReader, CliWriter};
