//! File helpers shared by configs and checkpoints.
pub mod io;

pub use io::*;
