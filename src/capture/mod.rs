//! Boundary with the external audio capture process: options, spawning,
//! and decoding of its two output streams.

mod chunk;
mod decoder;
mod options;
mod process;
mod record;

pub use chunk::*;
pub use decoder::*;
pub use options::*;
pub use process::*;
pub use record::*;
