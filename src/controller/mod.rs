//! Lifecycle controller: owns one capture process, reconciles its two
//! output streams into a single state machine, and exposes the event API.

mod events;
mod runner;
mod state;

pub use events::*;
pub use runner::*;
pub use state::*;
