//! CLI command implementations.

pub mod devices;
pub mod play;
pub mod render;
