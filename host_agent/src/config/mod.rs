//! Configuration for the agent: the operator config and the layer descriptor, both TOML.

mod loader;
mod types;

pub use loader::*;
pub use types::*;
