//! Subflows and the registry that classifies them.

mod path;
mod registry;

pub use path::*;
pub use registry::*;
