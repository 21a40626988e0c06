//! Sequence mapping between the connection byte stream and its subflows.

mod descriptor;
mod sequence;

pub use descriptor::*;
pub use sequence::*;
