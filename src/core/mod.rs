//! Core types shared by every layer: identifiers, states, errors, constants
//! and the traits the connection is driven through.

pub mod constants;
mod error;
mod ids;
mod state;
mod timer;
mod traits;

pub use error::*;
pub use ids::*;
pub use state::*;
pub use timer::*;
pub use traits::*;
