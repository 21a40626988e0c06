//! Congestion window aggregation, RTO tracking and retransmission.

mod congestion;
mod retransmit;
mod timing;

pub use congestion::*;
pub use retransmit::*;
pub use timing::*;
