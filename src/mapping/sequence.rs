//! Connection sequence space bookkeeping.
//!
//! The connection numbers its bytes with 64-bit data sequence numbers (DSN);
//! each subflow numbers its own bytes with 32-bit subflow sequence numbers
//! (SSN). Truncated values are widened with [`widen_u32`].

use std::collections::BTreeMap;

use crate::core::SubflowId;
use crate::scheduler::{MetaView, PathMetrics};

use super::descriptor::Mapping;

const SPAN: u64 = 1 << 32;
const HALF_SPAN: u64 = 1 << 31;

/// Widen a 32-bit sequence number to the 64-bit value nearest `reference`.
///
/// Serial-number arithmetic: the result lies within half the 32-bit space of
/// `reference`, so a value just past a wrap lands in the next epoch and a
/// value just before it lands in the previous one.
pub fn widen_u32(value: u32, reference: u64) -> u64 {
    let candidate = (reference & !(SPAN - 1)) | u64::from(value);

    if candidate.saturating_add(HALF_SPAN) <= reference && candidate <= u64::MAX - SPAN {
        candidate + SPAN
    } else if candidate > reference.saturating_add(HALF_SPAN) && candidate >= SPAN {
        candidate - SPAN
    } else {
        candidate
    }
}

/// An in-flight run of connection bytes and the subflow carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    /// Number of bytes.
    pub length: u64,
    /// Subflow the bytes were committed to.
    pub subflow: SubflowId,
}

/// Maps pending connection bytes onto subflows and tracks which subflow
/// carries each in-flight byte.
///
/// Each DSN byte is owned by at most one in-flight mapping: committing a
/// retransmission supersedes whatever covered those bytes before.
#[derive(Debug, Clone, Default)]
pub struct SequenceMapper {
    in_flight: BTreeMap<u64, InFlight>,
}

impl SequenceMapper {
    /// Create an empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `(dsn, length)` that `path` could carry.
    ///
    /// The length is the smallest of the pending bytes, the path's available
    /// window, the connection's available window and the path MSS. Returns
    /// `None` when any of those is zero or no subflow is active.
    pub fn generate_mapping(view: &dyn MetaView, path: &PathMetrics) -> Option<(u64, u32)> {
        if view.active_count() == 0 {
            return None;
        }
        let length = Self::sendable_len(
            view.pending_bytes(),
            path.available_window,
            view.available_window(),
            path.segment_size,
        )?;
        Some((view.next_tx_dsn(), length))
    }

    /// `min(pending, path_window, meta_window, segment_size)`, or `None` if zero.
    pub fn sendable_len(
        pending: u64,
        path_window: u32,
        meta_window: u32,
        segment_size: u32,
    ) -> Option<u32> {
        let window = u64::from(path_window.min(meta_window).min(segment_size));
        let length = pending.min(window);
        if length == 0 { None } else { Some(length as u32) }
    }

    /// Record that `mapping` was committed to `subflow`.
    pub fn commit(&mut self, mapping: &Mapping, subflow: SubflowId) {
        let start = mapping.dsn;
        let end = mapping.dsn_end();
        self.carve(start, end);
        self.in_flight.insert(
            start,
            InFlight {
                length: u64::from(mapping.length),
                subflow,
            },
        );
    }

    /// Retire everything below `dack`. Returns the number of bytes retired.
    pub fn acknowledge(&mut self, dack: u64) -> u64 {
        let before = self.in_flight_bytes();
        let first = self.in_flight.keys().next().copied();
        if let Some(first) = first
            && first < dack
        {
            self.carve(first, dack);
        }
        before - self.in_flight_bytes()
    }

    /// Subflow currently carrying `dsn`, if it is in flight.
    pub fn owner(&self, dsn: u64) -> Option<SubflowId> {
        self.in_flight
            .range(..=dsn)
            .next_back()
            .filter(|(start, f)| dsn < *start + f.length)
            .map(|(_, f)| f.subflow)
    }

    /// Total bytes in flight.
    pub fn in_flight_bytes(&self) -> u64 {
        self.in_flight.values().map(|f| f.length).sum()
    }

    /// Number of in-flight runs.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Remove `[start, end)` from the in-flight set, keeping the uncovered
    /// edges of any run that straddles it.
    fn carve(&mut self, start: u64, end: u64) {
        let overlapping: Vec<(u64, InFlight)> = self
            .in_flight
            .range(..end)
            .filter(|(s, f)| **s + f.length > start)
            .map(|(s, f)| (*s, *f))
            .collect();

        for (s, f) in overlapping {
            self.in_flight.remove(&s);
            let e = s + f.length;
            if s < start {
                self.in_flight.insert(
                    s,
                    InFlight {
                        length: start - s,
                        subflow: f.subflow,
                    },
                );
            }
            if e > end {
                self.in_flight.insert(
                    end,
                    InFlight {
                        length: e - end,
                        subflow: f.subflow,
                    },
                );
            }
        }
    }
}
