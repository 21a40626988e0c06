//! Cross-path reassembly of the connection byte stream.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::core::{ConnectionError, ConnectionResult, SubflowId};
use crate::mapping::Mapping;

/// Data that arrived ahead of the next expected DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfoItem {
    /// Mapping the bytes arrived under.
    pub mapping: Mapping,
    /// The bytes.
    pub payload: Bytes,
    /// Subflow they arrived on.
    pub source: SubflowId,
}

/// Outcome of handing data to the [`ReassemblyQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// In-order data was delivered.
    Delivered {
        /// Bytes made readable, including drained buffered data.
        bytes: u64,
        /// Buffered items drained after the arrival.
        drained: usize,
    },
    /// Data arrived past a gap and was buffered.
    Buffered {
        /// First missing DSN.
        expected: u64,
        /// Head DSN of what arrived.
        received: u64,
    },
    /// Nothing new: already delivered or already buffered.
    Duplicate {
        /// Head DSN of the dropped data.
        dsn: u64,
        /// Length of the dropped data.
        length: u32,
    },
}

/// Orders data arriving on any subflow into the application byte stream.
///
/// `capacity` bounds readable bytes plus buffered out-of-order bytes.
#[derive(Debug)]
pub struct ReassemblyQueue {
    expected: u64,
    ofo: BTreeMap<u64, OfoItem>,
    ofo_bytes: usize,
    ready: BytesMut,
    capacity: usize,
}

impl ReassemblyQueue {
    /// Create a queue expecting `initial_dsn` first.
    pub fn new(initial_dsn: u64, capacity: usize) -> Self {
        Self {
            expected: initial_dsn,
            ofo: BTreeMap::new(),
            ofo_bytes: 0,
            ready: BytesMut::new(),
            capacity,
        }
    }

    /// Next data sequence number expected in order.
    pub fn expected_dsn(&self) -> u64 {
        self.expected
    }

    /// Bytes the queue can still take.
    pub fn free_space(&self) -> usize {
        self.capacity
            .saturating_sub(self.ready.len() + self.ofo_bytes)
    }

    /// Bytes the queue can take for data starting at `dsn`.
    ///
    /// Data at or below the cursor may displace buffered out-of-order data,
    /// so only readable bytes count against it.
    pub fn room_for(&self, dsn: u64) -> usize {
        if dsn <= self.expected {
            self.capacity.saturating_sub(self.ready.len())
        } else {
            self.free_space()
        }
    }

    /// Evict out-of-order items, highest DSN first, until `needed` bytes are
    /// free or nothing is left to evict. Returns what was evicted.
    pub fn evict_for(&mut self, needed: usize) -> Vec<OfoItem> {
        let mut evicted = Vec::new();
        while self.free_space() < needed {
            let Some(item) = self.ofo.pop_last().map(|(_, item)| item) else {
                break;
            };
            self.ofo_bytes -= item.payload.len();
            debug!(
                dsn = item.mapping.dsn,
                len = item.mapping.length,
                source = %item.source,
                "evicted out-of-order data"
            );
            evicted.push(item);
        }
        evicted
    }

    /// Bytes readable by the application.
    pub fn readable(&self) -> usize {
        self.ready.len()
    }

    /// Number of buffered out-of-order items.
    pub fn ofo_len(&self) -> usize {
        self.ofo.len()
    }

    /// Bytes held in out-of-order items.
    pub fn ofo_bytes(&self) -> usize {
        self.ofo_bytes
    }

    /// Whether an out-of-order item starts at `dsn`.
    pub fn has_buffered(&self, dsn: u64) -> bool {
        self.ofo.contains_key(&dsn)
    }

    /// Take up to `max` readable bytes.
    pub fn read(&mut self, max: usize) -> Bytes {
        let n = max.min(self.ready.len());
        self.ready.split_to(n).freeze()
    }

    /// Hand arriving data to the queue.
    ///
    /// Data below the cursor is trimmed to its undelivered remainder; data at
    /// the cursor is delivered and followed by any buffered data it makes
    /// contiguous; data past the cursor is buffered, keyed by its head DSN.
    /// Failing to store data that fits no rule is a fatal data loss.
    pub fn submit(&mut self, mut item: OfoItem) -> ConnectionResult<Arrival> {
        let dsn = item.mapping.dsn;
        let length = item.mapping.length;

        if item.mapping.dsn_end() <= self.expected {
            trace!(dsn, length, "dropping already delivered data");
            return Ok(Arrival::Duplicate { dsn, length });
        }

        if dsn < self.expected {
            let delivered = (self.expected - dsn) as u32;
            let Some(rest) = item.mapping.trim_front(delivered) else {
                return Ok(Arrival::Duplicate { dsn, length });
            };
            trace!(dsn, trimmed = delivered, "trimming partially delivered data");
            item.payload = item.payload.slice(delivered as usize..);
            item.mapping = rest;
        }

        if item.mapping.dsn == self.expected {
            return self.deliver(item);
        }

        self.purge_obsolete();
        let head = item.mapping.dsn;
        if self.ofo.contains_key(&head) {
            debug!(dsn = head, "duplicate out-of-order data rejected");
            return Ok(Arrival::Duplicate { dsn, length });
        }
        if item.payload.len() > self.free_space() {
            return Err(ConnectionError::DataLoss {
                dsn: head,
                len: item.payload.len(),
            });
        }

        self.ofo_bytes += item.payload.len();
        self.ofo.insert(head, item);
        self.drain();

        Ok(Arrival::Buffered {
            expected: self.expected,
            received: head,
        })
    }

    fn deliver(&mut self, item: OfoItem) -> ConnectionResult<Arrival> {
        if item.payload.len() > self.free_space() {
            return Err(ConnectionError::DataLoss {
                dsn: item.mapping.dsn,
                len: item.payload.len(),
            });
        }
        let start = self.expected;
        self.ready.extend_from_slice(&item.payload);
        self.expected = item.mapping.dsn_end();

        let drained = self.drain();
        Ok(Arrival::Delivered {
            bytes: self.expected - start,
            drained,
        })
    }

    /// Move buffered items that became contiguous into the readable buffer.
    fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Some(entry) = self.ofo.first_entry() {
            if *entry.key() > self.expected {
                break;
            }
            let item = entry.remove();
            self.ofo_bytes -= item.payload.len();

            let end = item.mapping.dsn_end();
            if end <= self.expected {
                continue;
            }
            let skip = (self.expected - item.mapping.dsn) as usize;
            self.ready.extend_from_slice(&item.payload[skip..]);
            self.expected = end;
            drained += 1;
        }
        if drained > 0 {
            trace!(drained, expected = self.expected, "drained out-of-order data");
        }
        drained
    }

    fn purge_obsolete(&mut self) {
        let keep = self.ofo.split_off(&self.expected);
        let obsolete = std::mem::replace(&mut self.ofo, keep);
        for item in obsolete.into_values() {
            self.ofo_bytes -= item.payload.len();
        }
    }
}
