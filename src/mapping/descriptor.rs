//! Mapping descriptors and the per-subflow mapping table.

use std::collections::BTreeMap;

use super::sequence::widen_u32;
use crate::core::MappingError;

/// Ties a run of connection bytes to a run of subflow bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Data sequence number of the first byte.
    pub dsn: u64,
    /// Number of bytes covered. Never zero.
    pub length: u32,
    /// Subflow sequence number of the first byte.
    pub ssn: u32,
}

impl Mapping {
    /// Create a mapping, rejecting empty ones.
    pub fn new(dsn: u64, length: u32, ssn: u32) -> Result<Self, MappingError> {
        if length == 0 {
            return Err(MappingError::ZeroLength);
        }
        Ok(Self { dsn, length, ssn })
    }

    /// One past the last data sequence number covered.
    pub fn dsn_end(&self) -> u64 {
        self.dsn + u64::from(self.length)
    }

    /// One past the last subflow sequence number covered (wrapping).
    pub fn ssn_end(&self) -> u32 {
        self.ssn.wrapping_add(self.length)
    }

    /// Whether `dsn` falls inside this mapping.
    pub fn contains_dsn(&self, dsn: u64) -> bool {
        dsn >= self.dsn && dsn < self.dsn_end()
    }

    /// Drop the first `n` bytes. `None` if nothing would remain.
    pub fn trim_front(&self, n: u32) -> Option<Mapping> {
        if n >= self.length {
            return None;
        }
        Some(Mapping {
            dsn: self.dsn + u64::from(n),
            length: self.length - n,
            ssn: self.ssn.wrapping_add(n),
        })
    }

    /// Split after `n` bytes into a head and an optional tail.
    ///
    /// `n` of zero or beyond the length returns the mapping unchanged as head.
    pub fn split_at(&self, n: u32) -> (Mapping, Option<Mapping>) {
        if n == 0 || n >= self.length {
            return (*self, None);
        }
        let head = Mapping {
            length: n,
            ..*self
        };
        (head, self.trim_front(n))
    }
}

/// Mappings sent on one subflow that are not yet acknowledged at the
/// connection level.
///
/// Keys are widened subflow sequence numbers so that overlap checks keep
/// working across 32-bit wraparound.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    entries: BTreeMap<u64, Mapping>,
    reference: u64,
}

impl MappingTable {
    /// Create an empty table whose subflow sequence space starts at `initial_ssn`.
    pub fn new(initial_ssn: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            reference: u64::from(initial_ssn),
        }
    }

    /// Record a mapping, rejecting any overlap in subflow sequence space.
    pub fn insert(&mut self, mapping: Mapping) -> Result<(), MappingError> {
        if mapping.length == 0 {
            return Err(MappingError::ZeroLength);
        }

        let start = widen_u32(mapping.ssn, self.reference);
        let end = start + u64::from(mapping.length);

        let overlaps_prev = self
            .entries
            .range(..=start)
            .next_back()
            .is_some_and(|(s, m)| s + u64::from(m.length) > start);
        let overlaps_next = self.entries.range(start..end).next().is_some();

        if overlaps_prev || overlaps_next {
            return Err(MappingError::SsnOverlap {
                ssn: mapping.ssn,
                length: mapping.length,
            });
        }

        self.entries.insert(start, mapping);
        self.reference = self.reference.max(end);
        Ok(())
    }

    /// Forget a mapping that was recorded but never made it onto the path.
    pub fn remove(&mut self, mapping: &Mapping) -> bool {
        let key = self
            .entries
            .iter()
            .find(|(_, m)| *m == mapping)
            .map(|(k, _)| *k);
        key.is_some_and(|k| self.entries.remove(&k).is_some())
    }

    /// Drop every mapping fully acknowledged by `dack`. Returns how many were dropped.
    pub fn retire_acked(&mut self, dack: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, m| m.dsn_end() > dack);
        before - self.entries.len()
    }

    /// Number of recorded mappings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recorded mappings in subflow sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_length_rejected() {
        assert_eq!(Mapping::new(0, 0, 0), Err(MappingError::ZeroLength));
    }

    #[test]
    fn test_trim_and_split() {
        let m = Mapping::new(100, 50, 1000).unwrap();
        assert_eq!(m.dsn_end(), 150);

        let trimmed = m.trim_front(20).unwrap();
        assert_eq!((trimmed.dsn, trimmed.length, trimmed.ssn), (120, 30, 1020));
        assert!(m.trim_front(50).is_none());

        let (head, tail) = m.split_at(10);
        assert_eq!(head.length, 10);
        assert_eq!(tail.unwrap().dsn, 110);
        assert_eq!(m.split_at(50), (m, None));
    }

    #[test]
    fn test_table_rejects_overlap() {
        let mut table = MappingTable::new(0);
        table.insert(Mapping::new(0, 100, 0).unwrap()).unwrap();
        table.insert(Mapping::new(100, 100, 100).unwrap()).unwrap();

        let err = table.insert(Mapping::new(500, 10, 150).unwrap()).unwrap_err();
        assert!(matches!(err, MappingError::SsnOverlap { ssn: 150, .. }));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_table_across_wrap() {
        let start = u32::MAX - 9;
        let mut table = MappingTable::new(start);
        table.insert(Mapping::new(0, 10, start).unwrap()).unwrap();
        // Wrapped past zero, still adjacent and not overlapping.
        table.insert(Mapping::new(10, 10, 0).unwrap()).unwrap();
        assert!(table.insert(Mapping::new(20, 5, 5).unwrap()).is_err());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_retire_acked() {
        let mut table = MappingTable::new(0);
        table.insert(Mapping::new(0, 100, 0).unwrap()).unwrap();
        table.insert(Mapping::new(100, 100, 100).unwrap()).unwrap();

        assert_eq!(table.retire_acked(150), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.retire_acked(200), 1);
        assert!(table.is_empty());
    }
}
