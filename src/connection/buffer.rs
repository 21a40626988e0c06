//! Connection-level send buffer.

use bytes::{Buf, Bytes, BytesMut};

/// Bytes the application queued, addressed by data sequence number.
///
/// ```text
///   head            next_tx              end
///    |---- in flight ---|---- pending ----|---- free ----|
/// ```
#[derive(Debug)]
pub struct SendBuffer {
    head: u64,
    next_tx: u64,
    data: BytesMut,
    capacity: usize,
}

impl SendBuffer {
    /// Create an empty buffer whose first byte will be `initial_dsn`.
    pub fn new(initial_dsn: u64, capacity: usize) -> Self {
        Self {
            head: initial_dsn,
            next_tx: initial_dsn,
            data: BytesMut::new(),
            capacity,
        }
    }

    /// Queue as much of `bytes` as fits. Returns the number queued.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.available());
        self.data.extend_from_slice(&bytes[..n]);
        n
    }

    /// Free space.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    /// Bytes held, in flight or pending.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds nothing.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Oldest unacknowledged data sequence number.
    pub fn head_dsn(&self) -> u64 {
        self.head
    }

    /// Next data sequence number to map.
    pub fn next_tx_dsn(&self) -> u64 {
        self.next_tx
    }

    /// One past the last queued byte.
    pub fn end_dsn(&self) -> u64 {
        self.head + self.data.len() as u64
    }

    /// Queued bytes not mapped yet.
    pub fn pending(&self) -> u64 {
        self.end_dsn() - self.next_tx
    }

    /// Mapped bytes not acknowledged yet.
    pub fn unacked(&self) -> u64 {
        self.next_tx - self.head
    }

    /// Copy of `len` bytes starting at `dsn`, if all of them are held.
    pub fn slice(&self, dsn: u64, len: usize) -> Option<Bytes> {
        let offset = usize::try_from(dsn.checked_sub(self.head)?).ok()?;
        let end = offset.checked_add(len)?;
        let bytes = self.data.get(offset..end)?;
        Some(Bytes::copy_from_slice(bytes))
    }

    /// Mark everything below `dsn` as mapped.
    pub fn advance_next_tx(&mut self, dsn: u64) {
        self.next_tx = dsn.clamp(self.next_tx, self.end_dsn());
    }

    /// Discard bytes acknowledged by `dack`. Returns how many were dropped.
    ///
    /// Acknowledgements beyond what was mapped are clamped.
    pub fn acknowledge(&mut self, dack: u64) -> usize {
        let upto = dack.min(self.next_tx);
        if upto <= self.head {
            return 0;
        }
        let n = (upto - self.head) as usize;
        self.data.advance(n);
        self.head = upto;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_respects_capacity() {
        let mut buf = SendBuffer::new(0, 8);
        assert_eq!(buf.push(b"hello"), 5);
        assert_eq!(buf.push(b"world"), 3);
        assert_eq!(buf.available(), 0);
        assert_eq!(buf.end_dsn(), 8);
    }

    #[test]
    fn test_pending_and_unacked() {
        let mut buf = SendBuffer::new(1000, 64);
        buf.push(b"0123456789");
        buf.advance_next_tx(1004);

        assert_eq!(buf.unacked(), 4);
        assert_eq!(buf.pending(), 6);
        assert_eq!(buf.slice(1002, 4).unwrap(), Bytes::from_static(b"2345"));
        assert!(buf.slice(1008, 4).is_none());
        assert!(buf.slice(999, 1).is_none());
    }

    #[test]
    fn test_acknowledge() {
        let mut buf = SendBuffer::new(0, 64);
        buf.push(b"0123456789");
        buf.advance_next_tx(6);

        assert_eq!(buf.acknowledge(4), 4);
        assert_eq!(buf.head_dsn(), 4);
        assert_eq!(buf.slice(4, 2).unwrap(), Bytes::from_static(b"45"));

        // Clamped to what was mapped.
        assert_eq!(buf.acknowledge(100), 2);
        assert_eq!(buf.head_dsn(), 6);
        assert_eq!(buf.acknowledge(3), 0);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_advance_is_clamped() {
        let mut buf = SendBuffer::new(0, 64);
        buf.push(b"abc");
        buf.advance_next_tx(10);
        assert_eq!(buf.next_tx_dsn(), 3);
        buf.advance_next_tx(1);
        assert_eq!(buf.next_tx_dsn(), 3);
    }
}
