//! Published media segments and the replay buffer ring.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// One published `moof‖mdat` media segment.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Raw `moof‖mdat` bytes.
    pub data: Bytes,
    /// Wall-clock seconds between this completion and the previous one
    /// (for the first segment, since the init segment was parsed).
    pub duration: f64,
    /// HLS sequence number; assigned only when HLS output is enabled.
    pub sequence: Option<u64>,
}

/// Bounded ring of raw segment payloads kept for replay.
///
/// Independent of the HLS window: it may be enabled without HLS and
/// sized separately.
#[derive(Debug)]
pub(crate) struct SegmentBuffer {
    bound: usize,
    entries: VecDeque<Bytes>,
}

impl SegmentBuffer {
    pub(crate) fn new(bound: usize) -> Self {
        Self {
            bound,
            entries: VecDeque::with_capacity(bound),
        }
    }

    /// Append a segment, evicting from the front past the bound.
    pub(crate) fn push(&mut self, data: Bytes) {
        self.entries.push_back(data);
        while self.entries.len() > self.bound {
            self.entries.pop_front();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the ring contents, oldest first.
    pub(crate) fn list(&self) -> Vec<Bytes> {
        self.entries.iter().cloned().collect()
    }

    /// Single contiguous copy of the ring contents, oldest first.
    pub(crate) fn concat(&self) -> Bytes {
        let total = self.entries.iter().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(total);
        for entry in &self.entries {
            out.extend_from_slice(entry);
        }
        out.freeze()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_evicts_oldest() {
        let mut buffer = SegmentBuffer::new(2);
        buffer.push(Bytes::from_static(b"one"));
        buffer.push(Bytes::from_static(b"two"));
        buffer.push(Bytes::from_static(b"three"));

        assert_eq!(buffer.len(), 2);
        let list = buffer.list();
        assert_eq!(list[0].as_ref(), b"two");
        assert_eq!(list[1].as_ref(), b"three");
    }

    #[test]
    fn test_concat_preserves_order() {
        let mut buffer = SegmentBuffer::new(3);
        buffer.push(Bytes::from_static(b"ab"));
        buffer.push(Bytes::from_static(b"cd"));
        assert_eq!(buffer.concat().as_ref(), b"abcd");
    }

    #[test]
    fn test_clear_empties_ring() {
        let mut buffer = SegmentBuffer::new(2);
        buffer.push(Bytes::from_static(b"x"));
        assert!(!buffer.is_empty());
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.concat().len(), 0);
    }
}
