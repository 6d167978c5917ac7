//! Minimal ISOBMFF box scanning for streaming fMP4 input.
//!
//! The scanner works on whatever prefix of the stream happens to be
//! available and classifies it against one required box type. It slices,
//! never copies; reassembly of split boxes is the segmenter's job.

use bytes::Bytes;

/// Box header length: 32-bit big-endian size + FourCC.
pub(crate) const BOX_HEADER_SIZE: usize = 8;

/// Outcome of scanning a chunk for one box of a required type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BoxScan {
    /// The chunk starts with a complete box of the requested type.
    Complete {
        /// The whole box, header included.
        data: Bytes,
        /// Everything after the box, possibly empty.
        rest: Bytes,
    },
    /// A box of the requested type has started but is not fully
    /// available. `expected` carries the declared total length, or
    /// `None` when even the 8-byte header is truncated.
    Partial { expected: Option<usize> },
    /// The chunk does not start with a box of the requested type.
    Mismatch,
}

/// Scan `chunk` for one box of type `fourcc`.
///
/// A chunk shorter than a box header is never a mismatch: with arbitrary
/// re-chunking the type bytes may simply not have arrived yet.
pub(crate) fn scan_box(chunk: &Bytes, fourcc: [u8; 4]) -> BoxScan {
    if chunk.len() < BOX_HEADER_SIZE {
        return BoxScan::Partial { expected: None };
    }

    if chunk[4..8] != fourcc {
        return BoxScan::Mismatch;
    }

    let declared = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize;
    if declared < BOX_HEADER_SIZE {
        return BoxScan::Mismatch;
    }

    if declared > chunk.len() {
        return BoxScan::Partial {
            expected: Some(declared),
        };
    }

    BoxScan::Complete {
        data: chunk.slice(..declared),
        rest: chunk.slice(declared..),
    }
}

/// Find a 4-byte ASCII marker inside a byte run.
pub(crate) fn find_marker(haystack: &[u8], marker: &[u8; 4]) -> Option<usize> {
    haystack.windows(marker.len()).position(|window| window == marker)
}
