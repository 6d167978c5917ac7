//! Streaming segmenter for fragmented MP4 byte streams.
//!
//! Consumes arbitrarily chunked fMP4 input laid out as
//! `ftyp · moov · (moof · mdat)*` — the shape encoders produce under
//! `frag_keyframe+empty_moov` movie flags — and republishes it as:
//!
//! - an initialization segment (`ftyp‖moov`) with a MIME codec string
//!   derived from the AVC configuration record
//! - complete `moof‖mdat` media segments, pushed to listeners or pulled
//!   through [`SegmentStream`]
//! - bounded in-memory rings: an HLS playlist window and an independent
//!   replay buffer
//! - continuously regenerated fMP4 HLS playlist text
//!
//! Chunk boundaries never have to align with box boundaries; the state
//! machine reassembles split headers and bodies transparently, so the
//! same stream fed a byte at a time or in one write produces identical
//! output.

pub mod error;
mod hls;
pub mod init;
mod isobmff;
pub mod segment;
pub mod segmenter;
pub mod stream;

pub use error::{Fmp4Error, Result};
pub use init::InitSegment;
pub use segment::Segment;
pub use segmenter::{Fmp4Segmenter, SegmenterConfig, SegmenterEvent};
pub use stream::SegmentStream;
