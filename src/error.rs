//! Error types for fMP4 stream segmentation.

use thiserror::Error;

/// Errors raised while segmenting an fMP4 byte stream.
///
/// Every variant is fatal for the current session: the segmenter latches
/// the error and returns it from further writes until
/// [`Fmp4Segmenter::flush`](crate::Fmp4Segmenter::flush) resets it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fmp4Error {
    /// The stream does not begin with a valid `ftyp` box.
    #[error("ftyp box not found at start of stream")]
    MissingFtyp,

    /// No valid `moov` box follows the `ftyp` box.
    #[error("moov box not found after ftyp")]
    MissingMoov,

    /// No valid `moof` box where the first media fragment was expected.
    #[error("moof box not found after initialization")]
    MissingMoof,

    /// No valid `mdat` box follows a `moof` box.
    #[error("mdat box not found after moof")]
    MissingMdat,

    /// The `moov` box carries no `avcC` configuration record.
    #[error("no avcC codec configuration found in moov")]
    MissingCodec,

    /// A head box declared a length beyond what its state can buffer.
    #[error("{fourcc} box declares implausible length {declared}")]
    OversizedBox {
        /// Type of the offending box.
        fourcc: &'static str,
        /// Length the box header declared.
        declared: usize,
    },
}

/// Result type alias for segmentation operations.
pub type Result<T> = std::result::Result<T, Fmp4Error>;
