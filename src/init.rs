//! Initialization segment handling.
//!
//! The codec string is recovered by textual search for the `avcC` and
//! `mp4a` markers rather than by walking the `moov` box tree; that is
//! exactly how the target encoder lays out its init segment, and the flat
//! search keeps the parse allocation-free.

use bytes::Bytes;
use tracing::debug;

use crate::error::{Fmp4Error, Result};
use crate::isobmff::find_marker;

/// Offset from the `avcC` marker to the AVC profile bytes: the 4 marker
/// bytes themselves plus the configuration record version byte.
const AVC_PROFILE_OFFSET: usize = 5;

/// The `ftyp‖moov` head of a session together with the MIME string
/// derived from it. Immutable once parsed; emitted exactly once.
#[derive(Debug, Clone)]
pub struct InitSegment {
    /// Raw `ftyp‖moov` bytes.
    pub data: Bytes,
    /// `video/mp4; codecs="..."` string for media-source consumers.
    pub mime: String,
}

impl InitSegment {
    /// Parse a complete `ftyp‖moov` blob into an init segment.
    pub(crate) fn parse(data: Bytes) -> Result<Self> {
        let audio_suffix = if find_marker(&data, b"mp4a").is_some() {
            ", mp4a.40.2"
        } else {
            ""
        };

        let Some(index) = find_marker(&data, b"avcC") else {
            return Err(Fmp4Error::MissingCodec);
        };

        let profile_start = index + AVC_PROFILE_OFFSET;
        let Some(profile) = data.get(profile_start..profile_start + 3) else {
            return Err(Fmp4Error::MissingCodec);
        };

        let mime = format!(
            "video/mp4; codecs=\"avc1.{:02X}{:02X}{:02X}{}\"",
            profile[0], profile[1], profile[2], audio_suffix
        );
        debug!(mime = %mime, len = data.len(), "parsed initialization segment");

        Ok(Self { data, mime })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal moov-shaped blob: padding, the `avcC` record prefix with
    /// the given profile bytes, optionally an `mp4a` marker.
    fn make_init_blob(profile: [u8; 3], with_audio: bool) -> Bytes {
        let mut blob = Vec::new();
        blob.extend_from_slice(&[0u8; 16]);
        blob.extend_from_slice(b"avcC");
        blob.push(0x01); // configurationVersion
        blob.extend_from_slice(&profile);
        blob.extend_from_slice(&[0xFF, 0xE1]);
        if with_audio {
            blob.extend_from_slice(b"mp4a");
            blob.extend_from_slice(&[0u8; 4]);
        }
        Bytes::from(blob)
    }

    #[test]
    fn test_mime_video_only() {
        let init = InitSegment::parse(make_init_blob([0x4D, 0x40, 0x1F], false)).unwrap();
        assert_eq!(init.mime, "video/mp4; codecs=\"avc1.4D401F\"");
    }

    #[test]
    fn test_mime_with_audio() {
        let init = InitSegment::parse(make_init_blob([0x64, 0x00, 0x28], true)).unwrap();
        assert_eq!(init.mime, "video/mp4; codecs=\"avc1.640028, mp4a.40.2\"");
    }

    #[test]
    fn test_missing_avcc() {
        let blob = Bytes::from_static(b"no codec record in here at all..");
        assert_eq!(
            InitSegment::parse(blob).unwrap_err(),
            Fmp4Error::MissingCodec
        );
    }

    #[test]
    fn test_truncated_profile_bytes() {
        // Marker present but the record is cut off before the profile.
        let blob = Bytes::from_static(b"....avcC\x01\x4D");
        assert_eq!(
            InitSegment::parse(blob).unwrap_err(),
            Fmp4Error::MissingCodec
        );
    }

    #[test]
    fn test_data_is_kept_verbatim() {
        let blob = make_init_blob([0x42, 0xC0, 0x1E], false);
        let init = InitSegment::parse(blob.clone()).unwrap();
        assert_eq!(init.data, blob);
    }
}
