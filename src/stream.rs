//! Pull-style consumption of an fMP4 byte source.
//!
//! [`SegmentStream`] pumps any [`Read`] source through an owned
//! [`Fmp4Segmenter`] and yields the same events the push model delivers
//! through listeners, one at a time and in the same order. The state
//! machine underneath is identical; only the delivery direction differs.

use std::io::{self, Read};

use crate::segmenter::{Fmp4Segmenter, SegmenterConfig, SegmenterEvent};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Iterator over segmentation events read from an underlying source.
pub struct SegmentStream<R> {
    reader: R,
    segmenter: Fmp4Segmenter,
    errored: bool,
    eof: bool,
}

impl<R: Read> SegmentStream<R> {
    /// Segment everything `reader` produces, with a fresh segmenter.
    pub fn new(reader: R, config: SegmenterConfig) -> Self {
        Self::with_segmenter(reader, Fmp4Segmenter::new(config))
    }

    /// Wrap an existing segmenter; listeners already registered on it
    /// keep firing alongside the yielded events.
    pub fn with_segmenter(reader: R, mut segmenter: Fmp4Segmenter) -> Self {
        segmenter.enable_event_queue();
        Self {
            reader,
            segmenter,
            errored: false,
            eof: false,
        }
    }

    /// Access the segmenter, e.g. for the playlist or ring accessors.
    pub fn segmenter(&self) -> &Fmp4Segmenter {
        &self.segmenter
    }

    /// Release the reader and the segmenter with all accumulated state.
    pub fn into_inner(self) -> (R, Fmp4Segmenter) {
        (self.reader, self.segmenter)
    }
}

impl<R: Read> Iterator for SegmentStream<R> {
    type Item = io::Result<SegmenterEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.segmenter.pop_event() {
                return Some(Ok(event));
            }
            if self.errored || self.eof {
                return None;
            }

            let mut buf = [0u8; READ_CHUNK_SIZE];
            match self.reader.read(&mut buf) {
                Ok(0) => self.eof = true,
                Ok(read) => {
                    if let Err(error) = self.segmenter.write(&buf[..read]) {
                        self.errored = true;
                        return Some(Err(io::Error::new(io::ErrorKind::InvalidData, error)));
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    self.errored = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let size = (8 + body.len()) as u32;
        let mut out = Vec::with_capacity(size as usize);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(body);
        out
    }

    fn make_stream(fragments: usize) -> Vec<u8> {
        let mut moov_body = vec![0u8; 8];
        moov_body.extend_from_slice(b"avcC");
        moov_body.extend_from_slice(&[0x01, 0x64, 0x00, 0x28, 0xFF, 0xE1]);

        let mut stream = make_box(b"ftyp", b"isom\x00\x00\x02\x00iso6mp41");
        stream.extend_from_slice(&make_box(b"moov", &moov_body));
        for index in 0..fragments {
            stream.extend_from_slice(&make_box(b"moof", &[index as u8; 16]));
            stream.extend_from_slice(&make_box(b"mdat", &[index as u8; 48]));
        }
        stream
    }

    #[test]
    fn test_yields_init_then_segments_in_order() {
        let stream = make_stream(3);
        let events: Vec<_> = SegmentStream::new(Cursor::new(stream), SegmenterConfig::default())
            .map(Result::unwrap)
            .collect();

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], SegmenterEvent::Initialized(_)));
        for event in &events[1..] {
            assert!(matches!(event, SegmenterEvent::Segment(_)));
        }
    }

    #[test]
    fn test_segmenter_accessors_remain_available() {
        let stream = make_stream(2);
        let mut segment_stream =
            SegmentStream::new(Cursor::new(stream), SegmenterConfig::default());
        assert!(segment_stream.by_ref().all(|event| event.is_ok()));

        let (_, segmenter) = segment_stream.into_inner();
        assert_eq!(segmenter.segments_published(), 2);
        assert_eq!(segmenter.mime(), Some("video/mp4; codecs=\"avc1.640028\""));
    }

    #[test]
    fn test_invalid_source_yields_error_then_ends() {
        let mut segment_stream = SegmentStream::new(
            Cursor::new(vec![0xABu8; 64]),
            SegmenterConfig::default(),
        );
        let first = segment_stream.next().unwrap();
        assert_eq!(first.unwrap_err().kind(), io::ErrorKind::InvalidData);
        assert!(segment_stream.next().is_none());
    }

    #[test]
    fn test_push_listeners_fire_alongside_pull() {
        use std::sync::{Arc, Mutex};

        let count = Arc::new(Mutex::new(0usize));
        let seen = count.clone();
        let mut segmenter = Fmp4Segmenter::new(SegmenterConfig::default());
        segmenter.on_segment(move |_| *seen.lock().unwrap() += 1);

        let stream = make_stream(2);
        let events =
            SegmentStream::with_segmenter(Cursor::new(stream), segmenter).count();
        assert_eq!(events, 3);
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
