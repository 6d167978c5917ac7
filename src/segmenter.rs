//! Streaming fMP4 segment assembly.
//!
//! [`Fmp4Segmenter`] consumes an arbitrarily chunked byte stream laid out
//! as `ftyp · moov · (moof · mdat)*`, reassembles the initialization
//! segment and each `moof‖mdat` media segment across chunk boundaries,
//! and republishes them through listeners, bounded rings and an HLS
//! playlist. Writes are synchronous: every event caused by a chunk has
//! been delivered by the time `write` returns.

use std::collections::VecDeque;
use std::time::{Instant, SystemTime};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{Fmp4Error, Result};
use crate::hls::{DEFAULT_LIST_SIZE, HlsWindow, MAX_LIST_SIZE, MIN_LIST_SIZE};
use crate::init::InitSegment;
use crate::isobmff::{BOX_HEADER_SIZE, BoxScan, find_marker, scan_box};
use crate::segment::{Segment, SegmentBuffer};

/// Largest plausible declared length for the head boxes that have no
/// partial-body accumulator (`ftyp`, `moof`). Anything larger is stream
/// corruption, not a fragment header.
const MAX_HEAD_BOX_SIZE: usize = 1 << 20;

/// Trailing bytes retained between hunt rounds so a `moof` marker and
/// its 4-byte length prefix survive a chunk boundary split.
const HUNT_TAIL: usize = 7;

/// Configuration for [`Fmp4Segmenter`].
#[derive(Debug, Clone, Default)]
pub struct SegmenterConfig {
    /// Filename stem for HLS URIs. A non-empty value enables HLS output;
    /// the playlist then maps `init-<base>.mp4` and `<base><seq>.m4s`.
    pub hls_base: Option<String>,
    /// Bound on the HLS window, clamped to `[2, 10]`. Defaults to 4 when
    /// HLS is enabled; ignored otherwise.
    pub hls_list_size: Option<usize>,
    /// Bound on the replay buffer ring, clamped to `[2, 10]`. Absent
    /// disables buffering entirely.
    pub buffer_list_size: Option<usize>,
}

/// Ordered outputs of a segmentation session, as seen by the pull model.
#[derive(Debug, Clone)]
pub enum SegmenterEvent {
    /// The init segment was assembled and its codec string parsed.
    Initialized(InitSegment),
    /// A media segment was published.
    Segment(Segment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ftyp,
    Moov,
    Moof,
    Mdat,
    Hunt,
}

/// Accumulator for a box whose body spans multiple chunks.
#[derive(Debug)]
struct InFlightBox {
    expected: usize,
    fragments: Vec<Bytes>,
    received: usize,
}

impl InFlightBox {
    fn new(expected: usize, first: Bytes) -> Self {
        let received = first.len();
        Self {
            expected,
            fragments: vec![first],
            received,
        }
    }

    fn push(&mut self, chunk: Bytes) {
        self.received += chunk.len();
        self.fragments.push(chunk);
    }

    fn is_complete(&self) -> bool {
        self.received >= self.expected
    }

    /// Concatenate into the completed box plus any excess bytes.
    fn finish(self) -> (Bytes, Bytes) {
        let mut buf = BytesMut::with_capacity(self.received);
        for fragment in &self.fragments {
            buf.extend_from_slice(fragment);
        }
        let mut data = buf.freeze();
        let rest = data.split_off(self.expected);
        (data, rest)
    }
}

type InitListener = Box<dyn FnMut(&InitSegment) + Send>;
type SegmentListener = Box<dyn FnMut(&Segment) + Send>;
type ErrorListener = Box<dyn FnMut(&Fmp4Error) + Send>;

/// Incremental fMP4 box parser and segmenter.
pub struct Fmp4Segmenter {
    state: State,
    /// Bytes that could not be classified yet (truncated header or a
    /// truncated small-box body); logically prepended to the next chunk.
    stash: BytesMut,
    in_flight: Option<InFlightBox>,
    ftyp: Option<Bytes>,
    moof: Option<Bytes>,
    init: Option<InitSegment>,
    latest: Option<Segment>,
    segments_published: u64,
    last_instant: Option<Instant>,
    last_timestamp: Option<SystemTime>,
    hls: Option<HlsWindow>,
    buffer: Option<SegmentBuffer>,
    failure: Option<Fmp4Error>,
    queued: Option<VecDeque<SegmenterEvent>>,
    segment_callback: Option<SegmentListener>,
    init_listeners: Vec<InitListener>,
    segment_listeners: Vec<SegmentListener>,
    error_listeners: Vec<ErrorListener>,
}

impl Fmp4Segmenter {
    /// Create a segmenter expecting a fresh `ftyp · moov · (moof · mdat)*`
    /// stream.
    pub fn new(config: SegmenterConfig) -> Self {
        let hls = config
            .hls_base
            .as_deref()
            .filter(|base| !base.is_empty())
            .map(|base| {
                let bound = config
                    .hls_list_size
                    .unwrap_or(DEFAULT_LIST_SIZE)
                    .clamp(MIN_LIST_SIZE, MAX_LIST_SIZE);
                HlsWindow::new(base.to_string(), bound)
            });
        let buffer = config
            .buffer_list_size
            .map(|bound| SegmentBuffer::new(bound.clamp(MIN_LIST_SIZE, MAX_LIST_SIZE)));

        Self {
            state: State::Ftyp,
            stash: BytesMut::new(),
            in_flight: None,
            ftyp: None,
            moof: None,
            init: None,
            latest: None,
            segments_published: 0,
            last_instant: None,
            last_timestamp: None,
            hls,
            buffer,
            failure: None,
            queued: None,
            segment_callback: None,
            init_listeners: Vec::new(),
            segment_listeners: Vec::new(),
            error_listeners: Vec::new(),
        }
    }

    /// Register the per-segment callback invoked after every publication.
    pub fn with_segment_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Segment) + Send + 'static,
    {
        self.segment_callback = Some(Box::new(callback));
        self
    }

    /// Subscribe to the one-shot `initialized` event.
    pub fn on_initialized<F>(&mut self, listener: F)
    where
        F: FnMut(&InitSegment) + Send + 'static,
    {
        self.init_listeners.push(Box::new(listener));
    }

    /// Subscribe to published media segments.
    pub fn on_segment<F>(&mut self, listener: F)
    where
        F: FnMut(&Segment) + Send + 'static,
    {
        self.segment_listeners.push(Box::new(listener));
    }

    /// Subscribe to fatal session errors.
    pub fn on_error<F>(&mut self, listener: F)
    where
        F: FnMut(&Fmp4Error) + Send + 'static,
    {
        self.error_listeners.push(Box::new(listener));
    }

    /// Feed a chunk of the stream. Chunk boundaries need not align with
    /// box boundaries; zero-byte writes are ignored.
    ///
    /// Any `initialized`/`segment` events caused by this chunk are
    /// delivered before the call returns. After a fatal error the same
    /// error is returned for every write until [`flush`](Self::flush).
    pub fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.write_bytes(Bytes::copy_from_slice(chunk))
    }

    /// Zero-copy variant of [`write`](Self::write) for callers that
    /// already hold [`Bytes`].
    pub fn write_bytes(&mut self, chunk: Bytes) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        match self.advance(chunk) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.failure = Some(error.clone());
                warn!(%error, "fMP4 session failed");
                for listener in &mut self.error_listeners {
                    listener(&error);
                }
                Err(error)
            }
        }
    }

    /// Reset to the post-construction state. Configuration, registered
    /// listeners and the segment callback are retained; everything else
    /// (in-flight fragments, init blob, rings, playlist, sequence
    /// counter, failure latch) is discarded. Idempotent.
    pub fn flush(&mut self) {
        self.state = State::Ftyp;
        self.stash.clear();
        self.in_flight = None;
        self.ftyp = None;
        self.moof = None;
        self.init = None;
        self.latest = None;
        self.segments_published = 0;
        self.last_instant = None;
        self.last_timestamp = None;
        self.failure = None;
        if let Some(hls) = &mut self.hls {
            hls.clear();
        }
        if let Some(buffer) = &mut self.buffer {
            buffer.clear();
        }
        if let Some(queue) = &mut self.queued {
            queue.clear();
        }
        debug!("segmenter reset");
    }

    /// Latest MIME string, populated at initialization.
    pub fn mime(&self) -> Option<&str> {
        self.init.as_ref().map(|init| init.mime.as_str())
    }

    /// Raw `ftyp‖moov` bytes of the current session.
    pub fn initialization(&self) -> Option<&Bytes> {
        self.init.as_ref().map(|init| &init.data)
    }

    /// The parsed init segment of the current session.
    pub fn init_segment(&self) -> Option<&InitSegment> {
        self.init.as_ref()
    }

    /// Bytes of the most recently published media segment.
    pub fn segment(&self) -> Option<&Bytes> {
        self.latest.as_ref().map(|segment| &segment.data)
    }

    /// The most recently published media segment with its metadata.
    pub fn latest_segment(&self) -> Option<&Segment> {
        self.latest.as_ref()
    }

    /// Wall-clock instant of the latest event (init or segment).
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.last_timestamp
    }

    /// Duration in seconds of the most recently published segment.
    pub fn duration(&self) -> Option<f64> {
        self.latest.as_ref().map(|segment| segment.duration)
    }

    /// Most recently assigned HLS sequence number.
    pub fn sequence(&self) -> Option<u64> {
        self.hls.as_ref().and_then(HlsWindow::last_sequence)
    }

    /// Current playlist text, regenerated after init and every segment.
    pub fn m3u8(&self) -> Option<&str> {
        self.hls.as_ref().and_then(HlsWindow::playlist)
    }

    /// Segment bytes for the decimal sequence string used in playlist
    /// URIs, while that sequence is still inside the HLS window.
    pub fn hls_segment(&self, sequence: &str) -> Option<Bytes> {
        let sequence: u64 = sequence.parse().ok()?;
        self.hls.as_ref()?.get(sequence)
    }

    /// Snapshot of the replay ring, oldest first. `None` when buffering
    /// is disabled or nothing has been buffered yet.
    pub fn buffer_list(&self) -> Option<Vec<Bytes>> {
        self.buffer
            .as_ref()
            .filter(|buffer| !buffer.is_empty())
            .map(SegmentBuffer::list)
    }

    /// Contiguous concatenation of the replay ring, oldest first.
    pub fn buffer_list_concat(&self) -> Option<Bytes> {
        self.buffer
            .as_ref()
            .filter(|buffer| !buffer.is_empty())
            .map(SegmentBuffer::concat)
    }

    /// `initialization‖buffer_list_concat`: a playable stream prefix.
    /// `None` when either part is missing.
    pub fn buffer_concat(&self) -> Option<Bytes> {
        let init = self.initialization()?;
        let tail = self.buffer_list_concat()?;
        let mut out = BytesMut::with_capacity(init.len() + tail.len());
        out.extend_from_slice(init);
        out.extend_from_slice(&tail);
        Some(out.freeze())
    }

    /// Number of media segments published this session.
    pub fn segments_published(&self) -> u64 {
        self.segments_published
    }

    /// Turn on the event queue backing the pull model.
    pub(crate) fn enable_event_queue(&mut self) {
        if self.queued.is_none() {
            self.queued = Some(VecDeque::new());
        }
    }

    pub(crate) fn pop_event(&mut self) -> Option<SegmenterEvent> {
        self.queued.as_mut()?.pop_front()
    }

    fn advance(&mut self, chunk: Bytes) -> Result<()> {
        debug_assert!(self.in_flight.is_none() || self.stash.is_empty());

        // An in-progress body swallows the chunk first; it may complete
        // mid-chunk and hand back an excess to re-feed.
        let mut data = match self.in_flight.take() {
            Some(mut body) => {
                body.push(chunk);
                if !body.is_complete() {
                    self.in_flight = Some(body);
                    return Ok(());
                }
                let (complete, rest) = body.finish();
                match self.state {
                    State::Moov => self.complete_moov(complete)?,
                    State::Mdat => self.complete_mdat(complete),
                    _ => unreachable!("in-flight body outside moov/mdat"),
                }
                rest
            }
            None => {
                if self.stash.is_empty() {
                    chunk
                } else {
                    self.stash.extend_from_slice(&chunk);
                    self.stash.split().freeze()
                }
            }
        };

        while !data.is_empty() {
            match self.step(data)? {
                Some(rest) => data = rest,
                None => break,
            }
        }
        Ok(())
    }

    /// Run one state transition over `data`; returns the remainder to
    /// re-feed, or `None` once the data is consumed or parked.
    fn step(&mut self, data: Bytes) -> Result<Option<Bytes>> {
        match self.state {
            State::Ftyp => self.step_ftyp(data),
            State::Moov => self.step_moov(data),
            State::Moof => self.step_moof(data),
            State::Mdat => self.step_mdat(data),
            State::Hunt => Ok(self.step_hunt(data)),
        }
    }

    fn step_ftyp(&mut self, data: Bytes) -> Result<Option<Bytes>> {
        match scan_box(&data, *b"ftyp") {
            BoxScan::Complete { data: ftyp, rest } => {
                debug!(len = ftyp.len(), "ftyp assembled");
                self.ftyp = Some(ftyp);
                self.state = State::Moov;
                Ok(Some(rest))
            }
            BoxScan::Partial { expected } => {
                self.hold_head_box("ftyp", expected, data)?;
                Ok(None)
            }
            BoxScan::Mismatch => Err(Fmp4Error::MissingFtyp),
        }
    }

    fn step_moov(&mut self, data: Bytes) -> Result<Option<Bytes>> {
        match scan_box(&data, *b"moov") {
            BoxScan::Complete { data: moov, rest } => {
                self.complete_moov(moov)?;
                Ok(Some(rest))
            }
            BoxScan::Partial {
                expected: Some(expected),
            } => {
                self.in_flight = Some(InFlightBox::new(expected, data));
                Ok(None)
            }
            BoxScan::Partial { expected: None } => {
                self.stash.extend_from_slice(&data);
                Ok(None)
            }
            BoxScan::Mismatch => Err(Fmp4Error::MissingMoov),
        }
    }

    fn step_moof(&mut self, data: Bytes) -> Result<Option<Bytes>> {
        match scan_box(&data, *b"moof") {
            BoxScan::Complete { data: moof, rest } => {
                self.moof = Some(moof);
                self.state = State::Mdat;
                Ok(Some(rest))
            }
            BoxScan::Partial { expected } => {
                self.hold_head_box("moof", expected, data)?;
                Ok(None)
            }
            BoxScan::Mismatch => {
                if self.segments_published == 0 {
                    return Err(Fmp4Error::MissingMoof);
                }
                warn!("moof marker lost mid-stream, hunting for the next fragment");
                self.state = State::Hunt;
                Ok(Some(data))
            }
        }
    }

    fn step_mdat(&mut self, data: Bytes) -> Result<Option<Bytes>> {
        match scan_box(&data, *b"mdat") {
            BoxScan::Complete { data: mdat, rest } => {
                self.complete_mdat(mdat);
                Ok(Some(rest))
            }
            BoxScan::Partial {
                expected: Some(expected),
            } => {
                self.in_flight = Some(InFlightBox::new(expected, data));
                Ok(None)
            }
            BoxScan::Partial { expected: None } => {
                self.stash.extend_from_slice(&data);
                Ok(None)
            }
            BoxScan::Mismatch => Err(Fmp4Error::MissingMdat),
        }
    }

    /// Scan for the next `moof` marker in corrupt input. A usable marker
    /// sits at index ≥ 4 (its length prefix is still in front) and
    /// declares a plausible box length; anything else is a false positive
    /// to skip past. No usable marker keeps hunting with a short tail
    /// retained for boundary straddles.
    fn step_hunt(&mut self, data: Bytes) -> Option<Bytes> {
        let mut search_from = 0;
        while let Some(found) = find_marker(&data[search_from..], b"moof") {
            let index = search_from + found;
            if index >= 4 {
                let declared = u32::from_be_bytes([
                    data[index - 4],
                    data[index - 3],
                    data[index - 2],
                    data[index - 1],
                ]) as usize;
                if (BOX_HEADER_SIZE..=MAX_HEAD_BOX_SIZE).contains(&declared) {
                    debug!(discarded = index - 4, "recovered moof marker while hunting");
                    self.state = State::Moof;
                    return Some(data.slice(index - 4..));
                }
            }
            search_from = index + 1;
        }

        let keep = data.len().min(HUNT_TAIL);
        self.stash.extend_from_slice(&data[data.len() - keep..]);
        None
    }

    /// Park a truncated `ftyp`/`moof` prefix for the next chunk. These
    /// boxes are structurally small; an implausible declared length is
    /// corruption, not fragmentation.
    fn hold_head_box(
        &mut self,
        fourcc: &'static str,
        expected: Option<usize>,
        data: Bytes,
    ) -> Result<()> {
        if let Some(declared) = expected
            && declared > MAX_HEAD_BOX_SIZE
        {
            return Err(Fmp4Error::OversizedBox { fourcc, declared });
        }
        self.stash.extend_from_slice(&data);
        Ok(())
    }

    fn complete_moov(&mut self, moov: Bytes) -> Result<()> {
        let mut blob = BytesMut::with_capacity(
            self.ftyp.as_ref().map_or(0, Bytes::len) + moov.len(),
        );
        if let Some(ftyp) = self.ftyp.take() {
            blob.extend_from_slice(&ftyp);
        }
        blob.extend_from_slice(&moov);

        let init = InitSegment::parse(blob.freeze())?;

        self.last_instant = Some(Instant::now());
        self.last_timestamp = Some(SystemTime::now());
        if let Some(hls) = &mut self.hls {
            hls.start();
        }
        self.init = Some(init);
        self.state = State::Moof;

        if let Some(init) = &self.init {
            if let Some(queue) = &mut self.queued {
                queue.push_back(SegmenterEvent::Initialized(init.clone()));
            }
            for listener in &mut self.init_listeners {
                listener(init);
            }
        }
        Ok(())
    }

    fn complete_mdat(&mut self, mdat: Bytes) {
        let mut data = BytesMut::with_capacity(
            self.moof.as_ref().map_or(0, Bytes::len) + mdat.len(),
        );
        if let Some(moof) = self.moof.take() {
            data.extend_from_slice(&moof);
        }
        data.extend_from_slice(&mdat);
        self.publish(data.freeze());
        self.state = State::Moof;
    }

    /// Publish one assembled `moof‖mdat` segment: timing, accessors,
    /// rings, playlist, then delivery.
    fn publish(&mut self, data: Bytes) {
        let now = Instant::now();
        let duration = self
            .last_instant
            .map(|previous| now.duration_since(previous).as_secs_f64())
            .unwrap_or(0.0);
        self.last_instant = Some(now);
        self.last_timestamp = Some(SystemTime::now());

        let sequence = self
            .hls
            .as_mut()
            .map(|hls| hls.push(data.clone(), duration));

        self.latest = Some(Segment {
            data: data.clone(),
            duration,
            sequence,
        });
        self.segments_published += 1;

        if let Some(buffer) = &mut self.buffer {
            buffer.push(data.clone());
        }

        if let Some(segment) = &self.latest {
            if let Some(queue) = &mut self.queued {
                queue.push_back(SegmenterEvent::Segment(segment.clone()));
            }
            if let Some(callback) = &mut self.segment_callback {
                callback(segment);
            }
            for listener in &mut self.segment_listeners {
                listener(segment);
            }
        }
        debug!(?sequence, duration, len = data.len(), "media segment published");
    }

    #[cfg(test)]
    fn hls_window_len(&self) -> usize {
        self.hls.as_ref().map_or(0, HlsWindow::len)
    }
}
