//! HLS segment window and playlist text generation.
//!
//! The URI conventions are load-bearing: an HTTP front-end maps
//! `init-<base>.mp4` back to the init segment accessor and
//! `<base><sequence>.m4s` back to [`hls_segment`], so the playlist must
//! reference exactly the sequences currently held in the window.
//!
//! [`hls_segment`]: crate::Fmp4Segmenter::hls_segment

use std::collections::VecDeque;
use std::fmt::Write as _;

use bytes::Bytes;
use tracing::debug;

/// Smallest accepted playlist window.
pub(crate) const MIN_LIST_SIZE: usize = 2;
/// Largest accepted playlist window.
pub(crate) const MAX_LIST_SIZE: usize = 10;
/// Window size used when HLS is enabled without an explicit bound.
pub(crate) const DEFAULT_LIST_SIZE: usize = 4;

#[derive(Debug)]
struct HlsEntry {
    sequence: u64,
    duration: f64,
    data: Bytes,
}

/// Sliding window of the most recent media segments plus the playlist
/// text referencing exactly the window contents.
#[derive(Debug)]
pub(crate) struct HlsWindow {
    base: String,
    bound: usize,
    next_sequence: u64,
    entries: VecDeque<HlsEntry>,
    playlist: Option<String>,
}

impl HlsWindow {
    pub(crate) fn new(base: String, bound: usize) -> Self {
        Self {
            base,
            bound,
            next_sequence: 0,
            entries: VecDeque::with_capacity(bound),
            playlist: None,
        }
    }

    /// Begin a session: publish the init-only playlist.
    pub(crate) fn start(&mut self) {
        self.regenerate();
    }

    /// Append a segment, assign its sequence number, evict past the
    /// bound and regenerate the playlist.
    pub(crate) fn push(&mut self, data: Bytes, duration: f64) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push_back(HlsEntry {
            sequence,
            duration,
            data,
        });
        while self.entries.len() > self.bound {
            let evicted = self.entries.pop_front();
            if let Some(entry) = evicted {
                debug!(sequence = entry.sequence, "evicted segment from playlist window");
            }
        }
        self.regenerate();
        sequence
    }

    /// Segment bytes for a sequence number still inside the window.
    pub(crate) fn get(&self, sequence: u64) -> Option<Bytes> {
        self.entries
            .iter()
            .find(|entry| entry.sequence == sequence)
            .map(|entry| entry.data.clone())
    }

    /// Sequence number most recently assigned, if any.
    pub(crate) fn last_sequence(&self) -> Option<u64> {
        self.next_sequence.checked_sub(1)
    }

    pub(crate) fn playlist(&self) -> Option<&str> {
        self.playlist.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop all window state for a fresh session.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.next_sequence = 0;
        self.playlist = None;
    }

    fn regenerate(&mut self) {
        let target_duration = self
            .entries
            .back()
            .map(|entry| entry.duration.round() as u64)
            .unwrap_or(0);
        let media_sequence = self
            .entries
            .front()
            .map(|entry| entry.sequence)
            .unwrap_or(0);

        let mut text = String::with_capacity(128 + self.entries.len() * 48);
        text.push_str("#EXTM3U\n");
        text.push_str("#EXT-X-VERSION:7\n");
        text.push_str("#EXT-X-ALLOW-CACHE:NO\n");
        let _ = writeln!(text, "#EXT-X-TARGETDURATION:{target_duration}");
        let _ = writeln!(text, "#EXT-X-MEDIA-SEQUENCE:{media_sequence}");
        let _ = writeln!(text, "#EXT-X-MAP:URI=\"init-{}.mp4\"", self.base);
        for entry in &self.entries {
            let _ = writeln!(text, "#EXTINF:{:.6},", entry.duration);
            let _ = writeln!(text, "{}{}.m4s", self.base, entry.sequence);
        }

        self.playlist = Some(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_only_playlist() {
        let mut window = HlsWindow::new("cam".to_string(), 4);
        assert!(window.playlist().is_none());
        window.start();
        assert_eq!(
            window.playlist().unwrap(),
            "#EXTM3U\n\
             #EXT-X-VERSION:7\n\
             #EXT-X-ALLOW-CACHE:NO\n\
             #EXT-X-TARGETDURATION:0\n\
             #EXT-X-MEDIA-SEQUENCE:0\n\
             #EXT-X-MAP:URI=\"init-cam.mp4\"\n"
        );
    }

    #[test]
    fn test_push_assigns_contiguous_sequences() {
        let mut window = HlsWindow::new("cam".to_string(), 4);
        window.start();
        assert_eq!(window.push(Bytes::from_static(b"a"), 1.0), 0);
        assert_eq!(window.push(Bytes::from_static(b"b"), 1.0), 1);
        assert_eq!(window.last_sequence(), Some(1));
    }

    #[test]
    fn test_playlist_references_window_contents() {
        let mut window = HlsWindow::new("cam".to_string(), 3);
        window.start();
        for _ in 0..7 {
            window.push(Bytes::from_static(b"seg"), 0.5);
        }

        let playlist = window.playlist().unwrap();
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:4\n"));
        assert!(playlist.contains("cam4.m4s\n"));
        assert!(playlist.contains("cam5.m4s\n"));
        assert!(playlist.contains("cam6.m4s\n"));
        assert!(!playlist.contains("cam3.m4s"));
        assert_eq!(playlist.matches("#EXTINF:").count(), 3);
    }

    #[test]
    fn test_extinf_has_six_decimals_and_rounded_target() {
        let mut window = HlsWindow::new("s".to_string(), 4);
        window.start();
        window.push(Bytes::from_static(b"x"), 1.5);
        let playlist = window.playlist().unwrap();
        assert!(playlist.contains("#EXTINF:1.500000,\n"));
        assert!(playlist.contains("#EXT-X-TARGETDURATION:2\n"));
    }

    #[test]
    fn test_get_hit_and_miss() {
        let mut window = HlsWindow::new("cam".to_string(), 2);
        window.start();
        window.push(Bytes::from_static(b"zero"), 1.0);
        window.push(Bytes::from_static(b"one"), 1.0);
        window.push(Bytes::from_static(b"two"), 1.0);

        // Sequence 0 was evicted by the third push.
        assert!(window.get(0).is_none());
        assert_eq!(window.get(1).unwrap().as_ref(), b"one");
        assert_eq!(window.get(2).unwrap().as_ref(), b"two");
        assert!(window.get(3).is_none());
    }

    #[test]
    fn test_clear_resets_sequence_and_playlist() {
        let mut window = HlsWindow::new("cam".to_string(), 2);
        window.start();
        window.push(Bytes::from_static(b"a"), 1.0);
        window.clear();
        assert!(window.playlist().is_none());
        assert_eq!(window.last_sequence(), None);
        window.start();
        assert_eq!(window.push(Bytes::from_static(b"b"), 1.0), 0);
    }
}
