//! Shared data model for transcoder sessions: the `Variant` the caller asks
//! for, the session's lifecycle state machine, and the timing constants the
//! session loop tunes its waits against.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How far past `latestSegment` a request may land before it counts as a
/// forward seek.
pub const SEEK_AHEAD_TOLERANCE: u32 = 10;
/// Bound on the stderr ring buffer kept per session.
pub const STDERR_RING_CAPACITY: usize = 64 * 1024;

pub const NORMAL_WAIT_TIMEOUT: Duration = Duration::from_secs(9);
pub const FAR_AHEAD_WAIT_TIMEOUT: Duration = Duration::from_secs(15);
pub const STABILITY_WINDOW: Duration = Duration::from_millis(200);
pub const STABILITY_POLL_CEILING: Duration = Duration::from_secs(9);
pub const EXTENDED_STABILITY_WINDOW: Duration = Duration::from_millis(500);
pub const EXTENDED_STABILITY_POLL_CEILING: Duration = Duration::from_secs(4);

/// `(videoId, label)`, the key a session and its viewer entry share.
pub type SessionKey = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Video,
    Audio,
}

/// A quality/format rendition, created per-request from static configuration
/// and codec resolution.
#[derive(Debug, Clone)]
pub struct Variant {
    pub label: String,
    pub kind: VariantKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub is_sdr: Option<bool>,
    pub codec_strategy: Option<String>,
    pub audio_track_index: Option<u32>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
}

impl Variant {
    pub fn video(label: impl Into<String>, width: u32, height: u32, bitrate_kbps: u32) -> Self {
        Self {
            label: label.into(),
            kind: VariantKind::Video,
            width: Some(width),
            height: Some(height),
            bitrate_kbps: Some(bitrate_kbps),
            is_sdr: Some(true),
            codec_strategy: None,
            audio_track_index: None,
            channels: None,
            sample_rate: None,
        }
    }

    pub fn audio(track_index: u32, codec: &str, channels: u16, sample_rate: u32) -> Self {
        Self {
            label: format!("audio_{}_{}", track_index, codec),
            kind: VariantKind::Audio,
            width: None,
            height: None,
            bitrate_kbps: None,
            is_sdr: None,
            codec_strategy: Some(codec.to_string()),
            audio_track_index: Some(track_index),
            channels: Some(channels),
            sample_rate: Some(sample_rate),
        }
    }

    /// Parses the `audio_<trackIndex>_<codec>` label shape. Labels are the
    /// only signal available for telling an audio variant from a video one.
    pub fn parse_audio_label(label: &str) -> Option<(u32, String)> {
        let rest = label.strip_prefix("audio_")?;
        let (idx_str, codec) = rest.split_once('_')?;
        if codec.is_empty() {
            return None;
        }
        let idx = idx_str.parse().ok()?;
        Some((idx, codec.to_string()))
    }

    pub fn is_fragmented_mp4(&self) -> bool {
        self.codec_strategy
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case("hevc") || c.eq_ignore_ascii_case("h265"))
            .unwrap_or(false)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Paused,
    Finished,
    Failed,
}

impl SessionState {
    fn to_u8(self) -> u8 {
        match self {
            SessionState::Starting => 0,
            SessionState::Running => 1,
            SessionState::Paused => 2,
            SessionState::Finished => 3,
            SessionState::Failed => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Starting,
            1 => SessionState::Running,
            2 => SessionState::Paused,
            3 => SessionState::Finished,
            _ => SessionState::Failed,
        }
    }
}

/// Lock-free state cell so the stderr reader task and request-handling tasks
/// can both observe/update session state without holding a lock across an
/// `.await`.
pub struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub fn new(initial: SessionState) -> Self {
        Self(AtomicU8::new(initial.to_u8()))
    }

    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: SessionState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}

/// Bounded 64 KiB ring buffer of captured stderr, oldest bytes discarded once
/// full.
#[derive(Default)]
pub struct StderrRing {
    buf: Mutex<VecDeque<u8>>,
}

impl StderrRing {
    pub fn push_line(&self, line: &str) {
        let mut buf = self.buf.lock().unwrap();
        buf.extend(line.as_bytes());
        buf.push_back(b'\n');
        while buf.len() > STDERR_RING_CAPACITY {
            buf.pop_front();
        }
    }

    pub fn tail(&self) -> String {
        let buf = self.buf.lock().unwrap();
        let bytes: Vec<u8> = buf.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_audio_label_extracts_track_and_codec() {
        assert_eq!(
            Variant::parse_audio_label("audio_0_aac"),
            Some((0, "aac".to_string()))
        );
        assert_eq!(Variant::parse_audio_label("1080p"), None);
        assert_eq!(Variant::parse_audio_label("audio_not_a_number_aac"), None);
    }

    #[test]
    fn stderr_ring_drops_oldest_bytes_once_full() {
        let ring = StderrRing::default();
        let line = "x".repeat(1024);
        for _ in 0..(STDERR_RING_CAPACITY / line.len() + 10) {
            ring.push_line(&line);
        }
        assert!(ring.tail().len() <= STDERR_RING_CAPACITY);
    }

    #[test]
    fn atomic_session_state_round_trips() {
        let state = AtomicSessionState::new(SessionState::Starting);
        assert_eq!(state.load(), SessionState::Starting);
        state.store(SessionState::Running);
        assert_eq!(state.load(), SessionState::Running);
    }
}
