//! Media probing is an external collaborator: this module defines the
//! boundary (`MediaProbe` + `MediaMeta`) that `GridPlanner` and
//! `TranscoderSession` depend on, plus the one production implementation that
//! actually has to talk to a child process (`ffprobe`).

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tracing::warn;

use crate::error::{HlsJitError, Result};

/// Color/dynamic-range classification used on the `#EXT-X-VIDEO-RANGE` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoRange {
    Sdr,
    Hlg,
    Pq,
}

impl VideoRange {
    pub fn as_hls_str(self) -> &'static str {
        match self {
            VideoRange::Sdr => "SDR",
            VideoRange::Hlg => "HLG",
            VideoRange::Pq => "PQ",
        }
    }
}

/// Normalized metadata about one source media file, as returned by an
/// external probing service (codec, resolution, frame rate, per-stream
/// duration, HDR/color metadata, 10-bit flag, profile, level).
#[derive(Debug, Clone)]
pub struct MediaMeta {
    pub duration_seconds: Option<f64>,
    pub video_fps: f64,
    pub video_codec: String,
    pub width: u32,
    pub height: u32,
    pub profile: Option<String>,
    pub level: Option<i32>,
    pub is_10bit: bool,
    pub video_range: VideoRange,
    pub audio_sample_rate: Option<u32>,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<u16>,
    /// Ascending keyframe (video) presentation timestamps, in seconds.
    /// Used by `nearest_keyframe_at` to resolve a seek-adjusted start point.
    pub keyframe_timestamps_secs: Vec<f64>,
}

impl MediaMeta {
    /// The nearest video keyframe timestamp `<= target_ts`, or `target_ts`
    /// itself if no keyframe index is available or none precede it.
    pub fn nearest_keyframe_at(&self, target_ts: f64) -> f64 {
        match self.keyframe_timestamps_secs.partition_point(|&ts| ts <= target_ts) {
            0 => self.keyframe_timestamps_secs.first().copied().unwrap_or(0.0).min(target_ts),
            i => self.keyframe_timestamps_secs[i - 1],
        }
    }

    /// The nearest audio-frame-aligned timestamp `<= target_ts`, floored to a
    /// multiple of `frame_size / sample_rate`.
    pub fn nearest_audio_frame_at(&self, target_ts: f64, sample_rate: u32, frame_size: u32) -> f64 {
        if sample_rate == 0 {
            return target_ts.max(0.0);
        }
        let frame_dur = frame_size as f64 / sample_rate as f64;
        if frame_dur <= 0.0 {
            return target_ts.max(0.0);
        }
        (target_ts.max(0.0) / frame_dur).floor() * frame_dur
    }

    #[cfg(test)]
    pub(crate) fn test_default() -> Self {
        Self {
            duration_seconds: Some(600.0),
            video_fps: 24.0,
            video_codec: "h264".to_string(),
            width: 1920,
            height: 1080,
            profile: Some("high".to_string()),
            level: Some(41),
            is_10bit: false,
            video_range: VideoRange::Sdr,
            audio_sample_rate: Some(48_000),
            audio_codec: Some("aac".to_string()),
            audio_channels: Some(2),
            keyframe_timestamps_secs: Vec::new(),
        }
    }
}

/// External collaborator boundary: anything that can turn a source path into
/// `MediaMeta`.
pub trait MediaProbe: Send + Sync {
    fn probe(&self, source_path: &Path) -> Result<MediaMeta>;
}

/// Production implementation: shells out to `ffprobe -print_format json`.
pub struct FfprobeMediaProbe {
    ffprobe_path: std::path::PathBuf,
}

impl FfprobeMediaProbe {
    pub fn new(ffprobe_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Ascending video keyframe presentation timestamps, in seconds, used by
    /// `MediaMeta::nearest_keyframe_at` to resolve a seek-adjusted start
    /// point. `-skip_frame nokey` makes ffprobe decode only keyframes, so
    /// this stays cheap even on long sources.
    fn probe_keyframe_timestamps(&self, source_path: &Path) -> Result<Vec<f64>> {
        let video_id = source_path.to_string_lossy().to_string();
        let output = std::process::Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-skip_frame",
                "nokey",
                "-show_entries",
                "frame=pkt_pts_time,pts_time",
                "-of",
                "csv=p=0",
            ])
            .arg(source_path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| HlsJitError::ProbeError {
                video_id: video_id.clone(),
                reason: format!("failed to spawn ffprobe for keyframes: {e}"),
            })?;

        if !output.status.success() {
            return Err(HlsJitError::ProbeError {
                video_id,
                reason: format!(
                    "ffprobe keyframe scan exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut timestamps: Vec<f64> = stdout
            .lines()
            .filter_map(|line| line.split(',').find_map(|field| field.trim().parse::<f64>().ok()))
            .collect();
        timestamps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        timestamps.dedup();
        Ok(timestamps)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    level: Option<i32>,
    #[serde(default)]
    pix_fmt: Option<String>,
    #[serde(default)]
    color_transfer: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    sample_rate: Option<String>,
    #[serde(default)]
    channels: Option<u16>,
}

fn parse_rational_rate(s: &str) -> Option<f64> {
    let mut parts = s.split('/');
    let num: f64 = parts.next()?.parse().ok()?;
    let den: f64 = parts.next().unwrap_or("1").parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

fn classify_video_range(transfer: Option<&str>) -> VideoRange {
    match transfer.unwrap_or("") {
        "arib-std-b67" => VideoRange::Hlg,
        "smpte2084" => VideoRange::Pq,
        _ => VideoRange::Sdr,
    }
}

impl MediaProbe for FfprobeMediaProbe {
    fn probe(&self, source_path: &Path) -> Result<MediaMeta> {
        let video_id = source_path.to_string_lossy().to_string();
        let output = std::process::Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(source_path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| HlsJitError::ProbeError {
                video_id: video_id.clone(),
                reason: format!("failed to spawn ffprobe: {e}"),
            })?;

        if !output.status.success() {
            return Err(HlsJitError::ProbeError {
                video_id,
                reason: format!(
                    "ffprobe exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout).map_err(|e| {
            HlsJitError::ProbeError {
                video_id: video_id.clone(),
                reason: format!("failed to parse ffprobe JSON: {e}"),
            }
        })?;

        let video = parsed
            .streams
            .iter()
            .find(|s| s.codec_type == "video")
            .ok_or_else(|| HlsJitError::ProbeError {
                video_id: video_id.clone(),
                reason: "no video stream found".to_string(),
            })?;

        let audio = parsed.streams.iter().find(|s| s.codec_type == "audio");

        let fps = video
            .r_frame_rate
            .as_deref()
            .and_then(parse_rational_rate)
            .ok_or_else(|| HlsJitError::ProbeError {
                video_id: video_id.clone(),
                reason: "could not determine frame rate".to_string(),
            })?;

        let duration_seconds = parsed
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok());

        let is_10bit = video
            .pix_fmt
            .as_deref()
            .map(|p| p.contains("p10") || p.contains("10le") || p.contains("10be"))
            .unwrap_or(false);

        let keyframe_timestamps_secs = self.probe_keyframe_timestamps(source_path).unwrap_or_else(|e| {
            warn!(video_id = %video_id, error = %e, "keyframe timestamp probe failed, seeks will land at 0");
            Vec::new()
        });

        Ok(MediaMeta {
            duration_seconds,
            video_fps: fps,
            video_codec: video.codec_name.clone().unwrap_or_default(),
            width: video.width.unwrap_or(0),
            height: video.height.unwrap_or(0),
            profile: video.profile.clone(),
            level: video.level,
            is_10bit,
            video_range: classify_video_range(video.color_transfer.as_deref()),
            audio_sample_rate: audio.and_then(|a| a.sample_rate.as_deref()).and_then(|s| s.parse().ok()),
            audio_codec: audio.and_then(|a| a.codec_name.clone()),
            audio_channels: audio.and_then(|a| a.channels),
            keyframe_timestamps_secs,
        })
    }
}

/// In-memory stand-in for tests: maps source paths to canned `MediaMeta`.
#[derive(Default)]
pub struct FakeMediaProbe {
    entries: dashmap::DashMap<std::path::PathBuf, MediaMeta>,
}

impl FakeMediaProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<std::path::PathBuf>, meta: MediaMeta) {
        self.entries.insert(path.into(), meta);
    }
}

impl MediaProbe for FakeMediaProbe {
    fn probe(&self, source_path: &Path) -> Result<MediaMeta> {
        self.entries
            .get(source_path)
            .map(|r| r.clone())
            .ok_or_else(|| HlsJitError::ProbeError {
                video_id: source_path.to_string_lossy().to_string(),
                reason: "no fixture registered for this path".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_keyframe_floors_to_preceding_entry() {
        let mut m = MediaMeta::test_default();
        m.keyframe_timestamps_secs = vec![0.0, 6.0, 12.0, 18.0];
        assert_eq!(m.nearest_keyframe_at(13.5), 12.0);
        assert_eq!(m.nearest_keyframe_at(0.0), 0.0);
        assert_eq!(m.nearest_keyframe_at(100.0), 18.0);
    }

    #[test]
    fn nearest_audio_frame_floors_to_frame_boundary() {
        let m = MediaMeta::test_default();
        let t = m.nearest_audio_frame_at(10.03, 48_000, 1024);
        assert!(t <= 10.03);
        assert!((10.03 - t) < (1024.0 / 48_000.0));
    }

    #[test]
    fn fake_probe_round_trips_fixtures() {
        let probe = FakeMediaProbe::new();
        let path = std::path::PathBuf::from("/media/movie.mkv");
        probe.insert(&path, MediaMeta::test_default());
        let meta = probe.probe(&path).unwrap();
        assert_eq!(meta.width, 1920);
    }
}
