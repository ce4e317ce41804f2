//! Runtime configuration, loaded from environment variables.
//!
//! Mirrors the environment surface described in the operations contract: one
//! knob per `JIT_*`/`HLS_*`/`VIDEO_*`/`HARDWARE_*`/`VIEWER_*` variable. Call
//! [`Config::from_env`] once at process startup, after `dotenvy::dotenv().ok()`
//! has had a chance to populate `std::env` from a local `.env` file.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hardware acceleration family to pass to the transcoder as `-hwaccel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HwAccelType {
    Cuda,
    Qsv,
}

impl HwAccelType {
    fn from_env_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" => Some(HwAccelType::Cuda),
            "qsv" => Some(HwAccelType::Qsv),
            "" => None,
            _ => None,
        }
    }
}

/// Top-level supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `JIT_TRANSCODING_ENABLED` — master feature flag.
    pub jit_transcoding_enabled: bool,
    /// `HLS_SEGMENT_TIME` — target segment duration in seconds.
    pub hls_segment_time: f64,
    /// `HLS_OUTPUT_DIR` — root directory for per-(video, variant) output.
    pub hls_output_dir: PathBuf,
    /// `VIDEO_SOURCE_DIR` — root directory source media is resolved against.
    pub video_source_dir: PathBuf,
    /// `FFMPEG_PATH` — path to the ffmpeg binary.
    pub ffmpeg_path: PathBuf,
    /// `FFPROBE_PATH` — path to the ffprobe binary.
    pub ffprobe_path: PathBuf,
    /// `MAX_HW_PROCESSES` — bound on concurrent hardware-encoder sessions.
    pub max_hw_processes: usize,
    /// `HARDWARE_ENCODING_ENABLED` — whether hardware encoding may be attempted at all.
    pub hardware_encoding_enabled: bool,
    /// `HWACCEL_TYPE` — `cuda`, `qsv`, or absent (software only).
    pub hwaccel_type: Option<HwAccelType>,
    /// `PRESERVE_SEGMENTS` — keep `*.ts`/`*.m4s` on `Stop()` instead of deleting them.
    pub preserve_segments: bool,
    /// `PRESERVE_FFMPEG_PLAYLIST` — keep `ffmpeg_playlist.m3u8` on `Stop()`.
    pub preserve_ffmpeg_playlist: bool,
    /// `TRANSCODING_PAUSE_THRESHOLD` — pause-sweep inactivity threshold.
    pub pause_threshold: Duration,
    /// `VIEWER_INACTIVITY_THRESHOLD` — cleanup-sweep inactivity threshold.
    pub viewer_inactivity_threshold: Duration,
    /// `VIEWER_CHECK_INTERVAL` — how often the cleanup sweep runs.
    pub viewer_check_interval: Duration,
    /// `WEB_SUPPORTED_CODECS` — comma-separated audio codec allow-list.
    pub web_supported_codecs: Vec<String>,
}

impl Config {
    /// Load configuration from the process environment, falling back to the
    /// defaults named in the operations contract for anything unset.
    pub fn from_env() -> Self {
        Self {
            jit_transcoding_enabled: env_bool("JIT_TRANSCODING_ENABLED", true),
            hls_segment_time: env_f64("HLS_SEGMENT_TIME", 6.0),
            hls_output_dir: env_path("HLS_OUTPUT_DIR", "/var/lib/hls-jit/output"),
            video_source_dir: env_path("VIDEO_SOURCE_DIR", "/var/lib/hls-jit/media"),
            ffmpeg_path: env_path("FFMPEG_PATH", "ffmpeg"),
            ffprobe_path: env_path("FFPROBE_PATH", "ffprobe"),
            max_hw_processes: env_usize("MAX_HW_PROCESSES", 2),
            hardware_encoding_enabled: env_bool("HARDWARE_ENCODING_ENABLED", false),
            hwaccel_type: std::env::var("HWACCEL_TYPE")
                .ok()
                .and_then(|s| HwAccelType::from_env_str(&s)),
            preserve_segments: env_bool("PRESERVE_SEGMENTS", false),
            preserve_ffmpeg_playlist: env_bool("PRESERVE_FFMPEG_PLAYLIST", false),
            pause_threshold: Duration::from_secs(env_u64("TRANSCODING_PAUSE_THRESHOLD", 60)),
            viewer_inactivity_threshold: Duration::from_secs(env_u64(
                "VIEWER_INACTIVITY_THRESHOLD",
                180,
            )),
            viewer_check_interval: Duration::from_secs(env_u64("VIEWER_CHECK_INTERVAL", 10)),
            web_supported_codecs: std::env::var("WEB_SUPPORTED_CODECS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|c| c.trim().to_ascii_lowercase())
                        .filter(|c| !c.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| vec!["aac".to_string(), "ac3".to_string(), "eac3".to_string()]),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jit_transcoding_enabled: true,
            hls_segment_time: 6.0,
            hls_output_dir: PathBuf::from("/var/lib/hls-jit/output"),
            video_source_dir: PathBuf::from("/var/lib/hls-jit/media"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            max_hw_processes: 2,
            hardware_encoding_enabled: false,
            hwaccel_type: None,
            preserve_segments: false,
            preserve_ffmpeg_playlist: false,
            pause_threshold: Duration::from_secs(60),
            viewer_inactivity_threshold: Duration::from_secs(180),
            viewer_check_interval: Duration::from_secs(10),
            web_supported_codecs: vec!["aac".to_string(), "ac3".to_string(), "eac3".to_string()],
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operations_contract() {
        let config = Config::default();
        assert!(config.jit_transcoding_enabled);
        assert_eq!(config.hls_segment_time, 6.0);
        assert_eq!(config.max_hw_processes, 2);
        assert!(!config.hardware_encoding_enabled);
        assert_eq!(config.pause_threshold, Duration::from_secs(60));
        assert_eq!(config.viewer_inactivity_threshold, Duration::from_secs(180));
    }

    #[test]
    fn hwaccel_type_parses_known_values() {
        assert_eq!(HwAccelType::from_env_str("cuda"), Some(HwAccelType::Cuda));
        assert_eq!(HwAccelType::from_env_str("QSV"), Some(HwAccelType::Qsv));
        assert_eq!(HwAccelType::from_env_str("nvenc"), None);
    }
}
