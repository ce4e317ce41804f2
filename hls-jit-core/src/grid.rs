//! The canonical segment grid: a deterministic, GOP-aligned segmentation of a
//! source media file, computed once per video and shared by every variant
//! encoder so their segment boundaries line up byte-for-byte.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{HlsJitError, Result};
use crate::probe::MediaMeta;

/// 100 ns ticks per second, the wire unit for segment offsets and durations.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

const DEFAULT_AAC_FRAME_SIZE: u32 = 1024;
const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 48_000;
const MAX_CONTINUED_FRACTION_TERMS: usize = 20;
const MAX_CONVERGENT_DENOMINATOR: u64 = 10_000;
const MAX_GOP_MULTIPLE: u32 = 10;
const FALLBACK_DURATION_SECS: f64 = 7_200.0;
const MAX_DURATION_SECS: f64 = 86_400.0;

/// One time-bounded slice of the source media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub index: u32,
    pub start_ticks: i64,
    pub duration_ticks: i64,
    pub duration_seconds: f64,
}

/// The full, immutable segment grid for one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    pub video_id: String,
    pub target_segment_seconds: f64,
    pub gop_frames: u32,
    pub segments: Vec<SegmentDescriptor>,
    pub video_fps: f64,
    pub audio_sample_rate: u32,
    /// Set when no GOP/audio-frame alignment could be found within the search
    /// bounds and the fallback `ceil(target * fps)` grid was used instead.
    pub approximate: bool,
}

impl Grid {
    pub fn media_duration_ticks(&self) -> i64 {
        self.segments.iter().map(|s| s.duration_ticks).sum()
    }

    /// Locate the segment whose `[start, start+duration)` window contains
    /// `seconds`. Clamps to the last segment if `seconds` is past the end,
    /// which is what `TranscoderSession`'s stderr-progress handler relies on
    /// (`segmentIndexAt(processed) - 1` must never underflow or panic).
    pub fn segment_index_at(&self, seconds: f64) -> usize {
        let ticks = (seconds * TICKS_PER_SECOND as f64).round() as i64;
        match self
            .segments
            .binary_search_by(|seg| seg.start_ticks.cmp(&ticks))
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => {
                let candidate = i - 1;
                if candidate >= self.segments.len() {
                    self.segments.len().saturating_sub(1)
                } else {
                    candidate
                }
            }
        }
    }

    pub fn extension(&self, fragmented_mp4: bool) -> &'static str {
        if fragmented_mp4 {
            "m4s"
        } else {
            "ts"
        }
    }
}

/// Pure, deterministic grid computation from source media metadata.
pub struct GridPlanner;

impl GridPlanner {
    /// `plan(videoId, mediaMeta, targetSeconds) -> Grid`, as specified.
    pub fn plan(video_id: &str, media_meta: &MediaMeta, target_seconds: f64) -> Result<Grid> {
        let fps = media_meta.video_fps;
        if !(fps.is_finite() && fps > 0.0) {
            return Err(HlsJitError::ProbeError {
                video_id: video_id.to_string(),
                reason: "invalid or missing video frame rate".to_string(),
            });
        }

        let sample_rate = media_meta.audio_sample_rate.unwrap_or(DEFAULT_AUDIO_SAMPLE_RATE);
        let aac_frame_size = DEFAULT_AAC_FRAME_SIZE;

        let (gop_frames, approximate) =
            best_gop_alignment(fps, sample_rate, aac_frame_size, target_seconds)
                .map(|frames| (frames, false))
                .unwrap_or_else(|| ((target_seconds * fps).ceil().max(1.0) as u32, true));

        let seg_sec = gop_frames as f64 / fps;

        let duration_secs = media_meta
            .duration_seconds
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(FALLBACK_DURATION_SECS)
            .min(MAX_DURATION_SECS);

        let total_ticks = (duration_secs * TICKS_PER_SECOND as f64).round() as i64;
        let nominal_ticks = (seg_sec * TICKS_PER_SECOND as f64).round() as i64;
        if nominal_ticks <= 0 || total_ticks <= 0 {
            return Err(HlsJitError::ProbeError {
                video_id: video_id.to_string(),
                reason: "computed a non-positive segment duration".to_string(),
            });
        }

        let segment_count = ((total_ticks as f64) / (nominal_ticks as f64)).ceil() as u32;
        let segment_count = segment_count.max(1);

        let mut segments = Vec::with_capacity(segment_count as usize);
        let mut start = 0i64;
        for index in 0..segment_count {
            let duration_ticks = if index + 1 == segment_count {
                total_ticks - start
            } else {
                nominal_ticks
            };
            segments.push(SegmentDescriptor {
                index,
                start_ticks: start,
                duration_ticks,
                duration_seconds: duration_ticks as f64 / TICKS_PER_SECOND as f64,
            });
            start += duration_ticks;
        }

        Ok(Grid {
            video_id: video_id.to_string(),
            target_segment_seconds: target_seconds,
            gop_frames,
            segments,
            video_fps: fps,
            audio_sample_rate: sample_rate,
            approximate,
        })
    }
}

/// Continued-fraction search over `audioFrameDur/videoFrameDur`, picking the
/// `(convergent, multiple)` pair whose `segSec` is closest to `targetSeconds`
/// without exceeding `1.5 * targetSeconds`.
fn best_gop_alignment(
    fps: f64,
    sample_rate: u32,
    aac_frame_size: u32,
    target_seconds: f64,
) -> Option<u32> {
    let video_frame_dur = 1.0 / fps;
    let audio_frame_dur = aac_frame_size as f64 / sample_rate as f64;
    let ratio = audio_frame_dur / video_frame_dur;

    let convergents = continued_fraction_convergents(ratio, MAX_CONTINUED_FRACTION_TERMS);

    let mut best: Option<(u32, f64)> = None;
    for (audio_frames, video_frames) in convergents {
        if video_frames == 0 || audio_frames == 0 || video_frames > MAX_CONVERGENT_DENOMINATOR {
            continue;
        }
        for m in 1..=MAX_GOP_MULTIPLE {
            let gop_frames = m as u64 * video_frames;
            let seg_sec = gop_frames as f64 / fps;
            if seg_sec > 1.5 * target_seconds {
                break;
            }
            let score = (seg_sec - target_seconds).abs();
            if best.map(|(_, best_score)| score < best_score).unwrap_or(true) {
                best = Some((gop_frames as u32, score));
            }
        }
    }

    best.map(|(gop_frames, _)| gop_frames)
}

/// Standard continued-fraction convergents of a positive real number,
/// returned as `(numerator, denominator)` pairs, terminating early once the
/// denominator exceeds `MAX_CONVERGENT_DENOMINATOR`.
fn continued_fraction_convergents(x: f64, max_terms: usize) -> Vec<(u64, u64)> {
    let mut convergents = Vec::new();
    if !x.is_finite() || x <= 0.0 {
        return convergents;
    }

    let (mut p_prev, mut p_curr) = (1u64, 0u64);
    let (mut q_prev, mut q_curr) = (0u64, 1u64);
    let mut remainder = x;

    for _ in 0..max_terms {
        let a = remainder.floor();
        if !(a.is_finite()) || a < 0.0 || a > u64::MAX as f64 {
            break;
        }
        let a = a as u64;

        let p_next = a.saturating_mul(p_curr).saturating_add(p_prev);
        let q_next = a.saturating_mul(q_curr).saturating_add(q_prev);

        if q_next == 0 || q_next > MAX_CONVERGENT_DENOMINATOR {
            break;
        }

        convergents.push((p_next, q_next));
        p_prev = p_curr;
        p_curr = p_next;
        q_prev = q_curr;
        q_curr = q_next;

        let frac = remainder - a as f64;
        if frac < 1e-9 {
            break;
        }
        remainder = 1.0 / frac;
    }

    convergents
}

/// Compute-once, broadcast-to-all-readers cache of grids keyed by `videoId`,
/// in the same get-or-create-in-flight idiom the HTTP layer uses for cached
/// segment bytes: the first caller for a key computes it, concurrent callers
/// await the same `OnceCell`.
#[derive(Default)]
pub struct GridCache {
    cells: DashMap<String, Arc<OnceCell<Grid>>>,
}

impl GridCache {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    pub async fn get_or_compute(
        &self,
        video_id: &str,
        media_meta: &MediaMeta,
        target_seconds: f64,
    ) -> Result<Grid> {
        let cell = self
            .cells
            .entry(video_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let video_id_owned = video_id.to_string();
        let media_meta = media_meta.clone();
        cell.get_or_try_init(|| async move {
            GridPlanner::plan(&video_id_owned, &media_meta, target_seconds)
        })
        .await
        .cloned()
    }

    pub fn invalidate(&self, video_id: &str) {
        self.cells.remove(video_id);
    }
}
