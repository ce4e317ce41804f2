//! One handler per route from spec.md §6, in the shape of the teacher's
//! `hls-vod-server/src/http/handlers.rs`: thin translation between axum
//! extractors and [`Supervisor`] calls, with error mapping delegated to
//! [`ServerError`]'s `IntoResponse` impl.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use hls_jit_core::playlist::master::{render_master_playlist, AudioTrackSummary, VideoVariantSummary};
use hls_jit_core::HlsJitError;

use crate::error::{Result, ServerError};
use crate::state::AppState;
use crate::variants::{audio_variant, find_rung, parse_track_segment, DEFAULT_VIDEO_LADDER};

fn ensure_enabled(state: &AppState) -> Result<()> {
    if state.config.jit_transcoding_enabled {
        Ok(())
    } else {
        Err(ServerError::Disabled)
    }
}

/// `GET /healthz` — not part of spec.md's contract, but every route layer in
/// the corpus carries one for its load balancer.
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

fn playlist_response(body: String) -> Response {
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/vnd.apple.mpegurl"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn segment_response(bytes: Vec<u8>, content_type: &'static str) -> Response {
    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("max-age=3600"),
    );
    response
}

fn content_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "ts" => "video/mp2t",
        "m4s" => "video/iso.segment",
        _ => "application/octet-stream",
    }
}

/// Splits a `"{nnn}.ts"`/`"{nnn}.m4s"` route segment into its base-10
/// segment index and extension (spec.md §6).
fn parse_segment_filename(name: &str) -> Option<(u32, &str)> {
    let (idx, ext) = name.rsplit_once('.')?;
    let index = idx.parse::<u32>().ok()?;
    Some((index, ext))
}

/// Query parameters enabling explicit-offset mode (spec.md §6): when both are
/// present, the session bypasses the streaming grid and transcodes exactly
/// `[runtimeTicks, runtimeTicks + actualSegmentLengthTicks)`.
#[derive(Debug, Deserialize)]
pub struct SegmentQuery {
    #[serde(rename = "runtimeTicks")]
    pub runtime_ticks: Option<i64>,
    #[serde(rename = "actualSegmentLengthTicks")]
    pub actual_segment_length_ticks: Option<i64>,
}

impl SegmentQuery {
    fn explicit_offset(&self) -> Option<(i64, i64)> {
        match (self.runtime_ticks, self.actual_segment_length_ticks) {
            (Some(start), Some(len)) if start >= 0 && len > 0 => Some((start, len)),
            _ => None,
        }
    }
}

async fn read_file(path: &std::path::Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| HlsJitError::IOError(e).into())
}

/// `GET /api/stream/{id}/master.m3u8`
pub async fn master_playlist(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
) -> Result<Response> {
    ensure_enabled(&state)?;
    let meta = state.supervisor.probe(&video_id).await?;

    let video_variants: Vec<VideoVariantSummary> = DEFAULT_VIDEO_LADDER
        .iter()
        .map(|r| VideoVariantSummary {
            label: r.label.to_string(),
            width: r.width,
            height: r.height,
            bitrate_kbps: r.bitrate_kbps,
            codec_tag: r.codec_tag.to_string(),
        })
        .collect();

    let channels = meta.audio_channels.unwrap_or(2);
    let bitrate_kbps = if channels > 2 { 384 } else { 128 };
    let audio_tracks: Vec<AudioTrackSummary> = state
        .config
        .web_supported_codecs
        .iter()
        .map(|codec| AudioTrackSummary {
            track_index: 0,
            codec: codec.clone(),
            language: None,
            channels,
            bitrate_kbps,
        })
        .collect();

    Ok(playlist_response(render_master_playlist(
        &video_id,
        &video_variants,
        &audio_tracks,
    )))
}

/// `GET /api/stream/{id}/{variant}/playlist.m3u8`
pub async fn variant_playlist(
    State(state): State<Arc<AppState>>,
    Path((video_id, variant_label)): Path<(String, String)>,
) -> Result<Response> {
    ensure_enabled(&state)?;
    let rung = find_rung(&variant_label)
        .ok_or_else(|| ServerError::NotFound(format!("unknown variant '{variant_label}'")))?;
    let path = state
        .supervisor
        .ensure_variant_playlist(&video_id, &variant_label, &rung.to_variant())
        .await?;
    let body = tokio::fs::read_to_string(&path)
        .await
        .map_err(HlsJitError::IOError)?;
    Ok(playlist_response(body))
}

/// `GET /api/stream/{id}/{variant}/{segment}` (`{nnn}.ts` or `{nnn}.m4s`)
pub async fn video_segment(
    State(state): State<Arc<AppState>>,
    Path((video_id, variant_label, segment_file)): Path<(String, String, String)>,
    Query(query): Query<SegmentQuery>,
) -> Result<Response> {
    ensure_enabled(&state)?;
    let rung = find_rung(&variant_label)
        .ok_or_else(|| ServerError::NotFound(format!("unknown variant '{variant_label}'")))?;
    let (requested, ext) = parse_segment_filename(&segment_file)
        .ok_or_else(|| ServerError::BadRequest(format!("bad segment filename '{segment_file}'")))?;
    let variant = rung.to_variant();

    let path = if let Some((start_ticks, length_ticks)) = query.explicit_offset() {
        state
            .supervisor
            .ensure_segment_explicit(&video_id, &variant_label, variant, start_ticks, length_ticks)
            .await?
    } else {
        state
            .supervisor
            .ensure_segment(&video_id, &variant_label, variant, requested)
            .await?
    };

    let bytes = read_file(&path).await?;
    Ok(segment_response(bytes, content_type_for_extension(ext)))
}

/// `GET /api/stream/{id}/{variant}/init.mp4`
pub async fn video_init(
    State(state): State<Arc<AppState>>,
    Path((video_id, variant_label)): Path<(String, String)>,
) -> Result<Response> {
    ensure_enabled(&state)?;
    let rung = find_rung(&variant_label)
        .ok_or_else(|| ServerError::NotFound(format!("unknown variant '{variant_label}'")))?;

    let canonical = state
        .supervisor
        .playlist_builder
        .known_variants
        .canonicalize(&video_id, &variant_label)
        .unwrap_or_else(|| variant_label.clone());
    let init_path = state
        .supervisor
        .playlist_builder
        .output_dir(&video_id, &canonical)
        .join("init.mp4");

    if !init_path.exists() {
        state
            .supervisor
            .ensure_segment(&video_id, &variant_label, rung.to_variant(), 0)
            .await?;
    }
    if !init_path.exists() {
        return Err(ServerError::NotFound(format!(
            "init segment not produced for ({video_id}, {variant_label})"
        )));
    }

    let bytes = read_file(&init_path).await?;
    Ok(segment_response(bytes, "video/mp4"))
}

/// `GET /api/stream/{id}/audio/{track}/playlist.m3u8`
pub async fn audio_playlist(
    State(state): State<Arc<AppState>>,
    Path((video_id, track_segment)): Path<(String, String)>,
) -> Result<Response> {
    ensure_enabled(&state)?;
    let (track_index, codec) = parse_track_segment(&track_segment)
        .ok_or_else(|| ServerError::BadRequest(format!("bad audio track '{track_segment}'")))?;
    if track_index != 0 {
        return Err(ServerError::NotFound(format!(
            "audio track {track_index} not present"
        )));
    }

    let meta = state.supervisor.probe(&video_id).await?;
    let variant = audio_variant(track_index, &codec, meta.audio_channels, meta.audio_sample_rate);
    let label = variant.label.clone();
    let path = state
        .supervisor
        .ensure_variant_playlist(&video_id, &label, &variant)
        .await?;
    let body = tokio::fs::read_to_string(&path)
        .await
        .map_err(HlsJitError::IOError)?;
    Ok(playlist_response(body))
}

/// `GET /api/stream/{id}/audio/{track}/{segment}`
pub async fn audio_segment(
    State(state): State<Arc<AppState>>,
    Path((video_id, track_segment, segment_file)): Path<(String, String, String)>,
    Query(query): Query<SegmentQuery>,
) -> Result<Response> {
    ensure_enabled(&state)?;
    let (track_index, codec) = parse_track_segment(&track_segment)
        .ok_or_else(|| ServerError::BadRequest(format!("bad audio track '{track_segment}'")))?;
    if track_index != 0 {
        return Err(ServerError::NotFound(format!(
            "audio track {track_index} not present"
        )));
    }
    let (requested, ext) = parse_segment_filename(&segment_file)
        .ok_or_else(|| ServerError::BadRequest(format!("bad segment filename '{segment_file}'")))?;

    let meta = state.supervisor.probe(&video_id).await?;
    let variant = audio_variant(track_index, &codec, meta.audio_channels, meta.audio_sample_rate);
    let label = variant.label.clone();

    let path = if let Some((start_ticks, length_ticks)) = query.explicit_offset() {
        state
            .supervisor
            .ensure_segment_explicit(&video_id, &label, variant, start_ticks, length_ticks)
            .await?
    } else {
        state
            .supervisor
            .ensure_segment(&video_id, &label, variant, requested)
            .await?
    };

    let bytes = read_file(&path).await?;
    Ok(segment_response(bytes, content_type_for_extension(ext)))
}
