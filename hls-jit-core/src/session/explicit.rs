//! Explicit-offset one-shot segment transcode: a single bounded ffmpeg
//! invocation for a caller-supplied `runtimeTicks`/
//! `actualSegmentLengthTicks` pair, run straight to completion rather than
//! through the rolling [`Session`](super::Session) state machine. There is
//! no hardware-slot reservation, no stderr-driven progress tracking, and no
//! stability polling here: the process either exits 0 with the file on disk
//! or it doesn't, and the caller waits for exactly that.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{HlsJitError, Result};
use crate::probe::MediaMeta;
use crate::session::types::Variant;

use super::args::{build_one_shot_args, OneShotParams};

/// Run ffmpeg to produce exactly one segment file at `output_path`, spanning
/// `duration_sec` starting at `adjusted_start_timestamp_sec`, then wait for
/// it to exit. Returns `output_path` on success.
pub async fn transcode_one_shot(
    config: &Config,
    source_path: &Path,
    output_path: &Path,
    variant: &Variant,
    media_meta: &MediaMeta,
    adjusted_start_timestamp_sec: f64,
    duration_sec: f64,
    gop_frames: u32,
) -> Result<PathBuf> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let params = OneShotParams {
        source_path,
        output_path,
        variant,
        media_meta,
        adjusted_start_timestamp_sec,
        duration_sec,
        gop_frames,
        fragmented_mp4: variant.is_fragmented_mp4(),
        hwaccel: None,
        web_supported_codecs: &config.web_supported_codecs,
    };
    let arg_vec = build_one_shot_args(&params);

    debug!(
        video_id = %variant.label,
        args = ?arg_vec,
        "spawning one-shot transcoder"
    );

    let mut command = tokio::process::Command::new(&config.ffmpeg_path);
    command
        .args(&arg_vec)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| HlsJitError::SpawnError {
        video_id: variant.label.clone(),
        label: variant.label.clone(),
        reason: e.to_string(),
    })?;

    let stderr = child
        .stderr
        .take()
        .expect("child spawned with Stdio::piped() stderr");

    let stderr_tail = tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if super::stderr::contains_error_keyword(&line) {
                if !tail.is_empty() {
                    tail.push('\n');
                }
                tail.push_str(&line);
            }
        }
        tail
    });

    let status = child.wait().await.map_err(|e| HlsJitError::SpawnError {
        video_id: variant.label.clone(),
        label: variant.label.clone(),
        reason: e.to_string(),
    })?;

    let tail = stderr_tail.await.unwrap_or_default();

    if !status.success() {
        warn!(label = %variant.label, status = ?status, "one-shot transcoder exited with failure");
        return Err(HlsJitError::TranscodeFailed {
            video_id: variant.label.clone(),
            label: variant.label.clone(),
            stderr_tail: tail,
        });
    }

    Ok(output_path.to_path_buf())
}
