//! Transcoder session lifecycle: spawn ffmpeg, track its progress off raw
//! stderr lines, and serve up bounded, file-stability-checked waits for
//! individual segments.
//!
//! There is no in-process decoder binding here and no "progress" callback;
//! everything known about the child process is inferred from the text it
//! writes to its own stderr, the same way `rust-srec`'s ffmpeg engine reads
//! its recording workers.

pub mod args;
pub mod explicit;
mod stderr;
pub mod types;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{HlsJitError, Result};
use crate::grid::Grid;
use crate::hwpool::HwSlotPool;
use crate::locks::SessionLock;
use crate::probe::MediaMeta;

use self::args::{build_args, EncodeParams};
use self::stderr::{contains_error_keyword, parse_time_token};
pub use self::types::{
    SessionKey, SessionState, Variant, VariantKind, EXTENDED_STABILITY_POLL_CEILING,
    EXTENDED_STABILITY_WINDOW, FAR_AHEAD_WAIT_TIMEOUT, NORMAL_WAIT_TIMEOUT, SEEK_AHEAD_TOLERANCE,
    STABILITY_POLL_CEILING, STABILITY_WINDOW,
};
use self::types::{AtomicSessionState, StderrRing};

/// How long `Stop`/`Pause` wait for a graceful quit before escalating to
/// `SIGKILL`.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// One running (or recently-finished) transcoder invocation for a single
/// `(videoId, label)` key. Owns its child process, its output directory's
/// contents, and its hardware lease.
pub struct Session {
    pub video_id: String,
    pub variant: Variant,
    source_path: PathBuf,
    output_dir: PathBuf,
    extension: &'static str,
    grid: Grid,
    config: Arc<Config>,
    hw_pool: Arc<HwSlotPool>,

    start_segment: AtomicU32,
    adjusted_start_timestamp_sec: Mutex<f64>,
    state: AtomicSessionState,
    /// Highest segment index known fully encoded, `-1` until the first
    /// `time=` token arrives. Monotonically non-decreasing.
    latest_segment: AtomicI64,
    error_message: Mutex<Option<String>>,
    stderr_ring: StderrRing,
    hw_lease: AtomicBool,

    child: AsyncMutex<Option<Child>>,
    lock: SessionLock,
}

impl Session {
    pub fn new(
        video_id: impl Into<String>,
        variant: Variant,
        source_path: impl Into<PathBuf>,
        output_dir: PathBuf,
        grid: Grid,
        config: Arc<Config>,
        hw_pool: Arc<HwSlotPool>,
    ) -> Arc<Self> {
        let extension = grid.extension(variant.is_fragmented_mp4());
        let lock = SessionLock::for_output_dir(&output_dir);
        Arc::new(Self {
            video_id: video_id.into(),
            variant,
            source_path: source_path.into(),
            output_dir,
            extension,
            grid,
            config,
            hw_pool,
            start_segment: AtomicU32::new(0),
            adjusted_start_timestamp_sec: Mutex::new(0.0),
            state: AtomicSessionState::new(SessionState::Starting),
            latest_segment: AtomicI64::new(-1),
            error_message: Mutex::new(None),
            stderr_ring: StderrRing::default(),
            hw_lease: AtomicBool::new(false),
            child: AsyncMutex::new(None),
            lock,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    pub fn start_segment(&self) -> u32 {
        self.start_segment.load(Ordering::Acquire)
    }

    pub fn latest_segment(&self) -> i64 {
        self.latest_segment.load(Ordering::Acquire)
    }

    pub fn segment_path(&self, index: u32) -> PathBuf {
        self.output_dir.join(format!("{:03}.{}", index, self.extension))
    }

    /// Spawn the transcoder starting at `requested`, seeking to the nearest
    /// keyframe (video) or audio-frame boundary (audio) at or before that
    /// segment's nominal start.
    pub async fn start(self: &Arc<Self>, requested: u32, media_meta: &MediaMeta) -> Result<()> {
        self.start_segment.store(requested, Ordering::Release);
        self.latest_segment.store(-1, Ordering::Release);

        let target_ts = self
            .grid
            .segments
            .get(requested as usize)
            .map(|s| s.start_ticks as f64 / crate::grid::TICKS_PER_SECOND as f64)
            .unwrap_or(0.0);

        let adjusted = match self.variant.kind {
            VariantKind::Video => media_meta.nearest_keyframe_at(target_ts),
            VariantKind::Audio => {
                let sample_rate = self
                    .variant
                    .sample_rate
                    .or(media_meta.audio_sample_rate)
                    .unwrap_or(48_000);
                media_meta.nearest_audio_frame_at(target_ts, sample_rate, 1024)
            }
        };
        *self.adjusted_start_timestamp_sec.lock().unwrap() = adjusted;

        std::fs::create_dir_all(&self.output_dir)?;

        let use_hw = matches!(self.variant.kind, VariantKind::Video)
            && self.config.hardware_encoding_enabled
            && self.hw_pool.acquire();
        self.hw_lease.store(use_hw, Ordering::Release);

        let params = EncodeParams {
            source_path: &self.source_path,
            output_dir: &self.output_dir,
            variant: &self.variant,
            media_meta,
            start_segment: requested,
            adjusted_start_timestamp_sec: adjusted,
            seg_sec: self.grid.target_segment_seconds,
            gop_frames: self.grid.gop_frames,
            extension: self.extension,
            fragmented_mp4: self.variant.is_fragmented_mp4(),
            hwaccel: if use_hw { self.config.hwaccel_type } else { None },
            web_supported_codecs: &self.config.web_supported_codecs,
        };
        let arg_vec = build_args(&params);

        debug!(
            video_id = %self.video_id,
            label = %self.variant.label,
            args = ?arg_vec,
            "spawning transcoder"
        );

        let mut command = tokio::process::Command::new(&self.config.ffmpeg_path);
        command
            .args(&arg_vec)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state.store(SessionState::Failed);
                self.release_hw_lease();
                return Err(HlsJitError::SpawnError {
                    video_id: self.video_id.clone(),
                    label: self.variant.label.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let stderr = child
            .stderr
            .take()
            .expect("child spawned with Stdio::piped() stderr");
        *self.child.lock().await = Some(child);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive_child(stderr).await;
        });

        self.lock.touch()?;
        self.state.store(SessionState::Running);
        Ok(())
    }

    /// Reads stderr to completion, folding `time=` tokens into
    /// `latestSegment` and accumulating any error-keyword lines, then waits
    /// for the child's exit status and settles the session's terminal state.
    async fn drive_child(self: Arc<Self>, child_stderr: tokio::process::ChildStderr) {
        let mut lines = BufReader::new(child_stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.observe_stderr_line(&line),
                Ok(None) => break,
                Err(e) => {
                    warn!(video_id = %self.video_id, label = %self.variant.label, error = %e, "stderr read failed");
                    break;
                }
            }
        }

        let status = {
            let mut guard = self.child.lock().await;
            match guard.as_mut() {
                Some(child) => child.wait().await.ok(),
                None => None,
            }
        };

        self.release_hw_lease();

        match status {
            Some(status) if status.success() => {
                info!(video_id = %self.video_id, label = %self.variant.label, "transcoder finished");
                self.state.store(SessionState::Finished);
            }
            other => {
                warn!(video_id = %self.video_id, label = %self.variant.label, status = ?other, "transcoder exited with failure");
                self.state.store(SessionState::Failed);
            }
        }
    }

    fn observe_stderr_line(&self, line: &str) {
        self.stderr_ring.push_line(line);

        if let Some(elapsed) = parse_time_token(line) {
            let base = *self.adjusted_start_timestamp_sec.lock().unwrap();
            let processed_ts = base + elapsed;
            let candidate = self.grid.segment_index_at(processed_ts) as i64 - 1;
            let mut current = self.latest_segment.load(Ordering::Acquire);
            while candidate > current {
                match self.latest_segment.compare_exchange(
                    current,
                    candidate,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        }

        if contains_error_keyword(line) {
            let mut message = self.error_message.lock().unwrap();
            match message.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(line);
                }
                None => *message = Some(line.to_string()),
            }
        }
    }

    fn release_hw_lease(&self) {
        if self.hw_lease.swap(false, Ordering::AcqRel) {
            self.hw_pool.release();
        }
    }

    fn transcode_failed_error(&self) -> HlsJitError {
        let tail = self
            .error_message
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| self.stderr_ring.tail());
        HlsJitError::TranscodeFailed {
            video_id: self.video_id.clone(),
            label: self.variant.label.clone(),
            stderr_tail: tail,
        }
    }

    /// Whether a request for `requested` means the caller has jumped away
    /// from where this session is producing segments. A session left in
    /// `Failed` state after a synchronous spawn error is treated the same as
    /// "segment not on disk before startSegment": it never produced
    /// anything, so any requested segment counts as missing.
    pub fn detect_seek(&self, requested: u32) -> bool {
        let state = self.state.load();
        let latest = self.latest_segment.load(Ordering::Acquire);

        if matches!(state, SessionState::Running | SessionState::Starting)
            && requested as i64 > latest + SEEK_AHEAD_TOLERANCE as i64
        {
            return true;
        }

        let start = self.start_segment.load(Ordering::Acquire);
        if requested < start || state == SessionState::Failed {
            return !self.segment_path(requested).exists();
        }

        false
    }

    /// Block until `requested`'s segment file exists and has stopped
    /// growing, or raise `Timeout`/`TranscodeFailed`.
    pub async fn wait_for_segment(&self, requested: u32) -> Result<PathBuf> {
        let path = self.segment_path(requested);
        let latest = self.latest_segment.load(Ordering::Acquire);
        let far_ahead = requested as i64 > latest + SEEK_AHEAD_TOLERANCE as i64;
        let ceiling = if far_ahead {
            FAR_AHEAD_WAIT_TIMEOUT
        } else {
            NORMAL_WAIT_TIMEOUT
        };

        self.poll_stability(&path, requested, STABILITY_WINDOW, ceiling)
            .await?;

        // The segment itself has stabilized, but if the session hasn't
        // finished and is still ahead of `requested`, give the next segment
        // a short extra window to appear before returning: a sign the
        // encoder has genuinely moved past this one rather than stalled
        // mid-write.
        if self.state.load() != SessionState::Finished
            && (requested as i64) < self.latest_segment.load(Ordering::Acquire)
        {
            let next_path = self.segment_path(requested + 1);
            if !next_path.exists() {
                let _ = self
                    .poll_stability(
                        &path,
                        requested,
                        EXTENDED_STABILITY_WINDOW,
                        EXTENDED_STABILITY_POLL_CEILING,
                    )
                    .await;
            }
        }

        self.lock.touch()?;
        Ok(path)
    }

    async fn poll_stability(
        &self,
        path: &std::path::Path,
        requested: u32,
        window: Duration,
        ceiling: Duration,
    ) -> Result<()> {
        let started = tokio::time::Instant::now();
        loop {
            if self.state.load() == SessionState::Failed {
                return Err(self.transcode_failed_error());
            }

            if let Ok(meta) = std::fs::metadata(path) {
                let size_before = meta.len();
                tokio::time::sleep(window).await;
                let size_after = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                if size_before == size_after && size_before > 0 {
                    return Ok(());
                }
            } else {
                tokio::time::sleep(window.min(Duration::from_millis(100))).await;
            }

            if started.elapsed() >= ceiling {
                return Err(HlsJitError::Timeout {
                    video_id: self.video_id.clone(),
                    label: self.variant.label.clone(),
                    index: requested,
                });
            }
        }
    }

    /// Stop the child process and, unless configured to preserve them,
    /// delete every produced segment and the ffmpeg-internal playlist.
    /// `playlist.m3u8` itself is never touched.
    pub async fn stop(&self) -> Result<()> {
        self.terminate_child().await;
        self.state.store(SessionState::Finished);
        self.release_hw_lease();

        if !self.config.preserve_segments {
            self.delete_segment_files();
        }
        if !self.config.preserve_ffmpeg_playlist {
            let _ = std::fs::remove_file(self.output_dir.join("ffmpeg_playlist.m3u8"));
        }
        Ok(())
    }

    /// Stop the child process without deleting anything on disk, leaving
    /// the session in `Paused` state. A later request for this key always
    /// restarts a fresh session; a paused one is never resumed in place.
    pub async fn pause(&self) -> Result<()> {
        self.terminate_child().await;
        self.state.store(SessionState::Paused);
        self.release_hw_lease();
        Ok(())
    }

    /// Ask the child to quit gracefully (ffmpeg honors `q` on stdin the same
    /// way it honors a terminal keypress) and fall back to `SIGTERM`, then
    /// `SIGKILL`, if it doesn't exit in time.
    async fn terminate_child(&self) {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return;
        };

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(b"q\n").await;
        }

        if tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait())
            .await
            .is_ok()
        {
            return;
        }

        send_sigterm(child);
        if tokio::time::timeout(Duration::from_secs(2), child.wait())
            .await
            .is_err()
        {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    fn delete_segment_files(&self) {
        let Ok(entries) = std::fs::read_dir(&self.output_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == crate::playlist::builder::PLAYLIST_FILE_NAME {
                continue;
            }
            if name.ends_with(".ts") || name.ends_with(".m4s") || name == "ffmpeg_playlist.m3u8" {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}
