//! The segment supervisor: resolves a `(videoId, label, segment)` request to
//! a running [`Session`], starting, restarting, or reusing one as needed.
//!
//! Per-key serialization uses a `DashMap` of per-key async mutexes, so
//! concurrent requests for the same `(videoId, label)` queue behind one
//! another while independent keys make progress fully in parallel.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{HlsJitError, Result};
use crate::grid::{Grid, GridCache};
use crate::hwpool::HwSlotPool;
use crate::playlist::{PlaylistBuilder, PlaylistOptions};
use crate::postprocess::PostProcessor;
use crate::probe::{MediaMeta, MediaProbe};
use crate::session::explicit::transcode_one_shot;
use crate::session::types::SessionKey;
use crate::session::{Session, SessionState, Variant};
use crate::viewer::ViewerTracker;

/// One `(videoId, label)` slot: at most one live [`Session`] at a time,
/// guarded so a request that needs to replace it (seek, failure, resuming a
/// paused session) serializes against concurrent requests for the same key.
struct Slot {
    session: Option<Arc<Session>>,
}

/// Owns every moving part of the transcoding pipeline: the grid cache, the
/// playlist builder, the hardware slot pool, the per-key session slots, and
/// the viewer tracker. `hls-jit-server` constructs one of these at startup
/// and shares it across all request handlers and the sweeper tasks.
pub struct Supervisor {
    config: Arc<Config>,
    probe: Arc<dyn MediaProbe>,
    grid_cache: GridCache,
    pub playlist_builder: PlaylistBuilder,
    hw_pool: Arc<HwSlotPool>,
    pub viewers: ViewerTracker,
    slots: DashMap<SessionKey, Arc<AsyncMutex<Slot>>>,
    postprocessor: PostProcessor,
}

impl Supervisor {
    pub fn new(config: Arc<Config>, probe: Arc<dyn MediaProbe>) -> Self {
        let playlist_builder = PlaylistBuilder::new(config.hls_output_dir.clone());
        let hw_pool = Arc::new(HwSlotPool::new(config.max_hw_processes));
        Self {
            config,
            probe,
            grid_cache: GridCache::new(),
            playlist_builder,
            hw_pool,
            viewers: ViewerTracker::new(),
            slots: DashMap::new(),
            postprocessor: PostProcessor::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Probe `video_id`'s source media, for callers (the master-playlist
    /// route) that need the raw [`MediaMeta`] rather than a grid or session.
    pub async fn probe(&self, video_id: &str) -> Result<MediaMeta> {
        self.media_meta(video_id).await
    }

    fn source_path(&self, video_id: &str) -> PathBuf {
        self.config.video_source_dir.join(video_id)
    }

    async fn media_meta(&self, video_id: &str) -> Result<MediaMeta> {
        let source_path = self.source_path(video_id);
        let probe = Arc::clone(&self.probe);
        let video_id_owned = video_id.to_string();
        tokio::task::spawn_blocking(move || probe.probe(&source_path))
            .await
            .map_err(|e| HlsJitError::ProbeError {
                video_id: video_id_owned,
                reason: format!("probe task panicked: {e}"),
            })?
    }

    async fn grid(&self, video_id: &str, media_meta: &MediaMeta) -> Result<Grid> {
        self.grid_cache
            .get_or_compute(video_id, media_meta, self.config.hls_segment_time)
            .await
    }

    /// Canonicalize `label` against the variants already known for
    /// `video_id`, falling back to the caller's casing if none is known yet
    /// (the first call for a label defines its canonical casing).
    fn canonical_label(&self, video_id: &str, label: &str) -> String {
        self.playlist_builder
            .known_variants
            .canonicalize(video_id, label)
            .unwrap_or_else(|| label.to_string())
    }

    /// Writes the variant playlist once and returns its path on every
    /// subsequent call, registering the label's canonical casing as a side
    /// effect.
    pub async fn ensure_variant_playlist(
        &self,
        video_id: &str,
        label: &str,
        variant: &Variant,
    ) -> Result<PathBuf> {
        let media_meta = self.media_meta(video_id).await?;
        let grid = self.grid(video_id, &media_meta).await?;
        let opts = PlaylistOptions {
            fragmented_mp4: variant.is_fragmented_mp4(),
            video_range: matches!(variant.kind, crate::session::VariantKind::Video)
                .then_some(media_meta.video_range),
        };
        self.playlist_builder.ensure(video_id, label, &grid, opts).await
    }

    /// The central entry point a segment request goes through: resolves the
    /// grid, detects seeks, and starts, restarts, or reuses a session before
    /// waiting for the requested segment to stabilize on disk.
    pub async fn ensure_segment(
        &self,
        video_id: &str,
        label: &str,
        variant: Variant,
        requested: u32,
    ) -> Result<PathBuf> {
        let label = self.canonical_label(video_id, label);

        let media_meta = self.media_meta(video_id).await?;
        let grid = self.grid(video_id, &media_meta).await?;
        if requested as usize >= grid.segments.len() {
            return Err(HlsJitError::NotFound(format!(
                "segment {requested} is past the end of the grid ({} segments) for ({video_id}, {label})",
                grid.segments.len()
            )));
        }

        self.viewers.update(video_id, &label, requested);

        let key: SessionKey = (video_id.to_string(), label.clone());
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(Slot { session: None })))
            .clone();
        let mut guard = slot.lock().await;

        let needs_fresh_session = match guard.session.as_ref() {
            None => true,
            Some(session) => {
                if session.state() == SessionState::Paused {
                    true
                } else if session.detect_seek(requested) {
                    info!(video_id, label = %label, requested, "seek detected, restarting session");
                    session.stop().await?;
                    true
                } else {
                    false
                }
            }
        };

        if needs_fresh_session {
            let output_dir = self.playlist_builder.output_dir(video_id, &label);
            let session = Session::new(
                video_id,
                variant,
                self.source_path(video_id),
                output_dir,
                grid,
                Arc::clone(&self.config),
                Arc::clone(&self.hw_pool),
            );
            session.start(requested, &media_meta).await?;
            guard.session = Some(session);
        }

        let session = guard.session.as_ref().expect("just ensured above").clone();
        let fragmented = session.variant.is_fragmented_mp4();
        drop(guard);

        let path = session.wait_for_segment(requested).await?;
        if !fragmented {
            self.postprocessor.process(video_id, &label, requested, &path);
        }
        Ok(path)
    }

    /// Bypasses the streaming session entirely and transcodes exactly
    /// `[startTicks, startTicks + lengthTicks)` of `video_id`/`label` into a
    /// single file, named after the caller's own tick offsets so repeat
    /// requests for the same range collide harmlessly on the same output
    /// path.
    pub async fn ensure_segment_explicit(
        &self,
        video_id: &str,
        label: &str,
        variant: Variant,
        start_ticks: i64,
        length_ticks: i64,
    ) -> Result<PathBuf> {
        if start_ticks < 0 || length_ticks <= 0 {
            return Err(HlsJitError::BadRequest(format!(
                "explicit segment range must satisfy startTicks >= 0 and lengthTicks > 0, got ({start_ticks}, {length_ticks})"
            )));
        }

        let label = self.canonical_label(video_id, label);
        let media_meta = self.media_meta(video_id).await?;

        let start_sec = start_ticks as f64 / crate::grid::TICKS_PER_SECOND as f64;
        let duration_sec = length_ticks as f64 / crate::grid::TICKS_PER_SECOND as f64;
        let adjusted_start = match variant.kind {
            crate::session::VariantKind::Video => media_meta.nearest_keyframe_at(start_sec),
            crate::session::VariantKind::Audio => {
                let sample_rate = variant
                    .sample_rate
                    .or(media_meta.audio_sample_rate)
                    .unwrap_or(48_000);
                media_meta.nearest_audio_frame_at(start_sec, sample_rate, 1024)
            }
        };

        let grid = self.grid(video_id, &media_meta).await?;
        let extension = grid.extension(variant.is_fragmented_mp4());
        let output_dir = self.playlist_builder.output_dir(video_id, &label).join("explicit");
        let output_path =
            output_dir.join(format!("explicit_{start_ticks}_{length_ticks}.{extension}"));

        if output_path.exists() {
            return Ok(output_path);
        }

        transcode_one_shot(
            &self.config,
            &self.source_path(video_id),
            &output_path,
            &variant,
            &media_meta,
            adjusted_start,
            duration_sec,
            grid.gop_frames,
        )
        .await
    }

    /// For every running session, pause it if `ViewerTracker` has no entry
    /// for its key or that entry's last access exceeds `threshold`.
    pub async fn pause_inactive_sessions(&self, threshold: std::time::Duration) -> usize {
        let keys: Vec<SessionKey> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        let mut paused = 0;
        for key in keys {
            let Some(slot) = self.slots.get(&key).map(|s| s.value().clone()) else {
                continue;
            };
            let guard = slot.lock().await;
            let Some(session) = guard.session.as_ref() else {
                continue;
            };
            if session.state() != SessionState::Running {
                continue;
            }
            if self.viewers.is_stale_or_absent(&key.0, &key.1, threshold) {
                if let Err(e) = session.pause().await {
                    warn!(video_id = %key.0, label = %key.1, error = %e, "failed to pause session");
                } else {
                    paused += 1;
                }
            }
        }
        paused
    }

    /// Stop and discard every session whose viewer has gone silent for at
    /// least `threshold`, removing its viewer-tracker entry too.
    pub async fn cleanup_inactive_sessions(&self, threshold: std::time::Duration) -> usize {
        let mut cleaned = 0;
        for (key, _viewer) in self.viewers.stale_entries(threshold) {
            if let Some((_, slot)) = self.slots.remove(&key) {
                let guard = slot.lock().await;
                if let Some(session) = guard.session.as_ref() {
                    if let Err(e) = session.stop().await {
                        warn!(video_id = %key.0, label = %key.1, error = %e, "failed to stop session during cleanup");
                    }
                }
            }
            self.viewers.remove(&key.0, &key.1);
            cleaned += 1;
        }
        cleaned
    }

    pub fn session_state(&self, video_id: &str, label: &str) -> Option<SessionState> {
        self.slots
            .get(&(video_id.to_string(), label.to_string()))
            .and_then(|slot| slot.try_lock().ok().and_then(|g| g.session.as_ref().map(|s| s.state())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FakeMediaProbe;
    use std::time::Duration;

    fn config(output: &std::path::Path, source: &std::path::Path) -> Arc<Config> {
        Arc::new(Config {
            hls_output_dir: output.to_path_buf(),
            video_source_dir: source.to_path_buf(),
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn ensure_segment_rejects_index_past_the_grid() {
        let output_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(FakeMediaProbe::new());
        probe.insert(source_dir.path().join("movie42"), MediaMeta::test_default());
        let supervisor = Supervisor::new(config(output_dir.path(), source_dir.path()), probe);
        let variant = Variant::video("1080p", 1920, 1080, 6000);

        let media_meta = MediaMeta::test_default();
        let grid = crate::grid::GridPlanner::plan("movie42", &media_meta, 6.0).unwrap();
        let past_the_end = grid.segments.len() as u32;

        let err = supervisor
            .ensure_segment("movie42", "1080p", variant, past_the_end)
            .await
            .unwrap_err();
        assert!(matches!(err, HlsJitError::NotFound(_)));
        assert!(supervisor.session_state("movie42", "1080p").is_none());
    }

    #[tokio::test]
    async fn ensure_variant_playlist_registers_canonical_label_case() {
        let output_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(FakeMediaProbe::new());
        probe.insert(source_dir.path().join("movie42"), MediaMeta::test_default());

        let supervisor = Supervisor::new(config(output_dir.path(), source_dir.path()), probe);
        let variant = Variant::video("1080p", 1920, 1080, 6000);
        supervisor
            .ensure_variant_playlist("movie42", "1080p", &variant)
            .await
            .unwrap();

        assert_eq!(
            supervisor.canonical_label("movie42", "1080P"),
            "1080p".to_string()
        );
    }

    #[tokio::test]
    async fn ensure_segment_explicit_rejects_non_positive_length() {
        let output_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(FakeMediaProbe::new());
        probe.insert(source_dir.path().join("movie42"), MediaMeta::test_default());
        let supervisor = Supervisor::new(config(output_dir.path(), source_dir.path()), probe);
        let variant = Variant::video("1080p", 1920, 1080, 6000);

        let err = supervisor
            .ensure_segment_explicit("movie42", "1080p", variant, 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, HlsJitError::BadRequest(_)));
    }

    #[tokio::test]
    async fn ensure_segment_explicit_surfaces_spawn_error_without_touching_sessions() {
        let output_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(FakeMediaProbe::new());
        probe.insert(source_dir.path().join("movie42"), MediaMeta::test_default());
        let mut cfg = Config {
            hls_output_dir: output_dir.path().to_path_buf(),
            video_source_dir: source_dir.path().to_path_buf(),
            ..Config::default()
        };
        cfg.ffmpeg_path = PathBuf::from("/nonexistent/ffmpeg-binary-for-tests");
        let supervisor = Supervisor::new(Arc::new(cfg), probe);
        let variant = Variant::video("1080p", 1920, 1080, 6000);

        let err = supervisor
            .ensure_segment_explicit("movie42", "1080p", variant, 0, 60_000_000)
            .await
            .unwrap_err();
        assert!(matches!(err, HlsJitError::SpawnError { .. }));
        assert!(supervisor.session_state("movie42", "1080p").is_none());
    }

    #[tokio::test]
    async fn pause_and_cleanup_sweeps_act_only_on_stale_entries() {
        let output_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(FakeMediaProbe::new());
        let supervisor = Supervisor::new(config(output_dir.path(), source_dir.path()), probe);

        supervisor.viewers.update("movie42", "1080p", 0);
        let paused = supervisor.pause_inactive_sessions(Duration::from_secs(3600)).await;
        assert_eq!(paused, 0);
        let cleaned = supervisor.cleanup_inactive_sessions(Duration::from_secs(3600)).await;
        assert_eq!(cleaned, 0);
    }
}
