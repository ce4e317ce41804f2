//! `PlaylistBuilder::ensure` — write a VOD media playlist exactly once per
//! `(videoId, label)` and return its path on every subsequent call.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::grid::Grid;
use crate::probe::VideoRange;

use super::variant::{render_variant_playlist, VariantRenderOptions};

pub const PLAYLIST_FILE_NAME: &str = "playlist.m3u8";

#[derive(Debug, Clone, Copy)]
pub struct PlaylistOptions {
    pub fragmented_mp4: bool,
    pub video_range: Option<VideoRange>,
}

/// Per-video set of variant labels in the casing they were first built with,
/// used by the registry to canonicalize a caller-supplied label.
#[derive(Default)]
pub struct KnownVariants {
    labels: DashMap<String, HashSet<String>>,
}

impl KnownVariants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, video_id: &str, label: &str) {
        self.labels
            .entry(video_id.to_string())
            .or_default()
            .insert(label.to_string());
    }

    /// Returns the canonical casing of `label` for `video_id`, if a
    /// case-insensitive match exists among the registered labels.
    pub fn canonicalize(&self, video_id: &str, label: &str) -> Option<String> {
        let known = self.labels.get(video_id)?;
        known
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(label))
            .cloned()
    }
}

pub struct PlaylistBuilder {
    base_output: PathBuf,
    written: DashMap<(String, String), Arc<OnceCell<PathBuf>>>,
    pub known_variants: KnownVariants,
}

impl PlaylistBuilder {
    pub fn new(base_output: impl Into<PathBuf>) -> Self {
        Self {
            base_output: base_output.into(),
            written: DashMap::new(),
            known_variants: KnownVariants::new(),
        }
    }

    pub fn output_dir(&self, video_id: &str, label: &str) -> PathBuf {
        self.base_output.join(sanitize(video_id)).join(label)
    }

    /// Ensure the placeholder playlist exists for `(video_id, label)`,
    /// writing it on the first call and returning the same path on every
    /// later call without rewriting it.
    pub async fn ensure(&self, video_id: &str, label: &str, grid: &Grid, opts: PlaylistOptions) -> Result<PathBuf> {
        self.known_variants.register(video_id, label);

        let cell = self
            .written
            .entry((video_id.to_string(), label.to_string()))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let output_dir = self.output_dir(video_id, label);
        let grid = grid.clone();
        cell.get_or_try_init(|| async move { write_playlist(&output_dir, &grid, opts) })
            .await
            .cloned()
    }
}

fn write_playlist(output_dir: &Path, grid: &Grid, opts: PlaylistOptions) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(PLAYLIST_FILE_NAME);
    if !path.exists() {
        let body = render_variant_playlist(
            grid,
            VariantRenderOptions {
                fragmented_mp4: opts.fragmented_mp4,
                video_range: opts.video_range,
            },
        );
        std::fs::write(&path, body)?;
    }
    Ok(path)
}

/// Filesystem-safe rendering of a video identifier for use as a directory
/// name: anything other than alphanumerics, `-`, and `_` becomes `_`.
pub fn sanitize(video_id: &str) -> String {
    video_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridPlanner;
    use crate::probe::MediaMeta;

    fn grid() -> Grid {
        let meta = MediaMeta {
            duration_seconds: Some(60.0),
            video_fps: 24.0,
            ..MediaMeta::test_default()
        };
        GridPlanner::plan("v", &meta, 6.0).unwrap()
    }

    #[tokio::test]
    async fn ensure_writes_once_and_returns_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let builder = PlaylistBuilder::new(dir.path());
        let g = grid();
        let opts = PlaylistOptions {
            fragmented_mp4: false,
            video_range: Some(VideoRange::Sdr),
        };

        let path1 = builder.ensure("movie42", "1080p", &g, opts).await.unwrap();
        let contents1 = std::fs::read_to_string(&path1).unwrap();

        // Mutate the file to prove a second call doesn't rewrite it.
        std::fs::write(&path1, "mutated").unwrap();

        let path2 = builder.ensure("movie42", "1080p", &g, opts).await.unwrap();
        assert_eq!(path1, path2);
        assert_eq!(std::fs::read_to_string(&path2).unwrap(), "mutated");
        let _ = contents1;
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize("movie/42:final"), "movie_42_final");
        assert_eq!(sanitize("movie-42_v2"), "movie-42_v2");
    }

    #[test]
    fn known_variants_canonicalizes_case() {
        let known = KnownVariants::new();
        known.register("v1", "1080p");
        assert_eq!(known.canonicalize("v1", "1080P"), Some("1080p".to_string()));
        assert_eq!(known.canonicalize("v1", "2160p"), None);
    }
}
