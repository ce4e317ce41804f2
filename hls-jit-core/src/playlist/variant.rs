//! Per-variant playlist line formatting.

use crate::grid::Grid;
use crate::probe::VideoRange;

/// Inputs to rendering a single variant playlist that aren't already on the
/// [`Grid`]: whether this is a video variant (and so carries a
/// `#EXT-X-VIDEO-RANGE` line) and whether segments are fragmented MP4.
#[derive(Debug, Clone, Copy)]
pub struct VariantRenderOptions {
    pub fragmented_mp4: bool,
    /// `Some` for video variants, `None` for audio (the range line is
    /// video-only per spec).
    pub video_range: Option<VideoRange>,
}

/// Render the full VOD media playlist body for one `(videoId, label)` grid.
pub fn render_variant_playlist(grid: &Grid, opts: VariantRenderOptions) -> String {
    let ext = grid.extension(opts.fragmented_mp4);
    let max_seg_sec = grid
        .segments
        .iter()
        .map(|s| s.duration_seconds)
        .fold(0.0_f64, f64::max);
    let target_duration = max_seg_sec.ceil().max(1.0) as u64;

    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:7\n");
    if let Some(range) = opts.video_range {
        out.push_str(&format!("#EXT-X-VIDEO-RANGE:{}\n", range.as_hls_str()));
    }
    out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", target_duration));
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");

    for segment in &grid.segments {
        out.push_str(&format!("#EXTINF:{:.6},\n", segment.duration_seconds));
        out.push_str(&format!(
            "{:03}.{}?runtimeTicks={}&actualSegmentLengthTicks={}\n",
            segment.index, ext, segment.start_ticks, segment.duration_ticks
        ));
    }

    out.push_str("#EXT-X-ENDLIST\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridPlanner;
    use crate::probe::MediaMeta;

    fn grid() -> Grid {
        let meta = MediaMeta {
            duration_seconds: Some(600.0),
            video_fps: 24.0,
            ..MediaMeta::test_default()
        };
        GridPlanner::plan("movie42", &meta, 6.0).unwrap()
    }

    #[test]
    fn renders_expected_header_and_footer() {
        let g = grid();
        let body = render_variant_playlist(
            &g,
            VariantRenderOptions {
                fragmented_mp4: false,
                video_range: Some(VideoRange::Sdr),
            },
        );
        assert!(body.starts_with("#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-VIDEO-RANGE:SDR\n"));
        assert!(body.ends_with("#EXT-X-ENDLIST\n"));
        assert!(body.contains("000.ts?runtimeTicks=0&actualSegmentLengthTicks="));
    }

    #[test]
    fn audio_variants_omit_video_range_line() {
        let g = grid();
        let body = render_variant_playlist(
            &g,
            VariantRenderOptions {
                fragmented_mp4: false,
                video_range: None,
            },
        );
        assert!(!body.contains("EXT-X-VIDEO-RANGE"));
    }

    #[test]
    fn fragmented_variants_use_m4s_extension() {
        let g = grid();
        let body = render_variant_playlist(
            &g,
            VariantRenderOptions {
                fragmented_mp4: true,
                video_range: Some(VideoRange::Pq),
            },
        );
        assert!(body.contains(".m4s?runtimeTicks="));
        assert!(body.contains("#EXT-X-VIDEO-RANGE:PQ"));
    }
}
