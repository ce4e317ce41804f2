//! Static per-deployment variant catalog.
//!
//! Adaptive-bitrate ladder computation at request time is out of scope: the
//! rungs offered here are fixed configuration rather than anything derived
//! from the source media. The server's contribution is naming which rungs
//! exist; the core crate's `GridPlanner`/`Session` do the rest per-rung.

use hls_jit_core::session::{Variant, VariantKind};

/// One configured video rung: a label, target resolution, bitrate, and the
/// codec tag advertised in the master playlist's `CODECS` attribute.
#[derive(Debug, Clone, Copy)]
pub struct VideoRung {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub codec_tag: &'static str,
}

/// Default video ladder, ordered highest to lowest bandwidth. A real
/// deployment would likely load this from its own configuration file; one
/// fixed ladder stands in for that here.
pub const DEFAULT_VIDEO_LADDER: &[VideoRung] = &[
    VideoRung { label: "1080p", width: 1920, height: 1080, bitrate_kbps: 6000, codec_tag: "avc1.640028" },
    VideoRung { label: "720p", width: 1280, height: 720, bitrate_kbps: 3000, codec_tag: "avc1.64001f" },
    VideoRung { label: "480p", width: 854, height: 480, bitrate_kbps: 1500, codec_tag: "avc1.64001e" },
    VideoRung { label: "360p", width: 640, height: 360, bitrate_kbps: 800, codec_tag: "avc1.640015" },
];

/// Look up a configured rung by its playlist label, case-insensitively so a
/// differently-cased request (e.g. `1080P`) still resolves to the rung whose
/// canonical casing the supervisor's known-variants table was built with
/// (spec.md §4.6's "Variant-label case normalization").
pub fn find_rung(label: &str) -> Option<&'static VideoRung> {
    DEFAULT_VIDEO_LADDER
        .iter()
        .find(|r| r.label.eq_ignore_ascii_case(label))
}

impl VideoRung {
    pub fn to_variant(&self) -> Variant {
        Variant::video(self.label, self.width, self.height, self.bitrate_kbps)
    }
}

/// Parse the `track_<idx>_<codec>` path segment the audio routes use,
/// returning the track index and codec name.
pub fn parse_track_segment(segment: &str) -> Option<(u32, String)> {
    let rest = segment.strip_prefix("track_")?;
    let (idx_str, codec) = rest.split_once('_')?;
    if codec.is_empty() {
        return None;
    }
    Some((idx_str.parse().ok()?, codec.to_string()))
}

/// Build the internal `audio_<idx>_<codec>` variant label that the
/// supervisor and grid cache key their audio sessions under, from the
/// `track_<idx>_<codec>` URL segment.
pub fn audio_label_from_track_segment(segment: &str) -> Option<String> {
    let (idx, codec) = parse_track_segment(segment)?;
    Some(format!("audio_{}_{}", idx, codec))
}

/// Resolve an `Audio` [`Variant`] for a parsed `(trackIndex, codec)` pair
/// against the probed source's own audio characteristics.
pub fn audio_variant(
    track_index: u32,
    codec: &str,
    source_channels: Option<u16>,
    source_sample_rate: Option<u32>,
) -> Variant {
    Variant::audio(
        track_index,
        codec,
        source_channels.unwrap_or(2),
        source_sample_rate.unwrap_or(48_000),
    )
}

pub fn kind_from_label(label: &str) -> VariantKind {
    if Variant::parse_audio_label(label).is_some() {
        VariantKind::Audio
    } else {
        VariantKind::Video
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_configured_rungs_by_label() {
        assert!(find_rung("1080p").is_some());
        assert!(find_rung("8k").is_none());
    }

    #[test]
    fn finds_configured_rungs_case_insensitively() {
        assert_eq!(find_rung("1080P").unwrap().label, "1080p");
        assert_eq!(find_rung("720P").unwrap().label, "720p");
    }

    #[test]
    fn parses_track_segment() {
        assert_eq!(
            parse_track_segment("track_0_aac"),
            Some((0, "aac".to_string()))
        );
        assert_eq!(parse_track_segment("1080p"), None);
    }

    #[test]
    fn builds_internal_audio_label() {
        assert_eq!(
            audio_label_from_track_segment("track_1_ac3"),
            Some("audio_1_ac3".to_string())
        );
    }
}
