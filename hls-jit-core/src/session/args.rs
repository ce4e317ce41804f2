//! Builds the ffmpeg argument vector for a transcoder invocation. Pure: no
//! process spawning here, so the shape of the command line is independently
//! testable.

use std::path::Path;

use crate::config::HwAccelType;
use crate::probe::MediaMeta;

use super::types::{Variant, VariantKind};

#[derive(Debug, Clone)]
pub struct EncodeParams<'a> {
    pub source_path: &'a Path,
    pub output_dir: &'a Path,
    pub variant: &'a Variant,
    pub media_meta: &'a MediaMeta,
    pub start_segment: u32,
    pub adjusted_start_timestamp_sec: f64,
    pub seg_sec: f64,
    pub gop_frames: u32,
    pub extension: &'static str,
    pub fragmented_mp4: bool,
    pub hwaccel: Option<HwAccelType>,
    pub web_supported_codecs: &'a [String],
}

/// Resolve the audio encoder to use: passthrough when the requested codec
/// matches the source stream's codec (case-insensitive), otherwise the
/// requested codec if it's in the allow-list, else the platform default.
pub fn resolve_audio_codec(requested: &str, source_codec: &str, allow_list: &[String]) -> String {
    if requested.eq_ignore_ascii_case(source_codec) {
        return "copy".to_string();
    }
    if allow_list.iter().any(|c| c.eq_ignore_ascii_case(requested)) {
        requested.to_ascii_lowercase()
    } else {
        "aac".to_string()
    }
}

/// `384 kbps` for more than stereo, else `128 kbps`.
pub fn audio_bitrate_kbps(channels: u16) -> u32 {
    if channels > 2 {
        384
    } else {
        128
    }
}

pub fn build_args(p: &EncodeParams<'_>) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if let Some(hw) = p.hwaccel {
        match hw {
            HwAccelType::Cuda => {
                args.extend(["-hwaccel".into(), "cuda".into(), "-hwaccel_output_format".into(), "cuda".into()]);
            }
            HwAccelType::Qsv => {
                args.extend(["-hwaccel".into(), "qsv".into(), "-hwaccel_output_format".into(), "qsv".into()]);
            }
        }
    }

    args.extend([
        "-copyts".into(),
        "-avoid_negative_ts".into(),
        "disabled".into(),
        "-start_at_zero".into(),
    ]);

    args.extend(["-ss".into(), format!("{:.6}", p.adjusted_start_timestamp_sec)]);
    args.extend(["-i".into(), p.source_path.to_string_lossy().into_owned()]);

    match p.variant.kind {
        VariantKind::Video => build_video_args(p, &mut args),
        VariantKind::Audio => build_audio_args(p, &mut args),
    }

    args.extend([
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        format!("{:.6}", p.seg_sec),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_flags".into(),
        "independent_segments".into(),
        "-start_number".into(),
        p.start_segment.to_string(),
        "-hls_segment_filename".into(),
        format!("{}/%03d.{}", p.output_dir.display(), p.extension),
    ]);

    if p.fragmented_mp4 {
        args.extend([
            "-hls_segment_type".into(),
            "fmp4".into(),
            "-hls_fmp4_init_filename".into(),
            format!("{}/init.mp4", p.output_dir.display()),
        ]);
        if matches!(p.variant.codec_strategy.as_deref(), Some(c) if c.eq_ignore_ascii_case("hevc") || c.eq_ignore_ascii_case("h265"))
        {
            args.extend(["-tag:v".into(), "hvc1".into()]);
        }
    }

    args.push(format!("{}/ffmpeg_playlist.m3u8", p.output_dir.display()));
    args
}

fn build_video_args(p: &EncodeParams<'_>, args: &mut Vec<String>) {
    args.extend(["-sn".into(), "-an".into()]);

    let mut filters = Vec::new();
    if let (Some(w), Some(h)) = (p.variant.width, p.variant.height) {
        filters.push(format!(
            "scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2",
            w, h, w, h
        ));
    }
    if p.media_meta.is_10bit {
        filters.push("zscale=t=linear:npl=100,format=gbrpf32le,zscale=p=bt709,tonemap=hable,zscale=t=bt709:m=bt709:r=tv,format=yuv420p".to_string());
    }
    let filter_graph = if filters.is_empty() {
        "copy".to_string()
    } else {
        filters.join(",")
    };
    args.extend(["-filter_complex".into(), format!("[0:v]{}[outv]", filter_graph)]);
    args.extend(["-map".into(), "[outv]".into()]);

    let codec = p
        .variant
        .codec_strategy
        .clone()
        .unwrap_or_else(|| "libx264".to_string());
    args.extend(["-c:v".into(), codec]);
    if let Some(bitrate) = p.variant.bitrate_kbps {
        args.extend(["-b:v".into(), format!("{}k", bitrate)]);
        args.extend(["-maxrate".into(), format!("{}k", bitrate)]);
        args.extend(["-bufsize".into(), format!("{}k", bitrate * 2)]);
    }
    args.extend(["-g".into(), p.gop_frames.to_string()]);
    args.extend(["-keyint_min".into(), p.gop_frames.to_string()]);
    args.extend([
        "-force_key_frames".into(),
        format!("expr:gte(t,n_forced*{:.6})", p.seg_sec),
    ]);
}

fn build_audio_args(p: &EncodeParams<'_>, args: &mut Vec<String>) {
    args.extend(["-vn".into(), "-sn".into()]);
    let track_index = p.variant.audio_track_index.unwrap_or(0);
    args.extend(["-map".into(), format!("0:a:{}", track_index)]);

    let requested = p
        .variant
        .codec_strategy
        .as_deref()
        .unwrap_or("aac")
        .to_string();
    let source_codec = p.media_meta.audio_codec.as_deref().unwrap_or("");
    let codec = resolve_audio_codec(&requested, source_codec, p.web_supported_codecs);
    args.extend(["-c:a".into(), codec.clone()]);

    if codec != "copy" {
        let channels = p.variant.channels.unwrap_or(2);
        args.extend(["-b:a".into(), format!("{}k", audio_bitrate_kbps(channels))]);
        if let Some(sample_rate) = p.variant.sample_rate {
            args.extend(["-ar".into(), sample_rate.to_string()]);
        }
    }
}

/// Inputs to an explicit-offset one-shot transcode: a single segment of
/// `duration_sec` starting at `adjusted_start_timestamp_sec`, written
/// directly to `output_path` rather than through the HLS muxer's rolling
/// segment numbering.
#[derive(Debug, Clone)]
pub struct OneShotParams<'a> {
    pub source_path: &'a Path,
    pub output_path: &'a Path,
    pub variant: &'a Variant,
    pub media_meta: &'a MediaMeta,
    pub adjusted_start_timestamp_sec: f64,
    pub duration_sec: f64,
    pub gop_frames: u32,
    pub fragmented_mp4: bool,
    pub hwaccel: Option<HwAccelType>,
    pub web_supported_codecs: &'a [String],
}

/// Builds the argument vector for a one-shot explicit-offset transcode:
/// same seek-before-input and codec-selection rules as [`build_args`], but
/// bounded by `-t` and written straight to a single output file instead of
/// through `-f hls`.
pub fn build_one_shot_args(p: &OneShotParams<'_>) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if let Some(hw) = p.hwaccel {
        match hw {
            HwAccelType::Cuda => {
                args.extend(["-hwaccel".into(), "cuda".into(), "-hwaccel_output_format".into(), "cuda".into()]);
            }
            HwAccelType::Qsv => {
                args.extend(["-hwaccel".into(), "qsv".into(), "-hwaccel_output_format".into(), "qsv".into()]);
            }
        }
    }

    args.extend([
        "-copyts".into(),
        "-avoid_negative_ts".into(),
        "disabled".into(),
        "-start_at_zero".into(),
    ]);
    args.extend(["-ss".into(), format!("{:.6}", p.adjusted_start_timestamp_sec)]);
    args.extend(["-i".into(), p.source_path.to_string_lossy().into_owned()]);
    args.extend(["-t".into(), format!("{:.6}", p.duration_sec)]);

    match p.variant.kind {
        VariantKind::Video => build_one_shot_video_args(p, &mut args),
        VariantKind::Audio => build_one_shot_audio_args(p, &mut args),
    }

    if p.fragmented_mp4 {
        args.extend([
            "-f".into(),
            "mp4".into(),
            "-movflags".into(),
            "frag_keyframe+empty_moov+default_base_moof".into(),
        ]);
        if matches!(p.variant.codec_strategy.as_deref(), Some(c) if c.eq_ignore_ascii_case("hevc") || c.eq_ignore_ascii_case("h265"))
        {
            args.extend(["-tag:v".into(), "hvc1".into()]);
        }
    } else {
        args.extend(["-f".into(), "mpegts".into()]);
    }

    args.push(p.output_path.to_string_lossy().into_owned());
    args
}

fn build_one_shot_video_args(p: &OneShotParams<'_>, args: &mut Vec<String>) {
    args.extend(["-sn".into(), "-an".into()]);

    let mut filters = Vec::new();
    if let (Some(w), Some(h)) = (p.variant.width, p.variant.height) {
        filters.push(format!(
            "scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2",
            w, h, w, h
        ));
    }
    if p.media_meta.is_10bit {
        filters.push("zscale=t=linear:npl=100,format=gbrpf32le,zscale=p=bt709,tonemap=hable,zscale=t=bt709:m=bt709:r=tv,format=yuv420p".to_string());
    }
    let filter_graph = if filters.is_empty() {
        "copy".to_string()
    } else {
        filters.join(",")
    };
    args.extend(["-filter_complex".into(), format!("[0:v]{}[outv]", filter_graph)]);
    args.extend(["-map".into(), "[outv]".into()]);

    let codec = p
        .variant
        .codec_strategy
        .clone()
        .unwrap_or_else(|| "libx264".to_string());
    args.extend(["-c:v".into(), codec]);
    if let Some(bitrate) = p.variant.bitrate_kbps {
        args.extend(["-b:v".into(), format!("{}k", bitrate)]);
        args.extend(["-maxrate".into(), format!("{}k", bitrate)]);
        args.extend(["-bufsize".into(), format!("{}k", bitrate * 2)]);
    }
    args.extend(["-g".into(), p.gop_frames.to_string()]);
    args.extend(["-keyint_min".into(), p.gop_frames.to_string()]);
}

fn build_one_shot_audio_args(p: &OneShotParams<'_>, args: &mut Vec<String>) {
    args.extend(["-vn".into(), "-sn".into()]);
    let track_index = p.variant.audio_track_index.unwrap_or(0);
    args.extend(["-map".into(), format!("0:a:{}", track_index)]);

    let requested = p
        .variant
        .codec_strategy
        .as_deref()
        .unwrap_or("aac")
        .to_string();
    let source_codec = p.media_meta.audio_codec.as_deref().unwrap_or("");
    let codec = resolve_audio_codec(&requested, source_codec, p.web_supported_codecs);
    args.extend(["-c:a".into(), codec.clone()]);

    if codec != "copy" {
        let channels = p.variant.channels.unwrap_or(2);
        args.extend(["-b:a".into(), format!("{}k", audio_bitrate_kbps(channels))]);
        if let Some(sample_rate) = p.variant.sample_rate {
            args.extend(["-ar".into(), sample_rate.to_string()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MediaMeta;
    use std::path::PathBuf;

    fn video_params<'a>(variant: &'a Variant, meta: &'a MediaMeta, output_dir: &'a Path, source: &'a Path) -> EncodeParams<'a> {
        EncodeParams {
            source_path: source,
            output_dir,
            variant,
            media_meta: meta,
            start_segment: 5,
            adjusted_start_timestamp_sec: 29.5,
            seg_sec: 6.0,
            gop_frames: 144,
            extension: "ts",
            fragmented_mp4: false,
            hwaccel: None,
            web_supported_codecs: &[],
        }
    }

    #[test]
    fn seeks_before_input() {
        let variant = Variant::video("1080p", 1920, 1080, 6000);
        let meta = MediaMeta::test_default();
        let output_dir = PathBuf::from("/out/movie42/1080p");
        let source = PathBuf::from("/media/movie42.mkv");
        let args = build_args(&video_params(&variant, &meta, &output_dir, &source));
        let ss_pos = args.iter().position(|a| a == "-ss").unwrap();
        let i_pos = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss_pos < i_pos);
    }

    #[test]
    fn video_session_maps_filtered_output_and_sets_start_number() {
        let variant = Variant::video("1080p", 1920, 1080, 6000);
        let meta = MediaMeta::test_default();
        let output_dir = PathBuf::from("/out/movie42/1080p");
        let source = PathBuf::from("/media/movie42.mkv");
        let args = build_args(&video_params(&variant, &meta, &output_dir, &source));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "[outv]"));
        let start_pos = args.iter().position(|a| a == "-start_number").unwrap();
        assert_eq!(args[start_pos + 1], "5");
    }

    #[test]
    fn audio_session_maps_specific_track_and_skips_filters() {
        let variant = Variant::audio(2, "aac", 2, 48_000);
        let meta = MediaMeta::test_default();
        let output_dir = PathBuf::from("/out/movie42/audio_2_aac");
        let source = PathBuf::from("/media/movie42.mkv");
        let args = build_args(&video_params(&variant, &meta, &output_dir, &source));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:a:2"));
        assert!(!args.iter().any(|a| a == "-filter_complex"));
    }

    #[test]
    fn fmp4_hevc_variant_sets_fragment_flags_and_hvc1_tag() {
        let mut variant = Variant::video("2160p", 3840, 2160, 15000);
        variant.codec_strategy = Some("hevc".to_string());
        let meta = MediaMeta::test_default();
        let output_dir = PathBuf::from("/out/movie42/2160p");
        let source = PathBuf::from("/media/movie42.mkv");
        let mut params = video_params(&variant, &meta, &output_dir, &source);
        params.fragmented_mp4 = true;
        params.extension = "m4s";
        let args = build_args(&params);
        assert!(args.iter().any(|a| a == "-hls_fmp4_init_filename"));
        assert!(args.windows(2).any(|w| w[0] == "-tag:v" && w[1] == "hvc1"));
    }

    #[test]
    fn resolve_audio_codec_prefers_passthrough() {
        assert_eq!(resolve_audio_codec("AAC", "aac", &[]), "copy");
        assert_eq!(
            resolve_audio_codec("ac3", "aac", &["ac3".to_string()]),
            "ac3"
        );
        assert_eq!(resolve_audio_codec("opus", "aac", &["ac3".to_string()]), "aac");
    }

    #[test]
    fn audio_bitrate_follows_channel_count() {
        assert_eq!(audio_bitrate_kbps(2), 128);
        assert_eq!(audio_bitrate_kbps(6), 384);
    }

    #[test]
    fn one_shot_args_bound_duration_and_skip_hls_muxer() {
        let variant = Variant::video("1080p", 1920, 1080, 6000);
        let meta = MediaMeta::test_default();
        let output_path = PathBuf::from("/out/movie42/1080p/explicit_120000000_60000000.ts");
        let source = PathBuf::from("/media/movie42.mkv");
        let params = OneShotParams {
            source_path: &source,
            output_path: &output_path,
            variant: &variant,
            media_meta: &meta,
            adjusted_start_timestamp_sec: 12.0,
            duration_sec: 6.0,
            gop_frames: 144,
            fragmented_mp4: false,
            hwaccel: None,
            web_supported_codecs: &[],
        };
        let args = build_one_shot_args(&params);
        let ss_pos = args.iter().position(|a| a == "-ss").unwrap();
        let i_pos = args.iter().position(|a| a == "-i").unwrap();
        let t_pos = args.iter().position(|a| a == "-t").unwrap();
        assert!(ss_pos < i_pos);
        assert!(i_pos < t_pos);
        assert_eq!(args[t_pos + 1], "6.000000");
        assert!(!args.iter().any(|a| a == "-hls_time"));
        assert_eq!(args.last().unwrap(), &output_path.to_string_lossy().into_owned());
    }

    #[test]
    fn one_shot_fmp4_args_use_fragmented_mp4_muxer() {
        let mut variant = Variant::video("2160p", 3840, 2160, 15000);
        variant.codec_strategy = Some("hevc".to_string());
        let meta = MediaMeta::test_default();
        let output_path = PathBuf::from("/out/movie42/2160p/explicit_0_60000000.m4s");
        let source = PathBuf::from("/media/movie42.mkv");
        let params = OneShotParams {
            source_path: &source,
            output_path: &output_path,
            variant: &variant,
            media_meta: &meta,
            adjusted_start_timestamp_sec: 0.0,
            duration_sec: 6.0,
            gop_frames: 144,
            fragmented_mp4: true,
            hwaccel: None,
            web_supported_codecs: &[],
        };
        let args = build_one_shot_args(&params);
        assert!(args.windows(2).any(|w| w[0] == "-movflags" && w[1].contains("frag_keyframe")));
        assert!(args.windows(2).any(|w| w[0] == "-tag:v" && w[1] == "hvc1"));
    }
}
