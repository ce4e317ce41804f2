//! Master playlist assembly: the grid-derived variant list and per-audio-track
//! URIs. Pure string formatting over configured variants; no session or
//! child-process dependency.

/// One configured video rendition, as listed in the master playlist.
#[derive(Debug, Clone)]
pub struct VideoVariantSummary {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub codec_tag: String,
}

/// One audio track, keyed by `(trackIndex, codec)` as the variant label shape
/// requires.
#[derive(Debug, Clone)]
pub struct AudioTrackSummary {
    pub track_index: u32,
    pub codec: String,
    pub language: Option<String>,
    pub channels: u16,
    pub bitrate_kbps: u32,
}

/// Render `/api/stream/{id}/master.m3u8`.
pub fn render_master_playlist(
    video_id: &str,
    video_variants: &[VideoVariantSummary],
    audio_tracks: &[AudioTrackSummary],
) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:7\n");

    for (i, track) in audio_tracks.iter().enumerate() {
        let uri = format!(
            "/api/stream/{}/audio/track_{}_{}/playlist.m3u8",
            video_id, track.track_index, track.codec
        );
        let language = track.language.as_deref().unwrap_or("und");
        let name = format!("Track {} ({})", track.track_index, track.codec);
        let default = if i == 0 { "YES" } else { "NO" };
        out.push_str(&format!(
            "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",LANGUAGE=\"{}\",NAME=\"{}\",DEFAULT={},AUTOSELECT=YES,URI=\"{}\"\n",
            language, name, default, uri
        ));
    }

    for variant in video_variants {
        let bandwidth = (variant.bitrate_kbps as u64) * 1000;
        let resolution = format!("{}x{}", variant.width, variant.height);
        let audio_attr = if audio_tracks.is_empty() {
            String::new()
        } else {
            ",AUDIO=\"audio\"".to_string()
        };
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={},CODECS=\"{}\"{}\n",
            bandwidth, resolution, variant.codec_tag, audio_attr
        ));
        out.push_str(&format!(
            "/api/stream/{}/{}/playlist.m3u8\n",
            video_id, variant.label
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_one_stream_inf_per_video_variant() {
        let variants = vec![
            VideoVariantSummary {
                label: "1080p".to_string(),
                width: 1920,
                height: 1080,
                bitrate_kbps: 6000,
                codec_tag: "avc1.640028".to_string(),
            },
            VideoVariantSummary {
                label: "720p".to_string(),
                width: 1280,
                height: 720,
                bitrate_kbps: 3000,
                codec_tag: "avc1.640028".to_string(),
            },
        ];
        let playlist = render_master_playlist("movie42", &variants, &[]);
        assert_eq!(playlist.matches("#EXT-X-STREAM-INF").count(), 2);
        assert!(playlist.contains("/api/stream/movie42/1080p/playlist.m3u8"));
        assert!(playlist.contains("/api/stream/movie42/720p/playlist.m3u8"));
    }

    #[test]
    fn audio_tracks_get_media_entries_and_uris() {
        let audio = vec![AudioTrackSummary {
            track_index: 0,
            codec: "aac".to_string(),
            language: Some("en".to_string()),
            channels: 2,
            bitrate_kbps: 128,
        }];
        let playlist = render_master_playlist("movie42", &[], &audio);
        assert!(playlist.contains("TYPE=AUDIO"));
        assert!(playlist.contains("/api/stream/movie42/audio/track_0_aac/playlist.m3u8"));
    }
}
