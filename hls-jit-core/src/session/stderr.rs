//! Line-oriented parsing of ffmpeg's stderr progress output. No "progress"
//! event exists on the child process; `time=` tokens are parsed from raw
//! stderr lines directly.

/// Parse a `time=HH:MM:SS.mmm` token into elapsed seconds.
pub fn parse_time_token(line: &str) -> Option<f64> {
    let start = line.find("time=")?;
    let rest = &line[start + "time=".len()..];
    let end = rest.find(' ').unwrap_or(rest.len());
    parse_hms(&rest[..end])
}

fn parse_hms(s: &str) -> Option<f64> {
    let mut parts = s.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

const ERROR_KEYWORDS: [&str; 5] = ["Error", "Invalid", "Failed", "Cannot", "Unsupported"];

/// Whether a stderr line contains one of ffmpeg's common failure keywords.
pub fn contains_error_keyword(line: &str) -> bool {
    ERROR_KEYWORDS.iter().any(|kw| line.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_token_from_a_progress_line() {
        let line = "frame=  150 fps=25 q=-1.0 size=    2048kB time=00:00:06.00 bitrate=2796.2kbits/s speed=1.0x";
        assert_eq!(parse_time_token(line), Some(6.0));
    }

    #[test]
    fn no_time_token_returns_none() {
        assert_eq!(parse_time_token("ffmpeg version 6.0"), None);
    }

    #[test]
    fn detects_any_configured_error_keyword() {
        assert!(contains_error_keyword("Unsupported codec for stream 0"));
        assert!(contains_error_keyword("[h264] Invalid NAL unit size"));
        assert!(!contains_error_keyword("frame= 10 fps=25"));
    }
}
