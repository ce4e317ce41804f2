//! Error taxonomy for the segment supervisor.
//!
//! Variants mirror the route-layer status codes one-to-one: `DisabledFeature`,
//! `SpawnError` and `TranscodeFailed` surface as 500, `NotFound` as 404,
//! `BadRequest` as 400, `Timeout` as 202. The mapping itself lives in the
//! server crate, which is the only place that knows about HTTP.

use thiserror::Error;

/// Result type alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, HlsJitError>;

#[derive(Error, Debug)]
pub enum HlsJitError {
    /// JIT transcoding is disabled via configuration.
    #[error("JIT transcoding is disabled")]
    DisabledFeature,

    /// The requested variant label or audio track index is absent from the grid.
    #[error("not found: {0}")]
    NotFound(String),

    /// A segment index or query parameter could not be parsed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Media probing failed before any session could be created.
    #[error("probe failed for {video_id}: {reason}")]
    ProbeError { video_id: String, reason: String },

    /// The transcoder child process could not be spawned.
    #[error("failed to spawn transcoder for ({video_id}, {label}): {reason}")]
    SpawnError {
        video_id: String,
        label: String,
        reason: String,
    },

    /// The transcoder child process exited nonzero while a request was waiting.
    #[error("transcode failed for ({video_id}, {label}): {stderr_tail}")]
    TranscodeFailed {
        video_id: String,
        label: String,
        stderr_tail: String,
    },

    /// The requested segment did not stabilize within the bounded wait.
    #[error("timed out waiting for segment {index} of ({video_id}, {label})")]
    Timeout {
        video_id: String,
        label: String,
        index: u32,
    },

    /// A playlist or segment file could not be written or read.
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
}

impl HlsJitError {
    /// Short, stable kind name for logging and metrics (never the `Display` text,
    /// which may embed per-request data).
    pub fn kind(&self) -> &'static str {
        match self {
            HlsJitError::DisabledFeature => "disabled_feature",
            HlsJitError::NotFound(_) => "not_found",
            HlsJitError::BadRequest(_) => "bad_request",
            HlsJitError::ProbeError { .. } => "probe_error",
            HlsJitError::SpawnError { .. } => "spawn_error",
            HlsJitError::TranscodeFailed { .. } => "transcode_failed",
            HlsJitError::Timeout { .. } => "timeout",
            HlsJitError::IOError(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_per_variant() {
        assert_eq!(HlsJitError::DisabledFeature.kind(), "disabled_feature");
        assert_eq!(
            HlsJitError::Timeout {
                video_id: "v".into(),
                label: "1080p".into(),
                index: 4
            }
            .kind(),
            "timeout"
        );
    }
}
