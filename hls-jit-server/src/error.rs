//! Server-specific error types: wraps [`hls_jit_core::HlsJitError`] and maps
//! every variant to the HTTP status codes spec.md §6/§7 specify.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hls_jit_core::HlsJitError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] HlsJitError),

    #[error("JIT transcoding is disabled")]
    Disabled,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ServerError::Disabled => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "JIT transcoding is disabled".to_string(),
            ),
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ServerError::Core(HlsJitError::DisabledFeature) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "JIT transcoding is disabled".to_string(),
            ),
            ServerError::Core(HlsJitError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg.clone()),
            ServerError::Core(HlsJitError::BadRequest(msg)) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ServerError::Core(HlsJitError::Timeout { .. }) => (
                StatusCode::ACCEPTED,
                "segment is being generated".to_string(),
            ),
            ServerError::Core(err @ HlsJitError::ProbeError { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ServerError::Core(err @ HlsJitError::SpawnError { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ServerError::Core(HlsJitError::TranscodeFailed { stderr_tail, .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("transcode failed: {stderr_tail}"),
            ),
            ServerError::Core(err @ HlsJitError::IOError(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        if !matches!(status, StatusCode::ACCEPTED) {
            tracing::warn!(status = %status, error = %self, "request failed");
        }

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_feature_maps_to_500_with_fixed_body() {
        let resp = ServerError::Core(HlsJitError::DisabledFeature).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn timeout_maps_to_202() {
        let resp = ServerError::Core(HlsJitError::Timeout {
            video_id: "v".into(),
            label: "1080p".into(),
            index: 3,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn not_found_maps_to_404() {
        let resp = ServerError::NotFound("nope".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
