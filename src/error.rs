use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid offer: {0}")]
    InvalidOffer(String),

    #[error("Emotion model not found. Expected at one of: {}", .candidates.join(", "))]
    ModelNotFound { candidates: Vec<String> },

    #[error("Face detector initialization failed: {0}")]
    DetectorInit(String),

    #[error("Emotion classifier initialization failed: {0}")]
    ClassifierInit(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Frame conversion error: {0}")]
    Conversion(String),

    #[error("Video decode error: {0}")]
    Decode(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl AppError {
    /// HTTP status for this error: protocol errors are the client's fault,
    /// everything else is reported as an internal failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidOffer(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error means no frame can ever be processed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::DetectorInit(_) | AppError::ClassifierInit(_) | AppError::ModelNotFound { .. }
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match status {
            StatusCode::BAD_REQUEST => self.to_string(),
            _ => "Internal Server Error".to_string(),
        };

        tracing::error!(
            status = status.as_u16(),
            error_message = %self,
            "Request failed"
        );

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::InvalidOffer("empty sdp".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::WebRtcError("ice".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_model_not_found_lists_candidates() {
        let err = AppError::ModelNotFound {
            candidates: vec!["/a/model.onnx".into(), "/b/model.onnx".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("/a/model.onnx, /b/model.onnx"));
        assert!(err.is_fatal());
    }
}
