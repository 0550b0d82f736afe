use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::webrtc::config::IceServerConfig;
use crate::webrtc::{AnswerResponse, OfferRequest, SessionInfo};

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Both inference stages are built
    pub engine_ready: bool,
    pub active_sessions: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        engine_ready: state.engine.is_ready(),
        active_sessions: state.negotiator.registry().len(),
    })
}

// ============================================================================
// WebRTC
// ============================================================================

/// Accept an `RTCSessionDescriptionInit` offer and answer it
///
/// A body that is not valid JSON is treated the same as a malformed offer,
/// so the client always gets a 400 with an explanation.
pub async fn webrtc_offer(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<OfferRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>> {
    let Json(offer) = body.map_err(|e| AppError::InvalidOffer(e.body_text()))?;

    debug!(
        candidates = offer.ice_candidates.as_ref().map(|c| c.len()).unwrap_or(0),
        "Received WebRTC offer"
    );

    let answer = state.negotiator.handle_offer(offer).await?;
    info!("Answered WebRTC offer");
    Ok(Json(answer))
}

/// ICE servers configuration for WebRTC clients
#[derive(Serialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServerConfig>,
}

pub async fn webrtc_ice_servers(State(state): State<Arc<AppState>>) -> Json<IceServersResponse> {
    Json(IceServersResponse {
        ice_servers: state.config.stream.ice_servers.clone(),
    })
}

#[derive(Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
    pub peers: usize,
}

pub async fn webrtc_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.negotiator.sessions(),
        peers: state.negotiator.peer_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::inference::{EmotionClassifier, FaceDetector, InferenceEngine};
    use tokio::sync::broadcast;

    fn test_state() -> Arc<AppState> {
        let engine = InferenceEngine::new(
            Arc::new(|| -> Result<Arc<dyn FaceDetector>> {
                Err(AppError::DetectorInit("no model in tests".into()))
            }),
            Arc::new(|| -> Result<EmotionClassifier> {
                Err(AppError::ClassifierInit("no model in tests".into()))
            }),
        );
        let (shutdown_tx, _) = broadcast::channel(1);
        AppState::new(AppConfig::default(), Arc::new(engine), shutdown_tx)
    }

    #[tokio::test]
    async fn test_health_reports_engine_state() {
        let Json(health) = health_check(State(test_state())).await;
        assert_eq!(health.status, "ok");
        assert!(!health.engine_ready);
        assert_eq!(health.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_empty_offer_is_bad_request() {
        let state = test_state();
        let err = webrtc_offer(State(state.clone()), Ok(Json(OfferRequest::new(""))))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(state.negotiator.peer_count(), 0);
        let Json(sessions) = webrtc_sessions(State(state)).await;
        assert!(sessions.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_ice_servers_default() {
        let Json(resp) = webrtc_ice_servers(State(test_state())).await;
        assert_eq!(resp.ice_servers.len(), 1);
        assert_eq!(resp.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }
}
