use axum::{
    http::{header, request::Parts, HeaderValue, Method},
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::ws::ws_handler;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let extra_origins = Arc::new(state.config.web.allowed_origins.clone());

    // Browsers on the same machine only, plus anything explicitly configured
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .map(|o| is_allowed_origin(o, &extra_origins))
                    .unwrap_or(false)
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route("/health", get(handlers::health_check))
        // WebRTC ingestion
        .route("/webrtc/offer", post(handlers::webrtc_offer))
        .route("/webrtc/ice-servers", get(handlers::webrtc_ice_servers))
        .route("/webrtc/sessions", get(handlers::webrtc_sessions))
        // Subscriber real-time channel
        .route("/ws", any(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Check an `Origin` header against the localhost policy and the configured extras
fn is_allowed_origin(origin: &str, extra: &[String]) -> bool {
    if extra.iter().any(|allowed| allowed == origin) {
        return true;
    }

    let rest = match origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    {
        Some(rest) => rest,
        None => return false,
    };

    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (rest, None),
    };

    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }

    matches!(host, "localhost" | "127.0.0.1")
}
