//! Offer/answer negotiation
//!
//! Accepts client offers, creates one [`ReceivePeer`] per offer and keeps
//! track of live peers until they tear down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::config::IceServerConfig;
use super::peer::{PeerContext, ReceivePeer};
use super::session::{SessionInfo, SessionRegistry};
use super::signaling::{AnswerResponse, OfferRequest};
use crate::config::StreamConfig;
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::inference::EmotionPipeline;

/// Negotiation timing and ICE settings
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub gather_timeout: Duration,
    pub idle_connect_timeout: Duration,
    pub throttle: Duration,
}

impl From<&StreamConfig> for NegotiationConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            gather_timeout: Duration::from_millis(config.ice_gathering_timeout_ms),
            idle_connect_timeout: Duration::from_secs(config.idle_connect_timeout_secs),
            throttle: Duration::from_millis(config.throttle_ms),
        }
    }
}

/// Entry point for `POST /webrtc/offer`
pub struct NegotiationHandler {
    config: NegotiationConfig,
    registry: Arc<SessionRegistry>,
    pipeline: Arc<EmotionPipeline>,
    events: Arc<EventBus>,
    peers: Arc<RwLock<HashMap<String, Arc<ReceivePeer>>>>,
}

impl NegotiationHandler {
    pub fn new(
        config: NegotiationConfig,
        pipeline: Arc<EmotionPipeline>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            pipeline,
            events,
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Validate an offer, negotiate a receive-only connection and return the answer
    ///
    /// An invalid offer is rejected before any connection is created.
    pub async fn handle_offer(&self, offer: OfferRequest) -> Result<AnswerResponse> {
        offer.validate()?;

        let peer_id = uuid::Uuid::new_v4().to_string();
        let ctx = PeerContext {
            registry: self.registry.clone(),
            pipeline: self.pipeline.clone(),
            events: self.events.clone(),
            throttle: self.config.throttle,
        };
        let peer = ReceivePeer::new(peer_id.clone(), ctx, &self.config.ice_servers).await?;

        // Track the peer before gathering starts: if the caller goes away
        // mid-negotiation, close_all and the idle timer still cover it
        self.peers.write().insert(peer_id.clone(), peer.clone());
        let peers = self.peers.clone();
        let watched = peer.clone();
        tokio::spawn(async move {
            watched.closed().await;
            peers.write().remove(watched.peer_id());
        });
        peer.spawn_idle_timer(self.config.idle_connect_timeout);

        // Runs to completion even if the request future is dropped
        let gather_timeout = self.config.gather_timeout;
        let negotiating = peer.clone();
        let answer = tokio::spawn(async move {
            let result = negotiating.negotiate(&offer, gather_timeout).await;
            if let Err(e) = &result {
                warn!("Negotiation for peer {} failed: {}", negotiating.peer_id(), e);
                negotiating.close().await;
            }
            result
        })
        .await
        .map_err(|e| AppError::Internal(format!("negotiation task failed: {}", e)))??;

        info!(
            "Peer {} negotiated ({} active peers)",
            peer_id,
            self.peer_count()
        );
        Ok(answer)
    }

    /// Active stream sessions
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Close every peer; each peer's cleanup runs once
    pub async fn close_all(&self) {
        let peers: Vec<_> = self.peers.write().drain().map(|(_, p)| p).collect();
        if peers.is_empty() {
            return;
        }
        info!("Closing {} peer connection(s)", peers.len());
        futures::future::join_all(peers.iter().map(|p| p.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::test_util;

    fn handler_with(config: NegotiationConfig) -> NegotiationHandler {
        let ctx = test_util::peer_context();
        NegotiationHandler::new(config, ctx.pipeline, ctx.events)
    }

    fn handler() -> NegotiationHandler {
        handler_with(NegotiationConfig::from(&StreamConfig::default()))
    }

    /// Host candidates only, so gathering never leaves the machine
    fn local_handler() -> NegotiationHandler {
        let mut config = NegotiationConfig::from(&StreamConfig::default());
        config.ice_servers.clear();
        config.gather_timeout = Duration::from_secs(1);
        handler_with(config)
    }

    async fn wait_for_peer_count(handler: &NegotiationHandler, expected: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while handler.peer_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "peer count stuck at {}", handler.peer_count());
    }

    #[tokio::test]
    async fn test_empty_sdp_rejected_without_session() {
        let handler = handler();
        let mut offer = OfferRequest::new("");
        offer.ice_candidates = Some(vec![]);

        let err = handler.handle_offer(offer).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOffer(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(handler.peer_count(), 0);
        assert!(handler.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_rejected() {
        let handler = handler();
        let mut offer = OfferRequest::new("v=0\r\n");
        offer.sdp_type = "answer".to_string();

        assert!(matches!(
            handler.handle_offer(offer).await,
            Err(AppError::InvalidOffer(_))
        ));
        assert_eq!(handler.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_sdp_closes_peer() {
        let handler = local_handler();

        let err = handler
            .handle_offer(OfferRequest::new("not sdp"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidOffer(_)));

        wait_for_peer_count(&handler, 0).await;
        assert!(handler.sessions().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_offer_stays_tracked() {
        let handler = Arc::new(local_handler());
        let (sender, offer) = test_util::sending_offer().await;

        let request = tokio::spawn({
            let handler = handler.clone();
            async move { handler.handle_offer(offer).await }
        });

        // The caller goes away as soon as the peer exists
        wait_for_peer_count(&handler, 1).await;
        request.abort();
        let _ = request.await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.peer_count(), 1);

        handler.close_all().await;
        assert_eq!(handler.peer_count(), 0);
        assert!(handler.sessions().is_empty());
        let _ = sender.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_valid_offer_answered() {
        let handler = local_handler();
        let (sender, offer) = test_util::sending_offer().await;

        let answer = handler.handle_offer(offer).await.unwrap();
        assert_eq!(answer.sdp_type, "answer");
        assert_eq!(handler.peer_count(), 1);

        handler.close_all().await;
        assert_eq!(handler.peer_count(), 0);
        let _ = sender.close().await;
    }

    #[test]
    fn test_config_from_stream_config() {
        let config = NegotiationConfig::from(&StreamConfig::default());
        assert_eq!(config.gather_timeout, Duration::from_secs(3));
        assert_eq!(config.idle_connect_timeout, Duration::from_secs(300));
        assert_eq!(config.throttle, Duration::from_millis(200));
        assert_eq!(config.ice_servers.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_without_peers() {
        let handler = handler();
        handler.close_all().await;
        assert_eq!(handler.peer_count(), 0);
    }
}
