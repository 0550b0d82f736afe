//! Shared fixtures for peer and negotiation tests

use std::sync::Arc;
use std::time::Duration;

use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::peer::PeerContext;
use super::session::SessionRegistry;
use super::signaling::OfferRequest;
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::inference::{EmotionClassifier, EmotionPipeline, FaceDetector, InferenceEngine};

/// Peer context whose inference stages are never reached
pub fn peer_context() -> PeerContext {
    let engine = InferenceEngine::new(
        Arc::new(|| -> Result<Arc<dyn FaceDetector>> {
            Err(AppError::DetectorInit("unused".into()))
        }),
        Arc::new(|| -> Result<EmotionClassifier> {
            Err(AppError::ClassifierInit("unused".into()))
        }),
    );
    let events = Arc::new(EventBus::new());
    PeerContext {
        registry: Arc::new(SessionRegistry::new()),
        pipeline: Arc::new(EmotionPipeline::new(Arc::new(engine), events.clone())),
        events,
        throttle: Duration::from_millis(200),
    }
}

/// Browser-like sending peer; returns it with its H.264 video offer
pub async fn sending_offer() -> (Arc<RTCPeerConnection>, OfferRequest) {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();

    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    );
    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Sendonly,
            send_encodings: vec![],
        }),
    )
    .await
    .unwrap();

    let offer = pc.create_offer(None).await.unwrap();
    (pc, OfferRequest::new(offer.sdp))
}
