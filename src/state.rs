use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::inference::{EmotionPipeline, InferenceEngine};
use crate::webrtc::{NegotiationConfig, NegotiationHandler};

/// Application-wide state shared across handlers
///
/// Everything that processes video goes through `negotiator`; results come
/// back out through `events`.
pub struct AppState {
    /// Effective configuration (file defaults, env, CLI)
    pub config: AppConfig,
    /// Face detector and emotion classifier, built once
    pub engine: Arc<InferenceEngine>,
    /// Offer handling and live stream sessions
    pub negotiator: Arc<NegotiationHandler>,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Wire the pipeline together around an inference engine
    pub fn new(
        config: AppConfig,
        engine: Arc<InferenceEngine>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::new());
        let pipeline = Arc::new(EmotionPipeline::new(engine.clone(), events.clone()));
        let negotiator = Arc::new(NegotiationHandler::new(
            NegotiationConfig::from(&config.stream),
            pipeline,
            events.clone(),
        ));

        Arc::new(Self {
            config,
            engine,
            negotiator,
            events,
            shutdown_tx,
        })
    }

    /// Subscribe to shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
