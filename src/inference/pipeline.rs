//! Per-frame emotion pipeline
//!
//! I420 frame -> RGB24 -> face detection -> emotion classification ->
//! one `emotion` event per face. Numeric work runs on the blocking pool so
//! the runtime keeps serving signaling and subscribers.

use std::sync::Arc;

use tracing::{debug, info};

use super::arena::TensorArena;
use super::engine::InferenceEngine;
use crate::error::{AppError, Result};
use crate::events::{EmotionEvent, EventBus, SystemEvent};
use crate::utils::LogThrottler;
use crate::video::{i420_to_rgb24, RawFrame, RgbFrame};
use crate::{error_throttled, warn_throttled};
use crate::webrtc::session::InFlight;

/// Runs admitted frames through both inference stages and publishes results
pub struct EmotionPipeline {
    engine: Arc<InferenceEngine>,
    events: Arc<EventBus>,
    log_throttler: LogThrottler,
}

impl EmotionPipeline {
    pub fn new(engine: Arc<InferenceEngine>, events: Arc<EventBus>) -> Self {
        Self {
            engine,
            events,
            log_throttler: LogThrottler::with_secs(5),
        }
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    /// Drop log throttling state kept for a finished track
    pub fn forget_track(&self, track_id: &str) {
        self.log_throttler.clear_prefix(&format!("{}:", track_id));
    }

    /// Process one frame, logging and swallowing any failure
    ///
    /// The session stays alive whatever happens here; the next admitted
    /// frame gets another chance.
    pub async fn run(&self, ticket: InFlight, frame: RawFrame) {
        let track_id = ticket.session().track_id().to_string();
        match self.process(ticket, frame).await {
            Ok(_) => {}
            Err(e) if e.is_fatal() => {
                error_throttled!(
                    self.log_throttler,
                    &format!("{}:engine", track_id),
                    track_id = %track_id,
                    "Inference engine unavailable: {}",
                    e
                );
            }
            Err(e) => {
                warn_throttled!(
                    self.log_throttler,
                    &format!("{}:inference", track_id),
                    track_id = %track_id,
                    "inference failed: {}",
                    e
                );
            }
        }
    }

    /// Process one frame and return the number of events published
    ///
    /// The ticket keeps the track busy until this returns.
    pub async fn process(&self, ticket: InFlight, frame: RawFrame) -> Result<usize> {
        let session = ticket.session().clone();
        let track_id = session.track_id().to_string();

        let decoded_at = frame.decoded_at;

        let detector = self.engine.detector().await?;
        let (rgb, boxes) = tokio::task::spawn_blocking(move || {
            let (width, height) = (frame.width(), frame.height());
            let data = i420_to_rgb24(frame.data(), width, height)?;
            drop(frame);
            let rgb = RgbFrame::new(data, width, height);
            let boxes = detector.detect(&rgb)?;
            Ok::<_, AppError>((rgb, boxes))
        })
        .await
        .map_err(|e| AppError::Internal(format!("detection task failed: {}", e)))??;

        let had_face = session.set_has_seen_face(!boxes.is_empty());
        if boxes.is_empty() {
            if had_face {
                debug!(track_id = %track_id, "Face lost");
            }
            return Ok(0);
        }
        if !had_face {
            info!(track_id = %track_id, faces = boxes.len(), "new face detected");
        }

        let classifier = self.engine.classifier().await?;
        let (boxes, scores) = tokio::task::spawn_blocking(move || {
            let arena = TensorArena::new();
            let scores = classifier.classify(&rgb, &boxes, &arena)?;
            Ok::<_, AppError>((boxes, scores))
        })
        .await
        .map_err(|e| AppError::Internal(format!("classification task failed: {}", e)))??;

        // Closed while classifying: let the work finish, publish nothing
        if session.is_closed() {
            debug!(track_id = %track_id, "Session closed during inference, discarding result");
            return Ok(0);
        }

        let mut published = 0;
        for (face_box, face_scores) in boxes.into_iter().zip(scores.iter()) {
            let event = EmotionEvent::new(track_id.clone(), face_box, face_scores);
            debug!(
                track_id = %track_id,
                emotion = %event.dominant_emotion.emotion,
                probability = event.dominant_emotion.probability,
                x = face_box.x,
                y = face_box.y,
                width = face_box.width,
                height = face_box.height,
                latency_ms = decoded_at.elapsed().as_millis() as u64,
                "Emotion detected"
            );
            self.events.publish(SystemEvent::Emotion(event));
            published += 1;
        }

        drop(ticket);
        Ok(published)
    }
}
