//! Frame throttle and sink
//!
//! Decoded frames are offered synchronously from the decoder thread. There
//! is no queue: a frame is either admitted and handed to the pipeline
//! straight away, or dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::session::{FrameDrop, StreamSession};
use crate::inference::EmotionPipeline;
use crate::video::RawFrame;

/// Throttles one track's frames into the emotion pipeline
pub struct FrameSink {
    session: Arc<StreamSession>,
    pipeline: Arc<EmotionPipeline>,
    interval: Duration,
    runtime: Handle,
    stopped: AtomicBool,
    offered: AtomicU64,
}

impl FrameSink {
    /// Must be called from within a tokio runtime
    pub fn new(
        session: Arc<StreamSession>,
        pipeline: Arc<EmotionPipeline>,
        interval: Duration,
    ) -> Self {
        Self::with_handle(session, pipeline, interval, Handle::current())
    }

    pub fn with_handle(
        session: Arc<StreamSession>,
        pipeline: Arc<EmotionPipeline>,
        interval: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            session,
            pipeline,
            interval,
            runtime,
            stopped: AtomicBool::new(false),
            offered: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Offer a decoded frame
    ///
    /// Safe to call from any thread. Returns why the frame was dropped, if
    /// it was; admitted frames are processed on the runtime.
    pub fn offer_frame(&self, frame: RawFrame) -> Result<(), FrameDrop> {
        self.offered.fetch_add(1, Ordering::Relaxed);
        if self.is_stopped() {
            return Err(FrameDrop::Closed);
        }

        let ticket = match self.session.try_admit(Instant::now(), self.interval) {
            Ok(ticket) => ticket,
            Err(reason) => {
                trace!(
                    track_id = %self.session.track_id(),
                    "Dropping frame #{}: {:?}",
                    frame.sequence,
                    reason
                );
                return Err(reason);
            }
        };

        let pipeline = self.pipeline.clone();
        self.runtime.spawn(async move {
            pipeline.run(ticket, frame).await;
        });
        Ok(())
    }

    /// Detach the sink; `true` only for the first call
    pub fn stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::AcqRel);
        if first {
            debug!(
                track_id = %self.session.track_id(),
                "Frame sink stopped after {} frames",
                self.offered.load(Ordering::Relaxed)
            );
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.session.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::events::EventBus;
    use crate::inference::{
        DetectionBox, EmotionClassifier, FaceDetector, InferenceEngine, ScopedTensor,
    };
    use crate::inference::classifier::EmotionModel;
    use crate::video::{i420_buffer_size, RgbFrame, Resolution};

    struct NoFaces;

    impl FaceDetector for NoFaces {
        fn detect(&self, _frame: &RgbFrame) -> Result<Vec<DetectionBox>> {
            Ok(Vec::new())
        }
    }

    struct Unused;

    impl EmotionModel for Unused {
        fn predict(&self, _batch: &ScopedTensor) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }
    }

    fn pipeline() -> Arc<EmotionPipeline> {
        let engine = InferenceEngine::new(
            Arc::new(|| -> Result<Arc<dyn FaceDetector>> { Ok(Arc::new(NoFaces)) }),
            Arc::new(|| -> Result<EmotionClassifier> {
                Ok(EmotionClassifier::new(Box::new(Unused), 0.03))
            }),
        );
        Arc::new(EmotionPipeline::new(
            Arc::new(engine),
            Arc::new(EventBus::new()),
        ))
    }

    fn frame() -> RawFrame {
        RawFrame::new(vec![16u8; i420_buffer_size(64, 48)], Resolution::new(64, 48), 0)
    }

    #[tokio::test]
    async fn test_throttles_burst() {
        let session = StreamSession::new("t", "p");
        let sink = FrameSink::new(session.clone(), pipeline(), Duration::from_secs(60));

        tokio_test::assert_ok!(sink.offer_frame(frame()));
        for _ in 0..10 {
            assert!(sink.offer_frame(frame()).is_err());
        }
        assert_eq!(session.info().frames_processed, 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_detaches() {
        let session = StreamSession::new("t", "p");
        let sink = FrameSink::new(session, pipeline(), Duration::ZERO);

        assert!(sink.stop());
        assert!(!sink.stop());
        assert_eq!(sink.offer_frame(frame()), Err(FrameDrop::Closed));
    }

    #[tokio::test]
    async fn test_closed_session_drops() {
        let session = StreamSession::new("t", "p");
        let sink = FrameSink::new(session.clone(), pipeline(), Duration::ZERO);
        session.mark_closed();
        assert!(sink.is_stopped());
        assert_eq!(sink.offer_frame(frame()), Err(FrameDrop::Closed));
    }
}
