//! Shared, lazily constructed inference stages

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OnceCell;
use tracing::{error, info};

use super::arena::TensorArena;
use super::classifier::{model_candidates, resolve_model_path, EmotionClassifier};
use super::detector::FaceDetector;
use super::onnx::{OnnxEmotionModel, OnnxFaceDetector};
use crate::config::ModelConfig;
use crate::error::{AppError, Result};

/// Builds the face detector; runs on a blocking thread
pub type DetectorFactory = Arc<dyn Fn() -> Result<Arc<dyn FaceDetector>> + Send + Sync>;

/// Builds the emotion classifier; runs on a blocking thread
pub type ClassifierFactory = Arc<dyn Fn() -> Result<EmotionClassifier> + Send + Sync>;

/// Owns the detector and classifier instances shared by all tracks
///
/// Each stage is built at most once. Concurrent first calls wait on the same
/// construction instead of starting their own.
pub struct InferenceEngine {
    detector: OnceCell<Arc<dyn FaceDetector>>,
    classifier: OnceCell<Arc<EmotionClassifier>>,
    detector_factory: DetectorFactory,
    classifier_factory: ClassifierFactory,
}

impl InferenceEngine {
    pub fn new(detector_factory: DetectorFactory, classifier_factory: ClassifierFactory) -> Self {
        Self {
            detector: OnceCell::new(),
            classifier: OnceCell::new(),
            detector_factory,
            classifier_factory,
        }
    }

    /// ONNX Runtime backed engine using the configured model locations
    pub fn from_config(models: &ModelConfig) -> Self {
        let detector_path = models.detector_model_path();
        let score_threshold = models.detector_score_threshold;
        let nms_threshold = models.detector_nms_threshold;
        let detector_factory: DetectorFactory = Arc::new(move || -> Result<Arc<dyn FaceDetector>> {
            let detector = OnnxFaceDetector::load(&detector_path, score_threshold, nms_threshold)?;
            Ok(Arc::new(detector) as Arc<dyn FaceDetector>)
        });

        let assets_dir = models.assets_dir.clone();
        let margin = models.box_margin;
        let classifier_factory: ClassifierFactory = Arc::new(move || -> Result<EmotionClassifier> {
            let path = resolve_model_path(&model_candidates(&assets_dir))?;
            let model = OnnxEmotionModel::load(&path)?;
            Ok(EmotionClassifier::new(Box::new(model), margin))
        });

        Self::new(detector_factory, classifier_factory)
    }

    /// Shared face detector, built on first use
    pub async fn detector(&self) -> Result<Arc<dyn FaceDetector>> {
        self.detector
            .get_or_try_init(|| async {
                let factory = self.detector_factory.clone();
                let start = Instant::now();
                let detector = tokio::task::spawn_blocking(move || factory())
                    .await
                    .map_err(|e| AppError::DetectorInit(format!("init task failed: {}", e)))?
                    .map_err(|e| {
                        error!("failed to initialize face detector: {}", e);
                        e
                    })?;
                info!(
                    "Face detector {} ready in {} ms",
                    detector.name(),
                    start.elapsed().as_millis()
                );
                Ok::<_, AppError>(detector)
            })
            .await
            .cloned()
    }

    /// Shared emotion classifier, built on first use
    pub async fn classifier(&self) -> Result<Arc<EmotionClassifier>> {
        self.classifier
            .get_or_try_init(|| async {
                let factory = self.classifier_factory.clone();
                let start = Instant::now();
                let classifier = tokio::task::spawn_blocking(move || factory())
                    .await
                    .map_err(|e| AppError::ClassifierInit(format!("init task failed: {}", e)))?
                    .map_err(|e| {
                        error!("failed to initialize emotion classifier: {}", e);
                        e
                    })?;
                info!(
                    "Emotion classifier ready in {} ms",
                    start.elapsed().as_millis()
                );
                Ok::<_, AppError>(Arc::new(classifier))
            })
            .await
            .cloned()
    }

    /// Build both stages and push one empty crop through the classifier
    ///
    /// Called once at startup; an error here means no frame can be served.
    pub async fn warm_up(&self) -> Result<()> {
        info!("Initializing inference engine and loading emotion model...");
        let start = Instant::now();

        self.detector().await?;
        let classifier = self.classifier().await?;
        tokio::task::spawn_blocking(move || classifier.warm_up(&TensorArena::new()))
            .await
            .map_err(|e| AppError::ClassifierInit(format!("warm-up task failed: {}", e)))??;

        info!("Emotion model ready in {} ms", start.elapsed().as_millis());
        Ok(())
    }

    /// Whether both stages have been constructed
    pub fn is_ready(&self) -> bool {
        self.detector.initialized() && self.classifier.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::arena::ScopedTensor;
    use crate::inference::classifier::EmotionModel;
    use crate::inference::detector::DetectionBox;
    use crate::video::RgbFrame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoFaces;

    impl FaceDetector for NoFaces {
        fn detect(&self, _frame: &RgbFrame) -> Result<Vec<DetectionBox>> {
            Ok(Vec::new())
        }
    }

    struct Uniform;

    impl EmotionModel for Uniform {
        fn predict(&self, batch: &ScopedTensor) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0; 7]; batch.batch_size()])
        }
    }

    fn counting_engine(builds: Arc<AtomicUsize>) -> InferenceEngine {
        let detector_builds = builds.clone();
        InferenceEngine::new(
            Arc::new(move || -> Result<Arc<dyn FaceDetector>> {
                detector_builds.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                Ok(Arc::new(NoFaces) as Arc<dyn FaceDetector>)
            }),
            Arc::new(|| -> Result<EmotionClassifier> {
                Ok(EmotionClassifier::new(Box::new(Uniform), 0.03))
            }),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_builds_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let engine = Arc::new(counting_engine(builds.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.detector().await.map(|_| ()) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_warm_up() {
        let engine = counting_engine(Arc::new(AtomicUsize::new(0)));
        assert!(!engine.is_ready());
        tokio_test::assert_ok!(engine.warm_up().await);
        assert!(engine.is_ready());
    }

    #[tokio::test]
    async fn test_init_failure_is_fatal_error() {
        let engine = InferenceEngine::new(
            Arc::new(|| -> Result<Arc<dyn FaceDetector>> {
                Err(AppError::DetectorInit("no backend".into()))
            }),
            Arc::new(|| -> Result<EmotionClassifier> {
                Err(AppError::ModelNotFound {
                    candidates: vec!["/nowhere/model.onnx".into()],
                })
            }),
        );

        let err = tokio_test::assert_err!(engine.warm_up().await);
        assert!(matches!(err, AppError::DetectorInit(_)));
        assert!(err.is_fatal());

        let err = engine.classifier().await.unwrap_err();
        assert!(matches!(err, AppError::ModelNotFound { .. }));
    }
}
