//! Face detection and emotion inference
//!
//! Two stages behind trait seams ([`FaceDetector`], [`EmotionModel`]), shared
//! by every track through an [`InferenceEngine`], and the per-frame
//! [`EmotionPipeline`] that drives them.

pub mod arena;
pub mod classifier;
pub mod detector;
pub mod emotion;
pub mod engine;
pub mod onnx;
pub mod pipeline;

pub use arena::{ScopedTensor, TensorArena};
pub use classifier::{EmotionClassifier, EmotionModel, NormalizedBox};
pub use detector::{DetectionBox, FaceDetector};
pub use emotion::{EmotionLabel, EmotionScore, EmotionScores, IMAGE_SIZE, NUM_EMOTIONS};
pub use engine::InferenceEngine;
pub use onnx::{OnnxEmotionModel, OnnxFaceDetector};
pub use pipeline::EmotionPipeline;
