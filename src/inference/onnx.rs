//! ONNX Runtime backends for both inference stages

use std::path::Path;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use tracing::info;

use super::arena::ScopedTensor;
use super::classifier::EmotionModel;
use super::detector::{nms, DetectionBox, FaceDetector};
use crate::error::{AppError, Result};
use crate::video::RgbFrame;

/// UltraFace RFB-320 input width
const DETECTOR_WIDTH: usize = 320;
/// UltraFace RFB-320 input height
const DETECTOR_HEIGHT: usize = 240;

fn intra_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(1)
}

fn load_session(path: &Path) -> std::result::Result<Session, ort::Error> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads())?
        .commit_from_file(path)
}

/// Output name, preferring a well-known name over position
fn output_name(session: &Session, preferred: &str, index: usize) -> Option<String> {
    session
        .outputs
        .iter()
        .find(|o| o.name == preferred)
        .or_else(|| session.outputs.get(index))
        .map(|o| o.name.clone())
}

/// UltraFace-style detector (RFB-320)
///
/// Input `[1, 3, 240, 320]` normalised as `(px - 127) / 128`; outputs
/// `scores [1, N, 2]` and `boxes [1, N, 4]` with fractional corners.
pub struct OnnxFaceDetector {
    session: Mutex<Session>,
    input_name: String,
    scores_name: String,
    boxes_name: String,
    score_threshold: f32,
    nms_threshold: f32,
}

impl OnnxFaceDetector {
    pub fn load(path: &Path, score_threshold: f32, nms_threshold: f32) -> Result<Self> {
        if !path.is_file() {
            return Err(AppError::DetectorInit(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let session = load_session(path).map_err(|e| {
            AppError::DetectorInit(format!("failed to load {}: {}", path.display(), e))
        })?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| AppError::DetectorInit("detector model has no inputs".to_string()))?;
        let scores_name = output_name(&session, "scores", 0)
            .ok_or_else(|| AppError::DetectorInit("detector model has no scores output".into()))?;
        let boxes_name = output_name(&session, "boxes", 1)
            .ok_or_else(|| AppError::DetectorInit("detector model has no boxes output".into()))?;

        info!("Loaded face detector model: {}", path.display());

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            scores_name,
            boxes_name,
            score_threshold,
            nms_threshold,
        })
    }

    /// Bilinear resize into a normalised NCHW tensor
    fn preprocess(frame: &RgbFrame) -> Vec<f32> {
        let plane = DETECTOR_WIDTH * DETECTOR_HEIGHT;
        let mut data = vec![0f32; 3 * plane];
        let (sw, sh) = (frame.width as usize, frame.height as usize);
        let scale_x = sw as f32 / DETECTOR_WIDTH as f32;
        let scale_y = sh as f32 / DETECTOR_HEIGHT as f32;

        for dy in 0..DETECTOR_HEIGHT {
            let fy = ((dy as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (sh - 1) as f32);
            let y0 = fy.floor() as usize;
            let y1 = (y0 + 1).min(sh - 1);
            let wy = fy - y0 as f32;

            for dx in 0..DETECTOR_WIDTH {
                let fx = ((dx as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (sw - 1) as f32);
                let x0 = fx.floor() as usize;
                let x1 = (x0 + 1).min(sw - 1);
                let wx = fx - x0 as f32;

                let (p00, p10) = (frame.pixel(x0, y0), frame.pixel(x1, y0));
                let (p01, p11) = (frame.pixel(x0, y1), frame.pixel(x1, y1));
                let idx = dy * DETECTOR_WIDTH + dx;
                for c in 0..3 {
                    let top = p00[c] as f32 + (p10[c] as f32 - p00[c] as f32) * wx;
                    let bottom = p01[c] as f32 + (p11[c] as f32 - p01[c] as f32) * wx;
                    let v = top + (bottom - top) * wy;
                    data[c * plane + idx] = (v - 127.0) / 128.0;
                }
            }
        }
        data
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, frame: &RgbFrame) -> Result<Vec<DetectionBox>> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }

        let shape = [1usize, 3, DETECTOR_HEIGHT, DETECTOR_WIDTH];
        let input = Tensor::from_array((shape, Self::preprocess(frame).into_boxed_slice()))
            .map_err(|e| AppError::Inference(format!("detector input: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| AppError::Inference(format!("face detector run failed: {}", e)))?;

        let (_, scores) = outputs[self.scores_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::Inference(format!("detector scores: {}", e)))?;
        let (_, boxes) = outputs[self.boxes_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::Inference(format!("detector boxes: {}", e)))?;

        let anchors = (scores.len() / 2).min(boxes.len() / 4);
        let mut candidates = Vec::new();
        for i in 0..anchors {
            let score = scores[i * 2 + 1];
            if score < self.score_threshold {
                continue;
            }
            let corners = [
                boxes[i * 4],
                boxes[i * 4 + 1],
                boxes[i * 4 + 2],
                boxes[i * 4 + 3],
            ];
            if let Some(b) =
                DetectionBox::from_fractional_corners(corners, frame.width, frame.height, score)
            {
                candidates.push(b);
            }
        }

        Ok(nms(candidates, self.nms_threshold))
    }

    fn name(&self) -> &str {
        "ultraface-rfb-320"
    }
}

/// Emotion CNN over 48x48 grayscale crops, `[N, 48, 48, 1]` to `[N, 7]`
pub struct OnnxEmotionModel {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxEmotionModel {
    pub fn load(path: &Path) -> Result<Self> {
        let session = load_session(path).map_err(|e| {
            AppError::ClassifierInit(format!("failed to load {}: {}", path.display(), e))
        })?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| AppError::ClassifierInit("emotion model has no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| AppError::ClassifierInit("emotion model has no outputs".to_string()))?;

        info!("Loaded emotion model: {}", path.display());

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl EmotionModel for OnnxEmotionModel {
    fn predict(&self, batch: &ScopedTensor) -> Result<Vec<Vec<f32>>> {
        let dims = batch.shape();
        if dims.len() != 4 {
            return Err(AppError::Inference(format!(
                "emotion batch must be rank 4, got {:?}",
                dims
            )));
        }
        let shape = [dims[0], dims[1], dims[2], dims[3]];
        let input = Tensor::from_array((shape, batch.to_vec().into_boxed_slice()))
            .map_err(|e| AppError::Inference(format!("emotion input: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| AppError::Inference(format!("emotion model run failed: {}", e)))?;

        let (out_shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::Inference(format!("emotion output: {}", e)))?;

        let classes = out_shape.last().copied().unwrap_or(0).max(0) as usize;
        if classes == 0 {
            return Err(AppError::Inference(
                "emotion model produced an empty output".to_string(),
            ));
        }
        Ok(data.chunks(classes).map(|row| row.to_vec()).collect())
    }

    fn name(&self) -> &str {
        "emotion-cnn"
    }
}
