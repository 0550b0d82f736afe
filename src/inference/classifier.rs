//! Emotion classification stage

use std::path::{Path, PathBuf};

use tracing::debug;

use super::arena::{ScopedTensor, TensorArena};
use super::detector::DetectionBox;
use super::emotion::{EmotionScores, IMAGE_SIZE};
use crate::error::{AppError, Result};
use crate::video::RgbFrame;

/// Relative location of the classifier model under an assets root
pub const MODEL_RELATIVE_PATH: &str = "assets/face_emotion_model/model.onnx";

/// Emotion model backend
///
/// Takes a `[N, 48, 48, 1]` batch of grayscale crops scaled to `[0, 1]` and
/// returns one raw score row per crop, in batch order.
pub trait EmotionModel: Send + Sync {
    fn predict(&self, batch: &ScopedTensor) -> Result<Vec<Vec<f32>>>;

    fn name(&self) -> &str {
        "emotion-model"
    }
}

/// Box in fractional `[y1, x1, y2, x2]` coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
    pub y1: f32,
    pub x1: f32,
    pub y2: f32,
    pub x2: f32,
}

impl NormalizedBox {
    /// Grow a pixel box by `margin` of its size on each side, clamp to the
    /// frame and express it as fractions of the frame size
    pub fn with_margin(b: &DetectionBox, frame_width: u32, frame_height: u32, margin: f32) -> Self {
        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let x1 = (b.x - b.width * margin).max(0.0);
        let y1 = (b.y - b.height * margin).max(0.0);
        let x2 = (b.x + b.width * (1.0 + margin)).min(fw);
        let y2 = (b.y + b.height * (1.0 + margin)).min(fh);
        Self {
            y1: y1 / fh,
            x1: x1 / fw,
            y2: y2 / fh,
            x2: x2 / fw,
        }
    }
}

/// Bilinear crop-and-resize of one box into a grayscale `size x size` patch
///
/// Sample positions follow the usual `crop_and_resize` convention: the box
/// corners map onto pixel centres `0..=dim-1` and samples outside the frame
/// read as 0. Grayscale is the mean of the three channels, scaled to `[0, 1]`.
pub fn crop_and_resize_gray(frame: &RgbFrame, b: &NormalizedBox, size: usize, out: &mut [f32]) {
    debug_assert_eq!(out.len(), size * size);
    let (w, h) = (frame.width as usize, frame.height as usize);
    let max_x = (w - 1) as f32;
    let max_y = (h - 1) as f32;

    let sample_pos = |lo: f32, hi: f32, max: f32, i: usize| -> f32 {
        if size > 1 {
            lo * max + i as f32 * (hi - lo) * max / (size - 1) as f32
        } else {
            0.5 * (lo + hi) * max
        }
    };

    let gray = |x: usize, y: usize| -> f32 {
        let [r, g, b] = frame.pixel(x, y);
        (r as f32 + g as f32 + b as f32) / 3.0
    };

    for oy in 0..size {
        let in_y = sample_pos(b.y1, b.y2, max_y, oy);
        let row = &mut out[oy * size..(oy + 1) * size];
        if !(0.0..=max_y).contains(&in_y) {
            row.fill(0.0);
            continue;
        }
        let top = in_y.floor() as usize;
        let bottom = in_y.ceil() as usize;
        let y_lerp = in_y - top as f32;

        for (ox, slot) in row.iter_mut().enumerate() {
            let in_x = sample_pos(b.x1, b.x2, max_x, ox);
            if !(0.0..=max_x).contains(&in_x) {
                *slot = 0.0;
                continue;
            }
            let left = in_x.floor() as usize;
            let right = in_x.ceil() as usize;
            let x_lerp = in_x - left as f32;

            let tl = gray(left, top);
            let tr = gray(right, top);
            let bl = gray(left, bottom);
            let br = gray(right, bottom);
            let t = tl + (tr - tl) * x_lerp;
            let bt = bl + (br - bl) * x_lerp;
            *slot = (t + (bt - t) * y_lerp) / 255.0;
        }
    }
}

/// Resolve the classifier model from an ordered list of candidates
pub fn resolve_model_path(candidates: &[PathBuf]) -> Result<PathBuf> {
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| AppError::ModelNotFound {
            candidates: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        })
}

/// Candidate model locations: working directory, next to the executable,
/// then the configured assets directory
pub fn model_candidates(assets_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(3);
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(MODEL_RELATIVE_PATH));
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(MODEL_RELATIVE_PATH));
    }
    candidates.push(assets_dir.join("face_emotion_model").join("model.onnx"));
    candidates
}

/// Crops, batches and classifies detected faces
pub struct EmotionClassifier {
    model: Box<dyn EmotionModel>,
    margin: f32,
}

impl std::fmt::Debug for EmotionClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmotionClassifier")
            .field("margin", &self.margin)
            .finish_non_exhaustive()
    }
}

impl EmotionClassifier {
    pub fn new(model: Box<dyn EmotionModel>, margin: f32) -> Self {
        Self { model, margin }
    }

    /// Build the `[N, 48, 48, 1]` input batch for `boxes`
    pub fn prepare_batch(
        &self,
        frame: &RgbFrame,
        boxes: &[DetectionBox],
        arena: &TensorArena,
    ) -> ScopedTensor {
        let patch = IMAGE_SIZE * IMAGE_SIZE;
        let mut batch = arena.zeros(&[boxes.len(), IMAGE_SIZE, IMAGE_SIZE, 1]);
        for (b, out) in boxes.iter().zip(batch.data_mut().chunks_exact_mut(patch)) {
            let norm = NormalizedBox::with_margin(b, frame.width, frame.height, self.margin);
            crop_and_resize_gray(frame, &norm, IMAGE_SIZE, out);
        }
        batch
    }

    /// Classify every box in one forward pass
    ///
    /// Results are in the same order as `boxes`. No batch is allocated for an
    /// empty box list.
    pub fn classify(
        &self,
        frame: &RgbFrame,
        boxes: &[DetectionBox],
        arena: &TensorArena,
    ) -> Result<Vec<EmotionScores>> {
        if boxes.is_empty() {
            return Ok(Vec::new());
        }

        let batch = self.prepare_batch(frame, boxes, arena);
        let rows = self.model.predict(&batch)?;
        if rows.len() != boxes.len() {
            return Err(AppError::Inference(format!(
                "{} returned {} rows for {} faces",
                self.model.name(),
                rows.len(),
                boxes.len()
            )));
        }

        debug!("Classified {} face(s)", rows.len());
        Ok(rows.iter().map(|row| EmotionScores::from_raw(row)).collect())
    }

    /// Run one all-zero crop through the model
    pub fn warm_up(&self, arena: &TensorArena) -> Result<()> {
        let batch = arena.zeros(&[1, IMAGE_SIZE, IMAGE_SIZE, 1]);
        self.model.predict(&batch).map(|_| ())
    }
}
