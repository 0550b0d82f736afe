//! Face detection stage

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::video::RgbFrame;

/// Face bounding box in pixel coordinates
///
/// The only box shape that leaves a detector. Backends convert their own
/// output representation into this at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence, not part of the broadcast payload
    #[serde(skip)]
    pub score: f32,
}

impl DetectionBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            score: 1.0,
        }
    }

    /// Build from fractional corner coordinates, clamped to the frame
    pub fn from_fractional_corners(
        corners: [f32; 4],
        frame_width: u32,
        frame_height: u32,
        score: f32,
    ) -> Option<Self> {
        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let x1 = (corners[0] * fw).clamp(0.0, fw);
        let y1 = (corners[1] * fh).clamp(0.0, fh);
        let x2 = (corners[2] * fw).clamp(0.0, fw);
        let y2 = (corners[3] * fh).clamp(0.0, fh);
        if !(x2 > x1 && y2 > y1) {
            return None;
        }
        Some(Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            score,
        })
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box
    pub fn iou(&self, other: &DetectionBox) -> f32 {
        let ix = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let iy = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Whether the box lies entirely inside a frame of the given size
    pub fn within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.right() <= frame_width as f32
            && self.bottom() <= frame_height as f32
    }
}

/// Face detector backend
///
/// Implementations are shared between all tracks and must tolerate
/// concurrent calls.
pub trait FaceDetector: Send + Sync {
    /// Detect faces in an RGB frame; an empty result is not an error
    fn detect(&self, frame: &RgbFrame) -> Result<Vec<DetectionBox>>;

    /// Backend name for logging
    fn name(&self) -> &str {
        "face-detector"
    }
}

/// Greedy non-maximum suppression, highest score first
pub fn nms(mut boxes: Vec<DetectionBox>, iou_threshold: f32) -> Vec<DetectionBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<DetectionBox> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(boxes[i]);
        for j in (i + 1)..boxes.len() {
            if boxes[i].iou(&boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(x: f32, y: f32, w: f32, h: f32, score: f32) -> DetectionBox {
        DetectionBox {
            score,
            ..DetectionBox::new(x, y, w, h)
        }
    }

    #[test]
    fn test_iou() {
        let a = DetectionBox::new(0.0, 0.0, 10.0, 10.0);
        let b = DetectionBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&DetectionBox::new(20.0, 20.0, 5.0, 5.0)), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlap() {
        let boxes = vec![
            scored(0.0, 0.0, 10.0, 10.0, 0.8),
            scored(1.0, 1.0, 10.0, 10.0, 0.95),
            scored(100.0, 100.0, 10.0, 10.0, 0.75),
        ];
        let kept = nms(boxes, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.95);
        assert_eq!(kept[1].x, 100.0);
    }

    #[test]
    fn test_fractional_corners_clamped() {
        let b = DetectionBox::from_fractional_corners([-0.1, 0.25, 0.5, 1.2], 640, 480, 0.9)
            .unwrap();
        assert_eq!(b.x, 0.0);
        assert_eq!(b.y, 120.0);
        assert_eq!(b.width, 320.0);
        assert_eq!(b.bottom(), 480.0);
        assert!(b.within(640, 480));

        assert!(DetectionBox::from_fractional_corners([0.5, 0.5, 0.4, 0.6], 640, 480, 0.9)
            .is_none());
    }
}
