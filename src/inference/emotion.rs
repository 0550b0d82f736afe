//! Emotion labels and score vectors

use serde::{Deserialize, Serialize};

/// Side length of the square grayscale crop the classifier expects
pub const IMAGE_SIZE: usize = 48;

/// Number of emotion classes
pub const NUM_EMOTIONS: usize = 7;

/// Fixed emotion label set, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl EmotionLabel {
    /// All labels in canonical (model output) order
    pub const ALL: [EmotionLabel; NUM_EMOTIONS] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Angry => "Angry",
            EmotionLabel::Disgust => "Disgust",
            EmotionLabel::Fear => "Fear",
            EmotionLabel::Happy => "Happy",
            EmotionLabel::Sad => "Sad",
            EmotionLabel::Surprise => "Surprise",
            EmotionLabel::Neutral => "Neutral",
        }
    }
}

impl std::fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One label with its probability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub emotion: EmotionLabel,
    pub probability: f32,
}

/// Probability distribution over [`EmotionLabel::ALL`]
///
/// Always non-negative and summing to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionScores([f32; NUM_EMOTIONS]);

impl EmotionScores {
    /// Build a distribution from raw model output
    ///
    /// Negative and non-finite entries count as 0, missing entries count as
    /// 0 and extra entries are ignored. If nothing positive remains the
    /// result is uniform.
    pub fn from_raw(raw: &[f32]) -> Self {
        let mut probs = [0f32; NUM_EMOTIONS];
        for (slot, &value) in probs.iter_mut().zip(raw) {
            if value.is_finite() && value > 0.0 {
                *slot = value;
            }
        }

        let sum: f64 = probs.iter().map(|&p| p as f64).sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Self([1.0 / NUM_EMOTIONS as f32; NUM_EMOTIONS]);
        }
        for p in probs.iter_mut() {
            *p = (*p as f64 / sum) as f32;
        }
        Self(probs)
    }

    pub fn probability(&self, label: EmotionLabel) -> f32 {
        self.0[label as usize]
    }

    pub fn as_array(&self) -> &[f32; NUM_EMOTIONS] {
        &self.0
    }

    /// Highest scoring label; ties go to the earliest label in canonical order
    pub fn dominant(&self) -> EmotionScore {
        let mut best = 0;
        for i in 1..NUM_EMOTIONS {
            if self.0[i] > self.0[best] {
                best = i;
            }
        }
        EmotionScore {
            emotion: EmotionLabel::ALL[best],
            probability: self.0[best],
        }
    }

    /// Labelled scores in canonical order
    pub fn to_scores(&self) -> Vec<EmotionScore> {
        EmotionLabel::ALL
            .iter()
            .zip(self.0.iter())
            .map(|(&emotion, &probability)| EmotionScore {
                emotion,
                probability,
            })
            .collect()
    }
}
