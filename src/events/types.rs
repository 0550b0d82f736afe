//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::inference::{DetectionBox, EmotionScore, EmotionScores};
use crate::webrtc::ConnectionState;

/// Per-face emotion result for one processed frame
///
/// Serialized as:
/// ```json
/// {
///   "trackId": "...",
///   "timestamp": 1700000000000,
///   "box": { "x": 10.0, "y": 20.0, "width": 100.0, "height": 120.0 },
///   "dominantEmotion": { "emotion": "Happy", "probability": 0.82 },
///   "emotions": [ { "emotion": "Angry", "probability": 0.01 }, ... ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionEvent {
    /// Track the frame came from
    pub track_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Face box in frame pixels
    #[serde(rename = "box")]
    pub face_box: DetectionBox,
    pub dominant_emotion: EmotionScore,
    /// All seven labels in canonical order
    pub emotions: Vec<EmotionScore>,
}

impl EmotionEvent {
    pub fn new(track_id: impl Into<String>, face_box: DetectionBox, scores: &EmotionScores) -> Self {
        Self {
            track_id: track_id.into(),
            timestamp: Utc::now().timestamp_millis(),
            face_box,
            dominant_emotion: scores.dominant(),
            emotions: scores.to_scores(),
        }
    }
}

/// System event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "track_id": "...", "state": "connected" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    /// One detected face on one processed frame
    #[serde(rename = "emotion")]
    Emotion(EmotionEvent),

    /// Stream session changed connection state
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        /// Peer connection id
        peer_id: String,
        /// Video track id, once a track has arrived
        #[serde(skip_serializing_if = "Option::is_none")]
        track_id: Option<String>,
        state: ConnectionState,
    },

    /// WebSocket error notification (for connection-level errors like lag)
    #[serde(rename = "error")]
    Error {
        /// Error message
        message: String,
    },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Emotion(_) => "emotion",
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::Error { .. } => "error",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `session.*` matches all session events
    /// - `emotion` matches exactly
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}
