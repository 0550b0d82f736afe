//! WebRTC signaling types and messages

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Session-description offer posted by a client
///
/// Mirrors `RTCSessionDescriptionInit` plus optional trickled candidates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequest {
    /// Description type, must be exactly "offer"
    #[serde(rename = "type", default)]
    pub sdp_type: String,
    /// SDP content
    #[serde(default)]
    pub sdp: String,
    /// Remote ICE candidates gathered before the offer was sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_candidates: Option<Vec<IceCandidate>>,
}

impl OfferRequest {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "offer".to_string(),
            sdp: sdp.into(),
            ice_candidates: None,
        }
    }

    /// Reject anything that is not a non-empty offer
    pub fn validate(&self) -> Result<()> {
        if self.sdp_type != "offer" {
            return Err(AppError::InvalidOffer(format!(
                "Body must be an RTCSessionDescriptionInit offer {{ type: \"offer\", sdp: \"...\" }}, got type {:?}",
                self.sdp_type
            )));
        }
        if self.sdp.trim().is_empty() {
            return Err(AppError::InvalidOffer(
                "Body must be an RTCSessionDescriptionInit offer { type: \"offer\", sdp: \"...\" }, sdp is empty"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Answer returned to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// Description type ("answer")
    #[serde(rename = "type")]
    pub sdp_type: String,
    /// SDP content, including gathered candidates
    pub sdp: String,
}

impl AnswerResponse {
    pub fn new(sdp_type: impl Into<String>, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: sdp_type.into(),
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

/// Connection state of a negotiated stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the session's cleanup hook must have run
    pub fn requires_cleanup(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }

    /// Whether the transport may move from `self` to `next`
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (a, b) if *a == b => false,
            (Negotiating, Connected | Failed | Closed | Disconnected) => true,
            (Connected, Disconnected | Failed | Closed) => true,
            (Disconnected, Connected | Closed | Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Negotiating => write!(f, "negotiating"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_validation() {
        assert!(OfferRequest::new("v=0\r\n").validate().is_ok());
        assert!(matches!(
            OfferRequest::new("").validate(),
            Err(AppError::InvalidOffer(_))
        ));

        let mut answer_typed = OfferRequest::new("v=0\r\n");
        answer_typed.sdp_type = "answer".to_string();
        assert!(answer_typed.validate().is_err());
    }

    #[test]
    fn test_offer_json_shape() {
        let offer: OfferRequest = serde_json::from_str(
            r#"{"type":"offer","sdp":"v=0","iceCandidates":[{"candidate":"candidate:1 1 udp 1 1.2.3.4 5 typ host","sdpMid":"0","sdpMLineIndex":0}]}"#,
        )
        .unwrap();
        assert_eq!(offer.sdp_type, "offer");
        let candidates = offer.ice_candidates.unwrap();
        assert_eq!(candidates[0].sdp_mid.as_deref(), Some("0"));

        // Missing fields deserialize to empty values and fail validation instead of a 422
        let empty: OfferRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_state_machine() {
        use ConnectionState::*;
        assert!(Negotiating.can_transition_to(Connected));
        assert!(Negotiating.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Connected));
        assert!(!Failed.can_transition_to(Negotiating));
        assert!(Disconnected.requires_cleanup());
        assert_eq!(Failed.to_string(), "failed");
    }
}
