//! WebRTC ingestion of client video
//!
//! Architecture:
//! ```text
//! Browser ---- SDP offer ----> POST /webrtc/offer
//!    |                               |
//!    |                       NegotiationHandler
//!    |                               |
//!    +==== RTP (H.264) ====> ReceivePeer (recvonly)
//!                                    |
//!                     SampleBuilder + openh264 (blocking thread)
//!                                    |
//!                       FrameSink (throttle, single-flight)
//!                                    |
//!                             EmotionPipeline
//!                                    |
//!                          EventBus "emotion" -> /ws
//! ```

pub mod config;
pub mod negotiator;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod sink;
pub mod track;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{public_ice, IceServerConfig};
pub use negotiator::{NegotiationConfig, NegotiationHandler};
pub use peer::{PeerContext, ReceivePeer};
pub use session::{FrameDrop, InFlight, SessionInfo, SessionRegistry, StreamSession};
pub use signaling::{AnswerResponse, ConnectionState, IceCandidate, OfferRequest};
pub use sink::FrameSink;
