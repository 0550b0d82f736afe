//! emotion-relay - real-time emotion inference over WebRTC
//!
//! Clients stream camera video over a receive-only WebRTC connection. Frames
//! are throttled, converted to RGB, run through a face detector and an
//! emotion classifier, and every detected face is broadcast to WebSocket
//! subscribers on the `emotion` channel.

pub mod config;
pub mod error;
pub mod events;
pub mod inference;
pub mod state;
pub mod utils;
pub mod video;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
