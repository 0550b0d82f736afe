//! Remote track readers
//!
//! Video: RTP packets are reassembled into H.264 access units with the
//! sample builder, then decoded on a dedicated blocking thread that offers
//! every decoded frame to the track's [`FrameSink`]. Audio is read and
//! discarded so the transport does not stall.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::track::track_remote::TrackRemote;

use super::session::FrameDrop;
use super::sink::FrameSink;
use crate::video::H264Decoder;

/// H.264 RTP clock rate
const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Packets the sample builder may hold back while waiting for reordering
const MAX_LATE_PACKETS: u16 = 256;

/// Access units buffered between the RTP reader and the decoder thread
const DECODE_QUEUE: usize = 32;

/// Why a track reader returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEnd {
    /// Remote side stopped sending or the transport closed
    Ended,
    /// Reader was cancelled by session cleanup
    Cancelled,
}

/// Read, depacketize and decode a remote H.264 video track
pub async fn read_video_track(
    track: Arc<TrackRemote>,
    sink: Arc<FrameSink>,
    cancel: CancellationToken,
) -> TrackEnd {
    let track_id = track.id();
    let (tx, rx) = mpsc::channel::<Bytes>(DECODE_QUEUE);

    let decoder_sink = sink.clone();
    let decoder_track = track_id.clone();
    let decoder = tokio::task::spawn_blocking(move || {
        decode_loop(rx, decoder_sink, &decoder_track);
    });

    let mut builder = SampleBuilder::new(MAX_LATE_PACKETS, H264Packet::default(), VIDEO_CLOCK_RATE);
    let mut packets: u64 = 0;

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => break TrackEnd::Cancelled,
            result = track.read_rtp() => {
                let (packet, _) = match result {
                    Ok(read) => read,
                    Err(e) => {
                        debug!(track_id = %track_id, "Video track read ended: {}", e);
                        break TrackEnd::Ended;
                    }
                };
                packets += 1;
                builder.push(packet);

                let mut decoder_gone = false;
                while let Some(sample) = builder.pop() {
                    if tx.send(sample.data).await.is_err() {
                        decoder_gone = true;
                        break;
                    }
                }
                if decoder_gone {
                    break TrackEnd::Cancelled;
                }
            }
        }
    };

    drop(tx);
    if let Err(e) = decoder.await {
        warn!(track_id = %track_id, "Decoder thread panicked: {}", e);
    }
    info!(
        track_id = %track_id,
        "Video track reader finished ({:?}, {} RTP packets)",
        end,
        packets
    );
    end
}

fn decode_loop(mut rx: mpsc::Receiver<Bytes>, sink: Arc<FrameSink>, track_id: &str) {
    let mut decoder = match H264Decoder::new() {
        Ok(decoder) => decoder,
        Err(e) => {
            warn!(track_id = %track_id, "Video decoding disabled: {}", e);
            return;
        }
    };

    while let Some(access_unit) = rx.blocking_recv() {
        for frame in decoder.decode(&access_unit) {
            if let Err(FrameDrop::Closed) = sink.offer_frame(frame) {
                debug!(track_id = %track_id, "Sink closed, stopping decoder");
                return;
            }
        }
    }

    let stats = decoder.stats();
    debug!(
        track_id = %track_id,
        "Decoder done: {} access units, {} frames, {} errors",
        stats.access_units,
        stats.frames_decoded,
        stats.decode_errors
    );
}

/// Drain a remote audio track until it ends or the session is cleaned up
pub async fn drain_audio_track(track: Arc<TrackRemote>, cancel: CancellationToken) -> TrackEnd {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return TrackEnd::Cancelled,
            result = track.read_rtp() => {
                if result.is_err() {
                    return TrackEnd::Ended;
                }
            }
        }
    }
}
