//! Stream session state and registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use super::signaling::ConnectionState;

/// Why a frame was not admitted for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDrop {
    /// Session already cleaned up
    Closed,
    /// Inside the throttle window
    Throttled,
    /// Previous frame of this track still in flight
    Busy,
}

/// Per-track processing state for one negotiated video stream
pub struct StreamSession {
    track_id: String,
    peer_id: String,
    state: RwLock<ConnectionState>,
    has_seen_face: AtomicBool,
    last_processed: Mutex<Option<Instant>>,
    busy: AtomicBool,
    closed: AtomicBool,
    created_at: Instant,
    frames_processed: AtomicU64,
    frames_dropped: AtomicU64,
}

impl StreamSession {
    pub fn new(track_id: impl Into<String>, peer_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            track_id: track_id.into(),
            peer_id: peer_id.into(),
            state: RwLock::new(ConnectionState::Negotiating),
            has_seen_face: AtomicBool::new(false),
            last_processed: Mutex::new(None),
            busy: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            frames_processed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        })
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    pub fn has_seen_face(&self) -> bool {
        self.has_seen_face.load(Ordering::Acquire)
    }

    /// Record whether the latest frame had a face; returns the previous value
    pub fn set_has_seen_face(&self, seen: bool) -> bool {
        self.has_seen_face.swap(seen, Ordering::AcqRel)
    }

    pub fn last_processed(&self) -> Option<Instant> {
        *self.last_processed.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the session closed; `true` only for the first call
    pub fn mark_closed(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.set_state(ConnectionState::Closed);
        }
        first
    }

    /// Decide whether a frame arriving at `now` gets processed
    ///
    /// Closed sessions drop everything. Inside the throttle window the frame
    /// is dropped. While a previous frame is in flight the frame is dropped
    /// without moving the window. On admission the window restarts at `now`
    /// and the returned guard holds the track busy until dropped.
    pub fn try_admit(
        self: &Arc<Self>,
        now: Instant,
        interval: Duration,
    ) -> Result<InFlight, FrameDrop> {
        let verdict = self.admit_inner(now, interval);
        match verdict {
            Ok(()) => {
                self.frames_processed.fetch_add(1, Ordering::Relaxed);
                Ok(InFlight {
                    session: self.clone(),
                })
            }
            Err(reason) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                Err(reason)
            }
        }
    }

    fn admit_inner(&self, now: Instant, interval: Duration) -> Result<(), FrameDrop> {
        if self.is_closed() {
            return Err(FrameDrop::Closed);
        }
        let mut last = self.last_processed.lock();
        if let Some(prev) = *last {
            if now.saturating_duration_since(prev) < interval {
                return Err(FrameDrop::Throttled);
            }
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FrameDrop::Busy);
        }
        *last = Some(now);
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            track_id: self.track_id.clone(),
            peer_id: self.peer_id.clone(),
            state: self.state(),
            has_seen_face: self.has_seen_face(),
            age_secs: self.created_at.elapsed().as_secs(),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Admission ticket for one frame; releases the track's busy flag on drop
pub struct InFlight {
    session: Arc<StreamSession>,
}

impl InFlight {
    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.session.busy.store(false, Ordering::Release);
    }
}

/// Snapshot of a session for the HTTP API
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub track_id: String,
    pub peer_id: String,
    pub state: ConnectionState,
    pub has_seen_face: bool,
    pub age_secs: u64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
}

/// Active stream sessions keyed by track id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<StreamSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<StreamSession>) {
        debug!("Registering stream session {}", session.track_id());
        self.sessions
            .write()
            .insert(session.track_id().to_string(), session);
    }

    pub fn get(&self, track_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.read().get(track_id).cloned()
    }

    /// Close and remove a session
    ///
    /// Returns the session only for the call that actually closed it, so
    /// repeated calls have no further effect.
    pub fn close(&self, track_id: &str) -> Option<Arc<StreamSession>> {
        let session = self.sessions.write().remove(track_id)?;
        session.mark_closed().then_some(session)
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<_> = self.sessions.read().values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| b.age_secs.cmp(&a.age_secs));
        infos
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
