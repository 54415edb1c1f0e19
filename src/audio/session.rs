//! # Session Tracking
//!
//! Lifecycle state and statistics for every live WebSocket connection, plus
//! the registry that enforces the concurrent-session limit.
//!
//! ## Session Lifecycle:
//! 1. **Accepting**: connection upgraded, session registered
//! 2. **Streaming**: read loop running, audio may arrive at any time
//! 3. **Closing**: peer closed, heartbeat timed out, or transport failed
//! 4. **Closed**: actor stopped and the session deregistered
//!
//! A connection that never sends a byte still walks through every state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Current lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Connection upgraded, nothing received yet
    Accepting,
    /// Read loop active; buffering and classifying as audio arrives
    Streaming,
    /// Shutting down; no further classification work is scheduled
    Closing,
    /// Fully torn down
    Closed,
}

impl SessionStatus {
    /// Status string used in API responses and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Accepting => "accepting",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Closing => "closing",
            SessionStatus::Closed => "closed",
        }
    }
}

/// Counters accumulated over a session's lifetime.
#[derive(Debug, Default)]
struct SessionStats {
    /// Raw PCM bytes received over the socket
    bytes_received: usize,

    /// Windows successfully classified
    windows_classified: u64,

    /// Windows discarded because the in-flight bound was hit
    windows_dropped: u64,

    /// Windows whose classification failed
    classify_failures: u64,

    /// Sum of measured inference latencies, for the average
    total_inference_ms: u64,
}

/// Observable state of one WebSocket connection.
///
/// The sliding-window buffer is *not* stored here: it is owned exclusively
/// by the connection actor so appends and window consumption stay on a
/// single logical thread. This registry entry only carries the state other
/// parts of the service are allowed to observe.
pub struct AudioSession {
    /// Unique identifier, generated at registration
    pub session_id: String,

    /// Current lifecycle state
    status: RwLock<SessionStatus>,

    /// When the session was registered
    pub created_at: DateTime<Utc>,

    /// Last time any frame arrived
    last_activity: RwLock<DateTime<Utc>>,

    /// Lifetime counters
    stats: RwLock<SessionStats>,
}

impl AudioSession {
    fn new(session_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            status: RwLock::new(SessionStatus::Accepting),
            created_at: now,
            last_activity: RwLock::new(now),
            stats: RwLock::new(SessionStats::default()),
        }
    }

    /// Get the current session status.
    pub fn status(&self) -> SessionStatus {
        *self.status.read().unwrap()
    }

    /// Enter the streaming state once the read loop is up.
    ///
    /// ## State Transition:
    /// Accepting → Streaming
    pub fn begin_streaming(&self) -> Result<(), String> {
        let mut status = self.status.write().unwrap();
        match *status {
            SessionStatus::Accepting => {
                *status = SessionStatus::Streaming;
                Ok(())
            }
            other => Err(format!("Cannot begin streaming from status: {:?}", other)),
        }
    }

    /// Begin shutting the session down.
    ///
    /// ## State Transition:
    /// Accepting/Streaming → Closing. Calling this again while already
    /// closing is fine; the close paths (peer close, heartbeat timeout,
    /// transport error) can race each other.
    pub fn begin_closing(&self) -> Result<(), String> {
        let mut status = self.status.write().unwrap();
        match *status {
            SessionStatus::Accepting | SessionStatus::Streaming => {
                *status = SessionStatus::Closing;
                Ok(())
            }
            SessionStatus::Closing => Ok(()),
            SessionStatus::Closed => Err("Session is already closed".to_string()),
        }
    }

    /// Terminal sweep when the actor has stopped.
    ///
    /// Infallible: the actor may stop without a close frame ever arriving,
    /// so this forces the terminal state from wherever the session was.
    pub fn mark_closed(&self) {
        *self.status.write().unwrap() = SessionStatus::Closed;
    }

    /// Whether inbound audio should still be windowed and classified.
    pub fn can_accept_audio(&self) -> bool {
        matches!(self.status(), SessionStatus::Streaming)
    }

    /// Record an inbound audio frame.
    pub fn record_audio(&self, byte_count: usize) {
        self.stats.write().unwrap().bytes_received += byte_count;
        *self.last_activity.write().unwrap() = Utc::now();
    }

    /// Record one successfully classified window and its latency.
    pub fn record_classified(&self, inference_ms: u64) {
        let mut stats = self.stats.write().unwrap();
        stats.windows_classified += 1;
        stats.total_inference_ms += inference_ms;
    }

    /// Record a window discarded because the in-flight bound was full.
    pub fn record_dropped(&self) {
        self.stats.write().unwrap().windows_dropped += 1;
    }

    /// Record a window whose classification failed.
    pub fn record_classify_failure(&self) {
        self.stats.write().unwrap().classify_failures += 1;
    }

    /// Seconds since the session was registered.
    pub fn age_seconds(&self) -> f64 {
        let duration = Utc::now().signed_duration_since(self.created_at);
        duration.num_milliseconds() as f64 / 1000.0
    }

    /// Snapshot of this session for the observability endpoints.
    pub fn summary(&self) -> SessionSummary {
        let stats = self.stats.read().unwrap();
        SessionSummary {
            session_id: self.session_id.clone(),
            status: self.status().as_str().to_string(),
            bytes_received: stats.bytes_received,
            windows_classified: stats.windows_classified,
            windows_dropped: stats.windows_dropped,
            classify_failures: stats.classify_failures,
            average_inference_ms: if stats.windows_classified > 0 {
                stats.total_inference_ms / stats.windows_classified
            } else {
                0
            },
            last_activity: *self.last_activity.read().unwrap(),
        }
    }
}

/// Serializable snapshot of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: String,
    pub bytes_received: usize,
    pub windows_classified: u64,
    pub windows_dropped: u64,
    pub classify_failures: u64,
    pub average_inference_ms: u64,
    pub last_activity: DateTime<Utc>,
}

/// Registry of live sessions, shared via `web::Data`.
///
/// ## Thread Safety:
/// RwLock lets the observability endpoints read concurrently while
/// connection setup and teardown take the write lock briefly.
pub struct SessionManager {
    /// Active sessions keyed by session ID
    sessions: RwLock<HashMap<String, Arc<AudioSession>>>,

    /// Hard cap on concurrently open connections
    max_concurrent_sessions: usize,
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
        }
    }

    /// Register a new session, enforcing the concurrency cap.
    ///
    /// ## Returns:
    /// - **Ok(session)**: the freshly registered session, in `Accepting`
    /// - **Err(message)**: the cap is reached; the connection should be
    ///   refused
    pub fn register(&self) -> Result<Arc<AudioSession>, String> {
        let mut sessions = self.sessions.write().unwrap();

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            ));
        }

        let session_id = Uuid::new_v4().to_string();
        let session = Arc::new(AudioSession::new(session_id.clone()));
        sessions.insert(session_id, Arc::clone(&session));

        Ok(session)
    }

    /// Remove a session once its actor has stopped.
    pub fn deregister(&self, session_id: &str) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    /// Number of currently registered sessions.
    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Configured concurrency cap.
    pub fn max_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }

    /// Snapshots of every live session, for /metrics.
    pub fn session_summaries(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .map(|session| session.summary())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_session_walks_every_state() {
        // A connection that never sends audio still transitions through the
        // whole lifecycle.
        let manager = SessionManager::new(4);
        let session = manager.register().unwrap();

        assert_eq!(session.status(), SessionStatus::Accepting);
        assert!(!session.can_accept_audio());

        session.begin_streaming().unwrap();
        assert_eq!(session.status(), SessionStatus::Streaming);
        assert!(session.can_accept_audio());

        session.begin_closing().unwrap();
        assert_eq!(session.status(), SessionStatus::Closing);
        assert!(!session.can_accept_audio());

        session.mark_closed();
        assert_eq!(session.status(), SessionStatus::Closed);

        let summary = session.summary();
        assert_eq!(summary.bytes_received, 0);
        assert_eq!(summary.windows_classified, 0);

        assert!(manager.deregister(&session.session_id));
        assert_eq!(manager.active_session_count(), 0);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let session = AudioSession::new("test".to_string());

        // Closing straight from Accepting is legal (refused connections).
        session.begin_closing().unwrap();
        assert!(session.begin_streaming().is_err());

        // Closing twice is tolerated, reopening a closed session is not.
        session.begin_closing().unwrap();
        session.mark_closed();
        assert!(session.begin_closing().is_err());
        assert!(session.begin_streaming().is_err());
    }

    #[test]
    fn registry_enforces_session_cap() {
        let manager = SessionManager::new(2);
        let first = manager.register().unwrap();
        let _second = manager.register().unwrap();
        assert!(manager.register().is_err());

        manager.deregister(&first.session_id);
        assert!(manager.register().is_ok());
    }

    #[test]
    fn stats_accumulate_into_summary() {
        let session = AudioSession::new("stats".to_string());
        session.record_audio(2048);
        session.record_audio(2048);
        session.record_classified(10);
        session.record_classified(20);
        session.record_dropped();
        session.record_classify_failure();

        let summary = session.summary();
        assert_eq!(summary.bytes_received, 4096);
        assert_eq!(summary.windows_classified, 2);
        assert_eq!(summary.windows_dropped, 1);
        assert_eq!(summary.classify_failures, 1);
        assert_eq!(summary.average_inference_ms, 15);
    }
}
