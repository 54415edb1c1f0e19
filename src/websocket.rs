//! # WebSocket Audio Streaming Handler
//!
//! Real-time spoken-command recognition over WebSocket. Clients connect to
//! `/ws/audio` and stream binary PCM audio; the server classifies each
//! one-second window and streams JSON results back on the same connection.
//!
//! ## Protocol:
//! 1. **Connection**: the server registers a session and immediately sends
//!    a `session_started` message with the session id
//! 2. **Audio Streaming**: binary frames carry 16-bit little-endian mono
//!    PCM at 16kHz, in whatever chunk sizes the client produces
//! 3. **Results**: every completed window yields one `result` message with
//!    the detected keyword, confidence, inference time and window index
//! 4. **Shutdown**: the client sends `{"type": "stop"}` or closes; either
//!    way the session is deregistered
//!
//! ## Ordering:
//! Windows for one session flow through a single bounded queue into one
//! worker task, so results always come back in window order. When the
//! queue is full (classification slower than the stream), the newest
//! window is dropped and counted rather than stalling the socket.

use crate::audio::buffer::SlidingWindowBuffer;
use crate::audio::processor::pcm_to_float;
use crate::audio::session::{AudioSession, SessionManager};
use crate::classifier::ClassifierEngine;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How often the server pings the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How long without any client traffic before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
/// Minimum gap between overflow warnings per session.
const DROP_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// One window waiting for classification.
struct PendingWindow {
    index: u64,
    samples: Vec<f32>,
}

/// Classification outcome heading back to the client.
///
/// Sent from the worker task to the actor; the actor mailbox preserves the
/// worker's send order, which is window order.
#[derive(Message)]
#[rtype(result = "()")]
struct ResultReady {
    detected: String,
    confidence: f32,
    inference_ms: u64,
    window_index: u64,
}

/// WebSocket actor owning one streaming session.
///
/// The actor is the only writer to the sliding-window buffer, so no lock
/// sits on the audio path. Classification happens off-actor in a worker
/// task fed through a bounded channel.
pub struct ConnectionSession {
    session: Arc<AudioSession>,
    engine: Arc<ClassifierEngine>,
    manager: Arc<SessionManager>,
    buffer: SlidingWindowBuffer,
    /// Capacity of the worker queue, from configuration
    max_pending_windows: usize,
    window_tx: Option<mpsc::Sender<PendingWindow>>,
    next_window_index: u64,
    last_heartbeat: Instant,
    drops_since_warn: u64,
    last_drop_warn: Option<Instant>,
}

impl ConnectionSession {
    pub fn new(
        session: Arc<AudioSession>,
        engine: Arc<ClassifierEngine>,
        manager: Arc<SessionManager>,
        buffer: SlidingWindowBuffer,
        max_pending_windows: usize,
    ) -> Self {
        Self {
            session,
            engine,
            manager,
            buffer,
            max_pending_windows: max_pending_windows.max(1),
            window_tx: None,
            next_window_index: 0,
            last_heartbeat: Instant::now(),
            drops_since_warn: 0,
            last_drop_warn: None,
        }
    }

    /// Move every complete window from the buffer into the worker queue.
    ///
    /// Window indices advance for dropped windows too, so indices always
    /// name a position in the stream and gaps reveal drops. Returns an
    /// error only when the worker is gone, which ends the connection.
    fn queue_ready_windows(&mut self) -> Result<(), ()> {
        let tx = match &self.window_tx {
            Some(tx) => tx,
            None => return Err(()),
        };

        while self.buffer.has_window() {
            let window = match self.buffer.peek_window() {
                Some(bytes) => bytes,
                None => break,
            };
            let index = self.next_window_index;
            self.next_window_index += 1;

            match pcm_to_float(&window) {
                Ok(samples) => match tx.try_send(PendingWindow { index, samples }) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.session.record_dropped();
                        self.drops_since_warn += 1;
                        let due = self
                            .last_drop_warn
                            .map_or(true, |at| at.elapsed() >= DROP_WARN_INTERVAL);
                        if due {
                            warn!(
                                "Session {}: classification backlog full, dropped {} window(s)",
                                self.session.session_id, self.drops_since_warn
                            );
                            self.last_drop_warn = Some(Instant::now());
                            self.drops_since_warn = 0;
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        error!(
                            "Session {}: classification worker stopped unexpectedly",
                            self.session.session_id
                        );
                        return Err(());
                    }
                },
                Err(err) => {
                    warn!(
                        "Session {}: window {} unreadable: {}",
                        self.session.session_id, index, err
                    );
                }
            }

            self.buffer.advance();
        }

        Ok(())
    }

    fn send_json(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(
                "Session {}: failed to encode message: {}",
                self.session.session_id, err
            ),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        self.send_json(
            ctx,
            &ServerMessage::Error {
                message: message.to_string(),
            },
        );
    }

    fn close_session(&mut self) {
        if let Err(err) = self.session.begin_closing() {
            debug!("Session {}: {}", self.session.session_id, err);
        }
    }
}

/// Worker loop: one per session, consuming windows in order.
async fn classification_worker(
    mut window_rx: mpsc::Receiver<PendingWindow>,
    engine: Arc<ClassifierEngine>,
    session: Arc<AudioSession>,
    addr: Addr<ConnectionSession>,
) {
    while let Some(job) = window_rx.recv().await {
        match engine.classify_window(job.samples).await {
            Ok(outcome) => {
                session.record_classified(outcome.inference_ms);
                addr.do_send(ResultReady {
                    detected: outcome.classification.label,
                    confidence: outcome.classification.confidence,
                    inference_ms: outcome.inference_ms,
                    window_index: job.index,
                });
            }
            Err(err) => {
                // One bad window must not take the session down.
                session.record_classify_failure();
                warn!(
                    "Session {}: window {} classification failed: {}",
                    session.session_id, job.index, err
                );
            }
        }
    }
    debug!("Session {}: classification worker drained", session.session_id);
}

impl Actor for ConnectionSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Session {}: WebSocket connection started", self.session.session_id);

        // Heartbeat timer
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    "Session {}: heartbeat timeout, closing connection",
                    act.session.session_id
                );
                act.close_session();
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        if let Err(err) = self.session.begin_streaming() {
            error!("Session {}: {}", self.session.session_id, err);
            self.send_error(ctx, "Session could not start streaming");
            ctx.stop();
            return;
        }

        // Per-session worker with a bounded queue
        let (tx, rx) = mpsc::channel(self.max_pending_windows);
        self.window_tx = Some(tx);
        tokio::spawn(classification_worker(
            rx,
            self.engine.clone(),
            self.session.clone(),
            ctx.address(),
        ));

        self.send_json(
            ctx,
            &ServerMessage::SessionStarted {
                session_id: self.session.session_id.clone(),
            },
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.close_session();
        self.session.mark_closed();
        self.manager.deregister(&self.session.session_id);

        // Dropping the sender lets the worker drain and exit.
        self.window_tx = None;

        let summary = self.session.summary();
        info!(
            "Session {} closed: {} bytes in, {} windows classified, {} dropped, {} failed",
            summary.session_id,
            summary.bytes_received,
            summary.windows_classified,
            summary.windows_dropped,
            summary.classify_failures
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();

                if data.is_empty() {
                    debug!("Session {}: empty binary frame", self.session.session_id);
                    return;
                }
                if !self.session.can_accept_audio() {
                    debug!(
                        "Session {}: audio after close requested, ignoring {} bytes",
                        self.session.session_id,
                        data.len()
                    );
                    return;
                }
                if data.len() % 2 != 0 {
                    // Sample alignment is the client's job; the buffer takes
                    // the bytes either way and geometry stays sample-sized.
                    debug!(
                        "Session {}: odd-length frame of {} bytes",
                        self.session.session_id,
                        data.len()
                    );
                }

                self.session.record_audio(data.len());
                self.buffer.append(&data);

                if self.queue_ready_windows().is_err() {
                    self.send_error(ctx, "Classification unavailable");
                    self.close_session();
                    ctx.stop();
                }
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Stop) => {
                        info!("Session {}: stop requested", self.session.session_id);
                        self.close_session();
                        ctx.close(Some(ws::CloseReason {
                            code: ws::CloseCode::Normal,
                            description: None,
                        }));
                        ctx.stop();
                    }
                    Err(err) => {
                        let preview: String = text.chars().take(120).collect();
                        warn!(
                            "Session {}: unsupported text frame '{}': {}",
                            self.session.session_id, preview, err
                        );
                        self.send_error(ctx, "Unsupported text message");
                    }
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(
                    "Session {}: closed by client: {:?}",
                    self.session.session_id, reason
                );
                self.close_session();
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(
                    "Session {}: unexpected continuation frame",
                    self.session.session_id
                );
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(
                    "Session {}: WebSocket protocol error: {}",
                    self.session.session_id, err
                );
                self.close_session();
                ctx.stop();
            }
        }
    }
}

impl Handler<ResultReady> for ConnectionSession {
    type Result = ();

    fn handle(&mut self, msg: ResultReady, ctx: &mut Self::Context) {
        self.send_json(
            ctx,
            &ServerMessage::Result {
                detected: msg.detected,
                confidence: msg.confidence,
                inference_ms: msg.inference_ms,
                window_index: msg.window_index,
            },
        );
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Registers a session up front so the concurrency cap applies before the
/// upgrade, then hands the connection to a [`ConnectionSession`] actor.
/// Over-cap connections get a 503 instead of an upgrade.
pub async fn audio_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    engine: web::Data<ClassifierEngine>,
    manager: web::Data<SessionManager>,
) -> ActixResult<HttpResponse> {
    let config = app_state.get_config();
    let buffer = SlidingWindowBuffer::new(&config.audio.window_config())
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let session = match manager.register() {
        Ok(session) => session,
        Err(err) => {
            warn!(
                "WebSocket connection refused from {:?}: {}",
                req.connection_info().peer_addr(),
                err
            );
            return Ok(HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": {
                    "type": "capacity",
                    "message": err,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                }
            })));
        }
    };

    info!(
        "Session {}: WebSocket connection from {:?}",
        session.session_id,
        req.connection_info().peer_addr()
    );

    let session_id = session.session_id.clone();
    let actor = ConnectionSession::new(
        session,
        engine.into_inner(),
        manager.clone().into_inner(),
        buffer,
        config.audio.max_pending_windows,
    );

    match ws::start(actor, &req, stream) {
        Ok(response) => Ok(response),
        Err(err) => {
            // The actor never started, so nothing else will deregister.
            manager.deregister(&session_id);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classification, Classifier};
    use anyhow::Result;

    struct StubClassifier;

    impl Classifier for StubClassifier {
        fn classify(&self, _samples: &[f32]) -> Result<Classification> {
            Ok(Classification {
                label: "go".to_string(),
                confidence: 1.0,
            })
        }

        fn labels(&self) -> &[&'static str] {
            &["go"]
        }
    }

    fn test_actor(
        queue_capacity: usize,
    ) -> (ConnectionSession, mpsc::Receiver<PendingWindow>, Arc<SessionManager>) {
        let manager = Arc::new(SessionManager::new(4));
        let session = manager.register().unwrap();
        session.begin_streaming().unwrap();

        let engine = Arc::new(ClassifierEngine::new(Arc::new(StubClassifier), 4));
        let buffer = SlidingWindowBuffer::from_bytes(8, 4).unwrap();

        let mut actor =
            ConnectionSession::new(session, engine, manager.clone(), buffer, queue_capacity);
        let (tx, rx) = mpsc::channel(queue_capacity);
        actor.window_tx = Some(tx);
        (actor, rx, manager)
    }

    #[tokio::test]
    async fn windows_reach_the_worker_queue_in_order() {
        let (mut actor, mut rx, _manager) = test_actor(8);

        actor.buffer.append(&[0u8; 16]);
        actor.queue_ready_windows().unwrap();

        for expected_index in 0..3 {
            let job = rx.try_recv().unwrap();
            assert_eq!(job.index, expected_index);
            assert_eq!(job.samples.len(), 4);
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(actor.buffer.len(), 4);
    }

    #[tokio::test]
    async fn overflow_drops_newest_windows_and_keeps_counting() {
        let (mut actor, mut rx, _manager) = test_actor(1);

        // Three windows form but the queue holds one: the first goes
        // through, the later two are dropped with their indices consumed.
        actor.buffer.append(&[0u8; 16]);
        actor.queue_ready_windows().unwrap();

        assert_eq!(rx.try_recv().unwrap().index, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(actor.next_window_index, 3);
        assert_eq!(actor.session.summary().windows_dropped, 2);
    }

    #[tokio::test]
    async fn vanished_worker_surfaces_as_an_error() {
        let (mut actor, rx, _manager) = test_actor(1);
        drop(rx);

        actor.buffer.append(&[0u8; 8]);
        assert!(actor.queue_ready_windows().is_err());
    }
}
