//! WebSocket session for the streaming client.
//!
//! # Connection Flow
//!
//! 1. `connect()` establishes the WebSocket and waits for the server's
//!    `session_started` message
//! 2. `send_audio()` streams binary PCM blocks (one WebSocket frame each)
//! 3. the receiver channel yields classification results as they arrive
//! 4. `send_stop()` asks the server to wind the session down
//!
//! Incoming frames are handled by a background task so slow printing can
//! never back-pressure the socket reads.

use crate::protocol::{ClientMessage, ServerMessage};
use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

/// Handshake deadline for the initial connection.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the server gets to announce the session.
const SESSION_TIMEOUT: Duration = Duration::from_secs(5);
/// Buffered results between the receiver task and the consumer.
const RESULT_CHANNEL_CAPACITY: usize = 100;

type WsSink =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// An established streaming session.
pub struct StreamSession {
    write: WsSink,
    incoming_rx: Option<mpsc::Receiver<ServerMessage>>,
    session_id: String,
    receiver_task: tokio::task::JoinHandle<()>,
}

impl StreamSession {
    /// Connect to the server and wait for the session announcement.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to {}", url);

        let (ws_stream, _response) = timeout(CONNECTION_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| anyhow!("Connection to {} timed out", url))?
            .with_context(|| format!("Failed to connect to {}", url))?;

        let (write, mut read) = ws_stream.split();

        let session_id = timeout(SESSION_TIMEOUT, async {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::SessionStarted { session_id }) => {
                            return Ok(session_id);
                        }
                        Ok(ServerMessage::Error { message }) => {
                            return Err(anyhow!("Server refused session: {}", message));
                        }
                        Ok(_) => {
                            debug!("Ignoring message while waiting for session start");
                        }
                        Err(e) => {
                            warn!("Unparseable frame during handshake: {}", e);
                        }
                    },
                    Ok(Message::Close(reason)) => {
                        return Err(anyhow!("Server closed before session start: {:?}", reason));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(anyhow!("WebSocket error during handshake: {}", e));
                    }
                }
            }
            Err(anyhow!("Connection ended before session start"))
        })
        .await
        .map_err(|_| anyhow!("Server did not announce a session within {:?}", SESSION_TIMEOUT))??;

        info!("Session started: {}", session_id);

        let (incoming_tx, incoming_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let receiver_task = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if incoming_tx.send(msg).await.is_err() {
                                debug!("Result consumer gone, stopping receiver");
                                break;
                            }
                        }
                        Err(e) => {
                            // Raw frame goes in the log so odd payloads are
                            // visible rather than silently dropped.
                            warn!("Unparseable server frame '{}': {}", text, e);
                        }
                    },
                    Ok(Message::Close(reason)) => {
                        info!("Server closed the connection: {:?}", reason);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            write,
            incoming_rx: Some(incoming_rx),
            session_id,
            receiver_task,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Take the result receiver; callable once.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<ServerMessage>> {
        self.incoming_rx.take()
    }

    /// Send one PCM block as a binary frame.
    pub async fn send_audio(&mut self, pcm: Vec<u8>) -> Result<()> {
        self.write
            .send(Message::Binary(pcm))
            .await
            .context("Failed to send audio frame")
    }

    /// Ask the server to finish the session.
    pub async fn send_stop(&mut self) -> Result<()> {
        let json = serde_json::to_string(&ClientMessage::Stop)?;
        self.write
            .send(Message::Text(json))
            .await
            .context("Failed to send stop message")
    }

    /// Close the socket politely.
    pub async fn disconnect(mut self) {
        let _ = self.write.send(Message::Close(None)).await;
        // Dropping self aborts the receiver task.
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.receiver_task.abort();
    }
}
