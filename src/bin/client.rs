//! # Command Stream Client
//!
//! Captures the default microphone and streams it to a command-stream
//! server, printing each detected keyword as the server reports it.
//!
//! ```text
//! command-client ws://127.0.0.1:8000/ws/audio
//! ```
//!
//! The capture thread, the WebSocket sender and the result receiver run
//! until Ctrl+C or until either side closes; a summary line prints on the
//! way out.

use anyhow::{anyhow, Result};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use command_stream::client::{start_capture, StreamSession};
use command_stream::protocol::ServerMessage;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let url = match std::env::args().nth(1) {
        Some(url) => url,
        None => {
            eprintln!("Usage: command-client <ws-uri>");
            eprintln!("Example: command-client ws://127.0.0.1:8000/ws/audio");
            std::process::exit(2);
        }
    };

    let mut session = StreamSession::connect(&url).await?;
    let mut results = session
        .take_receiver()
        .ok_or_else(|| anyhow!("Result receiver already taken"))?;

    let (mut capture, mut blocks) = start_capture()?;

    println!(
        "Streaming to {} (session {}). Speak a command; Ctrl+C to stop.",
        url,
        session.session_id()
    );

    let mut results_received: u64 = 0;
    let mut last_dropped: u64 = 0;
    let mut drop_check = tokio::time::interval(Duration::from_secs(5));
    drop_check.tick().await;

    loop {
        tokio::select! {
            maybe_block = blocks.recv() => {
                match maybe_block {
                    Some(pcm) => {
                        if let Err(e) = session.send_audio(pcm).await {
                            warn!("Connection lost: {}", e);
                            break;
                        }
                    }
                    None => {
                        warn!("Capture stopped producing audio");
                        break;
                    }
                }
            }
            maybe_result = results.recv() => {
                match maybe_result {
                    Some(ServerMessage::Result { detected, confidence, inference_ms, window_index }) => {
                        results_received += 1;
                        println!(
                            "detected '{}' (confidence {:.2}, {} ms, window {})",
                            detected, confidence, inference_ms, window_index
                        );
                    }
                    Some(ServerMessage::Error { message }) => {
                        warn!("Server error: {}", message);
                    }
                    Some(other) => {
                        info!("Unexpected server message: {:?}", other);
                    }
                    None => {
                        info!("Server closed the stream");
                        break;
                    }
                }
            }
            // The audio callback only counts drops; reporting happens here,
            // off the capture thread.
            _ = drop_check.tick() => {
                let dropped = capture.blocks_dropped();
                if dropped > last_dropped {
                    warn!(
                        "Network backlog: {} audio block(s) dropped",
                        dropped - last_dropped
                    );
                    last_dropped = dropped;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, stopping");
                break;
            }
        }
    }

    capture.stop();
    if let Err(e) = session.send_stop().await {
        warn!("Could not send stop message: {}", e);
    }
    session.disconnect().await;

    println!(
        "Done: {} blocks sent, {} results received, {} blocks dropped",
        capture.blocks_sent(),
        results_received,
        capture.blocks_dropped()
    );

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "command_stream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
