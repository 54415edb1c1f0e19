//! # Command Stream
//!
//! Real-time spoken-command recognition over WebSocket, split into two
//! binaries that share this library:
//!
//! - **command-server**: Actix-web service. Each connection feeds raw PCM
//!   into a sliding-window buffer, full windows are classified against a
//!   small keyword vocabulary, and one JSON result per window is sent back
//!   in order.
//! - **command-client**: captures microphone audio, streams it to the server
//!   as binary frames, and prints the classification results as they arrive.
//!
//! ## Module Map:
//! - **audio**: sliding-window buffer, PCM conversion, session tracking
//! - **classifier**: keyword model (candle CNN) and the async engine around it
//! - **client**: microphone capture and the duplex WebSocket client
//! - **protocol**: the JSON messages both sides exchange
//! - **websocket**: the per-connection server actor
//! - **config / state / error / health / middleware / handlers**: the usual
//!   service plumbing (layered config, shared metrics, HTTP surface)

pub mod audio;
pub mod classifier;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod protocol;
pub mod state;
pub mod websocket;

pub use error::{AppError, AppResult};

/// Pipeline-wide audio constants
pub mod constants {
    /// Sample rate every component assumes, in Hz
    pub const SAMPLE_RATE: u32 = 16_000;

    /// Mono audio everywhere
    pub const CHANNELS: u16 = 1;

    /// Bits per PCM sample on the wire
    pub const BIT_DEPTH: u16 = 16;

    /// Bytes per encoded sample (16-bit)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// One classification window: 1.0 s of 16 kHz 16-bit mono PCM
    pub const WINDOW_BYTES: usize = 32_000;

    /// Advance between windows: 0.5 s, giving 50% overlap
    pub const STEP_BYTES: usize = 16_000;

    /// Samples per window after decoding
    pub const WINDOW_SAMPLES: usize = WINDOW_BYTES / BYTES_PER_SAMPLE;

    /// Client capture block size in samples (2_048 bytes encoded)
    pub const CAPTURE_BLOCK_SAMPLES: usize = 1_024;
}
