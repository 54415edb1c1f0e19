//! # Audio Pipeline Primitives
//!
//! The server-side audio path between the socket and the classifier.
//!
//! ## Key Components:
//! - **Sliding Window Buffer**: accumulates the PCM byte stream and yields
//!   overlapping classification windows
//! - **Processor**: PCM byte ⇄ normalized float conversion and validation
//! - **Session**: lifecycle state machine and the live-session registry
//!
//! ## Audio Format:
//! - **Sample Rate**: 16 kHz
//! - **Bit Depth**: 16-bit PCM, little-endian signed
//! - **Channels**: mono
//!
//! The WebSocket actor that drives these lives in `src/websocket.rs`.

pub mod buffer;       // Sliding-window accumulation
pub mod processor;    // PCM conversion and validation
pub mod session;      // Session state machine and registry
