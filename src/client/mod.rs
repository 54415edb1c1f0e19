//! Streaming client: microphone capture plus the WebSocket session.
//!
//! The capture thread and the socket meet through a bounded block queue,
//! so a stalled network drops audio instead of growing memory.

pub mod capture; // Microphone capture thread and block queue
pub mod stream;  // WebSocket session and result receiver

pub use capture::{start_capture, CaptureHandle};
pub use stream::StreamSession;
