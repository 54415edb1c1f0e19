//! # Sliding Window Buffer
//!
//! Accumulates the raw PCM byte stream of one session and yields fixed-size,
//! overlapping classification windows from it. Overlap matters here: a spoken
//! command that straddles a window boundary is still fully contained in the
//! next window.
//!
//! ## Key Properties:
//! - **Byte oriented**: windows are cut from the byte stream before any
//!   decoding, so a half-received sample simply waits for its partner
//! - **Chunking invariant**: the windows produced depend only on the
//!   concatenated stream, never on how the network split it into frames
//! - **No partial windows**: a window is yielded only once all of its bytes
//!   have arrived

use std::collections::VecDeque;

/// Configuration describing the window geometry in audio terms.
///
/// The byte-level sizes used by the buffer are derived from these fields,
/// e.g. a 1000 ms window of 16 kHz mono 16-bit PCM is 32_000 bytes.
#[derive(Debug, Clone)]
pub struct SlidingWindowConfig {
    /// Sample rate of the incoming stream (16000 for this pipeline)
    pub sample_rate: u32,

    /// Number of audio channels (1 for mono)
    pub channels: u8,

    /// Bit depth of a PCM sample (16)
    pub bit_depth: u8,

    /// Duration of one classification window in milliseconds
    pub window_duration_ms: u32,

    /// Duration shared between consecutive windows in milliseconds
    pub overlap_duration_ms: u32,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,      // 16kHz mono PCM end to end
            channels: 1,
            bit_depth: 16,
            window_duration_ms: 1000,    // 1 second per window
            overlap_duration_ms: 500,    // 50% overlap
        }
    }
}

impl SlidingWindowConfig {
    /// Bytes occupied by one frame (all channels of one sample instant).
    fn bytes_per_frame(&self) -> usize {
        (self.bit_depth as usize / 8) * self.channels as usize
    }

    /// Derived window size in bytes.
    pub fn window_bytes(&self) -> usize {
        (self.window_duration_ms as usize * self.sample_rate as usize / 1000)
            * self.bytes_per_frame()
    }

    /// Derived advance per window in bytes.
    ///
    /// The buffer moves forward by `window - overlap`, so a 1000 ms window
    /// with 500 ms overlap advances by 16_000 bytes.
    pub fn step_bytes(&self) -> usize {
        let step_ms = self.window_duration_ms.saturating_sub(self.overlap_duration_ms);
        (step_ms as usize * self.sample_rate as usize / 1000) * self.bytes_per_frame()
    }
}

/// Accumulation buffer that yields overlapping windows of raw PCM bytes.
///
/// ## Ownership:
/// Each session actor owns its buffer exclusively and drives it from the
/// connection's message handler, so no locking is involved. Appending and
/// window consumption never interleave across threads.
///
/// ## Usage:
/// ```text
/// buffer.append(frame);
/// while buffer.has_window() {
///     let window = buffer.peek_window().unwrap();
///     // ... hand the window off for classification ...
///     buffer.advance();
/// }
/// ```
pub struct SlidingWindowBuffer {
    /// Raw PCM bytes awaiting windowing
    data: VecDeque<u8>,

    /// Size of one complete window in bytes
    window_bytes: usize,

    /// Bytes discarded from the front per consumed window
    step_bytes: usize,
}

impl SlidingWindowBuffer {
    /// Create a buffer from an audio-term configuration.
    ///
    /// ## Errors:
    /// Returns a descriptive error when the configuration produces an
    /// unusable geometry (zero-length window, overlap as long as the
    /// window, or a bit depth that is not byte-aligned).
    pub fn new(config: &SlidingWindowConfig) -> Result<Self, String> {
        if config.bit_depth % 8 != 0 {
            return Err(format!(
                "Bit depth must be a multiple of 8, got {}",
                config.bit_depth
            ));
        }
        if config.overlap_duration_ms >= config.window_duration_ms {
            return Err(format!(
                "Overlap ({} ms) must be shorter than the window ({} ms)",
                config.overlap_duration_ms, config.window_duration_ms
            ));
        }
        Self::from_bytes(config.window_bytes(), config.step_bytes())
    }

    /// Create a buffer directly from byte sizes.
    ///
    /// ## Invariant:
    /// `0 < step_bytes <= window_bytes`. A step equal to the window means no
    /// overlap; a smaller step means consecutive windows share
    /// `window_bytes - step_bytes` bytes.
    pub fn from_bytes(window_bytes: usize, step_bytes: usize) -> Result<Self, String> {
        if window_bytes == 0 {
            return Err("Window size must be greater than zero".to_string());
        }
        if step_bytes == 0 {
            return Err("Step size must be greater than zero".to_string());
        }
        if step_bytes > window_bytes {
            return Err(format!(
                "Step ({} bytes) cannot exceed the window ({} bytes)",
                step_bytes, window_bytes
            ));
        }

        Ok(Self {
            data: VecDeque::with_capacity(window_bytes * 2),
            window_bytes,
            step_bytes,
        })
    }

    /// Append a chunk of raw PCM bytes.
    ///
    /// Chunks may be any length, including odd lengths; bytes sit in the
    /// buffer until enough have accumulated to form a complete window.
    pub fn append(&mut self, data: &[u8]) {
        self.data.extend(data.iter().copied());
    }

    /// Whether at least one complete window is available.
    pub fn has_window(&self) -> bool {
        self.data.len() >= self.window_bytes
    }

    /// Copy of the first complete window, without consuming anything.
    ///
    /// Returns `None` while fewer than `window_bytes` bytes are buffered.
    /// The same window is returned again until `advance` is called.
    pub fn peek_window(&self) -> Option<Vec<u8>> {
        if !self.has_window() {
            return None;
        }
        Some(self.data.iter().take(self.window_bytes).copied().collect())
    }

    /// Discard one step's worth of bytes from the front of the buffer.
    ///
    /// Called exactly once per consumed window, whether or not the window
    /// classified successfully. The overlap region stays in the buffer and
    /// reappears at the start of the next window.
    pub fn advance(&mut self) {
        let n = self.step_bytes.min(self.data.len());
        self.data.drain(..n);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop all buffered bytes, e.g. when a session ends.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Window size in bytes.
    pub fn window_bytes(&self) -> usize {
        self.window_bytes
    }

    /// Advance per window in bytes.
    pub fn step_bytes(&self) -> usize {
        self.step_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drain every available window, advancing after each one.
    fn drain_windows(buffer: &mut SlidingWindowBuffer) -> Vec<Vec<u8>> {
        let mut windows = Vec::new();
        while buffer.has_window() {
            windows.push(buffer.peek_window().unwrap());
            buffer.advance();
        }
        windows
    }

    #[test]
    fn small_geometry_walkthrough() {
        // Window of 8 bytes advancing by 4, fed the bytes 0..=15.
        let mut buffer = SlidingWindowBuffer::from_bytes(8, 4).unwrap();
        let stream: Vec<u8> = (0u8..16).collect();
        buffer.append(&stream);

        assert_eq!(buffer.peek_window().unwrap(), (0u8..8).collect::<Vec<_>>());
        buffer.advance();
        assert_eq!(buffer.peek_window().unwrap(), (4u8..12).collect::<Vec<_>>());
        buffer.advance();

        // The 8-byte tail is itself a complete window (1 + (16-8)/4 = 3
        // windows in total); only after consuming it does the stream run dry.
        assert!(buffer.has_window());
        assert_eq!(buffer.peek_window().unwrap(), (8u8..16).collect::<Vec<_>>());
        buffer.advance();
        assert!(!buffer.has_window());
        assert_eq!(buffer.peek_window(), None);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn peek_is_non_destructive() {
        let mut buffer = SlidingWindowBuffer::from_bytes(8, 4).unwrap();
        buffer.append(&(0u8..12).collect::<Vec<_>>());

        let first = buffer.peek_window().unwrap();
        let second = buffer.peek_window().unwrap();
        assert_eq!(first, second);
        assert_eq!(buffer.len(), 12);

        buffer.advance();
        assert_ne!(buffer.peek_window().unwrap(), first);
    }

    #[test]
    fn chunking_does_not_change_windows() {
        let stream: Vec<u8> = (0..200).map(|i| (i % 251) as u8).collect();

        // One big append.
        let mut whole = SlidingWindowBuffer::from_bytes(32, 16).unwrap();
        whole.append(&stream);
        let expected = drain_windows(&mut whole);

        // Byte at a time.
        let mut trickle = SlidingWindowBuffer::from_bytes(32, 16).unwrap();
        let mut got = Vec::new();
        for byte in &stream {
            trickle.append(std::slice::from_ref(byte));
            got.extend(drain_windows(&mut trickle));
        }
        assert_eq!(got, expected);

        // Ragged odd-sized chunks.
        let mut ragged = SlidingWindowBuffer::from_bytes(32, 16).unwrap();
        let mut got = Vec::new();
        for chunk in stream.chunks(7) {
            ragged.append(chunk);
            got.extend(drain_windows(&mut ragged));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn window_count_matches_formula() {
        let window = 32usize;
        let step = 16usize;
        for total in [32usize, 33, 47, 48, 64, 100, 321] {
            let mut buffer = SlidingWindowBuffer::from_bytes(window, step).unwrap();
            buffer.append(&vec![0u8; total]);
            let count = drain_windows(&mut buffer).len();
            assert_eq!(
                count,
                1 + (total - window) / step,
                "total {} bytes",
                total
            );
        }
    }

    #[test]
    fn consecutive_windows_share_exact_overlap() {
        let mut buffer = SlidingWindowBuffer::from_bytes(8, 3).unwrap();
        let stream: Vec<u8> = (0u8..40).collect();
        buffer.append(&stream);

        let windows = drain_windows(&mut buffer);
        assert!(windows.len() >= 2);
        for pair in windows.windows(2) {
            // The last (window - step) bytes of one window open the next.
            assert_eq!(pair[0][3..], pair[1][..5]);
        }
    }

    #[test]
    fn no_window_until_complete() {
        let mut buffer = SlidingWindowBuffer::from_bytes(8, 4).unwrap();
        buffer.append(&[1, 2, 3, 4, 5, 6, 7]);
        assert!(!buffer.has_window());
        assert_eq!(buffer.peek_window(), None);

        buffer.append(&[8]);
        assert!(buffer.has_window());
        assert_eq!(buffer.peek_window().unwrap().len(), 8);
    }

    #[test]
    fn production_geometry_from_config() {
        let config = SlidingWindowConfig::default();
        assert_eq!(config.window_bytes(), 32_000);
        assert_eq!(config.step_bytes(), 16_000);

        let mut buffer = SlidingWindowBuffer::new(&config).unwrap();
        buffer.append(&vec![0u8; 48_000]);

        // 48_000 bytes hold 1 + (48_000 - 32_000) / 16_000 = 2 windows.
        let windows = drain_windows(&mut buffer);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].len(), 32_000);
        assert_eq!(buffer.len(), 16_000);
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(SlidingWindowBuffer::from_bytes(0, 1).is_err());
        assert!(SlidingWindowBuffer::from_bytes(8, 0).is_err());
        assert!(SlidingWindowBuffer::from_bytes(8, 9).is_err());
        assert!(SlidingWindowBuffer::from_bytes(8, 8).is_ok());

        let config = SlidingWindowConfig {
            overlap_duration_ms: 1000,
            ..SlidingWindowConfig::default()
        };
        assert!(SlidingWindowBuffer::new(&config).is_err());
    }
}
