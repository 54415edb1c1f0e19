//! # PCM Conversion
//!
//! Conversions between the wire format (16-bit signed little-endian PCM) and
//! the normalized float samples the classifier consumes, plus the frame
//! validation shared by the WebSocket and upload paths.
//!
//! No filtering or gain correction happens here. Silence is a class of its
//! own in the keyword vocabulary, so quiet windows must reach the model
//! untouched.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Decode raw PCM bytes into normalized float samples.
///
/// ## Conversion:
/// Each pair of bytes is read as a little-endian `i16` and scaled from
/// [-32768, 32767] to [-1.0, 1.0) by dividing by 32768.0.
///
/// ## Errors:
/// Empty input and odd-length input are rejected; a dangling byte means the
/// caller sliced the stream outside sample boundaries.
pub fn pcm_to_float(data: &[u8]) -> Result<Vec<f32>, String> {
    validate_pcm(data)?;

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }
    Ok(samples)
}

/// Encode float samples as 16-bit little-endian PCM bytes.
///
/// Samples are clamped to [-1.0, 1.0] and scaled by 32767 before encoding,
/// so a full-scale float never wraps. A block of 1_024 zero samples encodes
/// to exactly 2_048 zero bytes.
pub fn float_to_pcm(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

/// Check that a byte slice can hold complete 16-bit samples.
pub fn validate_pcm(data: &[u8]) -> Result<(), String> {
    if data.is_empty() {
        return Err("Audio data is empty".to_string());
    }
    if data.len() % 2 != 0 {
        return Err(format!(
            "Audio data length must be even for 16-bit samples, got {} bytes",
            data.len()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_samples() {
        let mut data = Vec::new();
        for value in [0i16, 16384, -16384, 32767, -32768] {
            data.extend_from_slice(&value.to_le_bytes());
        }

        let samples = pcm_to_float(&data).unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 0.5);
        assert_eq!(samples[2], -0.5);
        assert!((samples[3] - 32767.0 / 32768.0).abs() < 1e-6);
        assert_eq!(samples[4], -1.0);
    }

    #[test]
    fn rejects_empty_and_odd_input() {
        assert!(pcm_to_float(&[]).is_err());
        assert!(pcm_to_float(&[1, 2, 3]).is_err());
        assert!(validate_pcm(&[0; 15]).is_err());
        assert!(validate_pcm(&[0; 16]).is_ok());
    }

    #[test]
    fn zero_block_encodes_to_zero_bytes() {
        // A silent capture block: 1_024 float zeros become 2_048 zero bytes.
        let encoded = float_to_pcm(&vec![0.0f32; 1024]);
        assert_eq!(encoded.len(), 2048);
        assert!(encoded.iter().all(|&b| b == 0));
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let encoded = float_to_pcm(&[1.5, -2.0, 1.0, -1.0]);
        let decoded = pcm_to_float(&encoded).unwrap();
        assert!((decoded[0] - 32767.0 / 32768.0).abs() < 1e-6);
        assert!((decoded[1] + 32767.0 / 32768.0).abs() < 1e-6);
        assert!((decoded[2] - 32767.0 / 32768.0).abs() < 1e-6);
        assert!((decoded[3] + 32767.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn round_trip_stays_close() {
        let original: Vec<f32> = (0..64).map(|i| (i as f32 / 64.0) - 0.5).collect();
        let decoded = pcm_to_float(&float_to_pcm(&original)).unwrap();
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1.0 / 16384.0, "{} vs {}", a, b);
        }
    }
}
