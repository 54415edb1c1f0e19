use crate::classifier::ClassifierEngine;
use crate::constants::{BYTES_PER_SAMPLE, SAMPLE_RATE, STEP_BYTES, WINDOW_SAMPLES};
use crate::error::AppError;
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde_json::json;
use tracing::info;

/// Largest accepted upload.
const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Classify an uploaded WAV file in one shot.
///
/// ## Endpoint: `POST /api/v1/classify`
///
/// ## Request:
/// Multipart form data with the file in a field named "audio". The file
/// must be 16kHz mono 16-bit PCM WAV; no resampling happens server-side.
///
/// ## Response:
/// One entry per one-second window, stepped half a window apart, in file
/// order. Useful for checking a recording against the live stream path.
pub async fn classify_file(
    mut payload: actix_multipart::Multipart,
    engine: web::Data<ClassifierEngine>,
) -> Result<HttpResponse, AppError> {
    let start_time = std::time::Instant::now();

    let mut audio_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field = item
            .map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let content_disposition = field.content_disposition().ok_or_else(|| {
            AppError::ValidationError("Missing content disposition".to_string())
        })?;
        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::ValidationError("Missing field name".to_string()))?;

        if field_name == "audio" {
            filename = content_disposition.get_filename().map(|s| s.to_string());

            let mut bytes = Vec::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk
                    .map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
                if bytes.len() + chunk.len() > MAX_FILE_SIZE {
                    return Err(AppError::ValidationError(format!(
                        "File too large (max {} bytes)",
                        MAX_FILE_SIZE
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }

            audio_data = Some(bytes);
        }
    }

    let audio_bytes = audio_data
        .ok_or_else(|| AppError::ValidationError("No audio file provided".to_string()))?;
    let filename = filename.unwrap_or_else(|| "unknown".to_string());

    let samples = decode_wav(&audio_bytes)?;
    if samples.len() < WINDOW_SAMPLES {
        return Err(AppError::ValidationError(format!(
            "File holds {} samples, one window needs {}",
            samples.len(),
            WINDOW_SAMPLES
        )));
    }

    let step_samples = STEP_BYTES / BYTES_PER_SAMPLE;
    let mut results = Vec::new();
    let mut start = 0usize;
    let mut window_index = 0u64;
    while start + WINDOW_SAMPLES <= samples.len() {
        let window = samples[start..start + WINDOW_SAMPLES].to_vec();
        let outcome = engine.classify_window(window).await?;
        results.push(json!({
            "window_index": window_index,
            "offset_ms": (start as u64 * 1000) / SAMPLE_RATE as u64,
            "detected": outcome.classification.label,
            "confidence": outcome.classification.confidence,
            "inference_ms": outcome.inference_ms
        }));
        start += step_samples;
        window_index += 1;
    }

    info!(
        "Classified file '{}': {} windows in {}ms",
        filename,
        results.len(),
        start_time.elapsed().as_millis()
    );

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "file_info": {
            "filename": filename,
            "size_bytes": audio_bytes.len(),
            "duration_seconds": samples.len() as f64 / SAMPLE_RATE as f64
        },
        "window_count": results.len(),
        "results": results,
        "processing_time_ms": start_time.elapsed().as_millis() as u64,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Decode a WAV payload into f32 samples, insisting on the stream format.
fn decode_wav(bytes: &[u8]) -> Result<Vec<f32>, AppError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut reader = hound::WavReader::new(cursor)
        .map_err(|e| AppError::ValidationError(format!("Not a readable WAV file: {}", e)))?;
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(AppError::ValidationError(format!(
            "Expected mono audio, file has {} channels",
            spec.channels
        )));
    }
    if spec.sample_rate != SAMPLE_RATE {
        return Err(AppError::ValidationError(format!(
            "Expected {}Hz audio, file is {}Hz",
            SAMPLE_RATE, spec.sample_rate
        )));
    }
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(AppError::ValidationError(
            "Expected 16-bit PCM samples".to_string(),
        ));
    }

    reader
        .samples::<i16>()
        .map(|s| {
            s.map(|v| v as f32 / 32768.0)
                .map_err(|e| AppError::ValidationError(format!("Corrupt WAV data: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut out = std::io::Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut out, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        out.into_inner()
    }

    #[test]
    fn decodes_matching_wav() {
        let bytes = wav_bytes(16_000, 1, &[0, 16384, -16384]);
        let samples = decode_wav(&bytes).unwrap();
        assert_eq!(samples.len(), 3);
        assert!((samples[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rejects_wrong_sample_rate() {
        let bytes = wav_bytes(44_100, 1, &[0; 10]);
        assert!(decode_wav(&bytes).is_err());
    }

    #[test]
    fn rejects_stereo() {
        let bytes = wav_bytes(16_000, 2, &[0; 10]);
        assert!(decode_wav(&bytes).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_wav(&[1, 2, 3, 4]).is_err());
    }
}
