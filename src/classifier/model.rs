//! # Keyword Model
//!
//! The concrete classifier: a small CNN over a magnitude spectrogram,
//! trained on one-second clips of nine spoken commands. Weights are
//! distributed as safetensors and fetched from the Hugging Face Hub unless
//! the configuration points at a local file.
//!
//! ## Input pipeline:
//! A 16_000-sample window becomes a 124×129 magnitude spectrogram (STFT
//! with frame length 255, hop 128, periodic Hann window, 256-point DFT),
//! is normalized with the dataset statistics stored alongside the weights,
//! and then runs through the network:
//!
//! ```text
//! spectrogram (1×1×124×129)
//!   → avg_pool 4×4   (1×1×31×32)
//!   → conv 3×3, 32   (1×32×29×30) → relu
//!   → conv 3×3, 64   (1×64×27×28) → relu
//!   → max_pool 2×2   (1×64×13×14)
//!   → flatten → linear 128 → relu → linear 9
//! ```
//!
//! The DFT has no FFT kernel here; it is two matmuls against precomputed
//! cosine/sine bases, which is plenty for 124 frames per window.

use crate::classifier::engine::{Classification, Classifier};
use crate::config::ClassifierSettings;
use crate::constants::WINDOW_SAMPLES;
use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, Module, VarBuilder};
use hf_hub::api::tokio::ApiBuilder;
use std::path::PathBuf;
use tracing::{debug, info};

/// The closed vocabulary, in the index order the network was trained with.
pub const KEYWORD_LABELS: [&str; 9] = [
    "down", "go", "left", "no", "right", "silence", "stop", "up", "yes",
];

/// Samples per STFT frame.
const FRAME_LENGTH: usize = 255;
/// Hop between frames.
const FRAME_STEP: usize = 128;
/// DFT size (frame zero-padded by one sample).
const FFT_LENGTH: usize = 256;
/// One-sided spectrum bins.
const FREQ_BINS: usize = FFT_LENGTH / 2 + 1;
/// Frames per one-second window: 1 + (16000 - 255) / 128 = 124.
const SPEC_FRAMES: usize = 1 + (WINDOW_SAMPLES - FRAME_LENGTH) / FRAME_STEP;
/// Flattened features after the conv stack: 64 channels × 13 × 14.
const FLATTEN_FEATURES: usize = 64 * 13 * 14;

/// Precomputed pieces of the spectrogram transform.
///
/// Building the Hann window and the DFT bases once at load time keeps the
/// per-window work down to framing plus two matmuls.
pub struct SpectrogramPlan {
    window: Vec<f32>,
    cos_basis: Tensor,
    sin_basis: Tensor,
}

impl SpectrogramPlan {
    pub fn new(device: &Device) -> Result<Self> {
        // Periodic Hann window, the form STFT pipelines use.
        let window: Vec<f32> = (0..FRAME_LENGTH)
            .map(|n| {
                let phase = 2.0 * std::f32::consts::PI * n as f32 / FRAME_LENGTH as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();

        // DFT bases over the zero-padded frame: entry (n, k) holds the
        // contribution of sample n to frequency bin k.
        let mut cos_values = Vec::with_capacity(FRAME_LENGTH * FREQ_BINS);
        let mut sin_values = Vec::with_capacity(FRAME_LENGTH * FREQ_BINS);
        for n in 0..FRAME_LENGTH {
            for k in 0..FREQ_BINS {
                let angle = 2.0 * std::f64::consts::PI * (k * n) as f64 / FFT_LENGTH as f64;
                cos_values.push(angle.cos() as f32);
                sin_values.push(-angle.sin() as f32);
            }
        }

        Ok(Self {
            window,
            cos_basis: Tensor::from_vec(cos_values, (FRAME_LENGTH, FREQ_BINS), device)?,
            sin_basis: Tensor::from_vec(sin_values, (FRAME_LENGTH, FREQ_BINS), device)?,
        })
    }

    /// Magnitude spectrogram of one window, shaped (frames, bins).
    pub fn compute(&self, samples: &[f32], device: &Device) -> Result<Tensor> {
        if samples.len() < FRAME_LENGTH {
            return Err(anyhow!(
                "Need at least {} samples for one frame, got {}",
                FRAME_LENGTH,
                samples.len()
            ));
        }

        let frame_count = 1 + (samples.len() - FRAME_LENGTH) / FRAME_STEP;
        let mut framed = Vec::with_capacity(frame_count * FRAME_LENGTH);
        for frame in 0..frame_count {
            let start = frame * FRAME_STEP;
            for (offset, &w) in self.window.iter().enumerate() {
                framed.push(samples[start + offset] * w);
            }
        }

        let frames = Tensor::from_vec(framed, (frame_count, FRAME_LENGTH), device)?;
        let real = frames.matmul(&self.cos_basis)?;
        let imaginary = frames.matmul(&self.sin_basis)?;
        let magnitude = (real.sqr()? + imaginary.sqr()?)?.sqrt()?;
        Ok(magnitude)
    }
}

/// The loaded network plus everything needed to run it.
pub struct KeywordModel {
    plan: SpectrogramPlan,
    conv1: Conv2d,
    conv2: Conv2d,
    fc1: Linear,
    fc2: Linear,
    /// Dataset mean/std applied to the spectrogram before the conv stack
    norm_mean: f32,
    norm_std: f32,
    device: Device,
}

impl KeywordModel {
    /// Load the model according to the classifier configuration.
    ///
    /// ## Resolution order:
    /// 1. `model_path`, when set: load that local safetensors file
    /// 2. otherwise fetch `model_file` from the `model_id` repository on
    ///    the Hugging Face Hub (respecting `HF_TOKEN`, `HF_HUB_CACHE` and
    ///    `HF_HOME`, cached across restarts)
    ///
    /// ## Validation:
    /// A zero-filled window is classified once before the model is handed
    /// out, so a broken weights file fails the process at startup instead
    /// of failing every session later.
    pub async fn load(settings: &ClassifierSettings, device: Device) -> Result<Self> {
        let start_time = std::time::Instant::now();

        let weights_path = match &settings.model_path {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(anyhow!("Model file not found at {}", path.display()));
                }
                info!("Loading keyword model from local file {}", path.display());
                path
            }
            None => {
                info!(
                    "Fetching keyword model {} from {}",
                    settings.model_file, settings.model_id
                );
                Self::fetch_from_hub(settings).await?
            }
        };

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)?
        };

        let conv1 = conv2d(1, 32, 3, Conv2dConfig::default(), vb.pp("conv1"))?;
        let conv2 = conv2d(32, 64, 3, Conv2dConfig::default(), vb.pp("conv2"))?;
        let fc1 = linear(FLATTEN_FEATURES, 128, vb.pp("fc1"))?;
        let fc2 = linear(128, KEYWORD_LABELS.len(), vb.pp("fc2"))?;

        let norm_mean = vb.get((), "norm.mean")?.to_scalar::<f32>()?;
        let norm_std = vb.get((), "norm.std")?.to_scalar::<f32>()?;
        if norm_std <= 0.0 {
            return Err(anyhow!(
                "Weights carry a non-positive spectrogram std ({})",
                norm_std
            ));
        }

        let model = Self {
            plan: SpectrogramPlan::new(&device)?,
            conv1,
            conv2,
            fc1,
            fc2,
            norm_mean,
            norm_std,
            device,
        };

        // Smoke test: silence must classify without error.
        let probe = model.classify(&vec![0.0f32; WINDOW_SAMPLES])?;
        debug!(
            "Model probe on silence: '{}' ({:.2})",
            probe.label, probe.confidence
        );

        info!(
            "Keyword model ready in {:.2}s ({} labels)",
            start_time.elapsed().as_secs_f64(),
            KEYWORD_LABELS.len()
        );
        Ok(model)
    }

    async fn fetch_from_hub(settings: &ClassifierSettings) -> Result<PathBuf> {
        let mut builder = ApiBuilder::new().with_progress(false);

        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        } else {
            builder = builder.with_token(None);
        }

        if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
            builder = builder.with_cache_dir(cache_dir.into());
        } else if let Ok(hf_home) = std::env::var("HF_HOME") {
            builder = builder.with_cache_dir(PathBuf::from(hf_home).join("hub"));
        }

        let api = builder.build()?;
        let repo = api.model(settings.model_id.clone());
        repo.get(&settings.model_file).await.map_err(|e| {
            anyhow!(
                "Failed to download {} from {}: {}",
                settings.model_file,
                settings.model_id,
                e
            )
        })
    }

    fn forward(&self, spectrogram: &Tensor) -> Result<Tensor> {
        // (frames, bins) → image-shaped (batch, channel, frames, bins),
        // normalized with the stored dataset statistics.
        let x = spectrogram
            .affine(
                1.0 / self.norm_std as f64,
                -(self.norm_mean as f64) / self.norm_std as f64,
            )?
            .reshape((1, 1, SPEC_FRAMES, FREQ_BINS))?;

        let x = x.avg_pool2d((4, 4))?;
        let x = self.conv1.forward(&x)?.relu()?;
        let x = self.conv2.forward(&x)?.relu()?;
        let x = x.max_pool2d(2)?;
        let x = x.flatten_from(1)?;
        let x = self.fc1.forward(&x)?.relu()?;
        let logits = self.fc2.forward(&x)?;
        Ok(logits.squeeze(0)?)
    }
}

impl Classifier for KeywordModel {
    fn classify(&self, samples: &[f32]) -> Result<Classification> {
        if samples.len() != WINDOW_SAMPLES {
            return Err(anyhow!(
                "Window has {} samples, model expects {}",
                samples.len(),
                WINDOW_SAMPLES
            ));
        }

        let spectrogram = self.plan.compute(samples, &self.device)?;
        let logits = self.forward(&spectrogram)?;
        let probabilities = candle_nn::ops::softmax_last_dim(&logits)?.to_vec1::<f32>()?;

        let (index, &confidence) = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .ok_or_else(|| anyhow!("Model produced no class scores"))?;

        Ok(Classification {
            label: KEYWORD_LABELS[index].to_string(),
            confidence,
        })
    }

    fn labels(&self) -> &[&'static str] {
        &KEYWORD_LABELS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectrogram_has_expected_geometry() {
        let device = Device::Cpu;
        let plan = SpectrogramPlan::new(&device).unwrap();
        let spectrogram = plan.compute(&vec![0.0f32; WINDOW_SAMPLES], &device).unwrap();
        assert_eq!(spectrogram.dims(), &[SPEC_FRAMES, FREQ_BINS]);
        assert_eq!(SPEC_FRAMES, 124);
        assert_eq!(FREQ_BINS, 129);
    }

    #[test]
    fn dc_signal_lands_in_bin_zero() {
        let device = Device::Cpu;
        let plan = SpectrogramPlan::new(&device).unwrap();

        // A constant signal has all its energy at DC: bin 0 carries the
        // windowed sum, bin 64 (a quarter of the sampling rate) near zero.
        let spectrogram = plan.compute(&vec![1.0f32; WINDOW_SAMPLES], &device).unwrap();
        let row: Vec<f32> = spectrogram.get(0).unwrap().to_vec1().unwrap();

        let window_sum: f32 = (0..FRAME_LENGTH)
            .map(|n| {
                let phase = 2.0 * std::f32::consts::PI * n as f32 / FRAME_LENGTH as f32;
                0.5 - 0.5 * phase.cos()
            })
            .sum();
        assert!((row[0] - window_sum).abs() < 1e-2);
        assert!(row[64] < row[0] / 20.0);
    }

    #[test]
    fn too_short_input_is_rejected() {
        let device = Device::Cpu;
        let plan = SpectrogramPlan::new(&device).unwrap();
        assert!(plan.compute(&[0.0; 100], &device).is_err());
    }

    #[test]
    fn label_order_is_fixed() {
        assert_eq!(KEYWORD_LABELS.len(), 9);
        assert_eq!(KEYWORD_LABELS[5], "silence");
        assert_eq!(KEYWORD_LABELS[6], "stop");
    }
}
