//! # Classifier Module
//!
//! Keyword classification over one-second audio windows using a small CNN
//! via the Candle-rs framework. Pure Rust inference, no Python runtime or
//! FFI bindings at serving time.
//!
//! ## Key Components:
//! - **Keyword Model**: Spectrogram frontend plus the CNN, loaded from
//!   safetensors (local file or the Hugging Face Hub)
//! - **Classifier Engine**: Runs windows through the model on blocking
//!   threads and tracks latency and confidence
//!
//! The engine works against the [`Classifier`] trait rather than the
//! concrete model, which keeps tests independent of model weights.

pub mod engine; // Window classification engine and metrics
pub mod model;  // Keyword CNN loading and inference

pub use engine::{Classification, ClassifiedWindow, Classifier, ClassifierEngine};
pub use model::{KeywordModel, KEYWORD_LABELS};
