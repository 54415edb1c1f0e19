//! # Classification Engine
//!
//! The async seam between sessions and the keyword model. Sessions hand in
//! decoded windows; the engine runs the (CPU-bound, possibly slow) model on
//! tokio's shared blocking pool, measures latency, and keeps aggregate
//! metrics.
//!
//! The engine holds its classifier for the whole process lifetime. It is
//! constructed once at startup behind `web::Data`, after the model has
//! loaded, so sessions never wait on (or race) model initialization.

use std::sync::{Arc, RwLock};
use std::time::Instant;
use anyhow::{anyhow, Result};
use tracing::debug;

/// One prediction from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Predicted keyword, drawn from the model's fixed vocabulary
    pub label: String,
    /// Score for that keyword, 0.0 to 1.0
    pub confidence: f32,
}

/// The capability the pipeline depends on, kept deliberately narrow.
///
/// Implementations are synchronous and CPU-bound; the engine decides where
/// they run. They must tolerate arbitrary sample values (silence included)
/// and fail with an error rather than panic on internal problems.
pub trait Classifier: Send + Sync {
    /// Classify one window of normalized samples at the pipeline rate.
    fn classify(&self, samples: &[f32]) -> Result<Classification>;

    /// The closed set of labels `classify` can return.
    fn labels(&self) -> &[&'static str];
}

/// A classification plus the latency it cost.
#[derive(Debug, Clone)]
pub struct ClassifiedWindow {
    pub classification: Classification,
    /// Wall-clock time from submission to completion, in milliseconds
    pub inference_ms: u64,
}

/// Aggregate counters across every session.
#[derive(Debug, Default)]
struct EngineMetrics {
    windows_classified: u64,
    failures: u64,
    total_inference_ms: u64,
    average_confidence: f32,
}

/// Runs classifications on the shared blocking pool and tracks metrics.
pub struct ClassifierEngine {
    classifier: Arc<dyn Classifier>,

    /// Samples one window must decode to; anything else is rejected before
    /// it reaches the model
    expected_samples: usize,

    metrics: Arc<RwLock<EngineMetrics>>,
}

impl ClassifierEngine {
    pub fn new(classifier: Arc<dyn Classifier>, expected_samples: usize) -> Self {
        Self {
            classifier,
            expected_samples,
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
        }
    }

    /// Classify one decoded window.
    ///
    /// ## Process:
    /// 1. Reject windows of the wrong shape before spending pool time
    /// 2. Run the model via `spawn_blocking` so session I/O never stalls
    ///    behind inference
    /// 3. Measure wall-clock latency and fold the outcome into the metrics
    ///
    /// ## Errors:
    /// A failed window returns `Err` and counts as a failure; it carries no
    /// implication for later windows, which the caller submits as usual.
    pub async fn classify_window(&self, samples: Vec<f32>) -> Result<ClassifiedWindow> {
        if samples.len() != self.expected_samples {
            self.record_failure();
            return Err(anyhow!(
                "Window has {} samples, expected {}",
                samples.len(),
                self.expected_samples
            ));
        }

        let classifier = Arc::clone(&self.classifier);
        let started = Instant::now();

        let outcome = tokio::task::spawn_blocking(move || classifier.classify(&samples))
            .await
            .map_err(|e| anyhow!("Classification task panicked: {}", e));

        let inference_ms = started.elapsed().as_millis() as u64;

        match outcome.and_then(|r| r) {
            Ok(classification) => {
                debug!(
                    "Classified window as '{}' (confidence {:.2}, {}ms)",
                    classification.label, classification.confidence, inference_ms
                );
                self.record_success(classification.confidence, inference_ms);
                Ok(ClassifiedWindow {
                    classification,
                    inference_ms,
                })
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// The vocabulary of the underlying model.
    pub fn labels(&self) -> &[&'static str] {
        self.classifier.labels()
    }

    /// Snapshot of the aggregate counters for /metrics.
    pub fn stats(&self) -> EngineStats {
        let metrics = self.metrics.read().unwrap();
        EngineStats {
            windows_classified: metrics.windows_classified,
            failures: metrics.failures,
            average_inference_ms: if metrics.windows_classified > 0 {
                metrics.total_inference_ms / metrics.windows_classified
            } else {
                0
            },
            average_confidence: metrics.average_confidence,
        }
    }

    fn record_success(&self, confidence: f32, inference_ms: u64) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.windows_classified += 1;
        metrics.total_inference_ms += inference_ms;
        let n = metrics.windows_classified as f32;
        metrics.average_confidence = (metrics.average_confidence * (n - 1.0) + confidence) / n;
    }

    fn record_failure(&self) {
        self.metrics.write().unwrap().failures += 1;
    }
}

/// Serializable engine counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub windows_classified: u64,
    pub failures: u64,
    pub average_inference_ms: u64,
    pub average_confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test double that fails whenever the first sample carries the poison
    /// marker, and otherwise answers with a fixed label.
    struct FlakyClassifier;

    const POISON: f32 = -2.0;

    impl Classifier for FlakyClassifier {
        fn classify(&self, samples: &[f32]) -> Result<Classification> {
            if samples.first() == Some(&POISON) {
                return Err(anyhow!("model refused this window"));
            }
            Ok(Classification {
                label: "go".to_string(),
                confidence: 0.75,
            })
        }

        fn labels(&self) -> &[&'static str] {
            &["go", "stop"]
        }
    }

    struct SlowClassifier;

    impl Classifier for SlowClassifier {
        fn classify(&self, _samples: &[f32]) -> Result<Classification> {
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Classification {
                label: "stop".to_string(),
                confidence: 0.9,
            })
        }

        fn labels(&self) -> &[&'static str] {
            &["stop"]
        }
    }

    #[tokio::test]
    async fn failed_window_does_not_block_the_next() {
        let engine = ClassifierEngine::new(Arc::new(FlakyClassifier), 4);

        // Window k fails...
        let poisoned = vec![POISON, 0.0, 0.0, 0.0];
        assert!(engine.classify_window(poisoned).await.is_err());

        // ...and window k+1 classifies normally.
        let clean = vec![0.1, 0.2, 0.3, 0.4];
        let outcome = engine.classify_window(clean).await.unwrap();
        assert_eq!(outcome.classification.label, "go");

        let stats = engine.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.windows_classified, 1);
    }

    #[tokio::test]
    async fn wrong_shape_is_rejected_before_the_model() {
        let engine = ClassifierEngine::new(Arc::new(FlakyClassifier), 4);
        let err = engine.classify_window(vec![0.0; 3]).await.unwrap_err();
        assert!(err.to_string().contains("expected 4"));
        assert_eq!(engine.stats().failures, 1);
        assert_eq!(engine.stats().windows_classified, 0);
    }

    #[tokio::test]
    async fn latency_is_measured() {
        let engine = ClassifierEngine::new(Arc::new(SlowClassifier), 2);
        let outcome = engine.classify_window(vec![0.0, 0.0]).await.unwrap();
        assert!(outcome.inference_ms >= 20);
        assert!(engine.stats().average_inference_ms >= 20);
    }

    #[tokio::test]
    async fn confidence_average_tracks_results() {
        let engine = ClassifierEngine::new(Arc::new(FlakyClassifier), 2);
        engine.classify_window(vec![0.0, 0.0]).await.unwrap();
        engine.classify_window(vec![0.5, 0.5]).await.unwrap();
        let stats = engine.stats();
        assert_eq!(stats.windows_classified, 2);
        assert!((stats.average_confidence - 0.75).abs() < 1e-6);
    }
}
