//! # Configuration Management
//!
//! Layered configuration for the server binary:
//!
//! 1. Built-in defaults (the `Default` impl below)
//! 2. `config.toml` in the working directory, if present
//! 3. Environment variables with the `APP_` prefix and `__` as the section
//!    separator (`APP_SERVER__PORT=9000`, `APP_AUDIO__WINDOW_DURATION_MS=1000`)
//! 4. Bare `HOST` / `PORT` variables, for deployment platforms that set them
//!
//! The audio geometry lives here so client capture and server windowing are
//! described in one place. The window size itself is pinned to what the
//! classifier consumes; sessions snapshot the rest of the configuration
//! when they connect.

use crate::audio::buffer::SlidingWindowConfig;
use crate::constants::WINDOW_BYTES;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioSettings,
    pub classifier: ClassifierSettings,
    pub performance: PerformanceConfig,
}

/// Where the HTTP server binds.
///
/// `host = "127.0.0.1"` keeps the service local; `0.0.0.0` exposes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio stream geometry.
///
/// ## Fields:
/// - `sample_rate` / `channels` / `bit_depth`: the PCM format every
///   component assumes (16 kHz mono 16-bit)
/// - `window_duration_ms`: length of one classification window
/// - `overlap_duration_ms`: how much consecutive windows share
/// - `max_pending_windows`: bound on decoded windows queued per session
///   before the newest is dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    pub window_duration_ms: u32,
    pub overlap_duration_ms: u32,
    pub max_pending_windows: usize,
}

impl AudioSettings {
    /// The window geometry handed to each session's buffer.
    pub fn window_config(&self) -> SlidingWindowConfig {
        SlidingWindowConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_depth: self.bit_depth,
            window_duration_ms: self.window_duration_ms,
            overlap_duration_ms: self.overlap_duration_ms,
        }
    }
}

/// Where the keyword model comes from and where it runs.
///
/// ## Fields:
/// - `model_id`: Hugging Face repository to fetch weights from
/// - `model_file`: weights filename inside that repository
/// - `model_path`: explicit local safetensors path; skips the download
/// - `device`: compute device preference ("auto", "cpu", "cuda", "metal")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    pub model_id: String,
    pub model_file: String,
    pub model_path: Option<String>,
    pub device: String,
}

/// Service-level limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Hard cap on concurrently open WebSocket sessions
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            audio: AudioSettings {
                sample_rate: 16000,       // 16kHz mono 16-bit, end to end
                channels: 1,
                bit_depth: 16,
                window_duration_ms: 1000, // 1 s windows
                overlap_duration_ms: 500, // 50% overlap
                max_pending_windows: 8,
            },
            classifier: ClassifierSettings {
                model_id: "command-stream/keyword-cnn".to_string(),
                model_file: "keyword_cnn.safetensors".to_string(),
                model_path: None,
                device: "auto".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 32,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from every source in priority order.
    ///
    /// Later sources override earlier ones: defaults, then `config.toml`,
    /// then `APP_`-prefixed environment variables, then bare `HOST`/`PORT`.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates sections from keys so that
            // multi-word keys like window_duration_ms survive the mapping.
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Deployment platforms commonly inject these without a prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the loaded values can actually run a server.
    ///
    /// Catching a bad geometry here produces one clear startup error
    /// instead of a refused buffer on every connection.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }
        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Channel count must be greater than 0"));
        }
        if self.audio.bit_depth == 0 || self.audio.bit_depth % 8 != 0 {
            return Err(anyhow::anyhow!(
                "Bit depth must be a positive multiple of 8, got {}",
                self.audio.bit_depth
            ));
        }
        if self.audio.overlap_duration_ms >= self.audio.window_duration_ms {
            return Err(anyhow::anyhow!(
                "Overlap ({} ms) must be shorter than the window ({} ms)",
                self.audio.overlap_duration_ms,
                self.audio.window_duration_ms
            ));
        }
        // The classifier consumes exactly one window size; this runs for
        // startup config and runtime updates alike. Overlap only moves the
        // step, so it stays adjustable.
        let window_bytes = self.audio.window_config().window_bytes();
        if window_bytes != WINDOW_BYTES {
            return Err(anyhow::anyhow!(
                "Configured window is {} bytes but the classifier consumes {} byte windows; \
                 adjust audio.window_duration_ms or audio.sample_rate",
                window_bytes,
                WINDOW_BYTES
            ));
        }
        if self.audio.max_pending_windows == 0 {
            return Err(anyhow::anyhow!("Max pending windows must be greater than 0"));
        }
        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }
        Ok(())
    }

    /// Apply a partial update from a JSON body.
    ///
    /// Only the fields present in the JSON change, e.g.
    /// `{"server": {"port": 9000}}` touches nothing but the port. The update
    /// is validated on a copy and committed only when it passes, so a bad
    /// request cannot leave the running configuration half-changed.
    ///
    /// Audio geometry changes affect sessions opened after the update;
    /// live sessions keep the snapshot they connected with.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;
        let mut updated = self.clone();

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                updated.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                updated.server.port = port as u16;
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(window) = audio.get("window_duration_ms").and_then(|v| v.as_u64()) {
                updated.audio.window_duration_ms = window as u32;
            }
            if let Some(overlap) = audio.get("overlap_duration_ms").and_then(|v| v.as_u64()) {
                updated.audio.overlap_duration_ms = overlap as u32;
            }
            if let Some(pending) = audio.get("max_pending_windows").and_then(|v| v.as_u64()) {
                updated.audio.max_pending_windows = pending as usize;
            }
        }

        if let Some(classifier) = partial.get("classifier") {
            if let Some(device) = classifier.get("device").and_then(|v| v.as_str()) {
                updated.classifier.device = device.to_string();
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                updated.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert!(config.validate().is_ok());

        // The default geometry is the production one.
        let window = config.audio.window_config();
        assert_eq!(window.window_bytes(), 32_000);
        assert_eq!(window.step_bytes(), 16_000);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.overlap_duration_ms = config.audio.window_duration_ms;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.max_pending_windows = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.bit_depth = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn window_geometry_is_pinned_to_the_classifier() {
        // The window size the classifier consumes cannot be reconfigured,
        // at startup or through a runtime update.
        let mut config = AppConfig::default();
        config.audio.window_duration_ms = 750;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        let json = r#"{"audio": {"window_duration_ms": 2000}}"#;
        assert!(config.update_from_json(json).is_err());
        assert_eq!(config.audio.window_duration_ms, 1000);

        // Overlap only moves the step, so it stays adjustable.
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"overlap_duration_ms": 250}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.audio.window_config().step_bytes(), 24_000);
    }

    #[test]
    fn partial_update_changes_only_named_fields() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "audio": {"max_pending_windows": 4}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.audio.max_pending_windows, 4);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.audio.window_duration_ms, 1000);
    }

    #[test]
    fn invalid_update_leaves_config_untouched() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"overlap_duration_ms": 5000}}"#;
        assert!(config.update_from_json(json).is_err());
        assert_eq!(config.audio.overlap_duration_ms, 500);
    }
}
