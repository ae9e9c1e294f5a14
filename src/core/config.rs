//! Session settings, persisted as JSON next to the app data.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Recommended bounds for capture and playback intervals.
pub const MIN_INTERVAL_MS: u64 = 100;
pub const MAX_INTERVAL_MS: u64 = 2000;

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_capture_interval_ms() -> u64 {
    1000
}

fn default_playback_interval_ms() -> u64 {
    500
}

fn default_noise_probability() -> f64 {
    0.2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the memory service.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_capture_interval_ms")]
    pub capture_interval_ms: u64,
    #[serde(default = "default_playback_interval_ms")]
    pub playback_interval_ms: u64,
    /// Per-cell flip probability of the noise action.
    #[serde(default = "default_noise_probability")]
    pub noise_probability: f64,
    #[serde(default)]
    pub auto_train: bool,
    /// Fixed seed for the noise generator; clock-seeded when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            request_timeout_ms: default_request_timeout_ms(),
            capture_interval_ms: default_capture_interval_ms(),
            playback_interval_ms: default_playback_interval_ms(),
            noise_probability: default_noise_probability(),
            auto_train: false,
            seed: None,
        }
    }
}

impl SessionConfig {
    /// Defaults when the file is missing; defaults plus a warning when it
    /// cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str::<SessionConfig>(&s).ok())
        {
            Some(cfg) => cfg.normalized(),
            None => {
                warn!("Failed to parse config file {:?}; using defaults", path);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory {:?}: {e}", parent))?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| format!("Failed to encode config: {e}"))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write config {:?}: {e}", path))
    }

    /// Clamp intervals into [100, 2000] ms and the noise probability into
    /// [0, 1], warning about every adjusted field.
    pub fn normalized(mut self) -> Self {
        self.capture_interval_ms = clamp_interval("capture_interval_ms", self.capture_interval_ms);
        self.playback_interval_ms =
            clamp_interval("playback_interval_ms", self.playback_interval_ms);
        if !(0.0..=1.0).contains(&self.noise_probability) {
            let clamped = if self.noise_probability.is_nan() {
                default_noise_probability()
            } else {
                self.noise_probability.clamp(0.0, 1.0)
            };
            warn!(
                requested = self.noise_probability,
                clamped, "noise_probability out of range"
            );
            self.noise_probability = clamped;
        }
        self
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn playback_interval(&self) -> Duration {
        Duration::from_millis(self.playback_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

pub fn clamp_interval(field: &'static str, ms: u64) -> u64 {
    let clamped = ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS);
    if clamped != ms {
        warn!(field, requested = ms, clamped, "interval outside recommended bounds");
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::AppPaths;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("hopgrid-test-{}-{}", tag, std::process::id()))
    }

    #[test]
    fn defaults_match_client_behavior() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.server_url, "http://localhost:8080");
        assert_eq!(cfg.capture_interval_ms, 1000);
        assert_eq!(cfg.playback_interval_ms, 500);
        assert!((cfg.noise_probability - 0.2).abs() < f64::EPSILON);
        assert!(!cfg.auto_train);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{"server_url":"http://memo:9000"}"#).unwrap();
        assert_eq!(cfg.server_url, "http://memo:9000");
        assert_eq!(cfg.request_timeout_ms, 5000);
    }

    #[test]
    fn normalization_clamps_intervals_and_noise() {
        let cfg = SessionConfig {
            capture_interval_ms: 5,
            playback_interval_ms: 90_000,
            noise_probability: 1.5,
            ..SessionConfig::default()
        }
        .normalized();
        assert_eq!(cfg.capture_interval_ms, MIN_INTERVAL_MS);
        assert_eq!(cfg.playback_interval_ms, MAX_INTERVAL_MS);
        assert_eq!(cfg.noise_probability, 1.0);
    }

    #[test]
    fn missing_or_broken_file_yields_defaults() {
        let dir = temp_dir("broken");
        let file = AppPaths::at(&dir).config_file();
        assert_eq!(SessionConfig::load_or_default(&file), SessionConfig::default());

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&file, "{ not json").unwrap();
        assert_eq!(SessionConfig::load_or_default(&file), SessionConfig::default());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn save_then_load() {
        let dir = temp_dir("save");
        let paths = AppPaths::at(&dir);
        let cfg = SessionConfig {
            playback_interval_ms: 750,
            seed: Some(9),
            ..SessionConfig::default()
        };
        cfg.save(&paths.config_file()).unwrap();
        assert_eq!(SessionConfig::load_or_default(&paths.config_file()), cfg);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
