use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{DetectError, DetectResult};

pub const DEFAULT_THRESHOLD: f32 = 0.4;
pub const DEFAULT_ALERT_THRESHOLD: f32 = 0.7;
pub const DEFAULT_INTERVAL_MS: u64 = 2000;
pub const MIN_INTERVAL_MS: u64 = 500;
pub const MAX_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2000;
pub const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MODELS: &[&str] = &["stub:detr-resnet-50", "stub:detr-resnet-50-quantized"];

const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;

// ----------------------------------------------------------------------------
// ObjectDetectionConfig: live run parameters
// ----------------------------------------------------------------------------

/// Run parameters for one pipeline. Changes take effect on the next cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectDetectionConfig {
    pub enabled: bool,
    /// Minimum score to keep a raw detection.
    pub threshold: f32,
    /// Active model identifier, tried first on every load pass.
    pub model: String,
    /// Fallback list tried after `model`, in order.
    pub models: Vec<String>,
    #[serde(alias = "interval")]
    pub interval_ms: u64,
    /// Number of full passes over the fallback list before giving up.
    pub max_retries: u32,
    pub enable_alerts: bool,
    /// Minimum score for a person detection to be HIGH.
    pub alert_threshold: f32,
    pub retry_base_delay_ms: u64,
    pub inference_timeout_ms: u64,
    pub load_timeout_ms: u64,
}

impl Default for ObjectDetectionConfig {
    fn default() -> Self {
        let models: Vec<String> = DEFAULT_MODELS.iter().map(|m| m.to_string()).collect();
        Self {
            enabled: false,
            threshold: DEFAULT_THRESHOLD,
            model: models[0].clone(),
            models,
            interval_ms: DEFAULT_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            enable_alerts: true,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            inference_timeout_ms: DEFAULT_INFERENCE_TIMEOUT_MS,
            load_timeout_ms: DEFAULT_LOAD_TIMEOUT_MS,
        }
    }
}

impl ObjectDetectionConfig {
    /// Config with the given fallback list; `model` becomes its first entry.
    pub fn with_models<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let models: Vec<String> = models.into_iter().map(Into::into).collect();
        Self {
            model: models.first().cloned().unwrap_or_default(),
            models,
            ..Self::default()
        }
    }

    /// Load order for one pass: `model` first, then the fallback list without duplicates.
    pub fn candidates(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.models.len() + 1);
        for id in std::iter::once(&self.model).chain(self.models.iter()) {
            if !id.trim().is_empty() && !out.contains(id) {
                out.push(id.clone());
            }
        }
        out
    }

    /// Position of `model` in the fallback list.
    pub fn fallback_index(&self, model: &str) -> Option<usize> {
        self.models.iter().position(|m| m == model)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// Delay before retry pass `attempt + 1`, i.e. `base * attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(attempt as u64))
    }

    pub fn validate(&self) -> DetectResult<()> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(DetectError::config(format!(
                "threshold must be in (0, 1), got {}",
                self.threshold
            )));
        }
        if !(self.alert_threshold > 0.0 && self.alert_threshold < 1.0) {
            return Err(DetectError::config(format!(
                "alert_threshold must be in (0, 1), got {}",
                self.alert_threshold
            )));
        }
        if self.alert_threshold < self.threshold {
            return Err(DetectError::config(format!(
                "alert_threshold ({}) must not be below threshold ({})",
                self.alert_threshold, self.threshold
            )));
        }
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&self.interval_ms) {
            return Err(DetectError::config(format!(
                "interval must be within {}..={} ms, got {}",
                MIN_INTERVAL_MS, MAX_INTERVAL_MS, self.interval_ms
            )));
        }
        if self.candidates().is_empty() {
            return Err(DetectError::config("at least one model identifier is required"));
        }
        if self.max_retries == 0 {
            return Err(DetectError::config("max_retries must be at least 1"));
        }
        if self.inference_timeout_ms == 0 || self.load_timeout_ms == 0 {
            return Err(DetectError::config("timeouts must be greater than zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// ConfigUpdate: partial runtime changes
// ----------------------------------------------------------------------------

/// Partial change to a live config. Unset fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub enabled: Option<bool>,
    pub threshold: Option<f32>,
    pub model: Option<String>,
    pub models: Option<Vec<String>>,
    #[serde(alias = "interval")]
    pub interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub enable_alerts: Option<bool>,
    pub alert_threshold: Option<f32>,
}

impl ConfigUpdate {
    /// Apply to `current` and validate the result as a whole. On error nothing changes.
    pub fn apply_to(&self, current: &ObjectDetectionConfig) -> DetectResult<ObjectDetectionConfig> {
        let mut next = current.clone();
        if let Some(v) = self.enabled {
            next.enabled = v;
        }
        if let Some(v) = self.threshold {
            next.threshold = v;
        }
        if let Some(v) = &self.model {
            next.model = v.clone();
        }
        if let Some(v) = &self.models {
            next.models = v.clone();
        }
        if let Some(v) = self.interval_ms {
            next.interval_ms = v;
        }
        if let Some(v) = self.max_retries {
            next.max_retries = v;
        }
        if let Some(v) = self.enable_alerts {
            next.enable_alerts = v;
        }
        if let Some(v) = self.alert_threshold {
            next.alert_threshold = v;
        }
        next.validate()?;
        Ok(next)
    }
}

// ----------------------------------------------------------------------------
// DaemonConfig: file + environment
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct DaemonConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<ObjectDetectionConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub source: SourceSettings,
    pub detection: ObjectDetectionConfig,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl DaemonConfig {
    /// Load from `HAZARD_WATCH_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HAZARD_WATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (JSON, or TOML by extension), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        Self {
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            },
            detection: file.detection.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("HAZARD_WATCH_SOURCE") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(threshold) = std::env::var("HAZARD_WATCH_THRESHOLD") {
            self.detection.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("HAZARD_WATCH_THRESHOLD must be a number in (0, 1)"))?;
        }
        if let Ok(interval) = std::env::var("HAZARD_WATCH_INTERVAL_MS") {
            self.detection.interval_ms = interval.trim().parse().map_err(|_| {
                anyhow!("HAZARD_WATCH_INTERVAL_MS must be an integer number of milliseconds")
            })?;
        }
        if let Ok(models) = std::env::var("HAZARD_WATCH_MODELS") {
            let parsed = split_csv(&models);
            if !parsed.is_empty() {
                self.detection.model = parsed[0].clone();
                self.detection.models = parsed;
            }
        }
        if let Ok(alerts) = std::env::var("HAZARD_WATCH_ALERTS") {
            self.detection.enable_alerts = parse_bool(&alerts)
                .ok_or_else(|| anyhow!("HAZARD_WATCH_ALERTS must be true/false"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be greater than zero"));
        }
        self.detection.validate()?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DaemonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ObjectDetectionConfig::default();
        cfg.validate().unwrap();
        assert!(!cfg.enabled);
        assert_eq!(cfg.threshold, 0.4);
        assert_eq!(cfg.alert_threshold, 0.7);
        assert_eq!(cfg.interval_ms, 2000);
        assert_eq!(cfg.model, cfg.models[0]);
    }

    #[test]
    fn candidates_put_active_model_first_without_duplicates() {
        let mut cfg = ObjectDetectionConfig::with_models(["a", "b", "c"]);
        assert_eq!(cfg.candidates(), vec!["a", "b", "c"]);
        cfg.model = "b".to_string();
        assert_eq!(cfg.candidates(), vec!["b", "a", "c"]);
        cfg.model = "custom".to_string();
        assert_eq!(cfg.candidates(), vec!["custom", "a", "b", "c"]);
    }

    #[test]
    fn fallback_index_ignores_candidate_rotation() {
        let mut cfg = ObjectDetectionConfig::with_models(["a", "b"]);
        cfg.model = "b".to_string();
        assert_eq!(cfg.candidates(), vec!["b", "a"]);
        assert_eq!(cfg.fallback_index("b"), Some(1));
        assert_eq!(cfg.fallback_index("custom"), None);
    }

    #[test]
    fn backoff_is_linear_in_attempt() {
        let cfg = ObjectDetectionConfig::default();
        assert_eq!(cfg.backoff(1), Duration::from_millis(2000));
        assert_eq!(cfg.backoff(3), Duration::from_millis(6000));
    }

    #[test]
    fn alert_threshold_below_threshold_is_rejected() {
        let update = ConfigUpdate {
            threshold: Some(0.8),
            ..ConfigUpdate::default()
        };
        let current = ObjectDetectionConfig::default();
        let err = update.apply_to(&current).unwrap_err();
        assert!(matches!(err, DetectError::ConfigInvariantViolation(_)));
    }

    #[test]
    fn update_is_validated_as_a_whole() {
        let update = ConfigUpdate {
            threshold: Some(0.8),
            alert_threshold: Some(0.9),
            ..ConfigUpdate::default()
        };
        let next = update.apply_to(&ObjectDetectionConfig::default()).unwrap();
        assert_eq!(next.threshold, 0.8);
        assert_eq!(next.alert_threshold, 0.9);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let current = ObjectDetectionConfig::default();
        for update in [
            ConfigUpdate {
                interval_ms: Some(100),
                ..ConfigUpdate::default()
            },
            ConfigUpdate {
                interval_ms: Some(6000),
                ..ConfigUpdate::default()
            },
            ConfigUpdate {
                threshold: Some(0.0),
                ..ConfigUpdate::default()
            },
            ConfigUpdate {
                alert_threshold: Some(1.0),
                ..ConfigUpdate::default()
            },
            ConfigUpdate {
                max_retries: Some(0),
                ..ConfigUpdate::default()
            },
            ConfigUpdate {
                model: Some(String::new()),
                models: Some(vec![]),
                ..ConfigUpdate::default()
            },
        ] {
            assert!(update.apply_to(&current).is_err(), "{:?} accepted", update);
        }
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ObjectDetectionConfig =
            serde_json::from_str(r#"{"threshold": 0.5, "interval": 1000}"#).unwrap();
        assert_eq!(cfg.threshold, 0.5);
        assert_eq!(cfg.interval_ms, 1000);
        assert_eq!(cfg.alert_threshold, DEFAULT_ALERT_THRESHOLD);
    }

    #[test]
    fn csv_and_bool_parsing() {
        assert_eq!(split_csv(" a, ,b ,"), vec!["a", "b"]);
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
