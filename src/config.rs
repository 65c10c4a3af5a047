//! Per-model static configuration.
//!
//! Some devices misreport capabilities or omit them from queries entirely, so
//! every capability the negotiator needs has a configured fallback here. The
//! engine is fully usable with no file present; a TOML file can override any
//! field per model:
//!
//! ```toml
//! model = "X-T4"
//! force_bulb = true
//! max_bulb_secs = 3600.0
//!
//! [shutter_overrides]
//! # code = actual seconds
//! "64000000" = 58.0
//! ```

use crate::error::CamResult;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

fn default_model() -> String {
    "generic".to_string()
}
fn default_max_bulb_secs() -> f64 {
    3600.0
}
fn default_iso_min() -> i32 {
    160
}
fn default_iso_max() -> i32 {
    12800
}
fn default_exposure_min_secs() -> f64 {
    1.0 / 180_000.0
}
fn default_exposure_max_secs() -> f64 {
    crate::shutter::MAX_PROGRAMMABLE_SECS
}
fn default_dynamic_range_code() -> i32 {
    100
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_retry_backoff_ms() -> u64 {
    200
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_poll_attempts() -> u32 {
    30
}
fn default_settle_ms() -> u64 {
    500
}

/// Static per-model configuration with defaults for every field.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Model name this configuration applies to.
    #[serde(default = "default_model")]
    pub model: String,

    /// Assert bulb capability even when the device reports otherwise.
    /// Some models misreport this flag; the configuration wins.
    #[serde(default)]
    pub force_bulb: bool,

    /// Maximum bulb duration in seconds; also the duration the bulb sentinel
    /// is mapped to in the shutter map.
    #[serde(default = "default_max_bulb_secs")]
    pub max_bulb_secs: f64,

    /// Fallback minimum ISO when the device query fails.
    #[serde(default = "default_iso_min")]
    pub iso_min: i32,
    /// Fallback maximum ISO when the device query fails.
    #[serde(default = "default_iso_max")]
    pub iso_max: i32,

    /// Fallback minimum exposure seconds when the device query fails.
    #[serde(default = "default_exposure_min_secs")]
    pub exposure_min_secs: f64,
    /// Fallback maximum exposure seconds when the device query fails.
    #[serde(default = "default_exposure_max_secs")]
    pub exposure_max_secs: f64,

    /// Dynamic-range code set before querying sensitivities. Supported ISO
    /// values are dynamic-range-dependent, so queries always run against
    /// this fixed reference value.
    #[serde(default = "default_dynamic_range_code")]
    pub dynamic_range_code: i32,

    /// Per-model shutter-code overrides (code as string key, actual seconds).
    /// These win over the reference table on key collision.
    #[serde(default)]
    pub shutter_overrides: HashMap<String, f64>,

    /// Bounded attempts for busy retries.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Fixed delay between busy retries, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Image-readiness poll interval, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bounded readiness poll attempts before a timeout is reported.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Mechanical settle delay used in the bulb release sequence, in
    /// milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            force_bulb: false,
            max_bulb_secs: default_max_bulb_secs(),
            iso_min: default_iso_min(),
            iso_max: default_iso_max(),
            exposure_min_secs: default_exposure_min_secs(),
            exposure_max_secs: default_exposure_max_secs(),
            dynamic_range_code: default_dynamic_range_code(),
            shutter_overrides: HashMap::new(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_attempts: default_poll_attempts(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl ModelConfig {
    /// Load configuration from a TOML file, or defaults when `path` is None.
    pub fn load(path: Option<&Path>) -> CamResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Shutter overrides with parsed integer keys. Unparseable keys are
    /// logged and skipped rather than failing the whole configuration.
    pub fn shutter_override_map(&self) -> BTreeMap<i32, f64> {
        let mut map = BTreeMap::new();
        for (key, secs) in &self.shutter_overrides {
            match key.parse::<i32>() {
                Ok(code) => {
                    map.insert(code, *secs);
                }
                Err(_) => {
                    log::warn!("Ignoring unparseable shutter override key '{}'", key);
                }
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_usable() {
        let cfg = ModelConfig::default();
        assert!(!cfg.force_bulb);
        assert_eq!(cfg.max_bulb_secs, 3600.0);
        assert_eq!(cfg.poll_attempts, 30);
        assert!(cfg.shutter_override_map().is_empty());
    }

    #[test]
    fn test_load_without_file_matches_defaults() {
        let cfg = ModelConfig::load(None).unwrap();
        assert_eq!(cfg.model, "generic");
        assert_eq!(cfg.retry_attempts, 5);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
model = "X-T4"
force_bulb = true
max_bulb_secs = 1800.0

[shutter_overrides]
"64000000" = 58.0
"bogus" = 1.0
"#
        )
        .unwrap();
        let cfg = ModelConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.model, "X-T4");
        assert!(cfg.force_bulb);
        assert_eq!(cfg.max_bulb_secs, 1800.0);
        let overrides = cfg.shutter_override_map();
        assert_eq!(overrides.get(&64000000), Some(&58.0));
        assert_eq!(overrides.len(), 1);
    }
}
