use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DetectError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list, e.g. `volume,price`. Blank entries are dropped.
fn profiled_env_list<T: FromStr>(profile: &str, key: &str, default: Vec<T>) -> Vec<T> {
    match profiled_env_opt(profile, key) {
        Some(raw) => {
            let parsed: Option<Vec<T>> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse().ok())
                .collect();
            match parsed {
                Some(v) if !v.is_empty() => v,
                _ => default,
            }
        }
        None => default,
    }
}

fn default_features() -> Vec<String> {
    vec!["volume".to_string(), "price".to_string()]
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub statistical: StatisticalConfig,
    pub partition: PartitionConfig,
    pub reconstruction: ReconstructionConfig,
    pub combine: CombineConfig,
    pub pattern: PatternConfig,
    pub alerts: AlertConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `MARKETWATCH_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("MARKETWATCH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            statistical: StatisticalConfig::from_env_profiled(p),
            partition: PartitionConfig::from_env_profiled(p),
            reconstruction: ReconstructionConfig::from_env_profiled(p),
            combine: CombineConfig::from_env_profiled(p),
            pattern: PatternConfig::from_env_profiled(p),
            alerts: AlertConfig::from_env_profiled(p),
        }
    }

    /// Parse a YAML document. Omitted sections and keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DetectError> {
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| DetectError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, DetectError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DetectError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&raw)
    }

    /// Reject values no stage could run with.
    pub fn validate(&self) -> Result<(), DetectError> {
        let invalid = |msg: String| -> Result<(), DetectError> { Err(DetectError::Config(msg)) };

        if !self.statistical.z_threshold.is_finite() || self.statistical.z_threshold < 0.0 {
            return invalid(format!("z_threshold must be >= 0, got {}", self.statistical.z_threshold));
        }
        if !(self.partition.contamination > 0.0 && self.partition.contamination <= 0.5) {
            return invalid(format!(
                "contamination must be in (0, 0.5], got {}",
                self.partition.contamination
            ));
        }
        if self.partition.n_trees == 0 || self.partition.max_samples < 2 {
            return invalid("partition needs n_trees >= 1 and max_samples >= 2".to_string());
        }
        if self.reconstruction.epochs == 0 || self.reconstruction.batch_size == 0 {
            return invalid("reconstruction needs epochs >= 1 and batch_size >= 1".to_string());
        }
        if !(self.reconstruction.percentile > 0.0 && self.reconstruction.percentile < 100.0) {
            return invalid(format!(
                "percentile must be in (0, 100), got {}",
                self.reconstruction.percentile
            ));
        }
        if self.reconstruction.hidden_layers.iter().any(|&h| h == 0) {
            return invalid("hidden layer sizes must be >= 1".to_string());
        }
        let w = &self.combine.weights;
        if [w.statistical, w.partition, w.reconstruction]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
            || w.total() <= 0.0
        {
            return invalid("combine weights must be non-negative with a positive sum".to_string());
        }
        if !self.pattern.spike_multiplier.is_finite() || self.pattern.spike_multiplier <= 0.0 {
            return invalid(format!(
                "spike_multiplier must be > 0, got {}",
                self.pattern.spike_multiplier
            ));
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  statistical:    feature={}, z_threshold={}",
            self.statistical.feature,
            self.statistical.z_threshold
        );
        tracing::info!(
            "  partition:      features={:?}, contamination={}, trees={}, seed={}",
            self.partition.features,
            self.partition.contamination,
            self.partition.n_trees,
            self.partition.seed
        );
        tracing::info!(
            "  reconstruction: features={:?}, epochs={}, hidden={:?}, percentile={}",
            self.reconstruction.features,
            self.reconstruction.epochs,
            self.reconstruction.hidden_layers,
            self.reconstruction.percentile
        );
        tracing::info!(
            "  combine:        weights={}/{}/{}",
            self.combine.weights.statistical,
            self.combine.weights.partition,
            self.combine.weights.reconstruction
        );
        tracing::info!(
            "  pattern:        feature={}, spike_multiplier={}",
            self.pattern.feature,
            self.pattern.spike_multiplier
        );
        tracing::info!(
            "  alerts:         threshold={}, exclude_dismissed={}",
            self.alerts.threshold,
            self.alerts.exclude_dismissed_from_training
        );
    }
}

// ── Statistical scorer ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticalConfig {
    pub feature: String,
    /// |z| above this flags the observation.
    pub z_threshold: f64,
}

impl Default for StatisticalConfig {
    fn default() -> Self {
        Self {
            feature: "volume".to_string(),
            z_threshold: 3.0,
        }
    }
}

impl StatisticalConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            feature: profiled_env_or(p, "STAT_FEATURE", &d.feature),
            z_threshold: profiled_env_parse(p, "Z_THRESHOLD", d.z_threshold),
        }
    }
}

// ── Partition (isolation forest) scorer ───────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub features: Vec<String>,
    /// Expected anomaly fraction, (0, 0.5].
    pub contamination: f64,
    pub n_trees: usize,
    /// Rows subsampled per tree (capped at the dataset size).
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            features: default_features(),
            contamination: 0.1,
            n_trees: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

impl PartitionConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            features: profiled_env_list(p, "PARTITION_FEATURES", d.features),
            contamination: profiled_env_parse(p, "CONTAMINATION", d.contamination),
            n_trees: profiled_env_parse(p, "IFOREST_TREES", d.n_trees),
            max_samples: profiled_env_parse(p, "IFOREST_MAX_SAMPLES", d.max_samples),
            seed: profiled_env_parse(p, "RANDOM_SEED", d.seed),
        }
    }
}

// ── Reconstruction (autoencoder) scorer ───────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub features: Vec<String>,
    pub epochs: usize,
    /// Widths of the hidden layers between input and output.
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// Error percentile used as the flagging threshold.
    pub percentile: f64,
    pub seed: u64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            features: default_features(),
            epochs: 50,
            hidden_layers: vec![64, 32, 64],
            learning_rate: 1e-3,
            batch_size: 32,
            percentile: 95.0,
            seed: 42,
        }
    }
}

impl ReconstructionConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            features: profiled_env_list(p, "RECON_FEATURES", d.features),
            epochs: profiled_env_parse(p, "EPOCHS", d.epochs),
            hidden_layers: profiled_env_list(p, "AE_HIDDEN", d.hidden_layers),
            learning_rate: profiled_env_parse(p, "AE_LEARNING_RATE", d.learning_rate),
            batch_size: profiled_env_parse(p, "AE_BATCH_SIZE", d.batch_size),
            percentile: profiled_env_parse(p, "AE_PERCENTILE", d.percentile),
            seed: profiled_env_parse(p, "RANDOM_SEED", d.seed),
        }
    }
}

// ── Score combination ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub statistical: f64,
    pub partition: f64,
    pub reconstruction: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            statistical: 1.0,
            partition: 1.0,
            reconstruction: 1.0,
        }
    }
}

impl SignalWeights {
    pub fn total(&self) -> f64 {
        self.statistical + self.partition + self.reconstruction
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineConfig {
    pub weights: SignalWeights,
}

impl CombineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = SignalWeights::default();
        let raw = profiled_env_list(p, "COMBINE_WEIGHTS", vec![d.statistical, d.partition, d.reconstruction]);
        let weights = match raw.as_slice() {
            [s, pa, r] => SignalWeights {
                statistical: *s,
                partition: *pa,
                reconstruction: *r,
            },
            _ => d,
        };
        Self { weights }
    }
}

// ── Pattern correlation ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub feature: String,
    /// A value above `multiplier * previous` is a spike.
    pub spike_multiplier: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            feature: "volume".to_string(),
            spike_multiplier: 2.0,
        }
    }
}

impl PatternConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            feature: profiled_env_or(p, "PATTERN_FEATURE", &d.feature),
            spike_multiplier: profiled_env_parse(p, "SPIKE_MULTIPLIER", d.spike_multiplier),
        }
    }
}

// ── Alerts ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub threshold: f64,
    /// Train partition/reconstruction models without dismissed false positives.
    pub exclude_dismissed_from_training: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            exclude_dismissed_from_training: false,
        }
    }
}

impl AlertConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            threshold: profiled_env_parse(p, "ALERT_THRESHOLD", d.threshold),
            exclude_dismissed_from_training: profiled_env_or(p, "EXCLUDE_DISMISSED", "false") == "true",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.statistical.feature, "volume");
        assert_eq!(c.statistical.z_threshold, 3.0);
        assert_eq!(c.partition.contamination, 0.1);
        assert_eq!(c.reconstruction.epochs, 50);
        assert_eq!(c.reconstruction.hidden_layers, vec![64, 32, 64]);
        assert_eq!(c.reconstruction.percentile, 95.0);
        assert_eq!(c.alerts.threshold, 0.5);
        assert_eq!(c.pattern.spike_multiplier, 2.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn profiled_env_prefers_prefixed_key() {
        // Unique key names so parallel tests cannot interfere.
        std::env::set_var("CFGTEST_EPOCHS", "7");
        assert_eq!(profiled_env_parse("CFGTEST", "EPOCHS", 50usize), 7);
        assert_eq!(profiled_env_parse("", "CFGTEST_MISSING_KEY", 50usize), 50);
        std::env::remove_var("CFGTEST_EPOCHS");
    }

    #[test]
    fn env_list_parses_and_falls_back() {
        std::env::set_var("LISTTEST_AE_HIDDEN", "16, 8,16");
        let hidden: Vec<usize> = profiled_env_list("LISTTEST", "AE_HIDDEN", vec![1]);
        assert_eq!(hidden, vec![16, 8, 16]);

        std::env::set_var("LISTTEST_BAD_LIST", "16,x");
        let bad: Vec<usize> = profiled_env_list("LISTTEST", "BAD_LIST", vec![1]);
        assert_eq!(bad, vec![1]);
        std::env::remove_var("LISTTEST_AE_HIDDEN");
        std::env::remove_var("LISTTEST_BAD_LIST");
    }

    #[test]
    fn yaml_overrides_partial_sections() {
        let yaml = r#"
partition:
  contamination: 0.05
  features: [volume]
reconstruction:
  epochs: 10
combine:
  weights:
    statistical: 2.0
"#;
        let c = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(c.partition.contamination, 0.05);
        assert_eq!(c.partition.features, vec!["volume".to_string()]);
        assert_eq!(c.partition.n_trees, 100);
        assert_eq!(c.reconstruction.epochs, 10);
        assert_eq!(c.reconstruction.batch_size, 32);
        assert_eq!(c.combine.weights.statistical, 2.0);
        assert_eq!(c.combine.weights.partition, 1.0);
        assert_eq!(c.statistical.feature, "volume");
    }

    #[test]
    fn yaml_rejects_out_of_range_contamination() {
        let err = Config::from_yaml_str("partition:\n  contamination: 0.9\n").unwrap_err();
        assert!(matches!(err, DetectError::Config(_)));
    }

    #[test]
    fn yaml_rejects_zero_weights() {
        let yaml = "combine:\n  weights:\n    statistical: 0\n    partition: 0\n    reconstruction: 0\n";
        assert!(Config::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn yaml_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alerts:\n  threshold: 0.3\n  exclude_dismissed_from_training: true").unwrap();
        let c = Config::from_yaml_file(file.path()).unwrap();
        assert_eq!(c.alerts.threshold, 0.3);
        assert!(c.alerts.exclude_dismissed_from_training);
    }

    #[test]
    fn missing_yaml_file_is_config_error() {
        let err = Config::from_yaml_file(Path::new("/nonexistent/marketwatch.yml")).unwrap_err();
        assert!(matches!(err, DetectError::Config(_)));
    }
}
