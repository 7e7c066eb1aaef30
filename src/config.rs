//! Classifier configuration.
//!
//! Thresholds and pruning knobs live in the weight store's `config` table as
//! key -> float rows; [`ClassifierConfig`] merges those overrides with the
//! compiled-in defaults. Process-level settings (data directory, worker
//! count) come from a TOML file via [`Settings`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagwiseError};
use crate::model::ModelKind;
use crate::store::WeightStore;

/// Compiled-in defaults for every non-per-label config key.
pub const DEFAULTS: &[(&str, f64)] = &[
    ("min_training_samples", 50.0),
    ("min_tag_frequency", 10.0),
    ("min_pair_cooccurrence", 5.0),
    ("max_pair_count", 2000.0),
    ("pair_weight_multiplier", 0.5),
    ("pruning_threshold", 0.05),
    ("min_confidence", 0.5),
    ("max_tags_for_pairs", 100.0),
    ("staleness_threshold", 20.0),
];

pub fn default_for(key: &str) -> Option<f64> {
    DEFAULTS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| *value)
}

/// Per-label threshold keys (`threshold_<label>`) are open-ended; everything
/// else must match a known default.
pub fn is_known_key(key: &str) -> bool {
    default_for(key).is_some() || key.strip_prefix("threshold_").is_some_and(|s| !s.is_empty())
}

/// Effective classifier configuration: store overrides merged over defaults.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    model: ModelKind,
    values: HashMap<String, f64>,
}

impl ClassifierConfig {
    pub fn load(store: &WeightStore) -> Result<Self> {
        Ok(Self {
            model: store.model(),
            values: store.config_all()?,
        })
    }

    /// Defaults only, no store overrides. Used by tests and benches.
    pub fn defaults(model: ModelKind) -> Self {
        Self {
            model,
            values: HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> f64 {
        self.values
            .get(key)
            .copied()
            .or_else(|| default_for(key))
            .unwrap_or(0.0)
    }

    pub fn min_training_samples(&self) -> u64 {
        self.get("min_training_samples").max(0.0) as u64
    }

    pub fn min_tag_frequency(&self) -> u64 {
        self.get("min_tag_frequency").max(0.0) as u64
    }

    pub fn min_pair_cooccurrence(&self) -> u64 {
        self.get("min_pair_cooccurrence").max(0.0) as u64
    }

    pub fn max_pair_count(&self) -> usize {
        self.get("max_pair_count").max(0.0) as usize
    }

    pub fn pair_weight_multiplier(&self) -> f64 {
        self.get("pair_weight_multiplier")
    }

    pub fn pruning_threshold(&self) -> f64 {
        self.get("pruning_threshold")
    }

    pub fn min_confidence(&self) -> f64 {
        self.get("min_confidence")
    }

    pub fn max_tags_for_pairs(&self) -> usize {
        self.get("max_tags_for_pairs").max(0.0) as usize
    }

    pub fn staleness_threshold(&self) -> u64 {
        self.get("staleness_threshold").max(0.0) as u64
    }

    /// Acceptance threshold for a label: `threshold_<label>` override when
    /// present, otherwise the model's per-label default.
    pub fn label_threshold(&self, label: &str) -> f64 {
        self.values
            .get(&format!("threshold_{label}"))
            .copied()
            .unwrap_or_else(|| self.model.default_label_threshold(label))
    }

    /// Full effective view (defaults + overrides), for stats reporting.
    pub fn effective(&self) -> HashMap<String, f64> {
        let mut out: HashMap<String, f64> =
            DEFAULTS.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        for (key, value) in &self.values {
            out.insert(key.clone(), *value);
        }
        out
    }
}

/// Process-level settings loaded from a TOML file, with env overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the per-model weight stores and the item database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Worker threads for batch inference. 0 means "number of CPUs".
    #[serde(default)]
    pub workers: usize,
    /// Items fetched from the item store per inference batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tagwise")
}

fn default_batch_size() -> usize {
    200
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            workers: 0,
            batch_size: default_batch_size(),
        }
    }
}

impl Settings {
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit_path {
            Some(path) => Self::read_file(path)?,
            None => {
                let default_path = dirs::config_dir()
                    .map(|dir| dir.join("tagwise/config.toml"))
                    .filter(|path| path.exists());
                match default_path {
                    Some(path) => Self::read_file(&path)?,
                    None => Self::default(),
                }
            }
        };

        if let Ok(dir) = std::env::var("TAGWISE_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }

        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| TagwiseError::Config(format!("read config {}: {err}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|err| TagwiseError::Config(format!("parse config {}: {err}", path.display())))
    }

    pub fn weight_store_path(&self, model: ModelKind) -> PathBuf {
        self.data_dir.join(model.store_file_name())
    }

    pub fn items_path(&self) -> PathBuf {
        self.data_dir.join("items.db")
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_documented_key() {
        for key in [
            "min_training_samples",
            "min_tag_frequency",
            "min_pair_cooccurrence",
            "max_pair_count",
            "pair_weight_multiplier",
            "pruning_threshold",
            "min_confidence",
            "max_tags_for_pairs",
            "staleness_threshold",
        ] {
            assert!(default_for(key).is_some(), "missing default for {key}");
        }
    }

    #[test]
    fn threshold_keys_are_known() {
        assert!(is_known_key("threshold_explicit"));
        assert!(is_known_key("threshold_some_character"));
        assert!(!is_known_key("threshold_"));
        assert!(!is_known_key("warp_factor"));
    }

    #[test]
    fn label_threshold_prefers_override() {
        let mut cfg = ClassifierConfig::defaults(ModelKind::Rating);
        assert_eq!(cfg.label_threshold("explicit"), 0.70);
        cfg.values.insert("threshold_explicit".to_string(), 0.95);
        assert_eq!(cfg.label_threshold("explicit"), 0.95);
    }

    #[test]
    fn settings_parse_from_toml() {
        let settings: Settings =
            toml::from_str("data_dir = \"/tmp/tw\"\nworkers = 4\n").unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/tw"));
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.batch_size, 200);
    }
}
