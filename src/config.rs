use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, VaxError};
use crate::reconcile::ReconcileConfig;
use crate::sources::file::PayloadKind;
use crate::taxonomy;

/// Immutable run configuration, loaded once and passed explicitly into each
/// component call. Taxonomy mappings, alias tables and override lists are
/// all data here, never code.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Directory the per-location CSVs are published into.
    pub output_dir: String,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

/// Everything the generic pipeline needs to run one location; one entry per
/// location replaces one hand-written pipeline per location.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub location: String,
    pub source_id: String,
    /// Published as `source_url` on merged observations when the payload
    /// does not carry its own.
    pub source_url: String,
    /// Path to the collaborator's payload file.
    pub payload: String,
    #[serde(default = "default_payload_kind")]
    pub kind: PayloadKind,
    /// Raw source tokens -> canonical vaccine names.
    #[serde(default)]
    pub vaccine_mapping: HashMap<String, String>,
    /// Fixed raw token list for sources whose payload carries no vaccine
    /// field.
    #[serde(default)]
    pub vaccines: Vec<String>,
    /// Sources known to emit sporadic reporting corrections may downgrade
    /// regressions to a logged skip.
    #[serde(default)]
    pub allow_regressions: bool,
    /// Our field name -> the payload's column header (CSV payloads).
    #[serde(default)]
    pub columns: HashMap<String, String>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Attribution written to the manufacturer metadata sidecar.
    #[serde(default)]
    pub vaccine_source_name: Option<String>,
}

/// Configuration of one aggregate feed reporting many locations per pull.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub source_id: String,
    pub source_url: String,
    pub payload: String,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    pub locations: Vec<String>,
    #[serde(default)]
    pub vaccine_mapping: HashMap<String, String>,
    #[serde(default)]
    pub manual_overrides: HashMap<String, Vec<String>>,
    /// Locations on the feed known to emit sporadic reporting corrections;
    /// regressions for them are logged and skipped instead of failing.
    #[serde(default)]
    pub allow_regressions: Vec<String>,
    #[serde(default)]
    pub columns: HashMap<String, String>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_payload_kind() -> PayloadKind {
    PayloadKind::Observation
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_max_rows() -> usize {
    300
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            VaxError::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    // A location may legitimately appear twice (main series plus a
    // manufacturer table), but every entry needs its own source_id.
    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for location in &self.locations {
            if !seen.insert(&location.source_id) {
                return Err(VaxError::Config(format!(
                    "source_id '{}' configured twice",
                    location.source_id
                )));
            }
        }
        Ok(())
    }
}

impl FeedConfig {
    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            source_url: self.source_url.clone(),
            max_rows: self.max_rows,
            aliases: self.aliases.clone(),
            locations: self.locations.iter().cloned().collect(),
            vaccine_mapping: self.vaccine_mapping.clone(),
            manual_overrides: self.manual_overrides.clone(),
            one_dose: taxonomy::one_dose_set(),
        }
    }
}
