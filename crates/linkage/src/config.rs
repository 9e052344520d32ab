use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::error::LinkageError;
use crate::model::Tier;
use crate::normalize::{default_legal_suffixes, AliasTable, NameNormalizer};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LinkageConfig {
    pub name: String,
    #[serde(default)]
    pub targets: TargetsConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Variant → canonical name.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    pub datasets: BTreeMap<String, DatasetConfig>,
    #[serde(default)]
    pub apply: ApplyConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetsConfig {
    /// JSON snapshot of target records.
    #[serde(default)]
    pub file: Option<String>,
    /// Target attribute holding the cross-reference key, unless a dataset
    /// names its own.
    #[serde(default)]
    pub key_field: Option<String>,
}

// ---------------------------------------------------------------------------
// Matching defaults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub cell_size_deg: f64,
    pub ring: u32,
    pub radius_km: f64,
    pub capacity_ceiling: f64,
    pub high_ratio: f64,
    pub medium_ratio: f64,
    pub medium_max_group: usize,
    pub min_name_score: f64,
    pub exact_solver_limit: usize,
    pub legal_suffixes: Vec<String>,
    pub category_field: Option<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            cell_size_deg: 0.05,
            ring: 1,
            radius_km: 2.0,
            capacity_ceiling: 2.0,
            high_ratio: 1.25,
            medium_ratio: 1.5,
            medium_max_group: 3,
            min_name_score: 0.5,
            exact_solver_limit: 8,
            legal_suffixes: default_legal_suffixes(),
            category_field: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    #[default]
    Csv,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub format: DatasetFormat,
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub capacity_ceiling: Option<f64>,
    #[serde(default)]
    pub key_field: Option<String>,
    /// Allow-list of attributes this dataset may fill. All offered
    /// attributes when absent.
    #[serde(default)]
    pub fill_fields: Option<Vec<String>>,
    #[serde(default)]
    pub category_field: Option<String>,
    #[serde(default)]
    pub columns: Option<ColumnMapping>,
}

/// CSV header names for each source field.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMapping {
    pub id: String,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(default)]
    pub capacity: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    /// Offered attribute name → CSV header.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    pub min_tier: Tier,
    pub workers: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub endpoint: Option<String>,
    pub token_env: Option<String>,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            min_tier: Tier::High,
            workers: 4,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            endpoint: None,
            token_env: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Effective per-dataset parameters
// ---------------------------------------------------------------------------

/// Thresholds the confidence classifier works from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceBands {
    pub high_ratio: f64,
    pub medium_ratio: f64,
    pub ceiling: f64,
    pub medium_max_group: usize,
    pub min_name_score: f64,
}

/// Matching parameters for one dataset, with global defaults filled in.
#[derive(Debug, Clone)]
pub struct DatasetParams {
    pub dataset: String,
    pub radius_km: f64,
    pub ring: u32,
    pub bands: ConfidenceBands,
    pub exact_solver_limit: usize,
    pub key_field: Option<String>,
    pub fill_fields: Option<BTreeSet<String>>,
    pub category_field: Option<String>,
    pub min_tier: Tier,
}

impl DatasetParams {
    /// Parameters built from `MatchingConfig::default()`.
    pub fn with_defaults(dataset: &str) -> Self {
        Self::resolve(
            dataset,
            &MatchingConfig::default(),
            &DatasetConfig::default(),
            None,
            Tier::High,
        )
    }

    fn resolve(
        dataset: &str,
        matching: &MatchingConfig,
        ds: &DatasetConfig,
        default_key_field: Option<&String>,
        min_tier: Tier,
    ) -> Self {
        Self {
            dataset: dataset.to_string(),
            radius_km: ds.radius_km.unwrap_or(matching.radius_km),
            ring: matching.ring,
            bands: ConfidenceBands {
                high_ratio: matching.high_ratio,
                medium_ratio: matching.medium_ratio,
                ceiling: ds.capacity_ceiling.unwrap_or(matching.capacity_ceiling),
                medium_max_group: matching.medium_max_group,
                min_name_score: matching.min_name_score,
            },
            exact_solver_limit: matching.exact_solver_limit,
            key_field: ds.key_field.clone().or_else(|| default_key_field.cloned()),
            fill_fields: ds.fill_fields.as_ref().map(|f| f.iter().cloned().collect()),
            category_field: ds.category_field.clone().or_else(|| matching.category_field.clone()),
            min_tier,
        }
    }

    pub fn validate(&self) -> Result<(), LinkageError> {
        let err = |msg: String| {
            Err(LinkageError::ConfigValidation(format!("dataset '{}': {msg}", self.dataset)))
        };
        if !(self.radius_km.is_finite() && self.radius_km > 0.0) {
            return err(format!("radius_km must be positive, got {}", self.radius_km));
        }
        let b = &self.bands;
        if !(b.high_ratio.is_finite() && b.medium_ratio.is_finite() && b.ceiling.is_finite()) {
            return err("capacity ratios must be finite".into());
        }
        if !(1.0 <= b.high_ratio && b.high_ratio < b.medium_ratio && b.medium_ratio <= b.ceiling) {
            return err(format!(
                "capacity bands must satisfy 1 <= high_ratio < medium_ratio <= capacity_ceiling, got {} / {} / {}",
                b.high_ratio, b.medium_ratio, b.ceiling
            ));
        }
        if !(0.0..=1.0).contains(&b.min_name_score) {
            return err(format!("min_name_score must be within 0..=1, got {}", b.min_name_score));
        }
        if self.exact_solver_limit == 0 {
            return err("exact_solver_limit must be at least 1".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl LinkageConfig {
    pub fn from_toml(input: &str) -> Result<Self, LinkageError> {
        let config: LinkageConfig =
            toml::from_str(input).map_err(|e| LinkageError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LinkageError> {
        let m = &self.matching;
        if !(m.cell_size_deg.is_finite() && m.cell_size_deg > 0.0) {
            return Err(LinkageError::ConfigValidation(format!(
                "cell_size_deg must be positive, got {}",
                m.cell_size_deg
            )));
        }

        if self.datasets.is_empty() {
            return Err(LinkageError::ConfigValidation(
                "at least one dataset is required".into(),
            ));
        }

        for (name, ds) in &self.datasets {
            if ds.format == DatasetFormat::Csv && ds.file.is_some() && ds.columns.is_none() {
                return Err(LinkageError::ConfigValidation(format!(
                    "dataset '{name}': csv datasets need a [datasets.{name}.columns] mapping"
                )));
            }
            self.params(name)?.validate()?;
        }

        if self.apply.workers == 0 {
            return Err(LinkageError::ConfigValidation(
                "apply.workers must be at least 1".into(),
            ));
        }
        if self.apply.base_delay_ms > self.apply.max_delay_ms {
            return Err(LinkageError::ConfigValidation(
                "apply.base_delay_ms must not exceed apply.max_delay_ms".into(),
            ));
        }

        Ok(())
    }

    /// Effective parameters for a configured dataset.
    pub fn params(&self, dataset: &str) -> Result<DatasetParams, LinkageError> {
        let ds = self
            .datasets
            .get(dataset)
            .ok_or_else(|| LinkageError::UnknownDataset(dataset.to_string()))?;
        Ok(DatasetParams::resolve(
            dataset,
            &self.matching,
            ds,
            self.targets.key_field.as_ref(),
            self.apply.min_tier,
        ))
    }

    pub fn alias_table(&self) -> AliasTable {
        AliasTable::new(self.aliases.iter().map(|(k, v)| (k.as_str(), v.clone())))
    }

    pub fn name_normalizer(&self) -> NameNormalizer {
        NameNormalizer::new(self.matching.legal_suffixes.clone(), self.alias_table())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
