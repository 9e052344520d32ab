use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sparse attribute map. `Null`, an absent key, or a blank string all mean
/// "missing".
pub type Attributes = BTreeMap<String, Value>;

/// True when an attribute value counts as missing.
pub fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite and inside the lat/lon domain.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// An existing canonical facility, possibly missing attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl TargetRecord {
    /// The attribute value, if present and not missing.
    pub fn attribute(&self, field: &str) -> Option<&Value> {
        let value = self.attributes.get(field);
        if is_missing(value) {
            None
        } else {
            value
        }
    }

    pub fn is_missing(&self, field: &str) -> bool {
        is_missing(self.attributes.get(field))
    }

    pub fn located(&self) -> Option<Coordinates> {
        self.coordinates.filter(Coordinates::is_valid)
    }
}

/// A candidate record from an external dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
    /// Cross-reference key derived by the dataset adapter.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl SourceRecord {
    pub fn located(&self) -> Option<Coordinates> {
        self.coordinates.filter(Coordinates::is_valid)
    }

    /// Offered attributes, skipping missing values.
    pub fn offered(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attributes.iter().filter(|(_, v)| !is_missing(Some(v)))
    }
}

/// One dataset's worth of source records, handed to the engine together.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub dataset: String,
    pub records: Vec<SourceRecord>,
}

// ---------------------------------------------------------------------------
// Matches
// ---------------------------------------------------------------------------

/// Confidence tier. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// How a pair was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ExactKey,
    SingleCandidate,
    Hungarian,
    Greedy,
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExactKey => write!(f, "exact-key"),
            Self::SingleCandidate => write!(f, "single-candidate"),
            Self::Hungarian => write!(f, "hungarian"),
            Self::Greedy => write!(f, "greedy"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub dataset: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_score: Option<f64>,
    pub tier: Tier,
    pub method: MatchMethod,
    pub rationale: String,
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// Fields to set on one target. Only fields missing at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub target_id: String,
    pub source_id: String,
    pub dataset: String,
    pub fields: Attributes,
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// No usable key and no usable coordinates.
    UnmatchableSource,
    /// Viable candidates existed, but the contended group left this source out.
    AssignmentInfeasible,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnmatchableSource => write!(f, "unmatchable_source"),
            Self::AssignmentInfeasible => write!(f, "assignment_infeasible"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub dataset: String,
    pub source_id: String,
    pub kind: IssueKind,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetSummary {
    pub sources: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub patches: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_sources: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub unmatchable: usize,
    pub infeasible: usize,
    pub tier_counts: BTreeMap<String, usize>,
    pub patches: usize,
    pub field_fills: BTreeMap<String, usize>,
    pub datasets: BTreeMap<String, DatasetSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkageMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub targets: usize,
    pub indexed_targets: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkageResult {
    pub meta: LinkageMeta,
    pub summary: RunSummary,
    pub matches: Vec<Match>,
    pub patches: Vec<Patch>,
    pub issues: Vec<Issue>,
}
