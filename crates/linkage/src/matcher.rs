use std::collections::HashMap;

use crate::config::DatasetParams;
use crate::model::{SourceRecord, TargetRecord};
use crate::normalize::{name_score, normalize_key, NameNormalizer, NormalizedName};
use crate::spatial::{haversine_km, SpatialIndex};

/// Weight of `distance / radius` in the scalar cost. Small enough that it
/// only orders pairs whose capacity ratios are (nearly) equal.
const DISTANCE_WEIGHT: f64 = 1e-3;
/// Weight of `1 - name_score`; orders pairs tied on ratio and distance.
const NAME_WEIGHT: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Run-scoped lookup state
// ---------------------------------------------------------------------------

/// Normalized cross-reference key → target indices, for one key attribute.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    by_key: HashMap<String, Vec<usize>>,
}

impl KeyIndex {
    pub fn build(targets: &[TargetRecord], key_field: &str) -> Self {
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, target) in targets.iter().enumerate() {
            let raw = match target.attribute(key_field) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            if let Some(key) = normalize_key(&raw) {
                by_key.entry(key).or_default().push(i);
            }
        }
        Self { by_key }
    }

    /// The single target carrying `key`. A key shared by several targets is
    /// not an exact match.
    pub fn unique(&self, key: &str) -> Option<usize> {
        match self.by_key.get(key).map(Vec::as_slice) {
            Some([only]) => Some(*only),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Immutable view over the target snapshot shared by every batch of a run.
pub struct MatchContext<'a> {
    pub targets: &'a [TargetRecord],
    pub index: &'a SpatialIndex,
    pub normalizer: &'a NameNormalizer,
    /// Normalized target names, parallel to `targets`.
    pub target_names: &'a [Option<NormalizedName>],
}

// ---------------------------------------------------------------------------
// Phase A: exact key
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ExactPhase {
    /// (source index, target index)
    pub matched: Vec<(usize, usize)>,
    /// Source indices left for the geographic phase.
    pub remaining: Vec<usize>,
}

/// Pair sources with the unique target sharing their cross-reference key,
/// at any distance. `excluded` marks targets no longer available. A target
/// is taken by the first source (input order) that reaches it.
pub fn match_exact_key(
    sources: &[SourceRecord],
    keys: Option<&KeyIndex>,
    excluded: impl Fn(usize) -> bool,
) -> ExactPhase {
    let mut out = ExactPhase::default();
    let mut taken: Vec<usize> = Vec::new();

    for (si, source) in sources.iter().enumerate() {
        let hit = keys
            .zip(source.key.as_deref().and_then(normalize_key))
            .and_then(|(keys, key)| keys.unique(&key))
            .filter(|ti| !excluded(*ti) && !taken.contains(ti));

        match hit {
            Some(ti) => {
                taken.push(ti);
                out.matched.push((si, ti));
            }
            None => out.remaining.push(si),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Phase B: geographic candidates
// ---------------------------------------------------------------------------

/// A (source, target) pair that passed the radius and capacity filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub source: usize,
    pub target: usize,
    pub distance_km: f64,
    pub capacity_ratio: Option<f64>,
    pub name_score: Option<f64>,
    pub cost: f64,
}

/// `max / min` of two capacities; `None` if either is absent, non-finite
/// or not positive.
pub fn capacity_ratio(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    let (a, b) = (a?, b?);
    if !(a.is_finite() && b.is_finite() && a > 0.0 && b > 0.0) {
        return None;
    }
    Some(a.max(b) / a.min(b))
}

/// Scalar assignment cost: `ln(ratio)` (or `ln(ceiling)` when capacity is
/// unknown), then distance, then name agreement as tie-breakers.
pub fn candidate_cost(
    ratio: Option<f64>,
    ceiling: f64,
    distance_km: f64,
    radius_km: f64,
    name_score: Option<f64>,
) -> f64 {
    let primary = ratio.unwrap_or(ceiling).ln();
    primary
        + DISTANCE_WEIGHT * (distance_km / radius_km)
        + NAME_WEIGHT * (1.0 - name_score.unwrap_or(0.0))
}

/// Every target within the dataset radius of `source` whose capacity ratio
/// stays under the ceiling. Returns an empty list when the source has no
/// coordinates.
pub fn fuzzy_candidates(
    source_idx: usize,
    source: &SourceRecord,
    ctx: &MatchContext<'_>,
    params: &DatasetParams,
    excluded: impl Fn(usize) -> bool,
) -> Vec<Candidate> {
    let Some(origin) = source.located() else {
        return Vec::new();
    };
    let source_name = ctx.normalizer.normalize_opt(source.name.as_deref());
    let ring = params.ring.max(ctx.index.ring_for_radius(origin.lat, params.radius_km));

    let mut out = Vec::new();
    let mut filtered = 0usize;
    for ti in ctx.index.query(origin, ring) {
        if excluded(ti) {
            continue;
        }
        let target = &ctx.targets[ti];
        let Some(point) = target.located() else {
            continue;
        };

        let distance_km = haversine_km(origin, point);
        if distance_km > params.radius_km {
            filtered += 1;
            continue;
        }

        let ratio = capacity_ratio(source.capacity, target.capacity);
        if ratio.is_some_and(|r| r > params.bands.ceiling) {
            filtered += 1;
            continue;
        }

        let score = match (&source_name, &ctx.target_names[ti]) {
            (Some(a), Some(b)) => Some(name_score(a, b)),
            _ => None,
        };

        out.push(Candidate {
            source: source_idx,
            target: ti,
            distance_km,
            capacity_ratio: ratio,
            name_score: score,
            cost: candidate_cost(ratio, params.bands.ceiling, distance_km, params.radius_km, score),
        });
    }

    if filtered > 0 {
        tracing::trace!(source = %source.id, filtered, kept = out.len(), "candidates filtered");
    }
    out
}
