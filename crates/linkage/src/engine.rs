use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::assign::resolve;
use crate::config::{DatasetParams, LinkageConfig};
use crate::confidence::{classify, rationale, Evidence};
use crate::error::LinkageError;
use crate::matcher::{capacity_ratio, fuzzy_candidates, match_exact_key, KeyIndex, MatchContext};
use crate::model::{
    Issue, IssueKind, LinkageMeta, LinkageResult, Match, MatchMethod, Patch, SourceBatch,
    SourceRecord, TargetRecord,
};
use crate::normalize::{name_score, normalize_key, NameNormalizer, NormalizedName};
use crate::patch::{build_patch, ClaimSet};
use crate::spatial::{haversine_km, SpatialIndex};
use crate::summary::compute_summary;

/// Per-batch counts, returned for logging and progress output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub sources: usize,
    pub exact: usize,
    pub fuzzy: usize,
    pub patches: usize,
    pub issues: usize,
}

/// One matching run: the target snapshot, the spatial index built over it,
/// and the claims made so far. Batches are matched one at a time; claims
/// made by an earlier batch bind every later one.
pub struct LinkageRun<'c> {
    config: &'c LinkageConfig,
    targets: Vec<TargetRecord>,
    index: SpatialIndex,
    normalizer: NameNormalizer,
    target_names: Vec<Option<NormalizedName>>,
    key_indexes: HashMap<String, KeyIndex>,
    claims: ClaimSet,
    sources_per_dataset: BTreeMap<String, usize>,
    matches: Vec<Match>,
    patches: Vec<Patch>,
    issues: Vec<Issue>,
}

impl<'c> LinkageRun<'c> {
    pub fn new(config: &'c LinkageConfig, targets: Vec<TargetRecord>) -> Self {
        let index = SpatialIndex::build(&targets, config.matching.cell_size_deg);
        let normalizer = config.name_normalizer();
        let target_names = targets
            .iter()
            .map(|t| normalizer.normalize_opt(t.name.as_deref()))
            .collect();
        tracing::info!(
            targets = targets.len(),
            indexed = index.indexed(),
            cells = index.cell_count(),
            "target snapshot loaded"
        );
        Self {
            config,
            targets,
            index,
            normalizer,
            target_names,
            key_indexes: HashMap::new(),
            claims: ClaimSet::new(),
            sources_per_dataset: BTreeMap::new(),
            matches: Vec::new(),
            patches: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn targets(&self) -> &[TargetRecord] {
        &self.targets
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Match one dataset's records against the snapshot.
    pub fn match_batch(&mut self, batch: &SourceBatch) -> Result<BatchOutcome, LinkageError> {
        let params = self.config.params(&batch.dataset)?;
        let span = tracing::info_span!("batch", dataset = %batch.dataset);
        let _enter = span.enter();

        *self.sources_per_dataset.entry(batch.dataset.clone()).or_insert(0) += batch.records.len();
        let issues_before = self.issues.len();
        let patches_before = self.patches.len();

        let targets = &self.targets;
        let keys: Option<&KeyIndex> = match params.key_field.as_ref() {
            Some(field) => Some(
                &*self
                    .key_indexes
                    .entry(field.clone())
                    .or_insert_with(|| KeyIndex::build(targets, field)),
            ),
            None => None,
        };

        // Sources with nothing to match on are reported, not guessed at.
        let mut unmatchable: BTreeSet<usize> = BTreeSet::new();
        for (si, source) in batch.records.iter().enumerate() {
            let usable_key = keys.is_some() && source.key.as_deref().and_then(normalize_key).is_some();
            if !usable_key && source.located().is_none() {
                unmatchable.insert(si);
                self.issues.push(Issue {
                    dataset: batch.dataset.clone(),
                    source_id: source.id.clone(),
                    kind: IssueKind::UnmatchableSource,
                    detail: "no cross-reference key and no coordinates".into(),
                });
            }
        }

        // Phase A
        let claims = &self.claims;
        let exact = match_exact_key(&batch.records, keys, |ti| claims.is_claimed(&targets[ti].id));
        let mut reserved: BTreeSet<usize> = BTreeSet::new();
        for &(si, ti) in &exact.matched {
            reserved.insert(ti);
            let source = &batch.records[si];
            let target = &self.targets[ti];
            let ev = Evidence {
                exact_key: true,
                capacity_ratio: capacity_ratio(source.capacity, target.capacity),
                name_score: self.score_names(source, ti),
                cardinality: 1,
                single: true,
                category_agrees: None,
            };
            let distance_km = source
                .located()
                .zip(target.located())
                .map(|(a, b)| haversine_km(a, b));
            self.accept(&params, source, ti, ev, distance_km, MatchMethod::ExactKey);
        }

        // Phase B
        let ctx = MatchContext {
            targets: &self.targets,
            index: &self.index,
            normalizer: &self.normalizer,
            target_names: &self.target_names,
        };
        let claims = &self.claims;
        let mut candidates = Vec::new();
        for &si in &exact.remaining {
            if unmatchable.contains(&si) {
                continue;
            }
            candidates.extend(fuzzy_candidates(si, &batch.records[si], &ctx, &params, |ti| {
                reserved.contains(&ti) || claims.is_claimed(&ctx.targets[ti].id)
            }));
        }
        tracing::debug!(candidates = candidates.len(), "geographic candidates collected");

        let resolution = resolve(
            candidates,
            params.exact_solver_limit,
            params.bands.min_name_score,
        );

        let fuzzy = resolution.assignments.len();
        for a in &resolution.assignments {
            let source = &batch.records[a.candidate.source];
            let ti = a.candidate.target;
            let ev = Evidence {
                exact_key: false,
                capacity_ratio: a.candidate.capacity_ratio,
                name_score: a.candidate.name_score,
                cardinality: a.cardinality(),
                single: a.is_single(),
                category_agrees: params
                    .category_field
                    .as_deref()
                    .and_then(|f| category_agreement(source, &self.targets[ti], f)),
            };
            self.accept(&params, source, ti, ev, Some(a.candidate.distance_km), a.method);
        }

        for &si in &resolution.infeasible {
            self.issues.push(Issue {
                dataset: batch.dataset.clone(),
                source_id: batch.records[si].id.clone(),
                kind: IssueKind::AssignmentInfeasible,
                detail: "lost contended neighbourhood or no viable pairing".into(),
            });
        }

        let outcome = BatchOutcome {
            sources: batch.records.len(),
            exact: exact.matched.len(),
            fuzzy,
            patches: self.patches.len() - patches_before,
            issues: self.issues.len() - issues_before,
        };
        tracing::info!(
            sources = outcome.sources,
            exact = outcome.exact,
            fuzzy = outcome.fuzzy,
            patches = outcome.patches,
            issues = outcome.issues,
            "batch matched"
        );
        Ok(outcome)
    }

    fn score_names(&self, source: &SourceRecord, ti: usize) -> Option<f64> {
        let source_name = self.normalizer.normalize_opt(source.name.as_deref())?;
        let target_name = self.target_names[ti].as_ref()?;
        Some(name_score(&source_name, target_name))
    }

    /// Tier the pair and record the match. When the tier clears the apply
    /// threshold the target is claimed and patched.
    fn accept(
        &mut self,
        params: &DatasetParams,
        source: &SourceRecord,
        ti: usize,
        ev: Evidence,
        distance_km: Option<f64>,
        method: MatchMethod,
    ) {
        let tier = classify(&ev, &params.bands);
        let target = &self.targets[ti];
        self.matches.push(Match {
            dataset: params.dataset.clone(),
            source_id: source.id.clone(),
            target_id: target.id.clone(),
            distance_km,
            capacity_ratio: ev.capacity_ratio,
            name_score: ev.name_score,
            tier,
            method,
            rationale: rationale(&ev, tier, distance_km),
        });

        if tier < params.min_tier {
            return;
        }
        if let Some(patch) = build_patch(
            &params.dataset,
            source,
            target,
            params.fill_fields.as_ref(),
            &mut self.claims,
        ) {
            tracing::trace!(target_id = %patch.target_id, fields = patch.fields.len(), "patch built");
            self.patches.push(patch);
        }
    }

    /// Close the run and produce the result. Claims are dropped here.
    pub fn finish(self) -> LinkageResult {
        let summary = compute_summary(
            &self.sources_per_dataset,
            &self.matches,
            &self.patches,
            &self.issues,
        );
        LinkageResult {
            meta: LinkageMeta {
                config_name: self.config.name.clone(),
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
                targets: self.targets.len(),
                indexed_targets: self.index.indexed(),
            },
            summary,
            matches: self.matches,
            patches: self.patches,
            issues: self.issues,
        }
    }
}

/// Normalized equality of a categorical attribute present on both sides.
fn category_agreement(source: &SourceRecord, target: &TargetRecord, field: &str) -> Option<bool> {
    let fold = |v: &serde_json::Value| match v {
        serde_json::Value::String(s) => s.trim().to_lowercase(),
        other => other.to_string(),
    };
    let offered = source.offered().find(|(k, _)| k.as_str() == field).map(|(_, v)| fold(v))?;
    let present = target.attribute(field).map(fold)?;
    Some(offered == present)
}

/// Run every batch against one snapshot. Returns a result even when
/// nothing matches.
pub fn run(
    config: &LinkageConfig,
    targets: Vec<TargetRecord>,
    batches: &[SourceBatch],
) -> Result<LinkageResult, LinkageError> {
    let mut linkage = LinkageRun::new(config, targets);
    for batch in batches {
        linkage.match_batch(batch)?;
    }
    Ok(linkage.finish())
}
