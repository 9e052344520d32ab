use std::collections::BTreeMap;

use crate::model::{DatasetSummary, Issue, IssueKind, Match, Patch, RunSummary, Tier};

/// Compute summary statistics from a finished run.
///
/// `sources_per_dataset` counts every source record handed to the engine,
/// matched or not, so the unmatched figure covers sources that never
/// produced a candidate.
pub fn compute_summary(
    sources_per_dataset: &BTreeMap<String, usize>,
    matches: &[Match],
    patches: &[Patch],
    issues: &[Issue],
) -> RunSummary {
    let mut tier_counts: BTreeMap<String, usize> = [Tier::High, Tier::Medium, Tier::Low]
        .iter()
        .map(|t| (t.to_string(), 0))
        .collect();
    let mut datasets: BTreeMap<String, DatasetSummary> = sources_per_dataset
        .iter()
        .map(|(name, &sources)| {
            (
                name.clone(),
                DatasetSummary {
                    sources,
                    ..DatasetSummary::default()
                },
            )
        })
        .collect();

    for m in matches {
        *tier_counts.entry(m.tier.to_string()).or_insert(0) += 1;
        datasets.entry(m.dataset.clone()).or_default().matched += 1;
    }

    let mut field_fills: BTreeMap<String, usize> = BTreeMap::new();
    for p in patches {
        for field in p.fields.keys() {
            *field_fills.entry(field.clone()).or_insert(0) += 1;
        }
        datasets.entry(p.dataset.clone()).or_default().patches += 1;
    }

    for ds in datasets.values_mut() {
        ds.unmatched = ds.sources.saturating_sub(ds.matched);
    }

    let total_sources: usize = datasets.values().map(|d| d.sources).sum();

    RunSummary {
        total_sources,
        matched: matches.len(),
        unmatched: total_sources.saturating_sub(matches.len()),
        unmatchable: issues
            .iter()
            .filter(|i| i.kind == IssueKind::UnmatchableSource)
            .count(),
        infeasible: issues
            .iter()
            .filter(|i| i.kind == IssueKind::AssignmentInfeasible)
            .count(),
        tier_counts,
        patches: patches.len(),
        field_fills,
        datasets,
    }
}
