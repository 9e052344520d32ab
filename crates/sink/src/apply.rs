//! Bounded worker pool that drains a patch list through a sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use serde::Serialize;
use solarfill_linkage::model::Patch;

use crate::retry::{with_retry, Attempted, RetryPolicy};
use crate::PatchSink;

#[derive(Debug, Clone, Serialize)]
pub struct PatchFailure {
    pub target_id: String,
    pub source_id: String,
    pub dataset: String,
    pub attempts: u32,
    pub error: String,
}

/// Per-patch outcome of an apply pass. There is no global transaction:
/// applied patches stay applied when others fail.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub sink: String,
    pub applied: usize,
    /// Applied patches that needed more than one attempt.
    pub retried: usize,
    pub failed: Vec<PatchFailure>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Send every patch through `sink` using up to `workers` threads. Failures
/// are reported in input order.
pub fn apply_patches(
    sink: &dyn PatchSink,
    patches: &[Patch],
    workers: usize,
    policy: &RetryPolicy,
) -> ApplyReport {
    let workers = workers.clamp(1, patches.len().max(1));
    let next = AtomicUsize::new(0);
    tracing::info!(sink = sink.name(), patches = patches.len(), workers, "applying patches");

    let mut outcomes: Vec<(usize, Attempted<()>)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut local = Vec::new();
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(patch) = patches.get(i) else {
                            break;
                        };
                        local.push((i, with_retry(policy, &patch.target_id, || sink.send(patch))));
                    }
                    local
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });
    outcomes.sort_by_key(|(i, _)| *i);

    let mut report = ApplyReport {
        sink: sink.name().to_string(),
        ..ApplyReport::default()
    };
    for (i, outcome) in outcomes {
        let patch = &patches[i];
        match outcome.result {
            Ok(()) => {
                report.applied += 1;
                if outcome.attempts > 1 {
                    report.retried += 1;
                }
            }
            Err(err) => {
                tracing::error!(
                    target_id = %patch.target_id,
                    attempts = outcome.attempts,
                    error = %err,
                    "patch failed"
                );
                report.failed.push(PatchFailure {
                    target_id: patch.target_id.clone(),
                    source_id: patch.source_id.clone(),
                    dataset: patch.dataset.clone(),
                    attempts: outcome.attempts,
                    error: err.to_string(),
                });
            }
        }
    }

    tracing::info!(
        applied = report.applied,
        retried = report.retried,
        failed = report.failed.len(),
        "apply finished"
    );
    report
}
