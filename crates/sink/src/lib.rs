//! Patch delivery for `solarfill`.
//!
//! A [`PatchSink`] writes one patch somewhere (an HTTP store, a JSON-lines
//! file). [`apply_patches`] drives a sink with a bounded worker pool and the
//! shared retry policy, and reports failures per patch.

mod apply;
mod error;
mod http;
mod jsonl;
mod retry;

use solarfill_linkage::model::Patch;

pub use apply::{apply_patches, ApplyReport, PatchFailure};
pub use error::SinkError;
pub use http::{HttpPatchSink, USER_AGENT};
pub use jsonl::JsonlPatchSink;
pub use retry::{with_retry, Attempted, RetryPolicy};

/// Destination for patches. Implementations are shared across worker
/// threads, so `send` takes `&self`.
pub trait PatchSink: Sync {
    fn name(&self) -> &str;

    fn send(&self, patch: &Patch) -> Result<(), SinkError>;
}
