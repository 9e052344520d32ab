//! `solarfill-linkage`: record linkage between a canonical facility table
//! and external solar datasets.
//!
//! Pure engine crate: receives loaded targets and source batches, returns
//! matches, tiers, minimal fill patches and a run summary. File readers live
//! in [`load`]; nothing here talks to the network.

pub mod assign;
pub mod confidence;
pub mod config;
pub mod engine;
pub mod error;
pub mod load;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod patch;
pub mod source;
pub mod spatial;
pub mod summary;

pub use config::LinkageConfig;
pub use engine::{run, BatchOutcome, LinkageRun};
pub use error::LinkageError;
pub use model::{
    Issue, IssueKind, LinkageResult, Match, MatchMethod, Patch, RunSummary, SourceBatch,
    SourceRecord, TargetRecord, Tier,
};
pub use source::{SourceFeed, TargetSource};
