//! Seams for reading the target snapshot and source datasets. The engine
//! only sees the records; where they come from is up to the caller.

use crate::error::LinkageError;
use crate::model::{SourceBatch, SourceRecord, TargetRecord};

/// Provides the canonical target snapshot for a run.
pub trait TargetSource {
    fn load_targets(&self) -> Result<Vec<TargetRecord>, LinkageError>;
}

/// Provides one external dataset's records.
pub trait SourceFeed {
    fn dataset(&self) -> &str;

    fn load_sources(&self) -> Result<Vec<SourceRecord>, LinkageError>;

    fn load_batch(&self) -> Result<SourceBatch, LinkageError> {
        Ok(SourceBatch {
            dataset: self.dataset().to_string(),
            records: self.load_sources()?,
        })
    }
}

/// In-memory targets, mostly for tests and embedding.
impl TargetSource for Vec<TargetRecord> {
    fn load_targets(&self) -> Result<Vec<TargetRecord>, LinkageError> {
        Ok(self.clone())
    }
}

impl SourceFeed for SourceBatch {
    fn dataset(&self) -> &str {
        &self.dataset
    }

    fn load_sources(&self) -> Result<Vec<SourceRecord>, LinkageError> {
        Ok(self.records.clone())
    }
}
