//! JSON-lines sink: one patch per line, for offline review or bulk load.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use solarfill_linkage::model::Patch;

use crate::error::SinkError;
use crate::PatchSink;

pub struct JsonlPatchSink {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl JsonlPatchSink {
    /// Create (or truncate) `path`.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path)
            .map_err(|e| SinkError::Io(format!("{}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PatchSink for JsonlPatchSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn send(&self, patch: &Patch) -> Result<(), SinkError> {
        let line = serde_json::to_string(patch).map_err(|e| SinkError::Io(e.to_string()))?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| SinkError::Io("patch writer poisoned".into()))?;
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_one_patch_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patches.jsonl");
        let sink = JsonlPatchSink::create(&path).unwrap();

        for (target, owner) in [("fac-1", "A"), ("fac-2", "B")] {
            sink.send(&Patch {
                target_id: target.into(),
                source_id: format!("src-{target}"),
                dataset: "lbnl".into(),
                fields: [("owner".to_string(), json!(owner))].into(),
            })
            .unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Patch> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].target_id, "fac-2");
        assert_eq!(lines[1].fields["owner"], json!("B"));
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonlPatchSink::create(&dir.path().join("nope/patches.jsonl")).err().unwrap();
        assert!(matches!(err, SinkError::Io(_)));
    }
}
