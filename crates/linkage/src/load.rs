//! File-backed target and source readers.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::{ColumnMapping, DatasetFormat, LinkageConfig};
use crate::error::LinkageError;
use crate::model::{Attributes, Coordinates, SourceBatch, SourceRecord, TargetRecord};
use crate::source::{SourceFeed, TargetSource};

/// Resolve `file` against `base` unless it is already absolute.
pub fn resolve_path(base: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn read_to_string(path: &Path) -> Result<String, LinkageError> {
    std::fs::read_to_string(path).map_err(|e| LinkageError::Io(format!("{}: {e}", path.display())))
}

fn decode_error(path: &Path, message: impl std::fmt::Display) -> LinkageError {
    LinkageError::Decode {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// JSON array of target records.
#[derive(Debug, Clone)]
pub struct JsonTargetFile {
    pub path: PathBuf,
}

impl JsonTargetFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TargetSource for JsonTargetFile {
    fn load_targets(&self) -> Result<Vec<TargetRecord>, LinkageError> {
        let content = read_to_string(&self.path)?;
        let targets: Vec<TargetRecord> =
            serde_json::from_str(&content).map_err(|e| decode_error(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), count = targets.len(), "targets loaded");
        Ok(targets)
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// JSON array of source records, already in engine shape.
#[derive(Debug, Clone)]
pub struct JsonSourceFile {
    pub dataset: String,
    pub path: PathBuf,
}

impl SourceFeed for JsonSourceFile {
    fn dataset(&self) -> &str {
        &self.dataset
    }

    fn load_sources(&self) -> Result<Vec<SourceRecord>, LinkageError> {
        let content = read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| decode_error(&self.path, e))
    }
}

/// Headered CSV whose columns are mapped onto source fields.
#[derive(Debug, Clone)]
pub struct CsvSourceFile {
    pub dataset: String,
    pub path: PathBuf,
    pub columns: ColumnMapping,
}

/// Header positions resolved once per file.
struct ColumnIndex {
    id: usize,
    latitude: Option<usize>,
    longitude: Option<usize>,
    capacity: Option<usize>,
    name: Option<usize>,
    key: Option<usize>,
    attributes: Vec<(String, usize)>,
}

impl CsvSourceFile {
    fn index(&self, headers: &csv::StringRecord) -> Result<ColumnIndex, LinkageError> {
        let find = |column: &str| -> Result<usize, LinkageError> {
            headers
                .iter()
                .position(|h| h.trim() == column)
                .ok_or_else(|| LinkageError::MissingColumn {
                    dataset: self.dataset.clone(),
                    column: column.to_string(),
                })
        };
        let optional = |column: &Option<String>| column.as_deref().map(find).transpose();

        let m = &self.columns;
        Ok(ColumnIndex {
            id: find(m.id.as_str())?,
            latitude: optional(&m.latitude)?,
            longitude: optional(&m.longitude)?,
            capacity: optional(&m.capacity)?,
            name: optional(&m.name)?,
            key: optional(&m.key)?,
            attributes: m
                .attributes
                .iter()
                .map(|(attr, column)| Ok((attr.clone(), find(column.as_str())?)))
                .collect::<Result<_, LinkageError>>()?,
        })
    }
}

/// Trimmed cell text; `None` when blank or out of range.
fn cell(record: &csv::StringRecord, idx: Option<usize>) -> Option<&str> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn number(record: &csv::StringRecord, idx: Option<usize>) -> Option<f64> {
    cell(record, idx)
        .and_then(|s| s.replace(',', "").parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

impl SourceFeed for CsvSourceFile {
    fn dataset(&self) -> &str {
        &self.dataset
    }

    fn load_sources(&self) -> Result<Vec<SourceRecord>, LinkageError> {
        let content = read_to_string(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| decode_error(&self.path, e))?
            .clone();
        let cols = self.index(&headers)?;

        let mut records = Vec::new();
        for (row_idx, result) in reader.records().enumerate() {
            let row = result
                .map_err(|e| decode_error(&self.path, format!("row {}: {e}", row_idx + 2)))?;

            let Some(id) = cell(&row, Some(cols.id)) else {
                tracing::warn!(dataset = %self.dataset, row = row_idx + 2, "row without id skipped");
                continue;
            };

            let coordinates = number(&row, cols.latitude)
                .zip(number(&row, cols.longitude))
                .map(|(lat, lon)| Coordinates::new(lat, lon));

            let attributes: Attributes = cols
                .attributes
                .iter()
                .filter_map(|(attr, i)| {
                    cell(&row, Some(*i)).map(|v| (attr.clone(), Value::String(v.to_string())))
                })
                .collect();

            records.push(SourceRecord {
                id: id.to_string(),
                coordinates,
                capacity: number(&row, cols.capacity),
                name: cell(&row, cols.name).map(String::from),
                key: cell(&row, cols.key).map(String::from),
                attributes,
            });
        }

        tracing::debug!(dataset = %self.dataset, count = records.len(), "sources loaded");
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Config wiring
// ---------------------------------------------------------------------------

/// The target snapshot named by `[targets] file`.
pub fn target_file(config: &LinkageConfig, base: &Path) -> Result<JsonTargetFile, LinkageError> {
    let file = config.targets.file.as_deref().ok_or_else(|| {
        LinkageError::ConfigValidation("[targets] file is required to load targets".into())
    })?;
    Ok(JsonTargetFile::new(resolve_path(base, file)))
}

/// A feed for one configured dataset.
pub fn dataset_feed(
    config: &LinkageConfig,
    dataset: &str,
    base: &Path,
) -> Result<Box<dyn SourceFeed>, LinkageError> {
    let ds = config
        .datasets
        .get(dataset)
        .ok_or_else(|| LinkageError::UnknownDataset(dataset.to_string()))?;
    let file = ds.file.as_deref().ok_or_else(|| {
        LinkageError::ConfigValidation(format!("dataset '{dataset}': file is required"))
    })?;
    let path = resolve_path(base, file);

    Ok(match ds.format {
        DatasetFormat::Json => Box::new(JsonSourceFile {
            dataset: dataset.to_string(),
            path,
        }),
        DatasetFormat::Csv => {
            let columns = ds.columns.clone().ok_or_else(|| {
                LinkageError::ConfigValidation(format!(
                    "dataset '{dataset}': csv datasets need a column mapping"
                ))
            })?;
            Box::new(CsvSourceFile {
                dataset: dataset.to_string(),
                path,
                columns,
            })
        }
    })
}

/// Load every configured dataset, in name order.
pub fn load_batches(config: &LinkageConfig, base: &Path) -> Result<Vec<SourceBatch>, LinkageError> {
    config
        .datasets
        .keys()
        .map(|name| dataset_feed(config, name, base)?.load_batch())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    fn mapping() -> ColumnMapping {
        ColumnMapping {
            id: "plant_code".into(),
            latitude: Some("lat".into()),
            longitude: Some("lon".into()),
            capacity: Some("mw".into()),
            name: Some("plant_name".into()),
            key: Some("plant_code".into()),
            attributes: BTreeMap::from([("owner".to_string(), "utility".to_string())]),
        }
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn csv_rows_map_onto_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "eia.csv",
            "plant_code,plant_name,lat,lon,mw,utility\n\
             55,Sunny Acres LLC,35.1,-120.2,\"1,200.5\",PG&E\n\
             56,Blank,,,,\n\
             ,No Id,35.0,-120.0,5,X\n",
        );
        let feed = CsvSourceFile {
            dataset: "eia".into(),
            path,
            columns: mapping(),
        };
        let records = feed.load_sources().unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.key.as_deref(), Some("55"));
        assert_eq!(first.capacity, Some(1200.5));
        assert_eq!(first.coordinates, Some(Coordinates::new(35.1, -120.2)));
        assert_eq!(first.attributes["owner"], Value::String("PG&E".into()));

        let blank = &records[1];
        assert!(blank.coordinates.is_none());
        assert!(blank.capacity.is_none());
        assert!(blank.attributes.is_empty());
    }

    #[test]
    fn missing_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "eia.csv", "plant_code,lat,lon\n1,2,3\n");
        let feed = CsvSourceFile {
            dataset: "eia".into(),
            path,
            columns: mapping(),
        };
        match feed.load_sources() {
            Err(LinkageError::MissingColumn { dataset, column }) => {
                assert_eq!(dataset, "eia");
                assert_eq!(column, "mw");
            }
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }

    #[test]
    fn json_targets_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let good = write(
            dir.path(),
            "targets.json",
            r#"[{"id": "t1", "coordinates": {"lat": 35.0, "lon": -120.0}, "capacity": 5.0,
                 "attributes": {"owner": null}}]"#,
        );
        let targets = JsonTargetFile::new(&good).load_targets().unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets[0].is_missing("owner"));

        let bad = write(dir.path(), "bad.json", "{not json");
        let err = JsonTargetFile::new(&bad).load_targets().unwrap_err();
        assert!(matches!(err, LinkageError::Decode { .. }));

        let missing = JsonTargetFile::new(dir.path().join("nope.json")).load_targets();
        assert!(matches!(missing, Err(LinkageError::Io(_))));
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let base = Path::new("/etc/solarfill");
        assert_eq!(resolve_path(base, "data/t.json"), PathBuf::from("/etc/solarfill/data/t.json"));
        assert_eq!(resolve_path(base, "/abs/t.json"), PathBuf::from("/abs/t.json"));
    }

    #[test]
    fn feeds_follow_config() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lbnl.json", r#"[{"id": "s1"}]"#);
        let config = LinkageConfig::from_toml(
            r#"
name = "wiring"

[datasets.lbnl]
file = "lbnl.json"
format = "json"
"#,
        )
        .unwrap();
        let batches = load_batches(&config, dir.path()).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].dataset, "lbnl");
        assert_eq!(batches[0].records[0].id, "s1");

        assert!(matches!(
            target_file(&config, dir.path()),
            Err(LinkageError::ConfigValidation(_))
        ));
    }
}
