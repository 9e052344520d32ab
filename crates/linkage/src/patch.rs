//! Merge policy: turn accepted matches into minimal, non-destructive patches.

use std::collections::{BTreeSet, HashSet};

use crate::model::{is_missing, Attributes, Patch, SourceRecord, TargetRecord};

/// Targets claimed during the current run. A target is claimed by at most
/// one source; the set only grows and is dropped with the run.
#[derive(Debug, Default)]
pub struct ClaimSet {
    claimed: HashSet<String>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `target_id`. Returns false if it was already claimed.
    pub fn try_claim(&mut self, target_id: &str) -> bool {
        self.claimed.insert(target_id.to_string())
    }

    pub fn is_claimed(&self, target_id: &str) -> bool {
        self.claimed.contains(target_id)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Offered source attributes that are missing on the target, restricted to
/// `allow` when given.
pub fn diff_fields(
    source: &SourceRecord,
    target: &TargetRecord,
    allow: Option<&BTreeSet<String>>,
) -> Attributes {
    source
        .offered()
        .filter(|(field, _)| allow.map_or(true, |a| a.contains(*field)))
        .filter(|(field, _)| target.is_missing(field))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

/// Claim the target of an accepted match and build its patch.
///
/// Returns `None` when the target was already claimed earlier in the run,
/// or when there is nothing to fill. A target with nothing to fill stays
/// claimed, so a re-run over patched data pairs the same way.
pub fn build_patch(
    dataset: &str,
    source: &SourceRecord,
    target: &TargetRecord,
    allow: Option<&BTreeSet<String>>,
    claims: &mut ClaimSet,
) -> Option<Patch> {
    if !claims.try_claim(&target.id) {
        return None;
    }
    let fields = diff_fields(source, target, allow);
    if fields.is_empty() {
        return None;
    }
    Some(Patch {
        target_id: target.id.clone(),
        source_id: source.id.clone(),
        dataset: dataset.to_string(),
        fields,
    })
}

/// Apply a patch to an in-memory target. Fields already present are left
/// untouched. Returns the number of fields written.
pub fn apply_patch(target: &mut TargetRecord, patch: &Patch) -> usize {
    let mut written = 0;
    for (field, value) in &patch.fields {
        if is_missing(target.attributes.get(field)) {
            target.attributes.insert(field.clone(), value.clone());
            written += 1;
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn target(attrs: &[(&str, Value)]) -> TargetRecord {
        TargetRecord {
            id: "t1".into(),
            coordinates: None,
            capacity: None,
            name: None,
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    fn source(attrs: &[(&str, Value)]) -> SourceRecord {
        SourceRecord {
            id: "s1".into(),
            coordinates: None,
            capacity: None,
            name: None,
            key: None,
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn only_missing_fields_are_patched() {
        let t = target(&[("operator", json!("Existing Op")), ("owner", Value::Null)]);
        let s = source(&[("operator", json!("New Op")), ("owner", json!("New Owner"))]);
        let mut claims = ClaimSet::new();
        let patch = build_patch("ds", &s, &t, None, &mut claims).unwrap();
        assert_eq!(patch.fields.len(), 1);
        assert_eq!(patch.fields["owner"], json!("New Owner"));
        assert!(claims.is_claimed("t1"));
    }

    #[test]
    fn blank_strings_count_as_missing() {
        let t = target(&[("address", json!("   "))]);
        let s = source(&[("address", json!("1 Sun Rd")), ("city", json!(""))]);
        let fields = diff_fields(&s, &t, None);
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["address"]);
    }

    #[test]
    fn empty_diff_yields_no_patch_but_claims() {
        let t = target(&[("owner", json!("A"))]);
        let s = source(&[("owner", json!("B")), ("operator", json!(""))]);
        let mut claims = ClaimSet::new();
        assert!(build_patch("ds", &s, &t, None, &mut claims).is_none());
        assert!(claims.is_claimed("t1"));

        let filler = source(&[("operator", json!("Op"))]);
        assert!(build_patch("other", &filler, &t, None, &mut claims).is_none());
    }

    #[test]
    fn allow_list_restricts_fields() {
        let t = target(&[]);
        let s = source(&[("owner", json!("A")), ("capacity_dc", json!(5.1))]);
        let allow: BTreeSet<String> = ["owner".to_string()].into_iter().collect();
        let mut claims = ClaimSet::new();
        let patch = build_patch("ds", &s, &t, Some(&allow), &mut claims).unwrap();
        assert_eq!(patch.fields.keys().collect::<Vec<_>>(), vec!["owner"]);
    }

    #[test]
    fn claimed_target_is_not_patched_twice() {
        let t = target(&[]);
        let s = source(&[("owner", json!("A"))]);
        let mut claims = ClaimSet::new();
        assert!(build_patch("ds", &s, &t, None, &mut claims).is_some());
        assert!(build_patch("other", &s, &t, None, &mut claims).is_none());
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn apply_then_rebuild_is_empty() {
        let mut t = target(&[("operator", json!("Op"))]);
        let s = source(&[("operator", json!("Other")), ("owner", json!("Owner"))]);
        let patch = build_patch("ds", &s, &t, None, &mut ClaimSet::new()).unwrap();
        assert_eq!(apply_patch(&mut t, &patch), 1);
        assert_eq!(t.attributes["operator"], json!("Op"));
        assert!(build_patch("ds", &s, &t, None, &mut ClaimSet::new()).is_none());
    }
}
