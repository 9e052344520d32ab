//! String canonicalization for names, model strings and cross-reference keys.
//!
//! Everything here is pure: the same input and tables always produce the
//! same output, and no input is rejected.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

/// Legal-entity suffixes dropped from the end of a name when the config
/// does not supply its own list.
pub const DEFAULT_LEGAL_SUFFIXES: &[&str] = &[
    "llc", "lc", "inc", "incorporated", "corp", "corporation", "co", "company", "ltd", "limited",
    "lp", "llp", "plc",
];

pub fn default_legal_suffixes() -> Vec<String> {
    DEFAULT_LEGAL_SUFFIXES.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedName {
    pub canonical: String,
    pub tokens: BTreeSet<String>,
}

impl NormalizedName {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Lowercase, strip punctuation, drop trailing legal suffixes, collapse
/// whitespace.
///
/// Periods and apostrophes are deleted outright so `L.L.C.` becomes `llc`
/// and `O'Neil` becomes `oneil`; every other non-alphanumeric character
/// separates tokens.
pub fn normalize_name(raw: &str, suffixes: &[String]) -> NormalizedName {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            cleaned.push(ch);
        } else if ch == '.' || ch == '\'' || ch == '\u{2019}' {
            continue;
        } else {
            cleaned.push(' ');
        }
    }

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    while let Some(last) = words.last() {
        if suffixes.iter().any(|s| s.eq_ignore_ascii_case(last)) {
            words.pop();
        } else {
            break;
        }
    }

    NormalizedName {
        canonical: words.join(" "),
        tokens: words.iter().map(|w| w.to_string()).collect(),
    }
}

/// Token overlap divided by the smaller token count. 0 when either side has
/// no tokens.
pub fn name_score(a: &NormalizedName, b: &NormalizedName) -> f64 {
    let smaller = a.tokens.len().min(b.tokens.len());
    if smaller == 0 {
        return 0.0;
    }
    let overlap = a.tokens.intersection(&b.tokens).count();
    overlap as f64 / smaller as f64
}

/// Strip bracketed and parenthetical qualifiers, collapse whitespace.
/// Case is preserved.
pub fn normalize_model(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trimmed, uppercased key; `None` when nothing usable remains.
pub fn normalize_key(raw: &str) -> Option<String> {
    let key = raw.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_uppercase())
    }
}

fn fold(raw: &str) -> String {
    raw.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Alias table
// ---------------------------------------------------------------------------

/// Variant → canonical name table (owner/operator/manufacturer spellings).
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    exact: BTreeMap<String, String>,
    /// Longest variant first, then lexicographic, so lookups are stable.
    by_length: Vec<(String, String)>,
}

impl AliasTable {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut exact = BTreeMap::new();
        for (variant, canonical) in entries {
            let variant = fold(variant.as_ref());
            if !variant.is_empty() {
                exact.insert(variant, canonical.into());
            }
        }
        let mut by_length: Vec<(String, String)> =
            exact.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        by_length.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { exact, by_length }
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

/// Exact lookup first, then the longest variant contained in the name.
/// Returns the input unchanged when nothing matches.
pub fn resolve_alias<'a>(name: &'a str, table: &'a AliasTable) -> Cow<'a, str> {
    if table.is_empty() {
        return Cow::Borrowed(name);
    }
    let folded = fold(name);
    if let Some(canonical) = table.exact.get(&folded) {
        return Cow::Borrowed(canonical.as_str());
    }
    table
        .by_length
        .iter()
        .find(|(variant, _)| folded.contains(variant.as_str()))
        .map(|(_, canonical)| Cow::Borrowed(canonical.as_str()))
        .unwrap_or(Cow::Borrowed(name))
}

/// Alias resolution followed by name normalization, with the tables bound.
#[derive(Debug, Clone)]
pub struct NameNormalizer {
    suffixes: Vec<String>,
    aliases: AliasTable,
}

impl NameNormalizer {
    pub fn new(suffixes: Vec<String>, aliases: AliasTable) -> Self {
        Self { suffixes, aliases }
    }

    pub fn normalize(&self, raw: &str) -> NormalizedName {
        let resolved = resolve_alias(raw, &self.aliases);
        normalize_name(&resolved, &self.suffixes)
    }

    /// Normalized form of an optional name; `None` if absent or empty.
    pub fn normalize_opt(&self, raw: Option<&str>) -> Option<NormalizedName> {
        raw.map(|r| self.normalize(r)).filter(|n| !n.is_empty())
    }
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self::new(default_legal_suffixes(), AliasTable::default())
    }
}
