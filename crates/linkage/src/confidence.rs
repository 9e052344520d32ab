//! Confidence tiering: a fixed rule table over capacity ratio, name score,
//! neighbourhood cardinality and optional categorical agreement.

use crate::config::ConfidenceBands;
use crate::model::Tier;

/// Facts about one accepted pair that the rule table looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evidence {
    pub exact_key: bool,
    pub capacity_ratio: Option<f64>,
    pub name_score: Option<f64>,
    /// `max(sources, targets)` of the contention group.
    pub cardinality: usize,
    /// The group is exactly one source and one target.
    pub single: bool,
    /// `Some(true)` when the configured categorical attribute agrees.
    pub category_agrees: Option<bool>,
}

pub fn classify(ev: &Evidence, bands: &ConfidenceBands) -> Tier {
    if ev.exact_key {
        return Tier::High;
    }

    match ev.capacity_ratio {
        Some(ratio) => {
            if ratio <= bands.high_ratio {
                return Tier::High;
            }
            if ev.single && ratio <= bands.ceiling {
                return Tier::High;
            }
            if ratio <= bands.medium_ratio && ev.cardinality <= bands.medium_max_group {
                if ev.category_agrees == Some(true) {
                    return Tier::High;
                }
                return Tier::Medium;
            }
            Tier::Low
        }
        None => {
            let named = ev.name_score.is_some_and(|s| s >= bands.min_name_score);
            if ev.single && named {
                Tier::Medium
            } else {
                Tier::Low
            }
        }
    }
}

/// Human-readable reason string for a tiered pair.
pub fn rationale(ev: &Evidence, tier: Tier, distance_km: Option<f64>) -> String {
    if ev.exact_key {
        return "exact-key".to_string();
    }
    let mut parts = Vec::new();
    if let Some(d) = distance_km {
        parts.push(format!("distance={d:.3}km"));
    }
    match ev.capacity_ratio {
        Some(r) => parts.push(format!("capacity_ratio={r:.3}")),
        None => parts.push("capacity=unknown".to_string()),
    }
    if let Some(s) = ev.name_score {
        parts.push(format!("name_score={s:.2}"));
    }
    if ev.single {
        parts.push("sole-candidate".to_string());
    } else {
        parts.push(format!("group={}", ev.cardinality));
    }
    if ev.category_agrees == Some(true) {
        parts.push("category-agrees".to_string());
    }
    format!("{tier}: {}", parts.join(", "))
}
