//! Anonymization: lossy, deterministic generalization of records that are
//! stored without encryption.
//!
//! Free-text fields are dropped entirely.  Substance names collapse to a
//! small fixed category set.  Doses and volumes are bucketed into ranges
//! instead of exact values.  Reversal is not supported or required.

use serde_json::{json, Map, Value};

/// Capability seam: the orchestrator only knows this trait.
pub trait Anonymizer: Send + Sync {
    fn anonymize(&self, data: &Value, data_type: &str) -> Value;
}

/// Default anonymizer for dose-calculation records.
pub struct DoseAnonymizer;

const PEPTIDE_KEYWORDS: &[&str] = &[
    "peptide",
    "bpc",
    "tb-500",
    "tb500",
    "semaglutide",
    "tirzepatide",
    "retatrutide",
    "ipamorelin",
    "cjc",
    "ghk",
    "melanotan",
    "pt-141",
    "sermorelin",
    "tesamorelin",
];

const VITAMIN_KEYWORDS: &[&str] = &[
    "vitamin", "b12", "b-12", "d3", "biotin", "folate", "nad", "glutathione",
];

const MEDICATION_KEYWORDS: &[&str] = &[
    "insulin",
    "hcg",
    "hgh",
    "testosterone",
    "medication",
    "antibiotic",
    "ozempic",
    "wegovy",
    "mounjaro",
];

const COMPOUND_KEYWORDS: &[&str] = &["compound", "blend", "mix", "stack"];

/// Map a substance name to its generalized category.  Matching is by
/// lower-cased keyword; anything unmatched lands in "other".
pub fn substance_category(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if contains_any(PEPTIDE_KEYWORDS) {
        "peptide"
    } else if contains_any(VITAMIN_KEYWORDS) {
        "vitamin"
    } else if contains_any(MEDICATION_KEYWORDS) {
        "medication"
    } else if contains_any(COMPOUND_KEYWORDS) {
        "compound"
    } else {
        "other"
    }
}

/// Bucket a dose value (unit-agnostic) into a fixed range label.
pub fn dose_bucket(value: f64) -> &'static str {
    if value < 1.0 {
        "<1"
    } else if value <= 5.0 {
        "1-5"
    } else if value <= 10.0 {
        "5-10"
    } else if value <= 50.0 {
        "10-50"
    } else if value <= 100.0 {
        "50-100"
    } else {
        ">100"
    }
}

/// Bucket a volume (ml) into a fixed range label.
pub fn volume_bucket(value: f64) -> &'static str {
    if value < 0.1 {
        "<0.1ml"
    } else if value <= 0.5 {
        "0.1-0.5ml"
    } else if value <= 1.0 {
        "0.5-1ml"
    } else if value <= 2.0 {
        "1-2ml"
    } else {
        ">2ml"
    }
}

fn is_free_text(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.contains("note") || lower.contains("description") || lower.starts_with("custom")
}

fn is_name_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "substance_name" | "substancename" | "substance" | "name"
    )
}

impl Anonymizer for DoseAnonymizer {
    fn anonymize(&self, data: &Value, data_type: &str) -> Value {
        let mut out = Map::new();
        out.insert("data_type".into(), json!(data_type));

        let Some(obj) = data.as_object() else {
            // Non-object payloads carry nothing we can generalize safely.
            return Value::Object(out);
        };

        for (key, value) in obj {
            if is_free_text(key) {
                continue;
            }
            let lower = key.to_lowercase();
            if is_name_field(key) {
                if let Some(name) = value.as_str() {
                    out.insert("substance_category".into(), json!(substance_category(name)));
                }
            } else if lower == "dose" || lower == "dose_mg" || lower == "amount" {
                if let Some(v) = value.as_f64() {
                    out.insert("dose_range".into(), json!(dose_bucket(v)));
                }
            } else if lower == "volume" || lower == "volume_ml" {
                if let Some(v) = value.as_f64() {
                    out.insert("volume_range".into(), json!(volume_bucket(v)));
                }
            } else if lower == "unit" {
                if let Some(u) = value.as_str() {
                    out.insert("unit".into(), json!(u));
                }
            }
            // Everything else is identifying-by-default and dropped.
        }

        Value::Object(out)
    }
}
