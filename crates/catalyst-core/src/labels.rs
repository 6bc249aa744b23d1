//! Label sets and the precedence merge.
//!
//! Labels are string-keyed scalar values attached to users, orgs,
//! memberships, groups, and keys. The effective-identity composer merges
//! them along a fixed precedence chain; the merge is hot, so it works over
//! `BTreeMap` (deterministic iteration, no re-sorting for JSON output).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A scalar label value: string, boolean, or number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    /// Boolean label.
    Bool(bool),
    /// Numeric label.
    Number(f64),
    /// String label.
    String(String),
}

impl From<&str> for LabelValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for LabelValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for LabelValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for LabelValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for LabelValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// A mapping from label keys to scalar values.
pub type LabelSet = BTreeMap<String, LabelValue>;

/// Merges label layers in order; later layers win on key collision.
///
/// The precedence chain for effective identities is
/// `user → org → membership → groups (in group-id order)`.
#[must_use]
pub fn merge_labels<'a, I>(layers: I) -> LabelSet
where
    I: IntoIterator<Item = &'a LabelSet>,
{
    let mut merged = LabelSet::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Builds a label set from `(key, value)` pairs. Test and fixture helper.
#[must_use]
pub fn labels<K, V, I>(pairs: I) -> LabelSet
where
    K: Into<String>,
    V: Into<LabelValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_later_wins() {
        let user = labels([("tier", "free"), ("team", "core")]);
        let org = labels([("tier", "gold")]);

        let merged = merge_labels([&user, &org]);
        assert_eq!(merged.get("tier"), Some(&LabelValue::from("gold")));
        assert_eq!(merged.get("team"), Some(&LabelValue::from("core")));
    }

    #[test]
    fn test_merge_preserves_scalar_kinds() {
        let a = labels([("beta", LabelValue::Bool(true))]);
        let b = labels([("seats", LabelValue::Number(12.0))]);

        let merged = merge_labels([&a, &b]);
        assert_eq!(merged.get("beta"), Some(&LabelValue::Bool(true)));
        assert_eq!(merged.get("seats"), Some(&LabelValue::Number(12.0)));
    }

    #[test]
    fn test_label_value_json_round_trip() {
        let set = labels([
            ("plan", LabelValue::from("starter")),
            ("beta", LabelValue::Bool(false)),
            ("limit", LabelValue::Number(5.0)),
        ]);
        let json = serde_json::to_string(&set).unwrap();
        let back: LabelSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }

    #[test]
    fn test_empty_merge() {
        let merged = merge_labels(std::iter::empty::<&LabelSet>());
        assert!(merged.is_empty());
    }
}
