//! Structured metadata filters for [`search`][crate::store::MemoryStore::search].
//!
//! A [`Filter`] maps a record field name to a [`Condition`].  All conditions
//! must hold for a record to be considered.  The JSON form accepted by
//! [`Filter`]'s `Deserialize` impl is:
//!
//! ```json
//! { "source": "conversation", "total_access": { "gte": 5 } }
//! ```
//!
//! A plain value is an exact match; an object with any of `gte`, `lte`,
//! `gt`, `lt` is a numeric range.
//!
//! # Fields
//!
//! | field          | kind    | notes                                       |
//! |----------------|---------|---------------------------------------------|
//! | `text`         | string  |                                             |
//! | `source`       | string  |                                             |
//! | `type`         | string  |                                             |
//! | `total_access` | number  |                                             |
//! | `created_at`   | number  | unix seconds                                |
//! | `last_access`  | number  | unix seconds, `0` when never accessed       |
//!
//! Unknown fields never match.

use std::collections::BTreeMap;

use recall_types::MemoryRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inclusive/exclusive numeric bounds.  Absent bounds are unconstrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Range {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
}

impl Range {
    pub fn gte(mut self, v: f64) -> Self {
        self.gte = Some(v);
        self
    }

    pub fn lte(mut self, v: f64) -> Self {
        self.lte = Some(v);
        self
    }

    pub fn gt(mut self, v: f64) -> Self {
        self.gt = Some(v);
        self
    }

    pub fn lt(mut self, v: f64) -> Self {
        self.lt = Some(v);
        self
    }

    pub fn contains(&self, x: f64) -> bool {
        self.gte.is_none_or(|b| x >= b)
            && self.lte.is_none_or(|b| x <= b)
            && self.gt.is_none_or(|b| x > b)
            && self.lt.is_none_or(|b| x < b)
    }
}

/// One field predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Range(Range),
    Match(Value),
}

/// Conjunction of field predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    conditions: BTreeMap<String, Condition>,
}

enum FieldValue<'a> {
    Text(&'a str),
    Number(f64),
}

fn field<'a>(record: &'a MemoryRecord, name: &str) -> Option<FieldValue<'a>> {
    let value = match name {
        "text" => FieldValue::Text(&record.text),
        "source" => FieldValue::Text(&record.source),
        "type" => FieldValue::Text(&record.kind),
        "total_access" => FieldValue::Number(record.stats.total_access as f64),
        "created_at" => FieldValue::Number(unix_seconds(record.created_at)),
        "last_access" => FieldValue::Number(record.stats.last_access.map_or(0.0, unix_seconds)),
        _ => return None,
    };
    Some(value)
}

fn unix_seconds(t: chrono::DateTime<chrono::Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}

impl Condition {
    fn holds(&self, value: &FieldValue<'_>) -> bool {
        match (self, value) {
            (Condition::Match(Value::String(s)), FieldValue::Text(t)) => s == t,
            (Condition::Match(Value::Number(n)), FieldValue::Number(x)) => n.as_f64() == Some(*x),
            (Condition::Range(range), FieldValue::Number(x)) => range.contains(*x),
            _ => false,
        }
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value` exactly.
    pub fn with_match(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .insert(field.into(), Condition::Match(value.into()));
        self
    }

    /// Require numeric `field` to fall within `range`.
    pub fn with_range(mut self, field: impl Into<String>, range: Range) -> Self {
        self.conditions.insert(field.into(), Condition::Range(range));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// `true` when every condition holds for `record`.
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        self.conditions.iter().all(|(name, condition)| {
            field(record, name).is_some_and(|value| condition.holds(&value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use recall_types::MemoryMeta;

    fn record(source: &str, kind: &str, total_access: u64) -> MemoryRecord {
        let mut rec = MemoryRecord::new(
            "user likes tea",
            MemoryMeta::new(source, kind),
            "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        );
        rec.stats.total_access = total_access;
        rec
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().is_empty());
        assert!(Filter::new().matches(&record("", "", 0)));
    }

    #[test]
    fn exact_match_on_string_fields() {
        let f = Filter::new()
            .with_match("source", "conversation")
            .with_match("type", "fact");
        assert!(f.matches(&record("conversation", "fact", 0)));
        assert!(!f.matches(&record("autonomous", "fact", 0)));
        assert!(!f.matches(&record("conversation", "preference", 0)));
    }

    #[test]
    fn exact_match_on_numeric_field() {
        let f = Filter::new().with_match("total_access", 3);
        assert!(f.matches(&record("", "", 3)));
        assert!(!f.matches(&record("", "", 4)));
    }

    #[test]
    fn range_bounds_are_respected() {
        let f = Filter::new().with_range("total_access", Range::default().gte(2.0).lt(5.0));
        assert!(!f.matches(&record("", "", 1)));
        assert!(f.matches(&record("", "", 2)));
        assert!(f.matches(&record("", "", 4)));
        assert!(!f.matches(&record("", "", 5)));
    }

    #[test]
    fn range_on_string_field_never_matches() {
        let f = Filter::new().with_range("source", Range::default().gte(0.0));
        assert!(!f.matches(&record("conversation", "", 0)));
    }

    #[test]
    fn unknown_field_never_matches() {
        let f = Filter::new().with_match("mood", "happy");
        assert!(!f.matches(&record("", "", 0)));
    }

    #[test]
    fn never_accessed_record_has_zero_last_access() {
        let f = Filter::new().with_match("last_access", 0);
        assert!(f.matches(&record("", "", 0)));
    }

    #[test]
    fn created_at_is_unix_seconds() {
        let f = Filter::new().with_range("created_at", Range::default().gte(1_767_225_600.0));
        assert!(f.matches(&record("", "", 0)));
        let f = Filter::new().with_range("created_at", Range::default().gt(1_767_225_600.0));
        assert!(!f.matches(&record("", "", 0)));
    }

    #[test]
    fn deserializes_match_and_range_shapes() {
        let f: Filter = serde_json::from_str(
            r#"{"source": "conversation", "total_access": {"gte": 5, "lte": 100}}"#,
        )
        .unwrap();
        let expected = Filter::new()
            .with_match("source", "conversation")
            .with_range("total_access", Range::default().gte(5.0).lte(100.0));
        assert_eq!(f, expected);
        assert!(f.matches(&record("conversation", "", 10)));
        assert!(!f.matches(&record("conversation", "", 4)));
    }
}
