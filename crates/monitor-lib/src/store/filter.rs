//! Equality and range predicates over entity fields

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    /// Greater than or equal (`$gte`)
    Gte,
    /// Strictly less than (`$lt`)
    Lt,
}

impl Op {
    fn query_key(&self) -> &'static str {
        match self {
            Op::Eq => "$eq",
            Op::Gte => "$gte",
            Op::Lt => "$lt",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

/// Conjunction of predicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Eq, value.into())
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Gte, value.into())
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Lt, value.into())
    }

    /// `field >= at`
    pub fn since(self, field: &str, at: DateTime<Utc>) -> Self {
        self.gte(field, timestamp_value(at))
    }

    /// `field < at`
    pub fn before(self, field: &str, at: DateTime<Utc>) -> Self {
        self.lt(field, timestamp_value(at))
    }

    fn with(mut self, field: &str, op: Op, value: Value) -> Self {
        self.predicates.push(Predicate {
            field: field.to_string(),
            op,
            value,
        });
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Evaluate against a serialized record. Missing fields compare as null.
    pub fn matches(&self, record: &Value) -> bool {
        self.predicates.iter().all(|p| {
            let actual = record.get(&p.field).unwrap_or(&Value::Null);
            match p.op {
                Op::Eq => values_equal(actual, &p.value),
                Op::Gte => matches!(
                    compare_values(actual, &p.value),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                Op::Lt => compare_values(actual, &p.value) == Some(Ordering::Less),
            }
        })
    }

    /// Query document for the entity API:
    /// `{"status": "active", "created_at": {"$gte": "...", "$lt": "..."}}`
    pub fn to_query(&self) -> Value {
        let mut query = Map::new();
        for p in &self.predicates {
            match p.op {
                Op::Eq if !query.contains_key(&p.field) => {
                    query.insert(p.field.clone(), p.value.clone());
                }
                op => {
                    let entry = query
                        .entry(p.field.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !entry.is_object() {
                        // equality already pinned this field; keep both as operators
                        let pinned = entry.take();
                        let mut ops = Map::new();
                        ops.insert(Op::Eq.query_key().to_string(), pinned);
                        *entry = Value::Object(ops);
                    }
                    if let Value::Object(ops) = entry {
                        ops.insert(op.query_key().to_string(), p.value.clone());
                    }
                }
            }
        }
        Value::Object(query)
    }
}

/// Wire form of a timestamp, matching chrono's serde output
pub fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => compare_values(a, b) == Some(Ordering::Equal) || a == b,
    }
}

/// Numbers compare numerically, RFC 3339 strings chronologically, other
/// strings lexically. Mixed kinds do not compare.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_equality_and_missing_fields() {
        let filter = Filter::new().eq("status", "active").eq("is_active", true);

        assert!(filter.matches(&json!({"status": "active", "is_active": true})));
        assert!(!filter.matches(&json!({"status": "resolved", "is_active": true})));
        assert!(!filter.matches(&json!({"status": "active"})));
    }

    #[test]
    fn test_time_range_ignores_fractional_formatting() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let filter = Filter::new()
            .since("created_at", start)
            .before("created_at", start + chrono::Duration::minutes(10));

        // "00.5Z" sorts before "00Z" lexically; chronologically it is inside the range
        assert!(filter.matches(&json!({"created_at": "2024-01-01T00:00:00.500Z"})));
        assert!(filter.matches(&json!({"created_at": "2024-01-01T00:00:00Z"})));
        assert!(!filter.matches(&json!({"created_at": "2024-01-01T00:10:00Z"})));
        assert!(!filter.matches(&json!({"created_at": "2023-12-31T23:59:59Z"})));
    }

    #[test]
    fn test_numeric_range() {
        let filter = Filter::new().gte("confidence", 0.6);
        assert!(filter.matches(&json!({"confidence": 0.6})));
        assert!(filter.matches(&json!({"confidence": 1})));
        assert!(!filter.matches(&json!({"confidence": 0.59})));
        assert!(!filter.matches(&json!({"confidence": "high"})));
    }

    #[test]
    fn test_query_document() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let query = Filter::new()
            .eq("camera_id", "cam-1")
            .since("created_at", start)
            .before("created_at", start + chrono::Duration::hours(1))
            .to_query();

        assert_eq!(
            query,
            json!({
                "camera_id": "cam-1",
                "created_at": {
                    "$gte": "2024-01-01T00:00:00Z",
                    "$lt": "2024-01-01T01:00:00Z"
                }
            })
        );
    }
}
