//! Metadata filter expressions in the remote service's grammar.
//!
//! Scan keys arrive as `(column, strategy, value)` triples and become
//! `{"$and":[{column: {"$op": value}}, …]}`.

use serde_json::{Value, json};

use crate::remote::MetadataValue;

/// Comparison operators, in strategy-number order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Lt,
    Lte,
    Eq,
    Gte,
    Gt,
    Ne,
}

impl FilterOp {
    /// Map a host strategy number (1-based) to an operator.
    #[must_use]
    pub fn from_strategy(strategy: u16) -> Option<Self> {
        match strategy {
            1 => Some(FilterOp::Lt),
            2 => Some(FilterOp::Lte),
            3 => Some(FilterOp::Eq),
            4 => Some(FilterOp::Gte),
            5 => Some(FilterOp::Gt),
            6 => Some(FilterOp::Ne),
            _ => None,
        }
    }

    #[must_use]
    pub fn remote_op(&self) -> &'static str {
        match self {
            FilterOp::Lt => "$lt",
            FilterOp::Lte => "$lte",
            FilterOp::Eq => "$eq",
            FilterOp::Gte => "$gte",
            FilterOp::Gt => "$gt",
            FilterOp::Ne => "$ne",
        }
    }
}

/// One scan-key condition on a metadata column.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanKey {
    pub column: String,
    pub op: FilterOp,
    pub value: MetadataValue,
}

impl ScanKey {
    #[must_use]
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<MetadataValue>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }
}

/// Build the query filter from the scan keys. Always emits the `$and`
/// wrapper, even when empty, matching what the service expects from this
/// index layer.
#[must_use]
pub fn build_filter(keys: &[ScanKey]) -> Value {
    let conditions: Vec<Value> = keys
        .iter()
        .map(|key| json!({ (key.column.as_str()): { (key.op.remote_op()): key.value } }))
        .collect();
    json!({ "$and": conditions })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_numbers_map_in_order() {
        let ops = [
            FilterOp::Lt,
            FilterOp::Lte,
            FilterOp::Eq,
            FilterOp::Gte,
            FilterOp::Gt,
            FilterOp::Ne,
        ];
        for (i, op) in ops.into_iter().enumerate() {
            assert_eq!(FilterOp::from_strategy(i as u16 + 1), Some(op));
        }
        assert_eq!(FilterOp::from_strategy(0), None);
        assert_eq!(FilterOp::from_strategy(7), None);
    }

    #[test]
    fn filter_combines_keys_with_and() {
        let keys = vec![
            ScanKey::new("price", FilterOp::Lte, 9.5),
            ScanKey::new("category", FilterOp::Eq, "book"),
            ScanKey::new("live", FilterOp::Ne, false),
        ];
        assert_eq!(
            build_filter(&keys),
            serde_json::json!({"$and": [
                {"price": {"$lte": 9.5}},
                {"category": {"$eq": "book"}},
                {"live": {"$ne": false}},
            ]})
        );
    }

    #[test]
    fn empty_keys_still_wrap_in_and() {
        assert_eq!(build_filter(&[]), serde_json::json!({"$and": []}));
    }
}
