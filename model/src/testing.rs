//! Test utilities and proptest strategies for model types.
//!
//! This module is only available in tests and when the `testing` feature is
//! enabled.

use crate::query::{ColumnMeta, QueryStatus, Row};
use proptest::prelude::*;
use serde_json::json;

/// Strategy for valid status paths: `Pending` followed by valid transitions
/// until a terminal state is reached.
pub fn arb_valid_status_path() -> impl Strategy<Value = Vec<QueryStatus>> {
    Just(vec![QueryStatus::Pending]).prop_perturb(|mut states, mut rng| {
        loop {
            let current = *states.last().unwrap();
            let valid_nexts = current.transitions();
            if valid_nexts.is_empty() {
                return states;
            }

            let idx = rng.random_range(0..valid_nexts.len());
            states.push(valid_nexts[idx]);
        }
    })
}

/// Rows shaped like a single numeric column, `{"N": 0} .. {"N": count-1}`.
pub fn numbered_rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|n| {
            let mut row = Row::new();
            row.insert("N".to_string(), json!(n));
            row
        })
        .collect()
}

pub fn numbered_columns() -> Vec<ColumnMeta> {
    vec![ColumnMeta {
        name: "N".to_string(),
        data_type: "NUMBER".to_string(),
    }]
}
