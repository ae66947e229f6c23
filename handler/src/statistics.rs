use crate::decode::{f64_or, get, i64_or, opt_str, require_i64, variant};
use crate::runner::{HandlerError, SingleShotRunner};
use model::query::Row;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Statistics family a column is analyzed under; drives which aliased
/// aggregates exist in the generated SQL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatisticsType {
    Numeric,
    String,
    Date,
    Boolean,
}

impl StatisticsType {
    fn type_name(&self) -> &'static str {
        match self {
            StatisticsType::Numeric => "numeric",
            StatisticsType::String => "string",
            StatisticsType::Date => "date",
            StatisticsType::Boolean => "boolean",
        }
    }
}

#[derive(Clone, Debug)]
pub struct StatColumn {
    pub name: String,
    pub data_type: String,
    pub statistics_type: StatisticsType,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TopValue {
    pub value: String,
    pub count: i64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "column_type", rename_all = "lowercase")]
pub enum ColumnStats {
    Numeric {
        data_type: String,
        count: i64,
        null_count: i64,
        distinct_count_approx: i64,
        min: f64,
        max: f64,
        avg: f64,
        percentile_25: f64,
        percentile_50: f64,
        percentile_75: f64,
    },
    String {
        data_type: String,
        count: i64,
        null_count: i64,
        distinct_count_approx: i64,
        min_length: i64,
        max_length: i64,
        top_values: Vec<TopValue>,
    },
    Date {
        data_type: String,
        count: i64,
        null_count: i64,
        distinct_count_approx: i64,
        min: Option<String>,
        max: Option<String>,
        date_range_days: i64,
    },
    Boolean {
        data_type: String,
        count: i64,
        null_count: i64,
        true_count: i64,
        false_count: i64,
        true_percentage: f64,
        false_percentage: f64,
        true_percentage_with_nulls: f64,
        false_percentage_with_nulls: f64,
    },
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TableStatistics {
    pub total_rows: i64,
    pub columns: BTreeMap<String, ColumnStats>,
}

/// Run an externally-generated statistics aggregation (one row of aliased
/// aggregates) and parse it into per-column statistics.
pub async fn analyze_table_statistics(
    runner: &SingleShotRunner,
    sql: &str,
    columns: &[StatColumn],
) -> Result<TableStatistics, HandlerError> {
    let row = runner.run_single_row(sql).await?;
    parse_statistics_row(&row, columns)
}

/// The aggregation aliases every metric as `<type>_<column>_<metric>`,
/// uppercased by the server.
pub fn parse_statistics_row(
    row: &Row,
    columns: &[StatColumn],
) -> Result<TableStatistics, HandlerError> {
    let total_rows = require_i64(row, "TOTAL_ROWS")?;

    let mut parsed = BTreeMap::new();
    for column in columns {
        let prefix = format!("{}_{}", column.statistics_type.type_name(), column.name).to_uppercase();
        let data_type = column.data_type.clone();

        let stats = match column.statistics_type {
            StatisticsType::Numeric => ColumnStats::Numeric {
                data_type,
                count: require_i64(row, &format!("{prefix}_COUNT"))?,
                null_count: require_i64(row, &format!("{prefix}_NULL_COUNT"))?,
                distinct_count_approx: i64_or(row, &format!("{prefix}_DISTINCT"), 0),
                min: f64_or(row, &format!("{prefix}_MIN"), 0.0),
                max: f64_or(row, &format!("{prefix}_MAX"), 0.0),
                avg: f64_or(row, &format!("{prefix}_AVG"), 0.0),
                percentile_25: f64_or(row, &format!("{prefix}_Q1"), 0.0),
                percentile_50: f64_or(row, &format!("{prefix}_MEDIAN"), 0.0),
                percentile_75: f64_or(row, &format!("{prefix}_Q3"), 0.0),
            },
            StatisticsType::String => ColumnStats::String {
                data_type,
                count: require_i64(row, &format!("{prefix}_COUNT"))?,
                null_count: require_i64(row, &format!("{prefix}_NULL_COUNT"))?,
                distinct_count_approx: i64_or(row, &format!("{prefix}_DISTINCT"), 0),
                min_length: i64_or(row, &format!("{prefix}_MIN_LENGTH"), 0),
                max_length: i64_or(row, &format!("{prefix}_MAX_LENGTH"), 0),
                top_values: parse_top_values(row, &format!("{prefix}_TOP_VALUES"))?,
            },
            StatisticsType::Date => ColumnStats::Date {
                data_type,
                count: require_i64(row, &format!("{prefix}_COUNT"))?,
                null_count: require_i64(row, &format!("{prefix}_NULL_COUNT"))?,
                distinct_count_approx: i64_or(row, &format!("{prefix}_DISTINCT"), 0),
                min: opt_str(row, &format!("{prefix}_MIN")),
                max: opt_str(row, &format!("{prefix}_MAX")),
                date_range_days: i64_or(row, &format!("{prefix}_RANGE_DAYS"), 0),
            },
            StatisticsType::Boolean => ColumnStats::Boolean {
                data_type,
                count: require_i64(row, &format!("{prefix}_COUNT"))?,
                null_count: require_i64(row, &format!("{prefix}_NULL_COUNT"))?,
                true_count: i64_or(row, &format!("{prefix}_TRUE_COUNT"), 0),
                false_count: i64_or(row, &format!("{prefix}_FALSE_COUNT"), 0),
                true_percentage: f64_or(row, &format!("{prefix}_TRUE_PERCENTAGE"), 0.0),
                false_percentage: f64_or(row, &format!("{prefix}_FALSE_PERCENTAGE"), 0.0),
                true_percentage_with_nulls: f64_or(
                    row,
                    &format!("{prefix}_TRUE_PERCENTAGE_WITH_NULLS"),
                    0.0,
                ),
                false_percentage_with_nulls: f64_or(
                    row,
                    &format!("{prefix}_FALSE_PERCENTAGE_WITH_NULLS"),
                    0.0,
                ),
            },
        };
        parsed.insert(column.name.clone(), stats);
    }

    Ok(TableStatistics {
        total_rows,
        columns: parsed,
    })
}

/// `APPROX_TOP_K` comes back as a VARIANT array of `[value, count]` pairs.
fn parse_top_values(row: &Row, key: &str) -> Result<Vec<TopValue>, HandlerError> {
    let Some(raw) = get(row, key) else {
        return Ok(Vec::new());
    };
    let parsed = variant(raw, key)?;
    let Value::Array(pairs) = parsed else {
        return Ok(Vec::new());
    };

    pairs
        .into_iter()
        .map(|pair| match pair {
            Value::Array(pair) if pair.len() == 2 => {
                let value = match &pair[0] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let count = pair[1]
                    .as_i64()
                    .ok_or_else(|| HandlerError::Decode(format!("{key} count is not an integer")))?;
                Ok(TopValue { value, count })
            }
            other => Err(HandlerError::Decode(format!(
                "{key} entry has unexpected shape: {other}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_utils::row;

    fn columns() -> Vec<StatColumn> {
        vec![
            StatColumn {
                name: "amount".into(),
                data_type: "NUMBER(10,2)".into(),
                statistics_type: StatisticsType::Numeric,
            },
            StatColumn {
                name: "status".into(),
                data_type: "VARCHAR".into(),
                statistics_type: StatisticsType::String,
            },
        ]
    }

    #[test]
    fn parses_numeric_and_string_statistics() {
        let row = row(&[
            ("TOTAL_ROWS", json!(100)),
            ("NUMERIC_AMOUNT_COUNT", json!(90)),
            ("NUMERIC_AMOUNT_NULL_COUNT", json!(10)),
            ("NUMERIC_AMOUNT_DISTINCT", json!(42)),
            ("NUMERIC_AMOUNT_MIN", json!(0.5)),
            ("NUMERIC_AMOUNT_MAX", json!(99.5)),
            ("NUMERIC_AMOUNT_AVG", json!(50.0)),
            ("NUMERIC_AMOUNT_Q1", json!(25.0)),
            ("NUMERIC_AMOUNT_MEDIAN", json!(50.0)),
            ("NUMERIC_AMOUNT_Q3", json!(75.0)),
            ("STRING_STATUS_COUNT", json!(100)),
            ("STRING_STATUS_NULL_COUNT", json!(0)),
            ("STRING_STATUS_DISTINCT", json!(3)),
            ("STRING_STATUS_MIN_LENGTH", json!(4)),
            ("STRING_STATUS_MAX_LENGTH", json!(9)),
            ("STRING_STATUS_TOP_VALUES", json!("[[\"open\", 60], [\"closed\", 40]]")),
        ]);

        let stats = parse_statistics_row(&row, &columns()).unwrap();
        assert_eq!(stats.total_rows, 100);

        match &stats.columns["amount"] {
            ColumnStats::Numeric { count, null_count, avg, .. } => {
                assert_eq!(*count, 90);
                assert_eq!(*null_count, 10);
                assert_eq!(*avg, 50.0);
            }
            other => panic!("expected numeric stats, got {other:?}"),
        }

        match &stats.columns["status"] {
            ColumnStats::String { top_values, .. } => {
                assert_eq!(
                    top_values[0],
                    TopValue {
                        value: "open".into(),
                        count: 60
                    }
                );
            }
            other => panic!("expected string stats, got {other:?}"),
        }
    }

    #[test]
    fn parses_date_and_boolean_statistics() {
        let row = row(&[
            ("TOTAL_ROWS", json!(50)),
            ("DATE_CREATED_COUNT", json!(48)),
            ("DATE_CREATED_NULL_COUNT", json!(2)),
            ("DATE_CREATED_DISTINCT", json!(30)),
            ("DATE_CREATED_MIN", json!("2024-01-01")),
            ("DATE_CREATED_MAX", json!("2024-03-31")),
            ("DATE_CREATED_RANGE_DAYS", json!(90)),
            ("BOOLEAN_ACTIVE_COUNT", json!(40)),
            ("BOOLEAN_ACTIVE_NULL_COUNT", json!(10)),
            ("BOOLEAN_ACTIVE_TRUE_COUNT", json!(30)),
            ("BOOLEAN_ACTIVE_FALSE_COUNT", json!(10)),
            ("BOOLEAN_ACTIVE_TRUE_PERCENTAGE", json!(75.0)),
            ("BOOLEAN_ACTIVE_FALSE_PERCENTAGE", json!(25.0)),
            ("BOOLEAN_ACTIVE_TRUE_PERCENTAGE_WITH_NULLS", json!(60.0)),
            ("BOOLEAN_ACTIVE_FALSE_PERCENTAGE_WITH_NULLS", json!(20.0)),
        ]);
        let columns = vec![
            StatColumn {
                name: "created".into(),
                data_type: "DATE".into(),
                statistics_type: StatisticsType::Date,
            },
            StatColumn {
                name: "active".into(),
                data_type: "BOOLEAN".into(),
                statistics_type: StatisticsType::Boolean,
            },
        ];

        let stats = parse_statistics_row(&row, &columns).unwrap();

        match &stats.columns["created"] {
            ColumnStats::Date {
                distinct_count_approx,
                min,
                max,
                date_range_days,
                ..
            } => {
                assert_eq!(*distinct_count_approx, 30);
                assert_eq!(min.as_deref(), Some("2024-01-01"));
                assert_eq!(max.as_deref(), Some("2024-03-31"));
                assert_eq!(*date_range_days, 90);
            }
            other => panic!("expected date stats, got {other:?}"),
        }

        match &stats.columns["active"] {
            ColumnStats::Boolean {
                true_count,
                true_percentage,
                false_percentage,
                true_percentage_with_nulls,
                false_percentage_with_nulls,
                ..
            } => {
                assert_eq!(*true_count, 30);
                assert_eq!(*true_percentage, 75.0);
                assert_eq!(*false_percentage, 25.0);
                assert_eq!(*true_percentage_with_nulls, 60.0);
                assert_eq!(*false_percentage_with_nulls, 20.0);
            }
            other => panic!("expected boolean stats, got {other:?}"),
        }
    }

    #[test]
    fn missing_aggregate_is_a_decode_error() {
        let row = row(&[("TOTAL_ROWS", json!(1))]);
        let error = parse_statistics_row(&row, &columns()).unwrap_err();
        assert!(matches!(error, HandlerError::Decode(_)));
    }
}
