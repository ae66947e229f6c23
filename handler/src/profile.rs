use crate::decode::{f64_or, get, i64_or, opt_str, require_i64, variant};
use crate::runner::{HandlerError, SingleShotRunner};
use model::query::Row;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SemiStructuredType {
    Variant,
    Array,
    Object,
}

/// One column of the profiling request. Every statement is generated
/// externally; this handler only executes and parses.
#[derive(Clone, Debug)]
pub struct ColumnProfilePlan {
    pub name: String,
    pub column_type: SemiStructuredType,
    pub profile_sql: String,
    /// Set for OBJECT/VARIANT columns.
    pub top_level_keys_sql: Option<String>,
    /// Set when path stats were requested.
    pub path_profile_sql: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ProfileRequest {
    pub total_rows_sql: String,
    pub sampled_rows_sql: String,
    pub columns: Vec<ColumnProfilePlan>,
    pub max_depth: usize,
    pub include_path_stats: bool,
    pub include_value_samples: bool,
}

/// Top value entry; the value itself may be SQL NULL.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TopValue {
    pub value: Option<String>,
    pub count: i64,
}

/// How the sampled values of a VARIANT/ARRAY/OBJECT column distribute over
/// top-level types.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct TypeDistribution {
    pub object: i64,
    pub array: i64,
    pub string: i64,
    pub number: i64,
    pub boolean: i64,
    pub null: i64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ArrayLengthStats {
    pub min: i64,
    pub max: i64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ColumnProfile {
    pub column_type: SemiStructuredType,
    pub null_count: i64,
    pub non_null_count: i64,
    pub null_ratio: f64,
    pub type_distribution: TypeDistribution,
    /// Present only when the sample contained arrays.
    pub array_length: Option<ArrayLengthStats>,
    /// Present only for OBJECT/VARIANT columns.
    pub top_level_keys_top_k: Option<Vec<TopValue>>,
}

/// Per-path statistics of one column, grouped from the path-level rows.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PathProfile {
    pub column: String,
    pub path: String,
    pub path_depth: i64,
    pub value_type_distribution: BTreeMap<String, i64>,
    pub distinct_count_approx: i64,
    pub null_ratio: f64,
    /// Present only when value samples were requested and the path had any.
    pub top_values: Option<Vec<TopValue>>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SemiStructuredProfile {
    pub total_rows: i64,
    pub sampled_rows: i64,
    pub column_profiles: BTreeMap<String, ColumnProfile>,
    pub path_profiles: Vec<PathProfile>,
    pub warnings: Vec<String>,
}

/// Profile the semi-structured columns of one table: row counts, a
/// column-level aggregate per column, top-level keys for OBJECT/VARIANT
/// columns, and an optional path-level pass.
pub async fn profile_semi_structured_columns(
    runner: &SingleShotRunner,
    request: &ProfileRequest,
) -> Result<SemiStructuredProfile, HandlerError> {
    let total_rows = {
        let row = runner.run_single_row(request.total_rows_sql.clone()).await?;
        require_i64(&row, "TOTAL_ROWS")?
    };
    let sampled_rows = {
        let row = runner.run_single_row(request.sampled_rows_sql.clone()).await?;
        require_i64(&row, "SAMPLED_ROWS")?
    };

    let mut column_profiles = BTreeMap::new();
    let mut path_profiles = Vec::new();

    for column in &request.columns {
        let row = runner.run_single_row(column.profile_sql.clone()).await?;
        let mut profile = parse_column_profile(&row, column.column_type)?;

        if let Some(sql) = &column.top_level_keys_sql {
            let rows = runner.run(sql.clone()).await?;
            let top_keys = match rows.first().and_then(|row| get(row, "TOP_LEVEL_KEYS_TOP_K")) {
                Some(raw) => parse_top_values(raw, "TOP_LEVEL_KEYS_TOP_K")?,
                None => Vec::new(),
            };
            profile.top_level_keys_top_k = Some(top_keys);
        }
        column_profiles.insert(column.name.clone(), profile);

        if let Some(sql) = &column.path_profile_sql {
            let rows = runner.run(sql.clone()).await?;
            path_profiles.extend(parse_path_profile_rows(
                &rows,
                &column.name,
                request.include_value_samples,
            )?);
        }
    }

    let mut warnings = Vec::new();
    if sampled_rows < total_rows {
        warnings.push(format!(
            "Approximate profile based on SAMPLE ROW: sampled_rows={sampled_rows}, total_rows={total_rows}"
        ));
    }
    if request.include_path_stats {
        warnings.push(format!(
            "Path profiling is limited to max_depth={}",
            request.max_depth
        ));
    }
    if request.include_path_stats && !request.include_value_samples {
        warnings.push("Path top_values are omitted because include_value_samples is false".to_string());
    }

    Ok(SemiStructuredProfile {
        total_rows,
        sampled_rows,
        column_profiles,
        path_profiles,
        warnings,
    })
}

/// Parse one row of the column-level aggregate.
pub fn parse_column_profile(
    row: &Row,
    column_type: SemiStructuredType,
) -> Result<ColumnProfile, HandlerError> {
    let null_count = require_i64(row, "NULL_COUNT")?;
    let non_null_count = require_i64(row, "NON_NULL_COUNT")?;
    let null_ratio = f64_or(row, "NULL_RATIO", 0.0);

    let type_distribution = match get(row, "TOP_LEVEL_TYPE_DISTRIBUTION") {
        Some(raw) => parse_type_distribution(&variant(raw, "TOP_LEVEL_TYPE_DISTRIBUTION")?)?,
        None => TypeDistribution::default(),
    };

    // Array length stats only exist when the sample contained arrays
    let has_array_stats = [
        "ARRAY_LENGTH_MIN",
        "ARRAY_LENGTH_MAX",
        "ARRAY_LENGTH_P25",
        "ARRAY_LENGTH_P50",
        "ARRAY_LENGTH_P75",
    ]
    .iter()
    .any(|key| !matches!(get(row, key), Some(Value::Null) | None));
    let array_length = has_array_stats.then(|| ArrayLengthStats {
        min: i64_or(row, "ARRAY_LENGTH_MIN", 0),
        max: i64_or(row, "ARRAY_LENGTH_MAX", 0),
        p25: f64_or(row, "ARRAY_LENGTH_P25", 0.0),
        p50: f64_or(row, "ARRAY_LENGTH_P50", 0.0),
        p75: f64_or(row, "ARRAY_LENGTH_P75", 0.0),
    });

    Ok(ColumnProfile {
        column_type,
        null_count,
        non_null_count,
        null_ratio,
        type_distribution,
        array_length,
        top_level_keys_top_k: None,
    })
}

/// Group path-level rows (one per path and value type) into one entry per
/// path, sorted by `(path_depth, path)`.
pub fn parse_path_profile_rows(
    rows: &[Row],
    column_name: &str,
    include_value_samples: bool,
) -> Result<Vec<PathProfile>, HandlerError> {
    let mut grouped: BTreeMap<String, PathProfile> = BTreeMap::new();

    for row in rows {
        let path = opt_str(row, "PATH").unwrap_or_else(|| "$".to_string());
        let entry = grouped.entry(path.clone()).or_insert_with(|| PathProfile {
            column: column_name.to_string(),
            path,
            path_depth: i64_or(row, "PATH_DEPTH", 1),
            value_type_distribution: BTreeMap::new(),
            distinct_count_approx: i64_or(row, "DISTINCT_COUNT_APPROX", 0),
            null_ratio: f64_or(row, "NULL_RATIO", 0.0),
            top_values: None,
        });

        let value_type = opt_str(row, "VALUE_TYPE").unwrap_or_else(|| "UNKNOWN".to_string());
        let value_count = i64_or(row, "VALUE_COUNT", 0);
        entry.value_type_distribution.insert(value_type, value_count);

        if include_value_samples && entry.top_values.is_none() {
            if let Some(raw) = get(row, "TOP_VALUES") {
                let top_values = parse_top_values(raw, "TOP_VALUES")?;
                if !top_values.is_empty() {
                    entry.top_values = Some(top_values);
                }
            }
        }
    }

    let mut profiles: Vec<PathProfile> = grouped.into_values().collect();
    profiles.sort_by(|a, b| (a.path_depth, &a.path).cmp(&(b.path_depth, &b.path)));
    Ok(profiles)
}

/// Top values arrive from `APPROX_TOP_K` as `[value, count]` pairs or from
/// `ARRAY_AGG` as `{value, count}` objects.
fn parse_top_values(raw: &Value, field: &str) -> Result<Vec<TopValue>, HandlerError> {
    let parsed = variant(raw, field)?;
    let pairs = match parsed {
        Value::Null => return Ok(Vec::new()),
        Value::Array(pairs) => pairs,
        _ => {
            return Err(HandlerError::Decode(format!(
                "{field} has unexpected shape"
            )))
        }
    };

    pairs
        .into_iter()
        .map(|item| {
            let (value_raw, count_raw) = match item {
                Value::Array(pair) if pair.len() == 2 => {
                    let mut pair = pair.into_iter();
                    (pair.next().unwrap(), pair.next().unwrap())
                }
                Value::Object(map) => {
                    let value = map
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("value"))
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Null);
                    let count = map
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("count"))
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Null);
                    (value, count)
                }
                other => {
                    return Err(HandlerError::Decode(format!(
                        "invalid top value entry in {field}: {other}"
                    )))
                }
            };

            let value = match value_raw {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            };
            let count = match &count_raw {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            }
            .ok_or_else(|| HandlerError::Decode(format!("invalid top value count in {field}")))?;

            Ok(TopValue { value, count })
        })
        .collect()
}

fn parse_type_distribution(parsed: &Value) -> Result<TypeDistribution, HandlerError> {
    let Value::Object(map) = parsed else {
        return Err(HandlerError::Decode(
            "TOP_LEVEL_TYPE_DISTRIBUTION has unexpected shape".to_string(),
        ));
    };

    let read = |key: &str| -> i64 {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_i64())
            .unwrap_or(0)
    };

    Ok(TypeDistribution {
        object: read("OBJECT"),
        array: read("ARRAY"),
        string: read("STRING"),
        number: read("NUMBER"),
        boolean: read("BOOLEAN"),
        null: read("NULL"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use driver::BlockingExecutor;
    use serde_json::json;
    use std::sync::Arc;
    use test_utils::{row, MockProvider};

    fn profile_row() -> Row {
        row(&[
            ("NULL_COUNT", json!(5)),
            ("NON_NULL_COUNT", json!(95)),
            ("NULL_RATIO", json!(0.05)),
            (
                "TOP_LEVEL_TYPE_DISTRIBUTION",
                json!({"OBJECT": 60, "ARRAY": 35, "STRING": 0, "NUMBER": 0, "BOOLEAN": 0, "NULL": 5}),
            ),
            ("ARRAY_LENGTH_MIN", json!(1)),
            ("ARRAY_LENGTH_MAX", json!(12)),
            ("ARRAY_LENGTH_P25", json!(2.0)),
            ("ARRAY_LENGTH_P50", json!(4.0)),
            ("ARRAY_LENGTH_P75", json!(7.5)),
        ])
    }

    #[test]
    fn parses_a_profile_row_with_arrays() {
        let profile = parse_column_profile(&profile_row(), SemiStructuredType::Variant).unwrap();
        assert_eq!(profile.null_count, 5);
        assert_eq!(profile.type_distribution.object, 60);
        assert_eq!(profile.type_distribution.array, 35);
        let lengths = profile.array_length.unwrap();
        assert_eq!(lengths.min, 1);
        assert_eq!(lengths.p75, 7.5);
        assert!(profile.top_level_keys_top_k.is_none());
    }

    #[test]
    fn arrayless_samples_omit_length_stats() {
        let row = row(&[
            ("NULL_COUNT", json!(0)),
            ("NON_NULL_COUNT", json!(10)),
            ("NULL_RATIO", json!(0.0)),
            (
                // VARIANT may arrive as a JSON string
                "TOP_LEVEL_TYPE_DISTRIBUTION",
                json!("{\"OBJECT\": 10, \"ARRAY\": 0}"),
            ),
            ("ARRAY_LENGTH_MIN", json!(null)),
        ]);

        let profile = parse_column_profile(&row, SemiStructuredType::Object).unwrap();
        assert_eq!(profile.type_distribution.object, 10);
        assert!(profile.array_length.is_none());
    }

    #[test]
    fn groups_path_rows_and_sorts_by_depth() {
        let rows = vec![
            row(&[
                ("PATH", json!("$.b")),
                ("PATH_DEPTH", json!(2)),
                ("VALUE_TYPE", json!("NUMBER")),
                ("VALUE_COUNT", json!(7)),
                ("DISTINCT_COUNT_APPROX", json!(4)),
                ("NULL_RATIO", json!(0.1)),
                ("TOP_VALUES", json!("[[\"1\", 5], [null, 2]]")),
            ]),
            row(&[
                ("PATH", json!("$.b")),
                ("PATH_DEPTH", json!(2)),
                ("VALUE_TYPE", json!("STRING")),
                ("VALUE_COUNT", json!(3)),
                ("DISTINCT_COUNT_APPROX", json!(4)),
                ("NULL_RATIO", json!(0.1)),
            ]),
            row(&[
                ("PATH", json!("$")),
                ("PATH_DEPTH", json!(1)),
                ("VALUE_TYPE", json!("OBJECT")),
                ("VALUE_COUNT", json!(10)),
                ("DISTINCT_COUNT_APPROX", json!(10)),
                ("NULL_RATIO", json!(0.0)),
            ]),
        ];

        let profiles = parse_path_profile_rows(&rows, "PAYLOAD", true).unwrap();
        assert_eq!(profiles.len(), 2);

        // Sorted by (path_depth, path)
        assert_eq!(profiles[0].path, "$");
        assert_eq!(profiles[1].path, "$.b");

        let nested = &profiles[1];
        assert_eq!(nested.column, "PAYLOAD");
        assert_eq!(nested.value_type_distribution["NUMBER"], 7);
        assert_eq!(nested.value_type_distribution["STRING"], 3);
        assert_eq!(
            nested.top_values.as_deref(),
            Some(
                &[
                    TopValue {
                        value: Some("1".into()),
                        count: 5
                    },
                    TopValue {
                        value: None,
                        count: 2
                    }
                ][..]
            )
        );
    }

    #[test]
    fn value_samples_are_skipped_when_not_requested() {
        let rows = vec![row(&[
            ("PATH", json!("$.a")),
            ("PATH_DEPTH", json!(2)),
            ("VALUE_TYPE", json!("STRING")),
            ("VALUE_COUNT", json!(1)),
            ("TOP_VALUES", json!("[[\"x\", 1]]")),
        ])];

        let profiles = parse_path_profile_rows(&rows, "PAYLOAD", false).unwrap();
        assert!(profiles[0].top_values.is_none());
    }

    #[tokio::test]
    async fn profiles_columns_end_to_end() {
        let provider = MockProvider::new();
        // Queued in execution order: total, sampled, column profile,
        // top-level keys, path rows
        provider.push_execute_result(Ok(vec![row(&[("TOTAL_ROWS", json!(1000))])]));
        provider.push_execute_result(Ok(vec![row(&[("SAMPLED_ROWS", json!(100))])]));
        provider.push_execute_result(Ok(vec![profile_row()]));
        provider.push_execute_result(Ok(vec![row(&[(
            "TOP_LEVEL_KEYS_TOP_K",
            json!([["id", 95], ["tags", 40]]),
        )])]));
        provider.push_execute_result(Ok(vec![row(&[
            ("PATH", json!("$.id")),
            ("PATH_DEPTH", json!(2)),
            ("VALUE_TYPE", json!("NUMBER")),
            ("VALUE_COUNT", json!(95)),
            ("DISTINCT_COUNT_APPROX", json!(95)),
            ("NULL_RATIO", json!(0.0)),
        ])]));

        let runner = SingleShotRunner::new(
            Arc::new(provider.clone()),
            Arc::new(BlockingExecutor::new(2)),
        );
        let request = ProfileRequest {
            total_rows_sql: "SELECT COUNT(*) AS TOTAL_ROWS FROM t".into(),
            sampled_rows_sql: "SELECT COUNT(*) AS SAMPLED_ROWS FROM t SAMPLE ROW (100 ROWS)".into(),
            columns: vec![ColumnProfilePlan {
                name: "PAYLOAD".into(),
                column_type: SemiStructuredType::Variant,
                profile_sql: "WITH sampled AS (...) SELECT ...".into(),
                top_level_keys_sql: Some("SELECT ... AS TOP_LEVEL_KEYS_TOP_K".into()),
                path_profile_sql: Some("SELECT ... path rows".into()),
            }],
            max_depth: 3,
            include_path_stats: true,
            include_value_samples: false,
        };

        let result = profile_semi_structured_columns(&runner, &request)
            .await
            .unwrap();

        assert_eq!(result.total_rows, 1000);
        assert_eq!(result.sampled_rows, 100);

        let payload = &result.column_profiles["PAYLOAD"];
        assert_eq!(payload.column_type, SemiStructuredType::Variant);
        assert_eq!(
            payload.top_level_keys_top_k.as_deref(),
            Some(
                &[
                    TopValue {
                        value: Some("id".into()),
                        count: 95
                    },
                    TopValue {
                        value: Some("tags".into()),
                        count: 40
                    }
                ][..]
            )
        );

        assert_eq!(result.path_profiles.len(), 1);
        assert_eq!(result.path_profiles[0].path, "$.id");
        assert_eq!(result.path_profiles[0].distinct_count_approx, 95);

        // Sampled < total, path stats on, value samples off
        assert_eq!(result.warnings.len(), 3);
        assert!(result.warnings[0].contains("sampled_rows=100"));
        assert!(result.warnings[1].contains("max_depth=3"));
        assert!(result.warnings[2].contains("include_value_samples"));

        // One fresh connection per statement, all released
        assert_eq!(provider.connections_created(), 5);
        assert_eq!(provider.total_close_calls(), 5);
    }
}
