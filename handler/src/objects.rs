use crate::name_filter::{apply_name_filter, NameFilter};
use crate::runner::{HandlerError, SingleShotRunner};
use crate::sql_utils::{qualified_schema, quote_ident};
use model::query::Row;

/// Schema names of a database, sorted.
pub async fn list_schemas(
    runner: &SingleShotRunner,
    database: &str,
) -> Result<Vec<String>, HandlerError> {
    let sql = format!("SHOW SCHEMAS IN DATABASE {}", quote_ident(database));
    Ok(decode_names(runner.run(sql).await?))
}

/// Table names of a schema, sorted, with an optional substring filter.
pub async fn list_tables(
    runner: &SingleShotRunner,
    database: &str,
    schema: &str,
    filter: Option<&NameFilter>,
) -> Result<Vec<String>, HandlerError> {
    let sql = format!(
        "SHOW TABLES IN SCHEMA {}",
        qualified_schema(database, schema)
    );
    Ok(apply_name_filter(decode_names(runner.run(sql).await?), filter))
}

/// Role names visible to the current session, sorted.
pub async fn list_roles(runner: &SingleShotRunner) -> Result<Vec<String>, HandlerError> {
    Ok(decode_names(runner.run("SHOW ROLES").await?))
}

/// Warehouse names visible to the current session, sorted.
pub async fn list_warehouses(runner: &SingleShotRunner) -> Result<Vec<String>, HandlerError> {
    Ok(decode_names(runner.run("SHOW WAREHOUSES").await?))
}

/// View names of a schema, sorted, with an optional substring filter.
pub async fn list_views(
    runner: &SingleShotRunner,
    database: &str,
    schema: &str,
    filter: Option<&NameFilter>,
) -> Result<Vec<String>, HandlerError> {
    let sql = format!("SHOW VIEWS IN SCHEMA {}", qualified_schema(database, schema));
    Ok(apply_name_filter(decode_names(runner.run(sql).await?), filter))
}

/// SHOW commands put the object name in a `name` column; fall back to the
/// first value for drivers that rename it.
fn decode_names(rows: Vec<Row>) -> Vec<String> {
    let mut names: Vec<String> = rows
        .into_iter()
        .filter_map(|row| {
            crate::decode::opt_str(&row, "name")
                .or_else(|| crate::decode::opt_str(&row, "table_name"))
                .or_else(|| row.values().next().map(value_to_name))
        })
        .collect();
    names.sort();
    names
}

fn value_to_name(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driver::BlockingExecutor;
    use serde_json::json;
    use std::sync::Arc;
    use test_utils::{row, MockProvider};

    fn runner(provider: &MockProvider) -> SingleShotRunner {
        SingleShotRunner::new(
            Arc::new(provider.clone()),
            Arc::new(BlockingExecutor::new(2)),
        )
    }

    #[tokio::test]
    async fn lists_sorted_table_names() {
        let provider = MockProvider::new();
        provider.push_execute_result(Ok(vec![
            row(&[("name", json!("USERS"))]),
            row(&[("name", json!("ORDERS"))]),
        ]));

        let tables = list_tables(&runner(&provider), "DB", "PUBLIC", None)
            .await
            .unwrap();
        assert_eq!(tables, vec!["ORDERS".to_string(), "USERS".to_string()]);
    }

    #[tokio::test]
    async fn applies_the_name_filter() {
        let provider = MockProvider::new();
        provider.push_execute_result(Ok(vec![
            row(&[("name", json!("ORDERS"))]),
            row(&[("name", json!("USERS"))]),
        ]));

        let filter = NameFilter::Contains {
            value: "use".into(),
        };
        let tables = list_tables(&runner(&provider), "DB", "PUBLIC", Some(&filter))
            .await
            .unwrap();
        assert_eq!(tables, vec!["USERS".to_string()]);
    }

    #[tokio::test]
    async fn lists_roles_and_warehouses() {
        let provider = MockProvider::new();
        provider.push_execute_result(Ok(vec![
            row(&[("name", json!("SYSADMIN"))]),
            row(&[("name", json!("ANALYST"))]),
        ]));
        provider.push_execute_result(Ok(vec![row(&[("name", json!("COMPUTE_WH"))])]));
        let runner = runner(&provider);

        let roles = list_roles(&runner).await.unwrap();
        assert_eq!(roles, vec!["ANALYST".to_string(), "SYSADMIN".to_string()]);

        let warehouses = list_warehouses(&runner).await.unwrap();
        assert_eq!(warehouses, vec!["COMPUTE_WH".to_string()]);
    }

    #[tokio::test]
    async fn falls_back_to_the_first_column() {
        let provider = MockProvider::new();
        provider.push_execute_result(Ok(vec![row(&[("SCHEMA_NAME", json!("PUBLIC"))])]));

        let schemas = list_schemas(&runner(&provider), "DB").await.unwrap();
        assert_eq!(schemas, vec!["PUBLIC".to_string()]);
    }
}
