use crate::decode::opt_str;
use crate::runner::{HandlerError, SingleShotRunner};
use crate::sql_utils::fully_qualified;
use serde::Serialize;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub comment: Option<String>,
    pub ordinal_position: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TableInfo {
    pub database: String,
    pub schema: String,
    pub name: String,
    pub column_count: usize,
    pub columns: Vec<TableColumn>,
}

/// Structure of a table via `DESCRIBE TABLE`.
pub async fn describe_table(
    runner: &SingleShotRunner,
    database: &str,
    schema: &str,
    table: &str,
) -> Result<TableInfo, HandlerError> {
    let sql = format!(
        "DESCRIBE TABLE {}",
        fully_qualified(database, schema, table)
    );
    let rows = runner.run(sql).await?;

    // DESCRIBE TABLE rows carry: name, type, kind, null?, default, comment, ...
    let columns: Vec<TableColumn> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| TableColumn {
            name: opt_str(row, "name").unwrap_or_default(),
            data_type: opt_str(row, "type").unwrap_or_default(),
            nullable: opt_str(row, "null?").as_deref() != Some("N"),
            default_value: opt_str(row, "default"),
            comment: opt_str(row, "comment"),
            ordinal_position: i + 1,
        })
        .collect();

    Ok(TableInfo {
        database: database.to_string(),
        schema: schema.to_string(),
        name: table.to_string(),
        column_count: columns.len(),
        columns,
    })
}
