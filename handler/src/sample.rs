use crate::runner::{HandlerError, SingleShotRunner};
use crate::sql_utils::{fully_qualified, quote_ident};
use model::query::Row;

/// Random sample of table rows via `SAMPLE ROW (n ROWS)`.
///
/// Selects all columns when `columns` is empty.
pub async fn sample_rows(
    runner: &SingleShotRunner,
    database: &str,
    schema: &str,
    table: &str,
    sample_size: usize,
    columns: &[String],
) -> Result<Vec<Row>, HandlerError> {
    let column_list = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|column| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let sql = format!(
        "SELECT {column_list} FROM {} SAMPLE ROW ({sample_size} ROWS)",
        fully_qualified(database, schema, table)
    );
    runner.run(sql).await
}
