const PREVIEW_MAX_CHARS: usize = 100;

/// Trim and truncate SQL text so it is safe to put in a log line.
pub fn sql_preview(sql: &str) -> String {
    let trimmed = sql.trim();
    match trimmed.char_indices().nth(PREVIEW_MAX_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
