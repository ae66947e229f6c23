/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

pub fn qualified_schema(database: &str, schema: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(schema))
}

pub fn fully_qualified(database: &str, schema: &str, table: &str) -> String {
    format!(
        "{}.{}.{}",
        quote_ident(database),
        quote_ident(schema),
        quote_ident(table)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_quotes_are_doubled() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn qualified_names_quote_every_part() {
        assert_eq!(
            fully_qualified("DB", "PUBLIC", "events"),
            "\"DB\".\"PUBLIC\".\"events\""
        );
    }
}
