//! SQL text for the schema operations the pipeline performs.
//!
//! Statements are rendered for logs, dry runs and reports; the built-in
//! warehouse backends execute the operations directly.

use super::{ColumnDef, TableRef};
use crate::sanitize::CanonicalIdentifier;

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn create_table(table: &TableRef, columns: &[ColumnDef]) -> String {
    let body = columns
        .iter()
        .map(|column| format!("{} {}", quote_identifier(column.name.as_str()), column.data_type))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {table} ({body})")
}

pub fn add_column(table: &TableRef, column: &ColumnDef) -> String {
    format!(
        "ALTER TABLE {table} ADD COLUMN {} {}",
        quote_identifier(column.name.as_str()),
        column.data_type
    )
}

pub fn drop_column(table: &TableRef, column: &CanonicalIdentifier) -> String {
    format!(
        "ALTER TABLE {table} DROP COLUMN {}",
        quote_identifier(column.as_str())
    )
}

pub fn clone_table(snapshot: &TableRef, source: &TableRef) -> String {
    format!("CREATE TABLE {snapshot} CLONE {source}")
}

pub fn truncate_table(table: &TableRef) -> String {
    format!("TRUNCATE TABLE {table}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::ColumnType;

    fn column(name: &str, data_type: ColumnType) -> ColumnDef {
        ColumnDef::new(CanonicalIdentifier::from_existing(name), data_type)
    }

    #[test]
    fn renders_alterations() {
        let table = TableRef::new("LWS", "PUBLIC", "PROJECTS");
        assert_eq!(
            add_column(&table, &column("NOTES", ColumnType::Varchar { length: 255 })),
            "ALTER TABLE LWS.PUBLIC.PROJECTS ADD COLUMN \"NOTES\" VARCHAR(255)"
        );
        assert_eq!(
            drop_column(&table, &CanonicalIdentifier::from_existing("OLD_FIELD")),
            "ALTER TABLE LWS.PUBLIC.PROJECTS DROP COLUMN \"OLD_FIELD\""
        );
    }

    #[test]
    fn renders_create_with_column_types_in_order() {
        let table = TableRef::new("LWS", "PUBLIC", "LEADS");
        let sql = create_table(
            &table,
            &[
                column("ID", ColumnType::Number { precision: 5 }),
                column("Signed_On", ColumnType::Date),
            ],
        );
        assert_eq!(
            sql,
            "CREATE TABLE LWS.PUBLIC.LEADS (\"ID\" NUMBER(5), \"Signed_On\" DATE)"
        );
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
