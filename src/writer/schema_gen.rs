use super::sqlite::quote_ident;
use crate::schema::TableSpec;

/// Generate CREATE TABLE SQL for a table schema
pub fn generate_create_table(schema: &TableSpec) -> String {
    let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (\n", quote_ident(&schema.name));
    let mut columns = Vec::new();
    let primary_key = schema.primary_key();

    for col in &schema.columns {
        if schema.identity.as_deref() == Some(col.name.as_str()) {
            columns.push(format!(
                "    {} INTEGER PRIMARY KEY AUTOINCREMENT",
                quote_ident(&col.name)
            ));
            continue;
        }

        let null_constraint = if col.primary_key { " NOT NULL" } else { "" };
        columns.push(format!(
            "    {} {}{}",
            quote_ident(&col.name),
            col.col_type.sql_type(),
            null_constraint
        ));
    }

    if schema.identity.is_none() && !primary_key.is_empty() {
        let keys: Vec<String> = primary_key.iter().map(|c| quote_ident(&c.name)).collect();
        columns.push(format!("    PRIMARY KEY ({})", keys.join(", ")));
    }

    // Add foreign key constraints
    for (col, fk) in schema.foreign_keys() {
        let referenced = match &fk.references_column {
            Some(column) => format!("({})", quote_ident(column)),
            None => String::new(),
        };
        columns.push(format!(
            "    FOREIGN KEY ({}) REFERENCES {}{}",
            quote_ident(&col.name),
            quote_ident(&fk.references_table),
            referenced
        ));
    }

    sql.push_str(&columns.join(",\n"));
    sql.push_str("\n)");

    sql
}

/// Generate CREATE INDEX statements for foreign key columns
pub fn generate_indexes(schema: &TableSpec) -> Vec<String> {
    schema
        .foreign_keys()
        .map(|(col, _)| {
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                quote_ident(&format!("idx_{}_{}", schema.name, col.name)),
                quote_ident(&schema.name),
                quote_ident(&col.name)
            )
        })
        .collect()
}

/// Full DDL script for a set of tables, one statement per line group
pub fn generate_ddl<'a>(tables: impl IntoIterator<Item = &'a TableSpec>) -> String {
    let mut script = String::new();
    for table in tables {
        script.push_str(&generate_create_table(table));
        script.push_str(";\n");
        for index in generate_indexes(table) {
            script.push_str(&index);
            script.push_str(";\n");
        }
        script.push('\n');
    }
    script
}
