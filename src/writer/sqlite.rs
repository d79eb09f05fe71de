use rusqlite::Connection;
use std::path::Path;
use tracing::info;

use super::schema_gen::{generate_create_table, generate_indexes};
use crate::error::Result;
use crate::parser::Row;
use crate::schema::TableSpec;

/// Open (or create) the working database, tuned for bulk inserts.
pub fn open_database(db_path: Option<&Path>) -> Result<Connection> {
    let conn = match db_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)?
        }
        None => Connection::open_in_memory()?,
    };
    configure(&conn)?;
    Ok(conn)
}

/// Enable foreign keys and optimize for bulk insert
pub fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;",
    )?;
    Ok(())
}

/// Create all tables for the given schemas
pub fn create_tables<'a>(
    conn: &Connection,
    schemas: impl IntoIterator<Item = &'a TableSpec>,
) -> Result<()> {
    for schema in schemas {
        info!(table = %schema.name, "creating table");
        conn.execute(&generate_create_table(schema), [])?;

        for index_sql in generate_indexes(schema) {
            conn.execute(&index_sql, [])?;
        }
    }

    Ok(())
}

/// Quote an identifier for SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// INSERT statement for the given columns
pub fn insert_sql(table: &str, columns: &[String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

/// Insert a batch of rows inside one transaction and commit it.
pub fn insert_batch(conn: &mut Connection, sql: &str, batch: &[Row]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(sql)?;
        for row in batch {
            for (idx, value) in row.iter().enumerate() {
                value.bind_to(idx + 1, &mut stmt)?;
            }
            stmt.raw_execute()?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Number of rows currently stored in a table
pub fn count_rows(conn: &Connection, table: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
