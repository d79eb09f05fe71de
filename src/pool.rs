//! Bounded-memory cursors over a dependency's rows
//!
//! A pool holds at most `pull_size` projected rows of one dependency. When
//! the batch runs dry it fetches the next window after `offset`, so repeated
//! refills sweep forward through the dependency instead of resampling it.

use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::Connection;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{GenError, Result};
use crate::parser::{parse_sheet_field, Row, SqlValue};
use crate::writer::quote_ident;

/// Where a dependency's rows live
#[derive(Debug, Clone, PartialEq)]
pub enum PoolSource {
    /// A relational table swept in `order_by` order (`rowid` when empty)
    Table { table: String, order_by: Vec<String> },
    /// A sheet's working CSV file swept in file order
    Sheet { path: PathBuf },
}

impl PoolSource {
    /// Fetch up to `limit` rows starting at `offset`, projected onto `columns`.
    pub fn fetch(
        &self,
        conn: &Connection,
        columns: &[String],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Row>> {
        match self {
            PoolSource::Table { table, order_by } => {
                fetch_table(conn, table, order_by, columns, offset, limit)
            }
            PoolSource::Sheet { path } => fetch_sheet(path, columns, offset, limit),
        }
    }
}

fn fetch_table(
    conn: &Connection,
    table: &str,
    order_by: &[String],
    columns: &[String],
    offset: u64,
    limit: usize,
) -> Result<Vec<Row>> {
    let projection: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let ordering = if order_by.is_empty() {
        "rowid".to_string()
    } else {
        order_by
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {} LIMIT ?1 OFFSET ?2",
        projection.join(", "),
        quote_ident(table),
        ordering
    );

    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query(rusqlite::params![limit as i64, offset as i64])?;
    let mut fetched = Vec::with_capacity(limit);
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(SqlValue::from_sql(row.get_ref(idx)?));
        }
        fetched.push(values);
    }
    Ok(fetched)
}

fn fetch_sheet(path: &Path, columns: &[String], offset: u64, limit: usize) -> Result<Vec<Row>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_reader(BufReader::new(File::open(path)?));
    let headers = reader.headers()?.clone();
    let positions = columns
        .iter()
        .map(|column| {
            headers.iter().position(|h| h == column).ok_or_else(|| {
                GenError::Config(format!("{:?} has no column '{}'", path, column))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut fetched = Vec::with_capacity(limit);
    for record in reader.records().skip(offset as usize).take(limit) {
        let record = record?;
        fetched.push(
            positions
                .iter()
                .map(|&pos| parse_sheet_field(record.get(pos).unwrap_or_default()))
                .collect(),
        );
    }
    Ok(fetched)
}

/// How a pool continues once it reaches the end of its dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// Start a new pass from the first row; each fetched window is shuffled
    Cyclic,
    /// Stop at the end; rows come out in source order
    Once,
}

/// Refillable cursor supplying foreign-key values from one dependency.
#[derive(Debug)]
pub struct ReferencePool {
    dependency: String,
    columns: Vec<String>,
    pull_size: usize,
    sweep: Sweep,
    offset: u64,
    passes: u32,
    batch: std::vec::IntoIter<Row>,
    remaining: usize,
}

impl ReferencePool {
    pub fn new(
        dependency: impl Into<String>,
        columns: Vec<String>,
        pull_size: usize,
        sweep: Sweep,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            columns,
            pull_size: pull_size.max(1),
            sweep,
            offset: 0,
            passes: 0,
            batch: Vec::new().into_iter(),
            remaining: 0,
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Projected columns, in the order rows are returned
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows left in the current batch
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Rows of the dependency fetched so far in the current pass
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Completed passes over the dependency
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Replace the batch with the next window of the dependency.
    pub fn refill<R: Rng + ?Sized>(
        &mut self,
        source: &PoolSource,
        conn: &Connection,
        rng: &mut R,
    ) -> Result<()> {
        let mut rows = source.fetch(conn, &self.columns, self.offset, self.pull_size)?;

        if rows.is_empty() && self.sweep == Sweep::Cyclic && self.offset > 0 {
            self.offset = 0;
            self.passes += 1;
            rows = source.fetch(conn, &self.columns, 0, self.pull_size)?;
        }

        if self.sweep == Sweep::Cyclic {
            rows.shuffle(rng);
        }

        debug!(
            dependency = %self.dependency,
            offset = self.offset,
            fetched = rows.len(),
            "refilled reference pool"
        );

        self.offset += rows.len() as u64;
        self.remaining = rows.len();
        self.batch = rows.into_iter();
        Ok(())
    }

    /// Next row, refilling first when the batch is used up.
    /// `None` means the dependency has nothing left to give.
    pub fn draw<R: Rng + ?Sized>(
        &mut self,
        source: &PoolSource,
        conn: &Connection,
        rng: &mut R,
    ) -> Result<Option<Row>> {
        if self.remaining == 0 {
            self.refill(source, conn, rng)?;
        }

        match self.batch.next() {
            Some(row) => {
                self.remaining -= 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    fn parent_table(rows: i64) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Parent (id INTEGER PRIMARY KEY, label TEXT)")
            .unwrap();
        for id in 1..=rows {
            conn.execute(
                "INSERT INTO Parent (id, label) VALUES (?1, ?2)",
                rusqlite::params![id, format!("p{}", id)],
            )
            .unwrap();
        }
        conn
    }

    fn source() -> PoolSource {
        PoolSource::Table {
            table: "Parent".into(),
            order_by: vec!["id".into()],
        }
    }

    #[test]
    fn test_one_pass_has_no_duplicates() {
        let conn = parent_table(10);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut pool = ReferencePool::new("Parent", vec!["id".into()], 3, Sweep::Cyclic);

        let mut seen = HashSet::new();
        let mut last_offset = 0;
        for _ in 0..10 {
            let row = pool.draw(&source(), &conn, &mut rng).unwrap().unwrap();
            assert!(seen.insert(row[0].key()));
            assert!(pool.offset() >= last_offset);
            last_offset = pool.offset();
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(pool.passes(), 0);
    }

    #[test]
    fn test_cyclic_pool_starts_new_pass() {
        let conn = parent_table(3);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut pool = ReferencePool::new("Parent", vec!["id".into()], 5, Sweep::Cyclic);

        let drawn: Vec<_> = (0..5)
            .map(|_| pool.draw(&source(), &conn, &mut rng).unwrap().unwrap())
            .collect();
        assert_eq!(drawn.len(), 5);
        assert_eq!(pool.passes(), 1);
        for row in drawn {
            assert!(matches!(row[0], SqlValue::Integer(1..=3)));
        }
    }

    #[test]
    fn test_once_pool_is_ordered_and_runs_out() {
        let conn = parent_table(2);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut pool = ReferencePool::new(
            "Parent",
            vec!["label".into(), "id".into()],
            1,
            Sweep::Once,
        );

        let first = pool.draw(&source(), &conn, &mut rng).unwrap().unwrap();
        assert_eq!(first, vec![SqlValue::Text("p1".into()), SqlValue::Integer(1)]);
        let second = pool.draw(&source(), &conn, &mut rng).unwrap().unwrap();
        assert_eq!(second[1], SqlValue::Integer(2));
        assert!(pool.draw(&source(), &conn, &mut rng).unwrap().is_none());
        assert_eq!(pool.remaining(), 0);
    }

    #[test]
    fn test_empty_dependency_yields_nothing() {
        let conn = parent_table(0);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut pool = ReferencePool::new("Parent", vec!["id".into()], 4, Sweep::Cyclic);
        assert!(pool.draw(&source(), &conn, &mut rng).unwrap().is_none());
    }

    #[test]
    fn test_sheet_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Roster_sheet.csv");
        std::fs::write(&path, "Name,Seat\nAda,1\nBrian,2\n").unwrap();
        let conn = Connection::open_in_memory().unwrap();

        let rows = PoolSource::Sheet { path }
            .fetch(&conn, &["Seat".to_string(), "Name".to_string()], 1, 10)
            .unwrap();
        assert_eq!(rows, vec![vec![SqlValue::Integer(2), SqlValue::Text("Brian".into())]]);
    }
}
