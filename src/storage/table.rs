use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{draw_reference, Draw, GenerateReport, Storage, UnitContext, UnitState};
use crate::error::{GenError, Result};
use crate::parser::{parse_field, Row, SqlValue};
use crate::pool::{PoolSource, ReferencePool, Sweep};
use crate::rules::fallback_value;
use crate::schema::{Column, ColumnKind, TableSpec};
use crate::writer::{count_rows, insert_batch, insert_sql, quote_ident};

/// A relational table unit.
#[derive(Debug)]
pub struct TableUnit {
    spec: TableSpec,
    state: UnitState,
    /// Primary keys issued or loaded in this session
    keys: HashSet<String>,
    rows: u64,
    /// Referenced columns per dependency, in pool projection order
    references: Vec<(String, Vec<String>)>,
}

impl TableUnit {
    pub fn new(spec: TableSpec) -> Result<Self> {
        let mut references: Vec<(String, Vec<String>)> = Vec::new();
        for (col, fk) in spec.foreign_keys() {
            let column = fk.references_column.clone().ok_or_else(|| {
                GenError::Config(format!(
                    "{}.{}: cannot tell which column of '{}' it references",
                    spec.name, col.name, fk.references_table
                ))
            })?;
            match references
                .iter_mut()
                .find(|(dep, _)| *dep == fk.references_table)
            {
                Some((_, columns)) => {
                    if !columns.contains(&column) {
                        columns.push(column);
                    }
                }
                None => references.push((fk.references_table.clone(), vec![column])),
            }
        }

        Ok(Self {
            spec,
            state: UnitState::default(),
            keys: HashSet::new(),
            rows: 0,
            references,
        })
    }

    /// Adopt rows already present in the table, e.g. in a reopened database file.
    pub fn attach(&mut self, conn: &Connection) -> Result<()> {
        self.rows = count_rows(conn, &self.spec.name)?;
        if self.rows == 0 || self.stored_key_columns().is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = self
            .stored_key_columns()
            .iter()
            .map(|c| quote_ident(c))
            .collect();
        let sql = format!(
            "SELECT {} FROM {}",
            keys.join(", "),
            quote_ident(&self.spec.name)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(keys.len());
            for idx in 0..keys.len() {
                values.push(SqlValue::from_sql(row.get_ref(idx)?));
            }
            self.keys.insert(key_of(values.iter()));
        }
        Ok(())
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    /// Number of distinct primary keys registered so far
    pub fn registered_keys(&self) -> usize {
        self.keys.len()
    }

    /// Columns the unit fills itself; the identity column is left to the database.
    fn insert_columns(spec: &TableSpec) -> Vec<&Column> {
        spec.columns
            .iter()
            .filter(|c| spec.identity.as_deref() != Some(c.name.as_str()))
            .collect()
    }

    /// Primary-key columns the registry tracks; none for identity tables.
    fn key_columns(&self) -> Vec<String> {
        if self.spec.identity.is_some() {
            return Vec::new();
        }
        self.spec
            .primary_key()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Every primary-key column, identity included; used to recognise rows
    /// already held when loading.
    fn stored_key_columns(&self) -> Vec<String> {
        self.spec
            .primary_key()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    fn generate_value(column: &Column, ctx: &mut UnitContext<'_>) -> SqlValue {
        match ctx.generator.generate(&column.name) {
            Some(SqlValue::Text(text)) => match column.col_type.max_len() {
                Some(max) if text.chars().count() > max => {
                    SqlValue::Text(text.chars().take(max).collect())
                }
                _ => SqlValue::Text(text),
            },
            Some(value) => value,
            None => fallback_value(&column.col_type, &mut *ctx.rng),
        }
    }

    fn apply_null_rules(&self, columns: &[&Column], row: &mut Row) {
        for rule in &self.spec.null_rules {
            let position = |name: &str| columns.iter().position(|c| c.name == name);
            if let (Some(target), Some(condition)) = (position(&rule.column), position(&rule.when))
            {
                if row[condition] == rule.equals {
                    row[target] = SqlValue::Null;
                }
            }
        }
    }

    /// Fill the columns referencing `dependency` from one drawn row.
    fn fill_references(
        &self,
        columns: &[&Column],
        dependency: &str,
        drawn: &Row,
        only: Option<&[usize]>,
        row: &mut Row,
    ) {
        let Some((_, projected)) = self.references.iter().find(|(dep, _)| dep == dependency)
        else {
            return;
        };
        for (idx, column) in columns.iter().enumerate() {
            if only.is_some_and(|only| !only.contains(&idx)) {
                continue;
            }
            let ColumnKind::ForeignKey(fk) = column.kind() else {
                continue;
            };
            if fk.references_table != dependency {
                continue;
            }
            if let Some(pos) = projected
                .iter()
                .position(|c| Some(c) == fk.references_column.as_ref())
            {
                row[idx] = drawn[pos].clone();
            }
        }
    }

    fn save_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}_insert.csv", self.spec.name))
    }
}

impl Storage for TableUnit {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn dependency(&self) -> &[String] {
        &self.spec.dependency
    }

    fn column_names(&self) -> Vec<String> {
        self.spec.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn state(&self) -> UnitState {
        self.state
    }

    fn state_mut(&mut self) -> &mut UnitState {
        &mut self.state
    }

    fn row_count(&self) -> u64 {
        self.rows
    }

    fn pool_source(&self) -> PoolSource {
        PoolSource::Table {
            table: self.spec.name.clone(),
            order_by: self
                .spec
                .primary_key()
                .iter()
                .map(|c| c.name.clone())
                .collect(),
        }
    }

    fn generate_entry(
        &mut self,
        pools: &mut HashMap<String, ReferencePool>,
        ctx: &mut UnitContext<'_>,
        report: &mut GenerateReport,
    ) -> Result<Option<Row>> {
        let columns = Self::insert_columns(&self.spec);
        let mut row: Row = vec![SqlValue::Null; columns.len()];

        // One draw per dependency keeps columns taken from the same parent consistent
        for (dependency, projected) in &self.references {
            match draw_reference(
                &self.spec.name,
                dependency,
                projected,
                Sweep::Cyclic,
                pools,
                ctx,
                report,
            )? {
                Draw::Row(drawn) => self.fill_references(&columns, dependency, &drawn, None, &mut row),
                Draw::Empty => {}
                Draw::Skip => return Ok(None),
            }
        }

        for (idx, column) in columns.iter().enumerate() {
            if !matches!(column.kind(), ColumnKind::ForeignKey(_)) {
                row[idx] = Self::generate_value(column, ctx);
            }
        }

        let key_columns = self.key_columns();
        if key_columns.is_empty() {
            self.apply_null_rules(&columns, &mut row);
            return Ok(Some(row));
        }
        let key_positions: Vec<usize> = key_columns
            .iter()
            .filter_map(|name| columns.iter().position(|c| &c.name == name))
            .collect();

        let mut attempts = 0;
        loop {
            let key = key_of(key_positions.iter().map(|&pos| &row[pos]));
            if self.keys.insert(key) {
                break;
            }

            attempts += 1;
            if attempts >= ctx.settings.max_key_retries {
                return Err(GenError::KeySpaceExhausted {
                    unit: self.spec.name.clone(),
                    column: key_columns.join(", "),
                    attempts,
                });
            }

            for &pos in &key_positions {
                let column = columns[pos];
                match column.kind() {
                    ColumnKind::Plain | ColumnKind::PrimaryKey => {
                        row[pos] = Self::generate_value(column, ctx)
                    }
                    ColumnKind::ForeignKey(fk) => {
                        let dependency = fk.references_table.as_str();
                        let projected = self
                            .references
                            .iter()
                            .find(|(dep, _)| dep == dependency)
                            .map(|(_, cols)| cols.clone())
                            .unwrap_or_default();
                        match draw_reference(
                            &self.spec.name,
                            dependency,
                            &projected,
                            Sweep::Cyclic,
                            pools,
                            ctx,
                            report,
                        )? {
                            Draw::Row(drawn) => self.fill_references(
                                &columns,
                                dependency,
                                &drawn,
                                Some(std::slice::from_ref(&pos)),
                                &mut row,
                            ),
                            Draw::Empty | Draw::Skip => return Ok(None),
                        }
                    }
                }
            }
        }

        // after the key loop, which may have replaced a condition column
        self.apply_null_rules(&columns, &mut row);
        Ok(Some(row))
    }

    fn generate(&mut self, count: u64, ctx: &mut UnitContext<'_>) -> Result<GenerateReport> {
        let columns: Vec<String> = Self::insert_columns(&self.spec)
            .iter()
            .map(|c| c.name.clone())
            .collect();
        let sql = insert_sql(&self.spec.name, &columns);
        let batch_size = ctx.settings.batch_size.max(1);

        let mut pools: HashMap<String, ReferencePool> = HashMap::new();
        let mut batch: Vec<Row> = Vec::with_capacity(batch_size.min(count as usize));
        let mut report = GenerateReport {
            requested: count,
            ..Default::default()
        };

        info!(unit = %self.spec.name, rows = count, "generating table");

        for _ in 0..count {
            match self.generate_entry(&mut pools, ctx, &mut report)? {
                Some(row) => batch.push(row),
                None => report.skipped += 1,
            }

            if batch.len() >= batch_size {
                insert_batch(ctx.conn, &sql, &batch)?;
                report.written += batch.len() as u64;
                self.rows += batch.len() as u64;
                info!(unit = %self.spec.name, written = report.written, "flushed batch");
                batch.clear();
            }
        }

        if !batch.is_empty() {
            insert_batch(ctx.conn, &sql, &batch)?;
            report.written += batch.len() as u64;
            self.rows += batch.len() as u64;
        }

        if report.exhausted_draws > 0 {
            warn!(
                unit = %self.spec.name,
                exhausted = report.exhausted_draws,
                skipped = report.skipped,
                "some rows have no reference"
            );
        }

        self.state.generated = true;
        Ok(report)
    }

    fn load(&mut self, dir: &Path, ctx: &mut UnitContext<'_>) -> Result<u64> {
        let path = self.save_path(dir);
        if !path.exists() {
            warn!(unit = %self.spec.name, path = ?path, "snapshot file not found, nothing loaded");
            self.state.loaded = true;
            return Ok(0);
        }

        let mut reader = csv::Reader::from_reader(BufReader::new(File::open(&path)?));
        let headers = reader.headers()?.clone();
        let columns: Vec<&Column> = headers
            .iter()
            .map(|header| {
                self.spec.column(header).ok_or_else(|| {
                    GenError::Config(format!(
                        "{:?}: column '{}' is not part of {}",
                        path, header, self.spec.name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let sql = insert_sql(&self.spec.name, &names);
        let key_positions: Vec<usize> = self
            .stored_key_columns()
            .iter()
            .filter_map(|name| names.iter().position(|n| n == name))
            .collect();

        let batch_size = ctx.settings.load_batch_size.max(1);
        let mut batch: Vec<Row> = Vec::with_capacity(batch_size);
        let mut loaded = 0u64;
        let mut duplicates = 0u64;

        for record in reader.records() {
            let record = record?;
            let mut row: Row = columns
                .iter()
                .enumerate()
                .map(|(idx, col)| parse_field(record.get(idx).unwrap_or_default(), &col.col_type))
                .collect();
            self.apply_null_rules(&columns, &mut row);

            // Snapshots hold every row of their session, so a later one repeats earlier rows
            if !key_positions.is_empty()
                && !self
                    .keys
                    .insert(key_of(key_positions.iter().map(|&pos| &row[pos])))
            {
                duplicates += 1;
                continue;
            }
            batch.push(row);

            if batch.len() >= batch_size {
                insert_batch(ctx.conn, &sql, &batch)?;
                loaded += batch.len() as u64;
                self.rows += batch.len() as u64;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            insert_batch(ctx.conn, &sql, &batch)?;
            loaded += batch.len() as u64;
            self.rows += batch.len() as u64;
        }

        if duplicates > 0 {
            warn!(
                unit = %self.spec.name,
                skipped = duplicates,
                "rows already present, not loaded again"
            );
        }
        self.state.loaded = true;
        info!(unit = %self.spec.name, rows = loaded, "loaded from snapshot");
        Ok(loaded)
    }

    fn save(&self, dir: &Path, conn: &Connection) -> Result<PathBuf> {
        let path = self.save_path(dir);
        let names = self.column_names();
        let projection: Vec<String> = names.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            projection.join(", "),
            quote_ident(&self.spec.name)
        );

        let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(&path)?));
        writer.write_record(&names)?;

        // Rows stream from the cursor straight into the file
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut written = 0u64;
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(names.len());
            for idx in 0..names.len() {
                record.push(SqlValue::from_sql(row.get_ref(idx)?).to_field());
            }
            writer.write_record(&record)?;
            written += 1;
        }
        writer.flush()?;

        info!(unit = %self.spec.name, rows = written, path = ?path, "saved table");
        Ok(path)
    }

    /// Drop every row and forget the registered keys.
    fn clear(&mut self, conn: &Connection) -> Result<()> {
        conn.execute(&format!("DELETE FROM {}", quote_ident(&self.spec.name)), [])?;
        if self.spec.identity.is_some() {
            conn.execute(
                "DELETE FROM sqlite_sequence WHERE name = ?1",
                [&self.spec.name],
            )?;
        }
        self.keys.clear();
        self.rows = 0;
        self.state = UnitState::default();
        info!(unit = %self.spec.name, "cleared");
        Ok(())
    }
}

fn key_of<'a>(values: impl Iterator<Item = &'a SqlValue>) -> String {
    values.map(SqlValue::key).collect::<Vec<_>>().join("\u{1f}")
}
