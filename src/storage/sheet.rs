use rusqlite::Connection;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{draw_reference, Draw, GenerateReport, Storage, UnitContext, UnitState};
use crate::error::Result;
use crate::parser::{Row, SqlValue};
use crate::pool::{PoolSource, ReferencePool, Sweep};
use crate::schema::SheetSpec;

/// A flat-file sheet unit.
///
/// Rows live in a working CSV file that grows one batch at a time, so memory
/// stays bounded by the batch size whatever the row count.
#[derive(Debug)]
pub struct SheetUnit {
    spec: SheetSpec,
    state: UnitState,
    path: PathBuf,
    rows: u64,
}

impl SheetUnit {
    /// Create the unit and start an empty working file holding only the header.
    pub fn new(spec: SheetSpec, work_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        let path = work_dir.join(file_name(&spec.name));
        write_header(&path, &spec.columns)?;

        Ok(Self {
            spec,
            state: UnitState::default(),
            path,
            rows: 0,
        })
    }

    pub fn spec(&self) -> &SheetSpec {
        &self.spec
    }

    /// Working file holding the sheet's current rows
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, batch: &[Row]) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        for row in batch {
            writer.write_record(row.iter().map(SqlValue::to_field))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn append_records(&self, batch: &[Vec<String>]) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        for record in batch {
            writer.write_record(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn file_name(name: &str) -> String {
    format!("{}_sheet.csv", name)
}

/// Truncate `path` to a file holding only the header.
fn write_header(path: &Path, columns: &[String]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(columns)?;
    writer.flush()?;
    Ok(())
}

impl Storage for SheetUnit {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn dependency(&self) -> &[String] {
        &self.spec.dependency
    }

    fn column_names(&self) -> Vec<String> {
        self.spec.columns.clone()
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
        PoolSource::Sheet {
            path: self.path.clone(),
        }
    }

    /// Mapped columns come from the dependency row at the same position as
    /// this row; the rest come from the value generator or stay empty.
    fn generate_entry(
        &mut self,
        pools: &mut HashMap<String, ReferencePool>,
        ctx: &mut UnitContext<'_>,
        report: &mut GenerateReport,
    ) -> Result<Option<Row>> {
        let mut row: Row = vec![SqlValue::Null; self.spec.columns.len()];
        let mut mapped = vec![false; self.spec.columns.len()];

        for mapping in &self.spec.mappings {
            let theirs: Vec<String> = mapping.columns.iter().map(|(_, t)| t.clone()).collect();
            let drawn = draw_reference(
                &self.spec.name,
                &mapping.dependency,
                &theirs,
                Sweep::Once,
                pools,
                ctx,
                report,
            )?;

            for (pos, (own, _)) in mapping.columns.iter().enumerate() {
                if let Some(idx) = self.spec.columns.iter().position(|c| c == own) {
                    mapped[idx] = true;
                    match &drawn {
                        Draw::Row(values) => row[idx] = values[pos].clone(),
                        Draw::Empty => {}
                        Draw::Skip => return Ok(None),
                    }
                }
            }
        }

        for (idx, column) in self.spec.columns.iter().enumerate() {
            if !mapped[idx] {
                if let Some(value) = ctx.generator.generate(column) {
                    row[idx] = value;
                }
            }
        }

        Ok(Some(row))
    }

    fn generate(&mut self, count: u64, ctx: &mut UnitContext<'_>) -> Result<GenerateReport> {
        let batch_size = ctx.settings.batch_size.max(1);
        let mut pools: HashMap<String, ReferencePool> = HashMap::new();
        let mut batch: Vec<Row> = Vec::with_capacity(batch_size.min(count as usize));
        let mut report = GenerateReport {
            requested: count,
            ..Default::default()
        };

        info!(unit = %self.spec.name, rows = count, "generating sheet");

        for _ in 0..count {
            match self.generate_entry(&mut pools, ctx, &mut report)? {
                Some(row) => batch.push(row),
                None => report.skipped += 1,
            }

            if batch.len() >= batch_size {
                self.append(&batch)?;
                report.written += batch.len() as u64;
                self.rows += batch.len() as u64;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.append(&batch)?;
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
        let path = dir.join(file_name(&self.spec.name));
        if !path.exists() {
            warn!(unit = %self.spec.name, path = ?path, "snapshot file not found, nothing loaded");
            self.state.loaded = true;
            return Ok(0);
        }

        let mut reader = csv::Reader::from_reader(BufReader::new(File::open(&path)?));
        let headers = reader.headers()?.clone();
        let positions: Vec<Option<usize>> = self
            .spec
            .columns
            .iter()
            .map(|column| headers.iter().position(|h| h == column))
            .collect();
        for (column, position) in self.spec.columns.iter().zip(&positions) {
            if position.is_none() {
                warn!(unit = %self.spec.name, column = %column, "column missing from snapshot");
            }
        }

        let batch_size = ctx.settings.load_batch_size.max(1);
        let mut batch: Vec<Vec<String>> = Vec::with_capacity(batch_size);
        let mut loaded = 0u64;

        for record in reader.records() {
            let record = record?;
            batch.push(
                positions
                    .iter()
                    .map(|pos| {
                        pos.and_then(|p| record.get(p))
                            .unwrap_or_default()
                            .to_string()
                    })
                    .collect(),
            );

            if batch.len() >= batch_size {
                self.append_records(&batch)?;
                loaded += batch.len() as u64;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.append_records(&batch)?;
            loaded += batch.len() as u64;
        }

        self.rows += loaded;
        self.state.loaded = true;
        info!(unit = %self.spec.name, rows = loaded, "loaded from snapshot");
        Ok(loaded)
    }

    fn save(&self, dir: &Path, _conn: &Connection) -> Result<PathBuf> {
        let path = dir.join(file_name(&self.spec.name));
        std::fs::copy(&self.path, &path)?;
        info!(unit = %self.spec.name, rows = self.rows, path = ?path, "saved sheet");
        Ok(path)
    }

    fn clear(&mut self, _conn: &Connection) -> Result<()> {
        write_header(&self.path, &self.spec.columns)?;
        self.rows = 0;
        self.state = UnitState::default();
        info!(unit = %self.spec.name, "cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenerationSettings, MissingReference};
    use crate::rules::ColumnValueGenerator;
    use crate::schema::SheetMapping;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn parent_db(rows: i64) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Parent (id INTEGER PRIMARY KEY)")
            .unwrap();
        for id in 1..=rows {
            conn.execute("INSERT INTO Parent (id) VALUES (?1)", [id])
                .unwrap();
        }
        conn
    }

    fn booking() -> SheetSpec {
        SheetSpec {
            name: "Booking".into(),
            columns: vec!["Parent".into(), "Note".into()],
            mappings: vec![SheetMapping {
                dependency: "Parent".into(),
                columns: vec![("Parent".into(), "id".into())],
            }],
            dependency: vec!["Parent".into()],
        }
    }

    fn sources() -> HashMap<String, PoolSource> {
        HashMap::from([(
            "Parent".to_string(),
            PoolSource::Table {
                table: "Parent".into(),
                order_by: vec!["id".into()],
            },
        )])
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_rows_follow_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = parent_db(3);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut generator = |column: &str| {
            (column == "Note").then(|| SqlValue::Text("ok".into()))
        };
        let settings = GenerationSettings {
            batch_size: 2,
            ..Default::default()
        };
        let sources = sources();
        let mut ctx = UnitContext {
            conn: &mut conn,
            generator: &mut generator as &mut dyn ColumnValueGenerator,
            rng: &mut rng,
            settings: &settings,
            sources: &sources,
        };

        let mut unit = SheetUnit::new(booking(), dir.path()).unwrap();
        let report = unit.generate(5, &mut ctx).unwrap();

        assert_eq!(report.written, 5);
        assert_eq!(report.exhausted_draws, 2);
        assert_eq!(unit.row_count(), 5);
        let rows = read_rows(unit.path());
        let parents: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(parents, vec!["1", "2", "3", "", ""]);
        assert!(rows.iter().all(|r| r[1] == "ok"));
    }

    #[test]
    fn test_skip_row_policy_drops_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = parent_db(2);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut generator = |_: &str| -> Option<SqlValue> { None };
        let settings = GenerationSettings {
            missing_reference: MissingReference::SkipRow,
            ..Default::default()
        };
        let sources = sources();
        let mut ctx = UnitContext {
            conn: &mut conn,
            generator: &mut generator as &mut dyn ColumnValueGenerator,
            rng: &mut rng,
            settings: &settings,
            sources: &sources,
        };

        let mut unit = SheetUnit::new(booking(), dir.path()).unwrap();
        let report = unit.generate(4, &mut ctx).unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(read_rows(unit.path()).len(), 2);
    }

    #[test]
    fn test_save_then_load_appends() {
        let work = tempfile::tempdir().unwrap();
        let snapshot = tempfile::tempdir().unwrap();
        let mut conn = parent_db(2);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut generator = |_: &str| -> Option<SqlValue> { None };
        let settings = GenerationSettings::default();
        let sources = sources();
        let mut ctx = UnitContext {
            conn: &mut conn,
            generator: &mut generator as &mut dyn ColumnValueGenerator,
            rng: &mut rng,
            settings: &settings,
            sources: &sources,
        };

        let mut unit = SheetUnit::new(booking(), work.path()).unwrap();
        unit.generate(2, &mut ctx).unwrap();
        unit.save(snapshot.path(), &*ctx.conn).unwrap();

        let mut restored = SheetUnit::new(booking(), &work.path().join("restored")).unwrap();
        assert_eq!(restored.load(snapshot.path(), &mut ctx).unwrap(), 2);
        assert_eq!(restored.load(snapshot.path(), &mut ctx).unwrap(), 2);
        assert_eq!(restored.row_count(), 4);
        assert!(restored.state().loaded);
        assert_eq!(read_rows(restored.path()).len(), 4);
    }

    #[test]
    fn test_missing_snapshot_file_marks_loaded() {
        let work = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let mut conn = parent_db(0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut generator = |_: &str| -> Option<SqlValue> { None };
        let settings = GenerationSettings::default();
        let sources = sources();
        let mut ctx = UnitContext {
            conn: &mut conn,
            generator: &mut generator as &mut dyn ColumnValueGenerator,
            rng: &mut rng,
            settings: &settings,
            sources: &sources,
        };

        let mut unit = SheetUnit::new(booking(), work.path()).unwrap();
        assert_eq!(unit.load(empty.path(), &mut ctx).unwrap(), 0);
        assert!(unit.state().loaded);
    }

    #[test]
    fn test_sheet_codes_keep_leading_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = parent_db(0);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut generator = |column: &str| {
            (column == "Code").then(|| SqlValue::Text("007".into()))
        };
        let settings = GenerationSettings::default();

        let mut agents = SheetUnit::new(
            SheetSpec {
                name: "Agents".into(),
                columns: vec!["Code".into()],
                mappings: Vec::new(),
                dependency: Vec::new(),
            },
            dir.path(),
        )
        .unwrap();
        let mut missions = SheetUnit::new(
            SheetSpec {
                name: "Missions".into(),
                columns: vec!["Agent".into()],
                mappings: vec![SheetMapping {
                    dependency: "Agents".into(),
                    columns: vec![("Agent".into(), "Code".into())],
                }],
                dependency: vec!["Agents".into()],
            },
            dir.path(),
        )
        .unwrap();
        let sources = HashMap::from([("Agents".to_string(), agents.pool_source())]);
        let mut ctx = UnitContext {
            conn: &mut conn,
            generator: &mut generator as &mut dyn ColumnValueGenerator,
            rng: &mut rng,
            settings: &settings,
            sources: &sources,
        };

        agents.generate(1, &mut ctx).unwrap();
        missions.generate(1, &mut ctx).unwrap();

        assert_eq!(read_rows(missions.path()), vec![vec!["007".to_string()]]);
    }

    #[test]
    fn test_clear_leaves_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = parent_db(2);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut generator = |_: &str| -> Option<SqlValue> { None };
        let settings = GenerationSettings::default();
        let sources = sources();
        let mut ctx = UnitContext {
            conn: &mut conn,
            generator: &mut generator as &mut dyn ColumnValueGenerator,
            rng: &mut rng,
            settings: &settings,
            sources: &sources,
        };

        let mut unit = SheetUnit::new(booking(), dir.path()).unwrap();
        unit.generate(2, &mut ctx).unwrap();
        unit.clear(&*ctx.conn).unwrap();

        assert_eq!(unit.row_count(), 0);
        assert!(!unit.state().generated);
        assert!(read_rows(unit.path()).is_empty());
        assert_eq!(
            std::fs::read_to_string(unit.path()).unwrap(),
            "Parent,Note\n"
        );
    }
}
