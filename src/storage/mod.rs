//! Storage units: one schema entity bound to its backend
//!
//! Every unit produces rows (`generate`), restores them from a snapshot
//! (`load`) and writes them back out (`save`). Foreign-key values come from
//! reference pools over the unit's dependencies, which must already be
//! complete when the unit runs.

mod sheet;
mod table;

pub use sheet::SheetUnit;
pub use table::TableUnit;

use rand_chacha::ChaCha8Rng;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::{GenerationSettings, MissingReference};
use crate::error::{GenError, Result};
use crate::parser::Row;
use crate::pool::{PoolSource, ReferencePool, Sweep};
use crate::rules::ColumnValueGenerator;

/// Everything a unit borrows from its session for one step.
pub struct UnitContext<'a> {
    pub conn: &'a mut Connection,
    pub generator: &'a mut dyn ColumnValueGenerator,
    pub rng: &'a mut ChaCha8Rng,
    pub settings: &'a GenerationSettings,
    /// Row sources of the units this one may reference, by unit name
    pub sources: &'a HashMap<String, PoolSource>,
}

/// Progress flags. `generated` and `loaded` are independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitState {
    pub generated: bool,
    pub loaded: bool,
}

/// Outcome of one generation pass over a unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateReport {
    pub requested: u64,
    pub written: u64,
    /// Rows dropped because a dependency ran out
    pub skipped: u64,
    /// Draws that found no reference row
    pub exhausted_draws: u64,
}

/// Capabilities shared by every backend.
pub trait Storage {
    fn name(&self) -> &str;
    fn dependency(&self) -> &[String];
    fn column_names(&self) -> Vec<String>;
    fn state(&self) -> UnitState;
    fn state_mut(&mut self) -> &mut UnitState;
    /// Rows currently held by the backend (generated plus loaded)
    fn row_count(&self) -> u64;
    /// Where dependents read this unit's rows from
    fn pool_source(&self) -> PoolSource;
    /// Build one row; `None` means the row is dropped.
    fn generate_entry(
        &mut self,
        pools: &mut HashMap<String, ReferencePool>,
        ctx: &mut UnitContext<'_>,
        report: &mut GenerateReport,
    ) -> Result<Option<Row>>;
    fn generate(&mut self, count: u64, ctx: &mut UnitContext<'_>) -> Result<GenerateReport>;
    /// Restore rows from a snapshot directory; returns rows read.
    fn load(&mut self, dir: &Path, ctx: &mut UnitContext<'_>) -> Result<u64>;
    /// Write all rows into a snapshot directory; returns the file written.
    fn save(&self, dir: &Path, conn: &Connection) -> Result<PathBuf>;
    /// Drop every row and reset the unit to its initial state.
    fn clear(&mut self, conn: &Connection) -> Result<()>;
}

/// A schema entity with its backend.
pub enum StorageUnit {
    Relational(TableUnit),
    Tabular(SheetUnit),
}

impl StorageUnit {
    fn inner(&self) -> &dyn Storage {
        match self {
            StorageUnit::Relational(unit) => unit,
            StorageUnit::Tabular(unit) => unit,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Storage {
        match self {
            StorageUnit::Relational(unit) => unit,
            StorageUnit::Tabular(unit) => unit,
        }
    }

    pub fn name(&self) -> &str {
        self.inner().name()
    }

    pub fn dependency(&self) -> &[String] {
        self.inner().dependency()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.inner().column_names()
    }

    pub fn row_count(&self) -> u64 {
        self.inner().row_count()
    }

    pub fn pool_source(&self) -> PoolSource {
        self.inner().pool_source()
    }

    pub fn is_dependent_on(&self, other: &StorageUnit) -> bool {
        self.dependency().iter().any(|dep| dep == other.name())
    }

    pub fn is_not_dependent(&self) -> bool {
        self.dependency().is_empty()
    }

    pub fn has_been_generated(&self) -> bool {
        self.inner().state().generated
    }

    pub fn has_been_loaded(&self) -> bool {
        self.inner().state().loaded
    }

    /// Every named dependency exists among `units` and has been generated.
    pub fn is_dependency_fulfilled(&self, units: &[StorageUnit]) -> bool {
        self.dependency().iter().all(|dep| {
            units
                .iter()
                .any(|unit| unit.name() == dep && unit.has_been_generated())
        })
    }

    /// Every named dependency exists among `units` and has been loaded.
    pub fn is_dependency_fulfilled_for_loading(&self, units: &[StorageUnit]) -> bool {
        self.dependency()
            .iter()
            .all(|dep| units.iter().any(|unit| unit.name() == dep && unit.has_been_loaded()))
    }

    pub fn mark_loaded(&mut self) {
        self.inner_mut().state_mut().loaded = true;
    }

    /// Allow another snapshot to be merged in.
    pub fn unload(&mut self) {
        self.inner_mut().state_mut().loaded = false;
    }

    /// Allow another generation pass on top of the current rows.
    pub fn reset_generated(&mut self) {
        self.inner_mut().state_mut().generated = false;
    }

    pub fn generate(&mut self, count: u64, ctx: &mut UnitContext<'_>) -> Result<GenerateReport> {
        self.inner_mut().generate(count, ctx)
    }

    pub fn generate_entry(
        &mut self,
        pools: &mut HashMap<String, ReferencePool>,
        ctx: &mut UnitContext<'_>,
        report: &mut GenerateReport,
    ) -> Result<Option<Row>> {
        self.inner_mut().generate_entry(pools, ctx, report)
    }

    pub fn load(&mut self, dir: &Path, ctx: &mut UnitContext<'_>) -> Result<u64> {
        self.inner_mut().load(dir, ctx)
    }

    pub fn save(&self, dir: &Path, conn: &Connection) -> Result<PathBuf> {
        self.inner().save(dir, conn)
    }

    pub fn clear(&mut self, conn: &Connection) -> Result<()> {
        self.inner_mut().clear(conn)
    }
}

/// Draw the next row of `dependency`, creating its pool on first use.
/// Exhaustion goes through the configured `MissingReference` policy.
pub(crate) fn draw_reference(
    unit: &str,
    dependency: &str,
    columns: &[String],
    sweep: Sweep,
    pools: &mut HashMap<String, ReferencePool>,
    ctx: &mut UnitContext<'_>,
    report: &mut GenerateReport,
) -> Result<Draw> {
    let source = ctx
        .sources
        .get(dependency)
        .ok_or_else(|| GenError::MissingDependency {
            unit: unit.to_string(),
            dependency: dependency.to_string(),
        })?;

    let pool = pools.entry(dependency.to_string()).or_insert_with(|| {
        ReferencePool::new(dependency, columns.to_vec(), ctx.settings.pull_size, sweep)
    });

    if let Some(row) = pool.draw(source, &*ctx.conn, &mut *ctx.rng)? {
        return Ok(Draw::Row(row));
    }

    report.exhausted_draws += 1;
    if report.exhausted_draws == 1 {
        warn!(
            unit,
            dependency,
            policy = ?ctx.settings.missing_reference,
            "reference pool exhausted"
        );
    }

    match ctx.settings.missing_reference {
        MissingReference::Null => Ok(Draw::Empty),
        MissingReference::SkipRow => Ok(Draw::Skip),
        MissingReference::Fail => Err(GenError::ReferenceExhausted {
            unit: unit.to_string(),
            dependency: dependency.to_string(),
        }),
    }
}

/// Result of a reference draw after the exhaustion policy is applied
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Draw {
    Row(Row),
    Empty,
    Skip,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SqlValue;
    use crate::schema::{SheetMapping, SheetSpec};
    use rand::SeedableRng;

    fn sheet(name: &str, dependency: &[&str], work_dir: &Path) -> StorageUnit {
        let spec = SheetSpec {
            name: name.into(),
            columns: vec!["Ref".into()],
            mappings: dependency
                .iter()
                .map(|dep| SheetMapping {
                    dependency: dep.to_string(),
                    columns: vec![("Ref".into(), "id".into())],
                })
                .collect(),
            dependency: dependency.iter().map(|d| d.to_string()).collect(),
        };
        StorageUnit::Tabular(SheetUnit::new(spec, work_dir).unwrap())
    }

    #[test]
    fn test_dependency_queries() {
        let dir = tempfile::tempdir().unwrap();
        let root = sheet("Root", &[], dir.path());
        let leaf = sheet("Leaf", &["Root"], dir.path());

        assert!(root.is_not_dependent());
        assert!(!leaf.is_not_dependent());
        assert!(leaf.is_dependent_on(&root));
        assert!(!root.is_dependent_on(&leaf));
    }

    #[test]
    fn test_entry_reports_exhausted_draw() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Root (id INTEGER PRIMARY KEY)")
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut generator = |_: &str| -> Option<SqlValue> { None };
        let settings = GenerationSettings::default();
        let sources = HashMap::from([(
            "Root".to_string(),
            PoolSource::Table {
                table: "Root".into(),
                order_by: vec!["id".into()],
            },
        )]);
        let mut ctx = UnitContext {
            conn: &mut conn,
            generator: &mut generator as &mut dyn ColumnValueGenerator,
            rng: &mut rng,
            settings: &settings,
            sources: &sources,
        };

        let mut unit = sheet("Leaf", &["Root"], dir.path());
        let mut pools = HashMap::new();
        let mut report = GenerateReport::default();
        let row = unit
            .generate_entry(&mut pools, &mut ctx, &mut report)
            .unwrap();

        assert_eq!(row, Some(vec![SqlValue::Null]));
        assert_eq!(report.exhausted_draws, 1);
    }
}
