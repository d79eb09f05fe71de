//! A generation session: one database, one set of units, one RNG

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::Mode;
use crate::config::GenerationSettings;
use crate::error::{GenError, Result};
use crate::pool::PoolSource;
use crate::rules::{ColumnValueGenerator, RuleBook};
use crate::scheduler::{DependencyScheduler, Pass};
use crate::schema::SchemaDescription;
use crate::snapshot::{SnapshotStore, SCHEMA_FILE};
use crate::storage::{GenerateReport, SheetUnit, StorageUnit, TableUnit, UnitContext};
use crate::validate::validate_counts;
use crate::writer::{create_tables, generate_ddl, open_database};

/// Owns the connection, the units and everything they borrow while running.
pub struct GenerationSession {
    schema: SchemaDescription,
    settings: GenerationSettings,
    conn: Connection,
    units: Vec<StorageUnit>,
    scheduler: DependencyScheduler,
    generator: Box<dyn ColumnValueGenerator>,
    rng: ChaCha8Rng,
    snapshots: SnapshotStore,
    version: Option<u64>,
}

impl GenerationSession {
    /// Open the database, create every table and build one unit per entity.
    ///
    /// Fails on a cyclic or dangling dependency before anything is written
    /// to the sheets' working files.
    pub fn new(schema: SchemaDescription, settings: GenerationSettings) -> Result<Self> {
        let graph: Vec<(&str, &[String])> = schema
            .tables
            .iter()
            .map(|t| (t.name.as_str(), t.dependency.as_slice()))
            .chain(
                schema
                    .sheets
                    .iter()
                    .map(|s| (s.name.as_str(), s.dependency.as_slice())),
            )
            .collect();
        crate::scheduler::execution_order(&graph)?;

        let conn = open_database(settings.database.as_deref())?;
        create_tables(&conn, &schema.tables)?;

        let mut units = Vec::with_capacity(schema.tables.len() + schema.sheets.len());
        for spec in &schema.tables {
            let mut unit = TableUnit::new(spec.clone())?;
            unit.attach(&conn)?;
            units.push(StorageUnit::Relational(unit));
        }
        let work_dir = settings.work_dir();
        for spec in &schema.sheets {
            units.push(StorageUnit::Tabular(SheetUnit::new(spec.clone(), &work_dir)?));
        }
        let scheduler = DependencyScheduler::new(&units)?;

        let seed = settings.seed.unwrap_or_else(rand::random);
        info!(seed, units = units.len(), "session ready");

        Ok(Self {
            snapshots: SnapshotStore::new(settings.snapshot_root()),
            generator: Box::new(RuleBook::new(seed)),
            rng: ChaCha8Rng::seed_from_u64(seed),
            schema,
            settings,
            conn,
            units,
            scheduler,
            version: None,
        })
    }

    /// Replace the default rule book.
    pub fn with_generator(mut self, generator: Box<dyn ColumnValueGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn schema(&self) -> &SchemaDescription {
        &self.schema
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn units(&self) -> &[StorageUnit] {
        &self.units
    }

    pub fn unit(&self, name: &str) -> Option<&StorageUnit> {
        self.units.iter().find(|u| u.name() == name)
    }

    /// Snapshot version last loaded or saved
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Rows currently held per unit
    pub fn row_counts(&self) -> BTreeMap<String, u64> {
        self.units
            .iter()
            .map(|u| (u.name().to_string(), u.row_count()))
            .collect()
    }

    /// Check a row-count request; returns warnings that do not block it.
    pub fn validate(&self, counts: &BTreeMap<String, u64>) -> Result<Vec<String>> {
        let existing: HashMap<String, u64> = self.row_counts().into_iter().collect();
        validate_counts(&self.schema, counts, &existing)
    }

    fn sources(&self) -> HashMap<String, PoolSource> {
        self.units
            .iter()
            .map(|u| (u.name().to_string(), u.pool_source()))
            .collect()
    }

    /// Generate `counts` rows per unit on top of whatever is already held.
    ///
    /// Units missing from `counts` get zero new rows but still complete, so
    /// their dependents can run.
    pub fn generate(
        &mut self,
        counts: &BTreeMap<String, u64>,
    ) -> Result<Vec<(String, GenerateReport)>> {
        self.validate(counts)?;

        for unit in &mut self.units {
            unit.reset_generated();
        }

        let sources = self.sources();
        let mut ctx = UnitContext {
            conn: &mut self.conn,
            generator: &mut *self.generator,
            rng: &mut self.rng,
            settings: &self.settings,
            sources: &sources,
        };
        let mut reports = Vec::with_capacity(self.units.len());

        self.scheduler
            .run(&mut self.units, Pass::Generate, |units, idx| {
                let unit = &mut units[idx];
                let count = counts.get(unit.name()).copied().unwrap_or(0);
                let report = unit.generate(count, &mut ctx)?;
                info!(
                    unit = %unit.name(),
                    written = report.written,
                    total = unit.row_count(),
                    "unit generated"
                );
                reports.push((unit.name().to_string(), report));
                Ok(())
            })?;

        Ok(reports)
    }

    /// Allow every unit to be loaded again.
    pub fn unload_all(&mut self) {
        for unit in &mut self.units {
            unit.unload();
        }
    }

    /// Merge one snapshot directory into the current rows.
    pub fn load(&mut self, dir: &Path) -> Result<u64> {
        if !dir.is_dir() {
            return Err(GenError::Config(format!(
                "snapshot directory {:?} does not exist",
                dir
            )));
        }
        self.unload_all();

        let sources = self.sources();
        let mut ctx = UnitContext {
            conn: &mut self.conn,
            generator: &mut *self.generator,
            rng: &mut self.rng,
            settings: &self.settings,
            sources: &sources,
        };
        let mut total = 0;

        self.scheduler.run(&mut self.units, Pass::Load, |units, idx| {
            total += units[idx].load(dir, &mut ctx)?;
            Ok(())
        })?;

        info!(path = ?dir, rows = total, "snapshot loaded");
        Ok(total)
    }

    /// Drop every row, dependents before the units they reference.
    pub fn clear(&mut self) -> Result<()> {
        for &idx in self.scheduler.order().iter().rev() {
            self.units[idx].clear(&self.conn)?;
        }
        self.version = None;
        Ok(())
    }

    /// Put the units in the starting state for `mode`.
    ///
    /// Both modes first drop rows left in a reused database file. Fresh runs
    /// then start empty; incremental runs restore the latest snapshot, which
    /// is returned.
    pub fn prepare(&mut self, mode: Mode) -> Result<Option<u64>> {
        let held: u64 = self.units.iter().map(StorageUnit::row_count).sum();
        if held > 0 {
            info!(rows = held, ?mode, "discarding rows already in the database");
        }
        self.clear()?;
        match mode {
            Mode::Fresh => Ok(None),
            Mode::Incremental => self.load_latest(),
        }
    }

    /// Load the highest snapshot version, if any exists.
    pub fn load_latest(&mut self) -> Result<Option<u64>> {
        let Some(version) = self.snapshots.latest()? else {
            info!(root = ?self.snapshots.root(), "no snapshot to load");
            return Ok(None);
        };

        let dir = self.snapshots.version_dir(version);
        self.load(&dir)?;
        self.version = Some(version);
        Ok(Some(version))
    }

    /// Write the DDL and every unit into a new version directory.
    pub fn save_snapshot(&mut self) -> Result<(u64, PathBuf)> {
        let (version, dir) = self.snapshots.create_next()?;
        std::fs::write(dir.join(SCHEMA_FILE), generate_ddl(&self.schema.tables))?;
        for unit in &self.units {
            unit.save(&dir, &self.conn)?;
        }
        self.version = Some(version);
        info!(version, path = ?dir, "snapshot saved");
        Ok((version, dir))
    }
}
