//! Dependency-ordered execution of storage units
//!
//! The order is fixed up front with Kahn's algorithm. Units start sorted by
//! how many dependencies they declare, and among ready units the earlier one
//! in that ordering always goes first, so a schema yields the same order on
//! every run.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::{GenError, Result};
use crate::storage::StorageUnit;

/// Which completion flag a scheduling pass drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Generate,
    Load,
}

impl Pass {
    pub fn is_complete(self, unit: &StorageUnit) -> bool {
        match self {
            Pass::Generate => unit.has_been_generated(),
            Pass::Load => unit.has_been_loaded(),
        }
    }

    pub fn dependencies_ready(self, unit: &StorageUnit, units: &[StorageUnit]) -> bool {
        if unit.is_not_dependent() {
            return true;
        }
        match self {
            Pass::Generate => unit.is_dependency_fulfilled(units),
            Pass::Load => unit.is_dependency_fulfilled_for_loading(units),
        }
    }
}

/// Runs each unit once, never before its dependencies.
#[derive(Debug, Clone)]
pub struct DependencyScheduler {
    order: Vec<usize>,
}

impl DependencyScheduler {
    pub fn new(units: &[StorageUnit]) -> Result<Self> {
        let graph: Vec<(&str, &[String])> = units
            .iter()
            .map(|unit| (unit.name(), unit.dependency()))
            .collect();
        Ok(Self {
            order: execution_order(&graph)?,
        })
    }

    /// Unit indices in execution order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Call `action` for every unit not yet complete for `pass`.
    ///
    /// The action receives the whole slice plus the index of the unit to
    /// run, so it can read dependency state while it works. Returns the
    /// number of units run.
    pub fn run<F>(&self, units: &mut [StorageUnit], pass: Pass, mut action: F) -> Result<usize>
    where
        F: FnMut(&mut [StorageUnit], usize) -> Result<()>,
    {
        let mut ran = 0;
        for &idx in &self.order {
            if pass.is_complete(&units[idx]) {
                debug!(unit = %units[idx].name(), ?pass, "already complete");
                continue;
            }

            if !pass.dependencies_ready(&units[idx], units) {
                let unit = &units[idx];
                let missing = units
                    .iter()
                    .find(|u| unit.is_dependent_on(u) && !pass.is_complete(u))
                    .map(|u| u.name().to_string())
                    .or_else(|| {
                        unit.dependency()
                            .iter()
                            .find(|dep| units.iter().all(|u| u.name() != dep.as_str()))
                            .cloned()
                    })
                    .unwrap_or_default();
                return Err(GenError::MissingDependency {
                    unit: units[idx].name().to_string(),
                    dependency: missing,
                });
            }

            action(&mut *units, idx)?;
            ran += 1;
        }
        Ok(ran)
    }
}

/// Topological order over `(name, dependencies)` pairs, as indices.
pub fn execution_order(units: &[(&str, &[String])]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = units
        .iter()
        .enumerate()
        .map(|(idx, (name, _))| (*name, idx))
        .collect();

    // rank = position after a stable sort by dependency count
    let mut by_count: Vec<usize> = (0..units.len()).collect();
    by_count.sort_by_key(|&idx| units[idx].1.len());
    let mut rank = vec![0; units.len()];
    for (position, &idx) in by_count.iter().enumerate() {
        rank[idx] = position;
    }

    let mut pending = vec![0usize; units.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
    for (idx, (name, deps)) in units.iter().enumerate() {
        for dep in deps.iter() {
            let &parent = index.get(dep.as_str()).ok_or_else(|| GenError::MissingDependency {
                unit: name.to_string(),
                dependency: dep.clone(),
            })?;
            pending[idx] += 1;
            dependents[parent].push(idx);
        }
    }

    let mut ready: BTreeSet<(usize, usize)> = (0..units.len())
        .filter(|&idx| pending[idx] == 0)
        .map(|idx| (rank[idx], idx))
        .collect();
    let mut order = Vec::with_capacity(units.len());

    while let Some((_, idx)) = ready.pop_first() {
        order.push(idx);
        for &child in &dependents[idx] {
            pending[child] -= 1;
            if pending[child] == 0 {
                ready.insert((rank[child], child));
            }
        }
    }

    if order.len() < units.len() {
        let stuck = (0..units.len())
            .filter(|idx| pending[*idx] > 0)
            .map(|idx| units[idx].0.to_string())
            .collect();
        return Err(GenError::DependencyCycle(stuck));
    }

    Ok(order)
}
