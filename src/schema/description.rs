//! Schema description loaded from the JSON configuration file

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::types::*;
use crate::config::GenerationSettings;
use crate::error::{GenError, Result};
use crate::parser::SqlValue;

/// Every unit the session will manage, plus request defaults.
#[derive(Debug, Clone, Default)]
pub struct SchemaDescription {
    pub tables: Vec<TableSpec>,
    pub sheets: Vec<SheetSpec>,
    pub rules: Vec<CountRule>,
    /// Default row-count request
    pub counts: BTreeMap<String, u64>,
    pub settings: GenerationSettings,
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(rename = "Tables", default)]
    tables: Map<String, Value>,
    #[serde(rename = "Sheets", default)]
    sheets: Map<String, Value>,
    #[serde(rename = "Rules", default)]
    rules: Vec<RawRule>,
    #[serde(rename = "Counts", default)]
    counts: BTreeMap<String, u64>,
    #[serde(rename = "Settings", default)]
    settings: GenerationSettings,
}

#[derive(Deserialize)]
struct RawTable {
    attr: Map<String, Value>,
    #[serde(default)]
    primary_key: Vec<String>,
    #[serde(default)]
    foreign_key: Map<String, Value>,
    #[serde(default)]
    dependency: Vec<String>,
    #[serde(default)]
    identity: Option<String>,
    #[serde(default)]
    null_when: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawNullRule {
    column: String,
    equals: Value,
}

#[derive(Deserialize)]
struct RawSheet {
    columns: Vec<String>,
    #[serde(default)]
    foreign_key: Map<String, Value>,
    #[serde(default)]
    dependency: Vec<String>,
}

#[derive(Deserialize)]
struct RawRule {
    unit: String,
    #[serde(default)]
    at_most: Option<String>,
    #[serde(default)]
    capacity: Option<u64>,
}

impl SchemaDescription {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawSchema = serde_json::from_str(text)?;

        let mut tables = Vec::with_capacity(raw.tables.len());
        for (name, value) in raw.tables {
            let table: RawTable = serde_json::from_value(value)?;
            tables.push(build_table(name, table)?);
        }
        resolve_foreign_columns(&mut tables);

        let mut sheets = Vec::with_capacity(raw.sheets.len());
        for (name, value) in raw.sheets {
            let sheet: RawSheet = serde_json::from_value(value)?;
            sheets.push(build_sheet(name, sheet)?);
        }

        let rules = raw
            .rules
            .into_iter()
            .map(build_rule)
            .collect::<Result<Vec<_>>>()?;

        let description = Self {
            tables,
            sheets,
            rules,
            counts: raw.counts,
            settings: raw.settings,
        };
        description.check_unique_names()?;
        description.check_foreign_targets()?;
        Ok(description)
    }

    /// Names of every unit, tables first
    pub fn unit_names(&self) -> Vec<&str> {
        self.tables
            .iter()
            .map(|t| t.name.as_str())
            .chain(self.sheets.iter().map(|s| s.name.as_str()))
            .collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetSpec> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Table foreign keys become SQL constraints, so they may only name tables.
    fn check_foreign_targets(&self) -> Result<()> {
        for table in &self.tables {
            for (column, fk) in table.foreign_keys() {
                if self.table(&fk.references_table).is_some() {
                    continue;
                }
                let found = if self.sheet(&fk.references_table).is_some() {
                    "a sheet"
                } else {
                    "not declared"
                };
                return Err(GenError::Config(format!(
                    "{}.{}: foreign key target '{}' is {}, expected a table",
                    table.name, column.name, fk.references_table, found
                )));
            }
        }
        Ok(())
    }

    fn check_unique_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in self.unit_names() {
            if !seen.insert(name) {
                return Err(GenError::Config(format!("unit '{}' declared twice", name)));
            }
        }
        Ok(())
    }
}

fn build_table(name: String, raw: RawTable) -> Result<TableSpec> {
    let mut columns = Vec::new();

    for (column, declared) in &raw.attr {
        let declared = declared.as_str().ok_or_else(|| {
            GenError::Config(format!("{}.{}: datatype must be a string", name, column))
        })?;
        let mut col = Column::new(column.clone(), ColumnType::parse(declared)?);
        if raw.primary_key.contains(column) {
            col = col.primary();
        }
        columns.push(col);
    }

    for (column, spec) in raw.foreign_key {
        let (declared, reference): (String, String) = serde_json::from_value(spec)?;
        let mut col = Column::new(column.clone(), ColumnType::parse(&declared)?)
            .references(ForeignKey::parse(&reference));
        if raw.primary_key.contains(&column) {
            col = col.primary();
        }
        columns.push(col);
    }

    for key in &raw.primary_key {
        if !columns.iter().any(|c| &c.name == key) {
            return Err(GenError::Config(format!(
                "{}: primary key column '{}' is not declared",
                name, key
            )));
        }
    }

    if let Some(identity) = &raw.identity {
        let is_integer_key = columns
            .iter()
            .any(|c| &c.name == identity && c.primary_key && c.col_type == ColumnType::Integer);
        if !is_integer_key || raw.primary_key.len() != 1 {
            return Err(GenError::Config(format!(
                "{}: identity column '{}' must be the sole Integer primary key",
                name, identity
            )));
        }
    }

    let mut null_rules = Vec::new();
    for (column, rule) in raw.null_when {
        let rule: RawNullRule = serde_json::from_value(rule)?;
        for referenced in [&column, &rule.column] {
            if !columns.iter().any(|c| &c.name == referenced) {
                return Err(GenError::Config(format!(
                    "{}: null rule names unknown column '{}'",
                    name, referenced
                )));
            }
        }
        null_rules.push(NullRule {
            column,
            when: rule.column,
            equals: SqlValue::from_json(&rule.equals),
        });
    }

    let fk_tables = columns
        .iter()
        .filter_map(|c| c.references.as_ref().map(|fk| fk.references_table.clone()));
    let dependency = merge_dependencies(&name, raw.dependency, fk_tables)?;

    Ok(TableSpec {
        name,
        columns,
        identity: raw.identity,
        null_rules,
        dependency,
    })
}

/// Bare `Table` references point at the referenced table's single-column primary key.
fn resolve_foreign_columns(tables: &mut [TableSpec]) {
    let keys: BTreeMap<String, String> = tables
        .iter()
        .filter_map(|t| match t.primary_key().as_slice() {
            [only] => Some((t.name.clone(), only.name.clone())),
            _ => None,
        })
        .collect();

    for table in tables.iter_mut() {
        for column in table.columns.iter_mut() {
            if let Some(fk) = column.references.as_mut() {
                if fk.references_column.is_none() {
                    fk.references_column = keys.get(&fk.references_table).cloned();
                }
            }
        }
    }
}

fn build_sheet(name: String, raw: RawSheet) -> Result<SheetSpec> {
    let mut mappings = Vec::new();

    for (dependency, columns) in raw.foreign_key {
        let columns: Map<String, Value> = serde_json::from_value(columns)?;
        let mut pairs = Vec::with_capacity(columns.len());
        for (own, theirs) in columns {
            if !raw.columns.contains(&own) {
                return Err(GenError::Config(format!(
                    "{}: mapped column '{}' is not a sheet column",
                    name, own
                )));
            }
            let theirs = theirs.as_str().ok_or_else(|| {
                GenError::Config(format!("{}.{}: mapped column must be a string", name, own))
            })?;
            pairs.push((own, theirs.to_string()));
        }
        mappings.push(SheetMapping {
            dependency,
            columns: pairs,
        });
    }

    let mapped = mappings.iter().map(|m| m.dependency.clone());
    let dependency = merge_dependencies(&name, raw.dependency, mapped)?;

    Ok(SheetSpec {
        name,
        columns: raw.columns,
        mappings,
        dependency,
    })
}

fn build_rule(raw: RawRule) -> Result<CountRule> {
    match (raw.at_most, raw.capacity) {
        (Some(other), None) => Ok(CountRule::AtMost {
            unit: raw.unit,
            other,
        }),
        (None, Some(max)) => Ok(CountRule::Capacity {
            unit: raw.unit,
            max,
        }),
        _ => Err(GenError::Config(format!(
            "rule for '{}' needs exactly one of at_most or capacity",
            raw.unit
        ))),
    }
}

/// Declared dependencies first, then implied ones; declared duplicates and self references are rejected.
fn merge_dependencies(
    name: &str,
    declared: Vec<String>,
    implied: impl Iterator<Item = String>,
) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    for dep in &declared {
        if !seen.insert(dep.clone()) {
            return Err(GenError::Config(format!(
                "{}: dependency '{}' listed twice",
                name, dep
            )));
        }
    }

    let mut merged = declared;
    for dep in implied {
        if seen.insert(dep.clone()) {
            merged.push(dep);
        }
    }

    if merged.iter().any(|dep| dep == name) {
        return Err(GenError::Config(format!("{} depends on itself", name)));
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMS: &str = r#"{
        "Tables": {
            "Candidate": {
                "attr": {"Candidate_ID": "Integer", "Name": "Varchar(40)", "Surname": "Varchar(40)"},
                "primary_key": ["Candidate_ID"],
                "foreign_key": {}
            },
            "Exam": {
                "attr": {"Exam_ID": "Integer", "Type": "Boolean", "Vehicle": "Integer"},
                "primary_key": ["Exam_ID"],
                "foreign_key": {"Candidate": ["Integer", "Candidate"]},
                "identity": "Exam_ID",
                "null_when": {"Vehicle": {"column": "Type", "equals": false}}
            }
        },
        "Sheets": {
            "Reservation": {
                "columns": ["Name", "Surname", "Slot"],
                "foreign_key": {"Candidate": {"Name": "Name", "Surname": "Surname"}}
            }
        },
        "Rules": [{"unit": "Reservation", "at_most": "Candidate"}],
        "Counts": {"Candidate": 3}
    }"#;

    #[test]
    fn test_parse_tables_and_sheets() {
        let schema = SchemaDescription::from_json(EXAMS).unwrap();
        assert_eq!(schema.unit_names(), vec!["Candidate", "Exam", "Reservation"]);

        let exam = schema.table("Exam").unwrap();
        let names: Vec<_> = exam.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Exam_ID", "Type", "Vehicle", "Candidate"]);
        assert_eq!(exam.dependency, vec!["Candidate".to_string()]);
        assert_eq!(exam.identity.as_deref(), Some("Exam_ID"));
        assert_eq!(exam.null_rules[0].equals, SqlValue::Integer(0));

        let fk = exam.column("Candidate").unwrap().references.clone().unwrap();
        assert_eq!(fk.references_column.as_deref(), Some("Candidate_ID"));

        let sheet = schema.sheet("Reservation").unwrap();
        assert_eq!(sheet.dependency, vec!["Candidate".to_string()]);
        assert_eq!(sheet.mappings[0].columns.len(), 2);
        assert_eq!(schema.counts["Candidate"], 3);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let text = r#"{"Tables": {"T": {"attr": {"id": "Integer"}, "dependency": ["T"]}}}"#;
        let err = SchemaDescription::from_json(text).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_duplicate_dependency_rejected() {
        let text = r#"{"Tables": {"T": {"attr": {"id": "Integer"}, "dependency": ["A", "A"]}}}"#;
        assert!(SchemaDescription::from_json(text).is_err());
    }

    #[test]
    fn test_unknown_primary_key_rejected() {
        let text = r#"{"Tables": {"T": {"attr": {"id": "Integer"}, "primary_key": ["nope"]}}}"#;
        assert!(SchemaDescription::from_json(text).is_err());
    }

    #[test]
    fn test_foreign_key_to_sheet_rejected() {
        let text = r#"{
            "Tables": {
                "Visit": {
                    "attr": {"Visit_ID": "Integer"},
                    "primary_key": ["Visit_ID"],
                    "foreign_key": {"Guest": ["Varchar(20)", "Guests.Name"]}
                }
            },
            "Sheets": {"Guests": {"columns": ["Name"]}}
        }"#;
        let err = SchemaDescription::from_json(text).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("a sheet"));
    }
}
