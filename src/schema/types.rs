use crate::error::{GenError, Result};
use crate::parser::SqlValue;

/// Column data type
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Integer,
    Float,
    Varchar(Option<u32>),
    Boolean,
    Date,
    DateTime,
    Char(Option<u32>),
    Text,
}

impl ColumnType {
    /// Parse a declared type such as `Integer` or `Varchar(40)`.
    pub fn parse(declared: &str) -> Result<Self> {
        let declared = declared.trim();
        let (base, args) = match declared.split_once('(') {
            Some((base, rest)) => {
                let args = rest.strip_suffix(')').ok_or_else(|| {
                    GenError::Config(format!("malformed datatype '{}'", declared))
                })?;
                (base.trim(), Some(args.trim()))
            }
            None => (declared, None),
        };

        let length = match args {
            Some(args) => Some(args.parse::<u32>().map_err(|_| {
                GenError::Config(format!("invalid length in datatype '{}'", declared))
            })?),
            None => None,
        };

        let col_type = match base {
            "Integer" => ColumnType::Integer,
            "Float" => ColumnType::Float,
            "Varchar" => ColumnType::Varchar(length),
            "Boolean" => ColumnType::Boolean,
            "Date" => ColumnType::Date,
            "DateTime" => ColumnType::DateTime,
            "Char" => ColumnType::Char(length),
            "Text" => ColumnType::Text,
            other => {
                return Err(GenError::Config(format!("datatype {} not supported", other)));
            }
        };

        if length.is_some() && !matches!(col_type, ColumnType::Varchar(_) | ColumnType::Char(_)) {
            return Err(GenError::Config(format!(
                "datatype {} does not take a length",
                base
            )));
        }

        Ok(col_type)
    }

    /// SQLite declaration for this type
    pub fn sql_type(&self) -> String {
        match self {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Float => "REAL".to_string(),
            ColumnType::Varchar(Some(n)) => format!("VARCHAR({})", n),
            ColumnType::Varchar(None) => "VARCHAR".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Char(Some(n)) => format!("CHAR({})", n),
            ColumnType::Char(None) => "CHAR".to_string(),
            ColumnType::Text => "TEXT".to_string(),
        }
    }

    /// Maximum text length, if the type bounds it
    pub fn max_len(&self) -> Option<usize> {
        match self {
            ColumnType::Varchar(n) | ColumnType::Char(n) => n.map(|n| n as usize),
            _ => None,
        }
    }
}

/// Foreign key reference
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub references_table: String,
    /// Referenced column; the referenced table's primary key when not spelled out
    pub references_column: Option<String>,
}

impl ForeignKey {
    /// Parse `Table.Column` or a bare `Table`.
    pub fn parse(reference: &str) -> Self {
        match reference.split_once('.') {
            Some((table, column)) => Self {
                references_table: table.to_string(),
                references_column: Some(column.to_string()),
            },
            None => Self {
                references_table: reference.to_string(),
                references_column: None,
            },
        }
    }
}

/// How a column gets its value
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    Plain,
    PrimaryKey,
    ForeignKey(ForeignKey),
}

/// Column definition
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub col_type: ColumnType,
    pub primary_key: bool,
    pub references: Option<ForeignKey>,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
            primary_key: false,
            references: None,
        }
    }

    pub fn primary(self) -> Self {
        Self {
            primary_key: true,
            ..self
        }
    }

    pub fn references(self, fk: ForeignKey) -> Self {
        Self {
            references: Some(fk),
            ..self
        }
    }

    /// Foreign keys win over primary keys: a key column borrowed from a parent is still drawn from the parent.
    pub fn kind(&self) -> ColumnKind {
        match (&self.references, self.primary_key) {
            (Some(fk), _) => ColumnKind::ForeignKey(fk.clone()),
            (None, true) => ColumnKind::PrimaryKey,
            (None, false) => ColumnKind::Plain,
        }
    }
}

/// Null `column` whenever `when` holds `equals` in the same row.
#[derive(Debug, Clone, PartialEq)]
pub struct NullRule {
    pub column: String,
    pub when: String,
    pub equals: SqlValue,
}

/// Relational table definition
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<Column>,
    /// Auto-numbered key column, never generated
    pub identity: Option<String>,
    pub null_rules: Vec<NullRule>,
    pub dependency: Vec<String>,
}

impl TableSpec {
    pub fn primary_key(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (&Column, &ForeignKey)> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref().map(|fk| (c, fk)))
    }
}

/// Columns a sheet copies from one dependency: `(own column, dependency column)`
#[derive(Debug, Clone, PartialEq)]
pub struct SheetMapping {
    pub dependency: String,
    pub columns: Vec<(String, String)>,
}

/// Flat-file sheet definition
#[derive(Debug, Clone)]
pub struct SheetSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub mappings: Vec<SheetMapping>,
    pub dependency: Vec<String>,
}

/// Cross-unit constraint on requested row counts
#[derive(Debug, Clone, PartialEq)]
pub enum CountRule {
    /// count(unit) <= count(other)
    AtMost { unit: String, other: String },
    /// count(unit) <= max
    Capacity { unit: String, max: u64 },
}
