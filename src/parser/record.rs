use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde_json::Value;

use crate::schema::ColumnType;

/// One row, aligned with its unit's column order
pub type Row = Vec<SqlValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn bind_to(&self, idx: usize, stmt: &mut rusqlite::Statement) -> rusqlite::Result<()> {
        match self {
            SqlValue::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null)?,
            SqlValue::Integer(i) => stmt.raw_bind_parameter(idx, i)?,
            SqlValue::Real(f) => stmt.raw_bind_parameter(idx, f)?,
            SqlValue::Text(s) => stmt.raw_bind_parameter(idx, s.as_str())?,
        }
        Ok(())
    }

    pub fn from_sql(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                SqlValue::Text(String::from_utf8_lossy(t).into_owned())
            }
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Text form written to CSV files; NULL becomes an empty field
    pub fn to_field(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Text(s) => s.clone(),
        }
    }

    /// Identity used by key registries. Values of different storage classes
    /// with the same text collide, matching SQLite's comparison after affinity.
    pub fn key(&self) -> String {
        match self {
            SqlValue::Null => "<null>".to_string(),
            other => other.to_field(),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Coerce a CSV field into the declared column type.
/// Empty fields are NULL; fields that do not parse are kept as text.
pub fn parse_field(raw: &str, col_type: &ColumnType) -> SqlValue {
    if raw.is_empty() {
        return SqlValue::Null;
    }

    match col_type {
        ColumnType::Integer => raw
            .parse::<i64>()
            .map(SqlValue::Integer)
            .unwrap_or_else(|_| SqlValue::Text(raw.to_string())),
        ColumnType::Float => raw
            .parse::<f64>()
            .map(SqlValue::Real)
            .unwrap_or_else(|_| SqlValue::Text(raw.to_string())),
        ColumnType::Boolean => match raw {
            "1" | "True" | "true" | "TRUE" => SqlValue::Integer(1),
            "0" | "False" | "false" | "FALSE" => SqlValue::Integer(0),
            other => SqlValue::Text(other.to_string()),
        },
        ColumnType::Varchar(_)
        | ColumnType::Char(_)
        | ColumnType::Text
        | ColumnType::Date
        | ColumnType::DateTime => SqlValue::Text(raw.to_string()),
    }
}

/// Sheet columns are untyped: every non-empty field stays text as written.
pub fn parse_sheet_field(raw: &str) -> SqlValue {
    if raw.is_empty() {
        SqlValue::Null
    } else {
        SqlValue::Text(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_by_type() {
        assert_eq!(parse_field("42", &ColumnType::Integer), SqlValue::Integer(42));
        assert_eq!(parse_field("1.5", &ColumnType::Float), SqlValue::Real(1.5));
        assert_eq!(parse_field("True", &ColumnType::Boolean), SqlValue::Integer(1));
        assert_eq!(parse_field("0", &ColumnType::Boolean), SqlValue::Integer(0));
        assert_eq!(parse_field("", &ColumnType::Text), SqlValue::Null);
        assert_eq!(
            parse_field("007", &ColumnType::Varchar(Some(3))),
            SqlValue::Text("007".into())
        );
    }

    #[test]
    fn test_field_text_survives_parse() {
        let values = [
            (SqlValue::Integer(-7), ColumnType::Integer),
            (SqlValue::Real(0.25), ColumnType::Float),
            (SqlValue::Text("Kowalski".into()), ColumnType::Text),
            (SqlValue::Null, ColumnType::Date),
        ];
        for (value, col_type) in values {
            assert_eq!(parse_field(&value.to_field(), &col_type), value);
        }
    }

    #[test]
    fn test_sheet_fields_stay_text() {
        assert_eq!(parse_sheet_field("007"), SqlValue::Text("007".into()));
        assert_eq!(parse_sheet_field("42"), SqlValue::Text("42".into()));
        assert_eq!(parse_sheet_field(""), SqlValue::Null);
    }

    #[test]
    fn test_from_json() {
        assert_eq!(SqlValue::from_json(&Value::Bool(true)), SqlValue::Integer(1));
        assert_eq!(SqlValue::from_json(&serde_json::json!(3)), SqlValue::Integer(3));
        assert_eq!(SqlValue::from_json(&Value::Null), SqlValue::Null);
    }
}
