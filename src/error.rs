use thiserror::Error;

/// Errors emitted while building, generating, loading or saving units.
#[derive(Debug, Error)]
pub enum GenError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unit '{unit}' depends on unknown unit '{dependency}'")]
    MissingDependency { unit: String, dependency: String },
    #[error("dependency cycle between units: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
    #[error("exhausted key space for {unit}.{column} after {attempts} attempts")]
    KeySpaceExhausted {
        unit: String,
        column: String,
        attempts: u32,
    },
    #[error("no rows left in '{dependency}' to reference from '{unit}'")]
    ReferenceExhausted { unit: String, dependency: String },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GenError {
    /// Errors the caller can fix by changing the schema or the row-count request.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GenError::Config(_) | GenError::MissingDependency { .. } | GenError::DependencyCycle(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduling_errors_are_configuration_errors() {
        let cycle = GenError::DependencyCycle(vec!["a".into(), "b".into()]);
        assert!(cycle.is_configuration());
        assert_eq!(cycle.to_string(), "dependency cycle between units: a, b");

        let exhausted = GenError::KeySpaceExhausted {
            unit: "t".into(),
            column: "id".into(),
            attempts: 3,
        };
        assert!(!exhausted.is_configuration());
    }
}
