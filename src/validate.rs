//! Row-count request checks, run before anything is generated

use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::error::{GenError, Result};
use crate::schema::{CountRule, SchemaDescription};

/// Check a row-count request against the schema and its count rules.
///
/// `existing` holds rows already present per unit (loaded or attached).
/// Violations are configuration errors; sheets that will outrun a
/// dependency only produce warnings, which are also returned.
pub fn validate_counts(
    schema: &SchemaDescription,
    counts: &BTreeMap<String, u64>,
    existing: &HashMap<String, u64>,
) -> Result<Vec<String>> {
    let names = schema.unit_names();
    for name in counts.keys() {
        if !names.contains(&name.as_str()) {
            return Err(GenError::Config(format!(
                "row count requested for unknown unit '{}'",
                name
            )));
        }
    }

    let requested = |name: &str| counts.get(name).copied().unwrap_or(0);

    for rule in &schema.rules {
        match rule {
            CountRule::AtMost { unit, other } => {
                if requested(unit) > requested(other) {
                    return Err(GenError::Config(format!(
                        "{} {} rows requested but at most {} allowed (one per {} row)",
                        requested(unit),
                        unit,
                        requested(other),
                        other
                    )));
                }
            }
            CountRule::Capacity { unit, max } => {
                if requested(unit) > *max {
                    return Err(GenError::Config(format!(
                        "{} {} rows requested, capacity is {}",
                        requested(unit),
                        unit,
                        max
                    )));
                }
            }
        }
    }

    let mut warnings = Vec::new();
    for sheet in &schema.sheets {
        let wanted = requested(&sheet.name);
        if wanted == 0 {
            continue;
        }
        for mapping in &sheet.mappings {
            let available =
                requested(&mapping.dependency) + existing.get(&mapping.dependency).copied().unwrap_or(0);
            if wanted > available {
                warn!(
                    sheet = %sheet.name,
                    dependency = %mapping.dependency,
                    wanted,
                    available,
                    "sheet will run out of references"
                );
                warnings.push(format!(
                    "{} wants {} rows but {} offers only {}",
                    sheet.name, wanted, mapping.dependency, available
                ));
            }
        }
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "Tables": {
            "Parent": { "attr": {"Parent_ID": "Integer"}, "primary_key": ["Parent_ID"] },
            "Child": {
                "attr": {"Child_ID": "Integer"},
                "primary_key": ["Child_ID"],
                "foreign_key": {"Parent": ["Integer", "Parent.Parent_ID"]}
            }
        },
        "Sheets": {
            "Log": {
                "columns": ["Child", "Note"],
                "foreign_key": {"Child": {"Child": "Child_ID"}},
                "dependency": ["Child"]
            }
        },
        "Rules": [
            {"unit": "Child", "at_most": "Parent"},
            {"unit": "Parent", "capacity": 100}
        ]
    }"#;

    fn request(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(n, c)| (n.to_string(), *c)).collect()
    }

    #[test]
    fn test_accepts_valid_request() {
        let schema = SchemaDescription::from_json(SCHEMA).unwrap();
        let warnings = validate_counts(
            &schema,
            &request(&[("Parent", 10), ("Child", 10), ("Log", 5)]),
            &HashMap::new(),
        )
        .unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_rejects_at_most_violation() {
        let schema = SchemaDescription::from_json(SCHEMA).unwrap();
        let err = validate_counts(
            &schema,
            &request(&[("Parent", 3), ("Child", 4)]),
            &HashMap::new(),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rejects_capacity_violation() {
        let schema = SchemaDescription::from_json(SCHEMA).unwrap();
        assert!(validate_counts(&schema, &request(&[("Parent", 101)]), &HashMap::new()).is_err());
    }

    #[test]
    fn test_rejects_unknown_unit() {
        let schema = SchemaDescription::from_json(SCHEMA).unwrap();
        let err = validate_counts(&schema, &request(&[("Nope", 1)]), &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn test_warns_when_sheet_outruns_dependency() {
        let schema = SchemaDescription::from_json(SCHEMA).unwrap();
        let counts = request(&[("Parent", 5), ("Child", 2), ("Log", 6)]);

        let warnings = validate_counts(&schema, &counts, &HashMap::new()).unwrap();
        assert_eq!(warnings.len(), 1);

        let existing = HashMap::from([("Child".to_string(), 4)]);
        assert!(validate_counts(&schema, &counts, &existing).unwrap().is_empty());
    }
}
