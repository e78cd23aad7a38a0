// 🏷️ Column Resolution - logical field → raw column
//
// Each extract vintage spells its headers differently ("CRASH DATE",
// "crash_date", "CrashDate"). A logical field lists candidate names in
// priority order; the first candidate present in the table wins.

use crate::error::{PipelineError, Result};

// ============================================================================
// CANONICAL COLUMN NAMES
// ============================================================================

pub const COLLISION_ID: &str = "collision_id";
pub const CRASH_DATE: &str = "crash_date";
pub const MERGE_DATE: &str = "merge_date";
pub const WEATHER_DATE: &str = "weather_date";

pub const PERSON_INJURY: &str = "person_injury";
pub const INJURY_OCCURRED: &str = "injury_occurred";
pub const VEHICLE_TYPE: &str = "vehicle_type";
pub const WEATHER_CONDITION: &str = "weather_condition";

pub const PERSONS_INJURED: &str = "number_of_persons_injured";
pub const PERSONS_KILLED: &str = "number_of_persons_killed";

pub const INJURY_SEVERITY: &str = "injury_severity";
pub const COLLISION_SEVERITY: &str = "collision_severity";

// ============================================================================
// FIELD SPECS
// ============================================================================

/// One logical field: its canonical name and the raw names it may arrive under.
/// Aliases are written in normalised form (see `normalize_name`).
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(canonical: &'static str, aliases: &'static [&'static str]) -> Self {
        FieldSpec {
            canonical,
            aliases,
            required: true,
        }
    }

    pub const fn optional(canonical: &'static str, aliases: &'static [&'static str]) -> Self {
        FieldSpec {
            canonical,
            aliases,
            required: false,
        }
    }
}

/// Lowercase, trim, and collapse inner whitespace to underscores
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// First alias (in priority order) that matches a column; returns the raw column name
pub fn resolve<'a>(columns: &'a [String], aliases: &[&str]) -> Option<&'a str> {
    let normalized: Vec<String> = columns.iter().map(|c| normalize_name(c)).collect();
    aliases.iter().find_map(|alias| {
        normalized
            .iter()
            .position(|n| n == alias)
            .map(|i| columns[i].as_str())
    })
}

/// Resolved logical fields for one table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    entries: Vec<(&'static str, String)>,
}

impl ColumnMap {
    /// Raw column name for a canonical field, if it resolved
    pub fn get(&self, canonical: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(c, _)| *c == canonical)
            .map(|(_, raw)| raw.as_str())
    }

    pub fn contains(&self, canonical: &str) -> bool {
        self.get(canonical).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.entries.iter().map(|(c, raw)| (*c, raw.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve every spec against the table's columns.
/// A required field with no match is fatal; optional fields are left out.
pub fn resolve_fields(source_name: &str, columns: &[String], specs: &[FieldSpec]) -> Result<ColumnMap> {
    let mut map = ColumnMap::default();

    for spec in specs {
        match resolve(columns, spec.aliases) {
            Some(raw) => map.entries.push((spec.canonical, raw.to_string())),
            None if spec.required => {
                return Err(PipelineError::MissingColumn {
                    source_name: source_name.to_string(),
                    field: spec.canonical.to_string(),
                    aliases: spec.aliases.iter().map(|a| a.to_string()).collect(),
                    available: columns.to_vec(),
                })
            }
            None => {}
        }
    }

    Ok(map)
}
