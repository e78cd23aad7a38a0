// 🧼 Source Conditioning
//
// One conditioner per extract. Each turns a raw table into the canonical
// schema: collision ids as trimmed strings, a standardized timestamp, a
// `merge_date` key, and the source's derived fields. Conditioning never
// filters rows; unparseable values become nulls and are counted.

pub mod crash;
pub mod person;
pub mod vehicle;
pub mod weather;

pub use crash::CrashConditioner;
pub use person::{PersonConditioner, INJURY_CATEGORIES, MISSING_INJURY_DEFAULT};
pub use vehicle::{VehicleConditioner, VehicleTypeTable};
pub use weather::{WeatherCondition, WeatherConditioner, WeatherSignals, WEATHER_PRECEDENCE};

use crate::columns::{ColumnMap, COLLISION_ID, MERGE_DATE};
use crate::dates;
use crate::diagnostics::StageReport;
use crate::error::{PipelineError, Result};
use crate::table::{Table, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SOURCE KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Crash,
    Person,
    Vehicle,
    Weather,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Crash,
        SourceKind::Person,
        SourceKind::Vehicle,
        SourceKind::Weather,
    ];

    /// Short name used in artifact file names and logs
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Crash => "crashes",
            SourceKind::Person => "person",
            SourceKind::Vehicle => "vehicles",
            SourceKind::Weather => "weather",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "crash" | "crashes" => Ok(SourceKind::Crash),
            "person" | "persons" => Ok(SourceKind::Person),
            "vehicle" | "vehicles" => Ok(SourceKind::Vehicle),
            "weather" => Ok(SourceKind::Weather),
            other => Err(PipelineError::Config(format!(
                "unknown source '{other}' (expected crash, person, vehicle or weather)"
            ))),
        }
    }
}

// ============================================================================
// CONDITIONER TRAIT
// ============================================================================

/// Core trait: raw extract in, canonical table and diagnostics out.
///
/// Implementations must be idempotent: conditioning an already-conditioned
/// table leaves derived columns as they are.
pub trait SourceConditioner: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn condition(&self, raw: Table) -> Result<(Table, StageReport)>;

    /// Conditioner version, recorded in the run manifest
    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// Factory: the conditioner for a source
pub fn get_conditioner(kind: SourceKind) -> Box<dyn SourceConditioner> {
    match kind {
        SourceKind::Crash => Box::new(CrashConditioner::new()),
        SourceKind::Person => Box::new(PersonConditioner::new()),
        SourceKind::Vehicle => Box::new(VehicleConditioner::new()),
        SourceKind::Weather => Box::new(WeatherConditioner::new()),
    }
}

// ============================================================================
// SHARED STEPS
// ============================================================================

/// Canonical string form of a collision id: trimmed, and "123.0" → "123"
/// so ids that passed through a float column still join.
pub fn normalize_collision_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(int_part) = trimmed.strip_suffix(".0") {
        if !int_part.is_empty() && int_part.chars().all(|c| c.is_ascii_digit()) {
            return Some(int_part.to_string());
        }
    }
    Some(trimmed.to_string())
}

/// Rename the resolved id column to `collision_id` and normalise every value.
pub fn standardize_collision_ids(table: &mut Table, raw_column: &str, report: &mut StageReport) {
    table.rename_column(raw_column, COLLISION_ID);
    let Some(idx) = table.column_index(COLLISION_ID) else {
        return;
    };

    let values: Vec<Value> = table
        .rows()
        .iter()
        .map(|r| r[idx].as_deref().and_then(normalize_collision_id))
        .collect();
    let nulls = values.iter().filter(|v| v.is_none()).count() as u64;
    table.set_column(COLLISION_ID, values);

    report.anomaly("null_collision_id", Some(COLLISION_ID), nulls, table.len() as u64);
}

/// Parse the resolved date column into `target` (canonical timestamp text)
/// and derive `merge_date` unless the table already carries one.
pub fn standardize_dates(table: &mut Table, raw_column: &str, target: &str, report: &mut StageReport) {
    let Some(src) = table.column_index(raw_column) else {
        return;
    };

    let mut timestamps: Vec<Value> = Vec::with_capacity(table.len());
    let mut keys: Vec<Value> = Vec::with_capacity(table.len());
    let mut unparseable = 0u64;

    for row in table.rows() {
        let raw = row[src].as_deref();
        let (ts, key) = dates::standardize(raw);
        if raw.is_some() && ts.is_none() {
            unparseable += 1;
        }
        timestamps.push(ts);
        keys.push(key);
    }

    let total = table.len() as u64;
    let missing = timestamps.iter().filter(|t| t.is_none()).count() as u64 - unparseable;

    if raw_column != target {
        table.rename_column(raw_column, target);
    }
    table.set_column(target, timestamps);
    if !table.has_column(MERGE_DATE) {
        table.set_column(MERGE_DATE, keys);
    }

    report.anomaly("unparseable_date", Some(target), unparseable, total);
    report.anomaly("missing_date", Some(target), missing, total);
}

/// Rename every resolved optional field to its canonical name
pub fn rename_resolved(table: &mut Table, resolved: &ColumnMap) {
    for (canonical, raw) in resolved.iter() {
        table.rename_column(raw, canonical);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_from_str() {
        assert_eq!("Crashes".parse::<SourceKind>().unwrap(), SourceKind::Crash);
        assert_eq!("vehicle".parse::<SourceKind>().unwrap(), SourceKind::Vehicle);
        assert!("bikes".parse::<SourceKind>().is_err());
        assert_eq!(SourceKind::Vehicle.to_string(), "vehicles");
    }

    #[test]
    fn test_normalize_collision_id() {
        assert_eq!(normalize_collision_id(" 4455765 "), Some("4455765".to_string()));
        assert_eq!(normalize_collision_id("4455765.0"), Some("4455765".to_string()));
        assert_eq!(normalize_collision_id("A-1.0"), Some("A-1.0".to_string()));
        assert_eq!(normalize_collision_id("  "), None);
    }

    #[test]
    fn test_factory_returns_matching_kind() {
        for kind in SourceKind::ALL {
            assert_eq!(get_conditioner(kind).kind(), kind);
        }
    }

    #[test]
    fn test_standardize_dates_counts_unparseable_and_missing() {
        let mut table = Table::from_rows(
            vec!["CRASH DATE".into()],
            vec![
                vec![Some("09/11/2021".into())],
                vec![Some("nonsense".into())],
                vec![None],
            ],
        );
        let mut report = StageReport::new("test", 3);
        standardize_dates(&mut table, "CRASH DATE", "crash_date", &mut report);

        assert_eq!(table.columns(), &["crash_date".to_string(), MERGE_DATE.to_string()]);
        assert_eq!(table.value(0, 0), Some("2021-09-11 00:00:00"));
        assert_eq!(table.value(0, 1), Some("2021-09-11"));
        assert_eq!(table.value(1, 0), None);
        assert_eq!(table.len(), 3);
        assert_eq!(report.count_of("unparseable_date"), 1);
        assert_eq!(report.count_of("missing_date"), 1);
    }
}
