// 🚗 Vehicle Conditioning
//
// Canonical ids + dates, plus vehicle-type cleanup:
//   1. trim + title-case ("4 DR SEDAN" → "4 Dr Sedan")
//   2. synonym table collapses near-duplicate labels ("4 Dr Sedan" → "Sedan")
// Labels not in the table pass through unchanged.

use super::{rename_resolved, standardize_collision_ids, standardize_dates, SourceConditioner, SourceKind};
use crate::columns::{resolve_fields, FieldSpec, COLLISION_ID, CRASH_DATE, VEHICLE_TYPE};
use crate::diagnostics::StageReport;
use crate::error::Result;
use crate::table::{Table, Value};
use std::collections::{BTreeMap, HashSet};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::required(COLLISION_ID, &["collision_id", "collisionid"]),
    FieldSpec::required(CRASH_DATE, &["crash_date", "crashdate", "date"]),
    FieldSpec::optional(
        VEHICLE_TYPE,
        &["vehicle_type", "vehicle_type_code1", "vehicle_type_code_1", "vehicle_type_code"],
    ),
];

/// Title-cased label → canonical label
const SYNONYMS: &[(&str, &str)] = &[
    // Sedan group
    ("4 Dr Sedan", "Sedan"),
    ("2 Dr Sedan", "Sedan"),
    ("Passenger Vehicle", "Sedan"),
    // Pickup group
    ("Pick-Up Truck", "Pickup Truck"),
    ("Pk", "Pickup Truck"),
    // SUV / wagon group
    ("Sport Utility / Station Wagon", "SUV/Station Wagon"),
    ("Station Wagon/Sport Utility Vehicle", "SUV/Station Wagon"),
];

/// Upper-case the first letter of every alphabetic run, lower-case the rest
pub fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_alpha = false;
    for c in raw.trim().chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Outcome of normalising one label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Collapsed through the synonym table
    Consolidated(String),
    /// Already a canonical label
    Canonical(String),
    /// Not in the table; case-folded label passed through
    PassThrough(String),
}

impl Normalized {
    pub fn label(&self) -> &str {
        match self {
            Normalized::Consolidated(s) | Normalized::Canonical(s) | Normalized::PassThrough(s) => s,
        }
    }

    pub fn into_label(self) -> String {
        match self {
            Normalized::Consolidated(s) | Normalized::Canonical(s) | Normalized::PassThrough(s) => s,
        }
    }
}

/// Explicit synonym table for vehicle types
#[derive(Debug, Clone)]
pub struct VehicleTypeTable {
    synonyms: BTreeMap<String, String>,
    canonical: HashSet<String>,
}

impl VehicleTypeTable {
    pub fn new() -> Self {
        Self::from_pairs(SYNONYMS)
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        VehicleTypeTable {
            synonyms: pairs
                .iter()
                .map(|(k, v)| (title_case(k), v.to_string()))
                .collect(),
            canonical: pairs.iter().map(|(_, v)| v.to_string()).collect(),
        }
    }

    pub fn normalize(&self, raw: &str) -> Normalized {
        let trimmed = raw.trim();
        if self.canonical.contains(trimmed) {
            return Normalized::Canonical(trimmed.to_string());
        }
        let folded = title_case(trimmed);
        match self.synonyms.get(&folded) {
            Some(target) => Normalized::Consolidated(target.clone()),
            None if self.canonical.contains(&folded) => Normalized::Canonical(folded),
            None => Normalized::PassThrough(folded),
        }
    }

    pub fn len(&self) -> usize {
        self.synonyms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.synonyms.is_empty()
    }
}

impl Default for VehicleTypeTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct VehicleConditioner {
    types: VehicleTypeTable,
}

impl VehicleConditioner {
    pub fn new() -> Self {
        VehicleConditioner {
            types: VehicleTypeTable::new(),
        }
    }

    pub fn with_table(types: VehicleTypeTable) -> Self {
        VehicleConditioner { types }
    }
}

impl Default for VehicleConditioner {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceConditioner for VehicleConditioner {
    fn kind(&self) -> SourceKind {
        SourceKind::Vehicle
    }

    fn condition(&self, raw: Table) -> Result<(Table, StageReport)> {
        let resolved = resolve_fields("vehicle", raw.columns(), FIELDS)?;
        let rows_in = raw.len() as u64;
        let mut report = StageReport::new("condition:vehicle", rows_in);
        let mut table = raw;

        if let Some(raw_id) = resolved.get(COLLISION_ID) {
            standardize_collision_ids(&mut table, raw_id, &mut report);
        }
        if let Some(raw_date) = resolved.get(CRASH_DATE) {
            standardize_dates(&mut table, raw_date, CRASH_DATE, &mut report);
        }
        rename_resolved(&mut table, &resolved);

        if let Some(idx) = table.column_index(VEHICLE_TYPE) {
            let before: HashSet<&str> = table.rows().iter().filter_map(|r| r[idx].as_deref()).collect();
            let distinct_before = before.len();

            let mut consolidated = 0u64;
            let mut passed_through = 0u64;
            let labels: Vec<Value> = table
                .rows()
                .iter()
                .map(|r| {
                    r[idx].as_deref().map(|v| {
                        let normalized = self.types.normalize(v);
                        match normalized {
                            Normalized::Consolidated(_) => consolidated += 1,
                            Normalized::PassThrough(_) => passed_through += 1,
                            Normalized::Canonical(_) => {}
                        }
                        normalized.into_label()
                    })
                })
                .collect();

            let distinct_after = labels.iter().flatten().collect::<HashSet<_>>().len();
            table.set_column(VEHICLE_TYPE, labels);

            tracing::info!(distinct_before, distinct_after, consolidated, "vehicle types normalised");
            report.expected("vehicle_type_consolidated", Some(VEHICLE_TYPE), consolidated, rows_in);
            report.anomaly("vehicle_type_unmapped_passthrough", Some(VEHICLE_TYPE), passed_through, rows_in);
        } else {
            tracing::warn!("vehicle extract has no vehicle type column");
        }

        let rows_out = table.len() as u64;
        Ok((table, report.with_rows_out(rows_out)))
    }
}
