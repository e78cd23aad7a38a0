// 🧍 Person Conditioning
//
// Canonical ids + dates, plus the binary `injury_occurred` target derived
// from the categorical `person_injury` field.

use super::{rename_resolved, standardize_collision_ids, standardize_dates, SourceConditioner, SourceKind};
use crate::columns::{resolve_fields, FieldSpec, COLLISION_ID, CRASH_DATE, INJURY_OCCURRED, PERSON_INJURY};
use crate::diagnostics::StageReport;
use crate::error::Result;
use crate::table::{Table, Value};

/// Injury categories that count as "injury occurred" (compared case-insensitively)
pub const INJURY_CATEGORIES: &[&str] = &["injured", "killed"];

/// Value assigned when `person_injury` is missing. Missing is treated as
/// "no injury" rather than excluded; this may undercount injuries.
pub const MISSING_INJURY_DEFAULT: u8 = 0;

const FIELDS: &[FieldSpec] = &[
    FieldSpec::required(COLLISION_ID, &["collision_id", "collisionid"]),
    FieldSpec::required(CRASH_DATE, &["crash_date", "crashdate", "date"]),
    FieldSpec::optional(PERSON_INJURY, &["person_injury", "injury"]),
    FieldSpec::optional("person_age", &["person_age", "age"]),
    FieldSpec::optional("person_sex", &["person_sex", "sex"]),
];

/// Binary target for one categorical value
pub fn injury_flag(person_injury: Option<&str>) -> u8 {
    match person_injury {
        None => MISSING_INJURY_DEFAULT,
        Some(value) => {
            let value = value.trim();
            if INJURY_CATEGORIES.iter().any(|c| c.eq_ignore_ascii_case(value)) {
                1
            } else {
                0
            }
        }
    }
}

pub struct PersonConditioner;

impl PersonConditioner {
    pub fn new() -> Self {
        PersonConditioner
    }
}

impl Default for PersonConditioner {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceConditioner for PersonConditioner {
    fn kind(&self) -> SourceKind {
        SourceKind::Person
    }

    fn condition(&self, raw: Table) -> Result<(Table, StageReport)> {
        let resolved = resolve_fields("person", raw.columns(), FIELDS)?;
        let rows_in = raw.len() as u64;
        let mut report = StageReport::new("condition:person", rows_in);
        let mut table = raw;

        if let Some(raw_id) = resolved.get(COLLISION_ID) {
            standardize_collision_ids(&mut table, raw_id, &mut report);
        }
        if let Some(raw_date) = resolved.get(CRASH_DATE) {
            standardize_dates(&mut table, raw_date, CRASH_DATE, &mut report);
        }
        rename_resolved(&mut table, &resolved);

        if table.has_column(INJURY_OCCURRED) {
            tracing::debug!("injury_occurred already present, keeping it");
        } else if let Some(idx) = table.column_index(PERSON_INJURY) {
            let mut missing = 0u64;
            let flags: Vec<Value> = table
                .rows()
                .iter()
                .map(|r| {
                    let injury = r[idx].as_deref();
                    if injury.is_none() {
                        missing += 1;
                    }
                    Some(injury_flag(injury).to_string())
                })
                .collect();
            table.set_column(INJURY_OCCURRED, flags);
            report.anomaly("person_injury_missing_defaulted", Some(PERSON_INJURY), missing, rows_in);

            let injured = table
                .column_values(INJURY_OCCURRED)
                .map(|v| v.iter().filter(|f| **f == Some("1")).count())
                .unwrap_or(0);
            tracing::info!(
                records = rows_in,
                injured,
                not_injured = rows_in as usize - injured,
                "binary injury target derived"
            );
        } else {
            tracing::warn!("person extract has no injury column; injury_occurred not derived");
            report.anomaly("person_injury_column_missing", Some(PERSON_INJURY), rows_in, rows_in);
        }

        let rows_out = table.len() as u64;
        Ok((table, report.with_rows_out(rows_out)))
    }
}
