// 💥 Crash Conditioning
//
// Canonical renaming plus selection of the collision-wide attributes the
// integrator projects onto every person × vehicle row.

use super::{rename_resolved, standardize_collision_ids, standardize_dates, SourceConditioner, SourceKind};
use crate::columns::{
    resolve_fields, FieldSpec, COLLISION_ID, CRASH_DATE, MERGE_DATE, PERSONS_INJURED, PERSONS_KILLED,
};
use crate::diagnostics::StageReport;
use crate::error::Result;
use crate::table::Table;
use std::collections::HashSet;

const FIELDS: &[FieldSpec] = &[
    FieldSpec::required(COLLISION_ID, &["collision_id", "collisionid"]),
    FieldSpec::required(CRASH_DATE, &["crash_date", "crashdate", "date"]),
    FieldSpec::optional("crash_time", &["crash_time", "crashtime", "time"]),
    FieldSpec::optional("borough", &["borough"]),
    FieldSpec::optional("zip_code", &["zip_code", "zipcode", "zip"]),
    FieldSpec::optional("latitude", &["latitude", "lat"]),
    FieldSpec::optional("longitude", &["longitude", "long", "lon"]),
    FieldSpec::optional("on_street_name", &["on_street_name"]),
    FieldSpec::optional("cross_street_name", &["cross_street_name"]),
    FieldSpec::optional(PERSONS_INJURED, &["number_of_persons_injured", "persons_injured"]),
    FieldSpec::optional(PERSONS_KILLED, &["number_of_persons_killed", "persons_killed"]),
    FieldSpec::optional("number_of_pedestrians_injured", &["number_of_pedestrians_injured"]),
    FieldSpec::optional("number_of_cyclist_injured", &["number_of_cyclist_injured"]),
    FieldSpec::optional("number_of_motorist_injured", &["number_of_motorist_injured"]),
    FieldSpec::optional(
        "contributing_factor_vehicle_1",
        &["contributing_factor_vehicle_1", "contributing_factor"],
    ),
];

/// Columns kept on the conditioned crash table, in output order
pub fn conditioned_columns() -> Vec<&'static str> {
    let mut cols = vec![COLLISION_ID, CRASH_DATE, MERGE_DATE];
    cols.extend(
        FIELDS
            .iter()
            .map(|f| f.canonical)
            .filter(|c| *c != COLLISION_ID && *c != CRASH_DATE),
    );
    cols
}

pub struct CrashConditioner;

impl CrashConditioner {
    pub fn new() -> Self {
        CrashConditioner
    }
}

impl Default for CrashConditioner {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceConditioner for CrashConditioner {
    fn kind(&self) -> SourceKind {
        SourceKind::Crash
    }

    fn condition(&self, raw: Table) -> Result<(Table, StageReport)> {
        let resolved = resolve_fields("crash", raw.columns(), FIELDS)?;
        let rows_in = raw.len() as u64;
        let mut report = StageReport::new("condition:crash", rows_in);
        tracing::info!(
            records = rows_in,
            columns = raw.width(),
            resolved = resolved.len(),
            "crash extract loaded"
        );
        let mut table = raw;

        if let Some(raw_id) = resolved.get(COLLISION_ID) {
            standardize_collision_ids(&mut table, raw_id, &mut report);
        }
        if let Some(raw_date) = resolved.get(CRASH_DATE) {
            standardize_dates(&mut table, raw_date, CRASH_DATE, &mut report);
        }
        rename_resolved(&mut table, &resolved);

        // Duplicates are reported, not removed; the integrator uses the first row per id
        let duplicates = table
            .column_values(COLLISION_ID)
            .map(|ids| {
                let mut seen = HashSet::new();
                ids.into_iter().flatten().filter(|id| !seen.insert(*id)).count()
            })
            .unwrap_or(0) as u64;
        report.anomaly("duplicate_collision_id", Some(COLLISION_ID), duplicates, rows_in);

        let table = table.select(&conditioned_columns());
        let rows_out = table.len() as u64;
        Ok((table, report.with_rows_out(rows_out)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_crashes() -> Table {
        Table::from_rows(
            vec![
                "CRASH DATE".into(),
                "CRASH TIME".into(),
                "BOROUGH".into(),
                "NUMBER OF PERSONS INJURED".into(),
                "NUMBER OF PERSONS KILLED".into(),
                "COLLISION_ID".into(),
                "VEHICLE TYPE CODE 1".into(),
            ],
            vec![
                vec![
                    Some("09/11/2021".into()),
                    Some("2:39".into()),
                    None,
                    Some("2".into()),
                    Some("0".into()),
                    Some("4455765".into()),
                    Some("Sedan".into()),
                ],
                vec![
                    Some("03/26/2022".into()),
                    Some("11:45".into()),
                    Some("BROOKLYN".into()),
                    Some("1".into()),
                    Some("0".into()),
                    Some("4513547".into()),
                    None,
                ],
                vec![
                    Some("03/26/2022".into()),
                    None,
                    None,
                    None,
                    None,
                    Some("4513547".into()),
                    None,
                ],
            ],
        )
    }

    #[test]
    fn test_condition_renames_and_selects_allow_list() {
        let (table, report) = CrashConditioner::new().condition(raw_crashes()).unwrap();

        assert_eq!(
            table.columns(),
            &[
                COLLISION_ID.to_string(),
                CRASH_DATE.to_string(),
                MERGE_DATE.to_string(),
                "crash_time".to_string(),
                "borough".to_string(),
                PERSONS_INJURED.to_string(),
                PERSONS_KILLED.to_string(),
            ]
        );
        assert_eq!(table.len(), 3);
        assert_eq!(table.value(0, 0), Some("4455765"));
        assert_eq!(table.value(0, 2), Some("2021-09-11"));
        assert_eq!(report.count_of("duplicate_collision_id"), 1);
    }

    #[test]
    fn test_missing_date_column_is_fatal() {
        let raw = Table::from_rows(vec!["COLLISION_ID".into()], vec![vec![Some("1".into())]]);
        let err = CrashConditioner::new().condition(raw).unwrap_err();
        assert!(err.is_fatal_schema_error());
        assert!(err.to_string().contains("crash_date"));
    }

    #[test]
    fn test_condition_is_idempotent() {
        let (once, _) = CrashConditioner::new().condition(raw_crashes()).unwrap();
        let (twice, _) = CrashConditioner::new().condition(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
