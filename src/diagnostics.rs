// 📊 Stage Diagnostics
//
// Each stage reports row counts plus observations in two tiers:
// - Anomaly: tolerated data-quality problems (unparseable dates, null ids,
//   unmapped categories). Counted, never fatal.
// - Expected: join semantics doing their job (inner-join drops, left-join
//   null padding). Reported so nobody mistakes them for data loss.

use crate::error::Result;
use crate::storage::scan_table;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// OBSERVATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Anomaly,
    Expected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub tier: Tier,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub count: u64,
    /// Rows the count is measured against
    pub out_of: u64,
}

impl Observation {
    pub fn percentage(&self) -> f64 {
        if self.out_of == 0 {
            0.0
        } else {
            self.count as f64 / self.out_of as f64 * 100.0
        }
    }
}

// ============================================================================
// STAGE REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub rows_in: u64,
    pub rows_out: u64,
    pub observations: Vec<Observation>,
}

impl StageReport {
    pub fn new(stage: impl Into<String>, rows_in: u64) -> Self {
        StageReport {
            stage: stage.into(),
            rows_in,
            rows_out: 0,
            observations: Vec::new(),
        }
    }

    pub fn with_rows_out(mut self, rows_out: u64) -> Self {
        self.rows_out = rows_out;
        self
    }

    /// Record a tolerated data-quality anomaly. Zero counts are not recorded.
    pub fn anomaly(&mut self, code: &str, column: Option<&str>, count: u64, out_of: u64) {
        self.push(Tier::Anomaly, code, column, count, out_of);
    }

    /// Record expected join/derivation behaviour. Zero counts are not recorded.
    pub fn expected(&mut self, code: &str, column: Option<&str>, count: u64, out_of: u64) {
        self.push(Tier::Expected, code, column, count, out_of);
    }

    fn push(&mut self, tier: Tier, code: &str, column: Option<&str>, count: u64, out_of: u64) {
        if count == 0 {
            return;
        }
        self.observations.push(Observation {
            tier,
            code: code.to_string(),
            column: column.map(|c| c.to_string()),
            count,
            out_of,
        });
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(|o| o.tier == Tier::Anomaly)
    }

    pub fn expected_outcomes(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(|o| o.tier == Tier::Expected)
    }

    /// Total count for a code (0 if never observed)
    pub fn count_of(&self, code: &str) -> u64 {
        self.observations
            .iter()
            .filter(|o| o.code == code)
            .map(|o| o.count)
            .sum()
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![format!(
            "{}: {} rows in, {} rows out",
            self.stage, self.rows_in, self.rows_out
        )];
        for o in &self.observations {
            let tier = match o.tier {
                Tier::Anomaly => "anomaly",
                Tier::Expected => "expected",
            };
            let column = o
                .column
                .as_deref()
                .map(|c| format!(" [{c}]"))
                .unwrap_or_default();
            parts.push(format!(
                "{tier} {}{column}: {} ({:.2}%)",
                o.code,
                o.count,
                o.percentage()
            ));
        }
        parts.join("; ")
    }

    /// Emit the report through `tracing`
    pub fn log(&self) {
        tracing::info!(
            stage = %self.stage,
            rows_in = self.rows_in,
            rows_out = self.rows_out,
            "stage complete"
        );
        for o in &self.observations {
            match o.tier {
                Tier::Anomaly => tracing::warn!(
                    stage = %self.stage,
                    code = %o.code,
                    column = o.column.as_deref().unwrap_or("-"),
                    count = o.count,
                    pct = %format!("{:.2}", o.percentage()),
                    "data-quality anomaly"
                ),
                Tier::Expected => tracing::info!(
                    stage = %self.stage,
                    code = %o.code,
                    column = o.column.as_deref().unwrap_or("-"),
                    count = o.count,
                    pct = %format!("{:.2}", o.percentage()),
                    "expected outcome"
                ),
            }
        }
    }
}

// ============================================================================
// REPORT SINKS
// ============================================================================

/// Where finished stage reports go. The pipeline only talks to this trait,
/// so a CLI, a log shipper or a test can each collect reports their own way.
pub trait ReportSink {
    fn record(&mut self, report: &StageReport);
}

impl ReportSink for Vec<StageReport> {
    fn record(&mut self, report: &StageReport) {
        self.push(report.clone());
    }
}

/// Logs every report through `tracing` and keeps a copy
#[derive(Debug, Default)]
pub struct TracingSink {
    pub reports: Vec<StageReport>,
}

impl ReportSink for TracingSink {
    fn record(&mut self, report: &StageReport) {
        report.log();
        self.reports.push(report.clone());
    }
}

// ============================================================================
// TABLE PROFILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub nulls: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProfile {
    pub rows: u64,
    pub columns: Vec<ColumnProfile>,
}

/// Row count and per-column null counts, computed in one streaming pass
pub fn profile_table(path: &Path) -> Result<TableProfile> {
    let scan = scan_table(path, None)?;
    let mut columns: Vec<ColumnProfile> = scan
        .columns()
        .iter()
        .map(|c| ColumnProfile {
            name: c.clone(),
            nulls: 0,
        })
        .collect();

    let mut rows = 0u64;
    for row in scan {
        let row = row?;
        rows += 1;
        for (profile, value) in columns.iter_mut().zip(row.iter()) {
            if value.is_none() {
                profile.nulls += 1;
            }
        }
    }

    Ok(TableProfile { rows, columns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::write_table;
    use crate::table::Table;

    #[test]
    fn test_zero_counts_are_not_recorded() {
        let mut report = StageReport::new("person", 10);
        report.anomaly("unparseable_date", Some("crash_date"), 0, 10);
        report.anomaly("null_collision_id", Some("collision_id"), 2, 10);
        report.expected("inner_join_unmatched_left", None, 3, 10);

        assert_eq!(report.observations.len(), 2);
        assert_eq!(report.anomalies().count(), 1);
        assert_eq!(report.expected_outcomes().count(), 1);
        assert_eq!(report.count_of("null_collision_id"), 2);
        assert_eq!(report.count_of("unparseable_date"), 0);
    }

    #[test]
    fn test_summary_shows_percentages_and_tiers() {
        let mut report = StageReport::new("vehicle", 4).with_rows_out(4);
        report.anomaly("unparseable_date", Some("crash_date"), 1, 4);

        let summary = report.summary();
        assert!(summary.contains("vehicle: 4 rows in, 4 rows out"));
        assert!(summary.contains("anomaly unparseable_date [crash_date]: 1 (25.00%)"));
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<StageReport> = Vec::new();
        sink.record(&StageReport::new("a", 1));
        sink.record(&StageReport::new("b", 2));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[1].stage, "b");
    }

    #[test]
    fn test_profile_counts_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.csv");
        let table = Table::from_rows(
            vec!["a".into(), "b".into()],
            vec![vec![Some("1".into()), None], vec![None, None]],
        );
        write_table(&path, &table).unwrap();

        let profile = profile_table(&path).unwrap();
        assert_eq!(profile.rows, 2);
        assert_eq!(profile.columns[0].nulls, 1);
        assert_eq!(profile.columns[1].nulls, 2);
    }
}
