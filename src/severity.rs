// 🩺 Severity Derivation
//
// Person level:    person_injury → Fatality / Injury / No Injury,
//                  falling back to injury_occurred when unmappable.
// Collision level: max(injured), max(killed) per collision_id, classified
//                  and broadcast back onto every row of that collision.

use crate::columns::{
    COLLISION_ID, COLLISION_SEVERITY, INJURY_OCCURRED, INJURY_SEVERITY, PERSONS_INJURED, PERSONS_KILLED,
    PERSON_INJURY,
};
use crate::diagnostics::StageReport;
use crate::error::Result;
use crate::sources::vehicle::title_case;
use crate::table::{parse_count, Table, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// PERSON SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonSeverity {
    Fatality,
    Injury,
    NoInjury,
}

impl PersonSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonSeverity::Fatality => "Fatality",
            PersonSeverity::Injury => "Injury",
            PersonSeverity::NoInjury => "No Injury",
        }
    }

    /// Direct mapping of the categorical field ("KILLED", "injured", ...)
    pub fn from_category(raw: &str) -> Option<Self> {
        match title_case(raw).as_str() {
            "Killed" => Some(PersonSeverity::Fatality),
            "Injured" => Some(PersonSeverity::Injury),
            "Unspecified" => Some(PersonSeverity::NoInjury),
            _ => None,
        }
    }

    /// Fallback from the binary indicator
    pub fn from_indicator(raw: &str) -> Option<Self> {
        match parse_count(raw) {
            Some(1) => Some(PersonSeverity::Injury),
            Some(0) => Some(PersonSeverity::NoInjury),
            _ => None,
        }
    }

    pub fn classify(person_injury: Option<&str>, injury_occurred: Option<&str>) -> Option<Self> {
        person_injury
            .and_then(Self::from_category)
            .or_else(|| injury_occurred.and_then(Self::from_indicator))
    }
}

// ============================================================================
// COLLISION SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionSeverity {
    Fatal,
    Injury,
    NoInjury,
    Unknown,
}

impl CollisionSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollisionSeverity::Fatal => "Fatal Collision",
            CollisionSeverity::Injury => "Injury Collision",
            CollisionSeverity::NoInjury => "No Injury Collision",
            CollisionSeverity::Unknown => "Unknown",
        }
    }

    /// Strict precedence over the aggregated counts; every input has exactly one class
    pub fn classify(injured: Option<i64>, killed: Option<i64>) -> Self {
        match (injured, killed) {
            (_, Some(k)) if k > 0 => CollisionSeverity::Fatal,
            (Some(i), Some(0)) if i > 0 => CollisionSeverity::Injury,
            (Some(0), Some(0)) => CollisionSeverity::NoInjury,
            _ => CollisionSeverity::Unknown,
        }
    }
}

/// Running per-collision maxima. Nulls are skipped, so merge order never matters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollisionAggregate {
    pub max_injured: Option<i64>,
    pub max_killed: Option<i64>,
}

impl CollisionAggregate {
    pub fn observe(&mut self, injured: Option<i64>, killed: Option<i64>) {
        self.max_injured = max_opt(self.max_injured, injured);
        self.max_killed = max_opt(self.max_killed, killed);
    }

    pub fn merge(self, other: CollisionAggregate) -> CollisionAggregate {
        CollisionAggregate {
            max_injured: max_opt(self.max_injured, other.max_injured),
            max_killed: max_opt(self.max_killed, other.max_killed),
        }
    }

    pub fn severity(&self) -> CollisionSeverity {
        CollisionSeverity::classify(self.max_injured, self.max_killed)
    }
}

fn max_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

// ============================================================================
// DERIVER
// ============================================================================

pub struct SeverityDeriver;

impl SeverityDeriver {
    pub fn new() -> Self {
        SeverityDeriver
    }

    /// Add `injury_severity` and `collision_severity` to an integrated table
    pub fn derive(&self, mut table: Table) -> Result<(Table, StageReport)> {
        let rows = table.len() as u64;
        let mut report = StageReport::new("severity", rows);

        self.derive_person_level(&mut table, &mut report);
        self.derive_collision_level(&mut table, &mut report);

        Ok((table, report.with_rows_out(rows)))
    }

    fn derive_person_level(&self, table: &mut Table, report: &mut StageReport) {
        let injury_idx = table.column_index(PERSON_INJURY);
        let flag_idx = table.column_index(INJURY_OCCURRED);

        let mut fallbacks = 0u64;
        let mut unresolved = 0u64;
        let values: Vec<Value> = table
            .rows()
            .iter()
            .map(|row| {
                let category = injury_idx.and_then(|i| row[i].as_deref());
                let flag = flag_idx.and_then(|i| row[i].as_deref());
                let direct = category.and_then(PersonSeverity::from_category);
                let severity = direct.or_else(|| flag.and_then(PersonSeverity::from_indicator));
                match (direct, severity) {
                    (None, Some(_)) => fallbacks += 1,
                    (None, None) => unresolved += 1,
                    _ => {}
                }
                severity.map(|s| s.as_str().to_string())
            })
            .collect();

        table.set_column(INJURY_SEVERITY, values);
        let rows = table.len() as u64;
        report.expected("injury_severity_from_indicator", Some(INJURY_SEVERITY), fallbacks, rows);
        report.anomaly("injury_severity_unresolved", Some(INJURY_SEVERITY), unresolved, rows);
    }

    fn derive_collision_level(&self, table: &mut Table, report: &mut StageReport) {
        let rows = table.len() as u64;
        let Some(id_idx) = table.column_index(COLLISION_ID) else {
            tracing::warn!("no collision_id column; collision_severity not derived");
            return;
        };
        let injured_idx = table.column_index(PERSONS_INJURED);
        let killed_idx = table.column_index(PERSONS_KILLED);
        if injured_idx.is_none() || killed_idx.is_none() {
            tracing::warn!("crash injury/fatality counts missing; every collision is Unknown");
        }

        let mut bad_counts = 0u64;
        let mut count_at = |row: &[Value], idx: Option<usize>| -> Option<i64> {
            let text = idx.and_then(|i| row[i].as_deref())?;
            let parsed = parse_count(text);
            if parsed.is_none() {
                bad_counts += 1;
            }
            parsed
        };

        let mut aggregates: HashMap<&str, CollisionAggregate> = HashMap::new();
        for row in table.rows() {
            let Some(id) = row[id_idx].as_deref() else { continue };
            let injured = count_at(row, injured_idx);
            let killed = count_at(row, killed_idx);
            aggregates.entry(id).or_default().observe(injured, killed);
        }

        let classes: HashMap<String, CollisionSeverity> = aggregates
            .into_iter()
            .map(|(id, agg)| (id.to_string(), agg.severity()))
            .collect();

        let values: Vec<Value> = table
            .rows()
            .iter()
            .map(|row| {
                row[id_idx]
                    .as_deref()
                    .and_then(|id| classes.get(id))
                    .map(|c| c.as_str().to_string())
            })
            .collect();
        table.set_column(COLLISION_SEVERITY, values);

        let unknown = classes.values().filter(|c| **c == CollisionSeverity::Unknown).count() as u64;
        report.anomaly("unparseable_person_count", None, bad_counts, rows);
        report.anomaly("collision_severity_unknown", Some(COLLISION_SEVERITY), unknown, classes.len() as u64);
        tracing::info!(collisions = classes.len(), unknown, "collision severity derived");
    }
}

impl Default for SeverityDeriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_precedence_is_total() {
        assert_eq!(CollisionSeverity::classify(Some(0), Some(2)), CollisionSeverity::Fatal);
        assert_eq!(CollisionSeverity::classify(Some(3), Some(0)), CollisionSeverity::Injury);
        assert_eq!(CollisionSeverity::classify(Some(0), Some(0)), CollisionSeverity::NoInjury);
        assert_eq!(CollisionSeverity::classify(None, None), CollisionSeverity::Unknown);
        assert_eq!(CollisionSeverity::classify(None, Some(1)), CollisionSeverity::Fatal);
        assert_eq!(CollisionSeverity::classify(Some(2), None), CollisionSeverity::Unknown);
    }

    #[test]
    fn test_aggregate_merge_is_order_independent() {
        let mut a = CollisionAggregate::default();
        a.observe(Some(1), None);
        let mut b = CollisionAggregate::default();
        b.observe(Some(3), Some(0));
        b.observe(None, Some(0));

        assert_eq!(a.merge(b), b.merge(a));
        assert_eq!(a.merge(b).severity(), CollisionSeverity::Injury);
    }

    #[test]
    fn test_person_severity_with_fallback() {
        assert_eq!(PersonSeverity::classify(Some("KILLED"), None), Some(PersonSeverity::Fatality));
        assert_eq!(PersonSeverity::classify(Some("Injured"), Some("0")), Some(PersonSeverity::Injury));
        assert_eq!(PersonSeverity::classify(Some("Unspecified"), Some("1")), Some(PersonSeverity::NoInjury));
        assert_eq!(PersonSeverity::classify(Some("Other"), Some("1")), Some(PersonSeverity::Injury));
        assert_eq!(PersonSeverity::classify(None, Some("0")), Some(PersonSeverity::NoInjury));
        assert_eq!(PersonSeverity::classify(None, None), None);
    }

    #[test]
    fn test_collision_class_is_broadcast_to_every_row() {
        let table = Table::from_rows(
            vec![
                COLLISION_ID.into(),
                PERSON_INJURY.into(),
                INJURY_OCCURRED.into(),
                PERSONS_INJURED.into(),
                PERSONS_KILLED.into(),
            ],
            vec![
                vec![Some("1".into()), Some("Injured".into()), Some("1".into()), Some("1".into()), Some("0".into())],
                vec![Some("1".into()), None, Some("0".into()), Some("2.0".into()), Some("0".into())],
                vec![Some("2".into()), Some("Killed".into()), Some("1".into()), Some("0".into()), Some("1".into())],
                vec![Some("3".into()), None, Some("0".into()), None, None],
            ],
        );
        let (table, report) = SeverityDeriver::new().derive(table).unwrap();

        assert_eq!(
            table.column_values(COLLISION_SEVERITY).unwrap(),
            vec![
                Some("Injury Collision"),
                Some("Injury Collision"),
                Some("Fatal Collision"),
                Some("Unknown"),
            ]
        );
        assert_eq!(
            table.column_values(INJURY_SEVERITY).unwrap(),
            vec![Some("Injury"), Some("No Injury"), Some("Fatality"), Some("No Injury")]
        );
        assert_eq!(report.rows_in, report.rows_out);
        assert_eq!(report.count_of("collision_severity_unknown"), 1);
        assert_eq!(report.count_of("injury_severity_from_indicator"), 2);
    }

    #[test]
    fn test_missing_count_columns_yield_unknown() {
        let table = Table::from_rows(
            vec![COLLISION_ID.into(), INJURY_OCCURRED.into()],
            vec![vec![Some("1".into()), Some("1".into())]],
        );
        let (table, _) = SeverityDeriver::new().derive(table).unwrap();
        assert_eq!(table.column_values(COLLISION_SEVERITY).unwrap(), vec![Some("Unknown")]);
    }
}
