// 🔗 Dataset Integration
//
// Fixed join sequence over the four conditioned datasets:
//   1. person ⋈ vehicle on (collision_id, merge_date)   INNER
//   2. (1) ⟕ weather on merge_date                      LEFT
//   3. (2) ⟕ crash allow-list on collision_id           LEFT
//
// Step 1 multiplies: a key with 3 persons and 2 vehicles yields 6 rows.
// Steps 2 and 3 must not change the row count; the right side of a left
// join keeps only its first row per key so it cannot fan out.
// Null keys never match anything.

use crate::columns::{COLLISION_ID, INJURY_OCCURRED, MERGE_DATE};
use crate::diagnostics::StageReport;
use crate::error::{PipelineError, Result};
use crate::sources::crash::conditioned_columns;
use crate::sources::normalize_collision_id;
use crate::table::{Row, Table, Value};
use std::collections::{HashMap, HashSet};

// ============================================================================
// HASH JOIN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy)]
pub struct JoinSpec<'a> {
    pub kind: JoinKind,
    /// Key columns, named identically on both sides
    pub on: &'a [&'a str],
    /// Appended to non-key columns present on both sides
    pub suffixes: (&'a str, &'a str),
}

/// Row accounting for one join
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub left_rows: u64,
    pub right_rows: u64,
    pub output_rows: u64,
    pub left_null_keys: u64,
    pub right_null_keys: u64,
    /// Left rows with a complete key that found no partner
    pub left_unmatched: u64,
    /// Right rows with a complete key that no left row matched
    pub right_unmatched: u64,
    /// Right rows ignored because an earlier row had the same key (left joins only)
    pub right_duplicates: u64,
}

impl JoinStats {
    /// Left rows that were kept with null right-side columns
    pub fn null_padded(&self, kind: JoinKind) -> u64 {
        match kind {
            JoinKind::Inner => 0,
            JoinKind::Left => self.left_unmatched + self.left_null_keys,
        }
    }
}

fn key_indices(table: &Table, on: &[&str], side: &str) -> Result<Vec<usize>> {
    on.iter()
        .map(|key| {
            table.column_index(key).ok_or_else(|| PipelineError::MissingColumn {
                source_name: format!("{side} side of join"),
                field: key.to_string(),
                aliases: vec![key.to_string()],
                available: table.columns().to_vec(),
            })
        })
        .collect()
}

/// Composite key, or `None` if any component is null
fn key_of<'r>(row: &'r Row, idx: &[usize]) -> Option<Vec<&'r str>> {
    idx.iter().map(|&i| row[i].as_deref()).collect()
}

pub fn hash_join(left: &Table, right: &Table, spec: &JoinSpec) -> Result<(Table, JoinStats)> {
    let left_keys = key_indices(left, spec.on, "left")?;
    let right_keys = key_indices(right, spec.on, "right")?;

    let left_rest: Vec<usize> = (0..left.width()).filter(|i| !left_keys.contains(i)).collect();
    let right_rest: Vec<usize> = (0..right.width()).filter(|i| !right_keys.contains(i)).collect();

    let left_names: HashSet<&str> = left_rest.iter().map(|&i| left.columns()[i].as_str()).collect();
    let right_names: HashSet<&str> = right_rest.iter().map(|&i| right.columns()[i].as_str()).collect();

    let mut columns: Vec<String> = spec.on.iter().map(|k| k.to_string()).collect();
    for &i in &left_rest {
        let name = &left.columns()[i];
        if right_names.contains(name.as_str()) {
            columns.push(format!("{name}{}", spec.suffixes.0));
        } else {
            columns.push(name.clone());
        }
    }
    for &i in &right_rest {
        let name = &right.columns()[i];
        if left_names.contains(name.as_str()) {
            columns.push(format!("{name}{}", spec.suffixes.1));
        } else {
            columns.push(name.clone());
        }
    }

    let mut stats = JoinStats {
        left_rows: left.len() as u64,
        right_rows: right.len() as u64,
        ..Default::default()
    };

    // Build side
    let mut index: HashMap<Vec<&str>, Vec<usize>> = HashMap::new();
    for (pos, row) in right.rows().iter().enumerate() {
        match key_of(row, &right_keys) {
            None => stats.right_null_keys += 1,
            Some(key) => {
                let group = index.entry(key).or_default();
                if spec.kind == JoinKind::Left && !group.is_empty() {
                    stats.right_duplicates += 1;
                } else {
                    group.push(pos);
                }
            }
        }
    }

    // Probe side, in left order
    let mut out = Table::new(columns);
    let mut matched: HashSet<Vec<&str>> = HashSet::new();
    let padding: Vec<Value> = vec![None; right_rest.len()];

    for row in left.rows() {
        let left_part = || -> Row {
            left_keys
                .iter()
                .chain(left_rest.iter())
                .map(|&i| row[i].clone())
                .collect()
        };

        let partners = match key_of(row, &left_keys) {
            None => {
                stats.left_null_keys += 1;
                None
            }
            Some(key) => match index.get(&key) {
                Some(group) => {
                    matched.insert(key);
                    Some(group)
                }
                None => {
                    stats.left_unmatched += 1;
                    None
                }
            },
        };

        match partners {
            Some(group) => {
                for &pos in group {
                    let right_row = &right.rows()[pos];
                    let mut combined = left_part();
                    combined.extend(right_rest.iter().map(|&i| right_row[i].clone()));
                    out.push_row(combined);
                }
            }
            None if spec.kind == JoinKind::Left => {
                let mut combined = left_part();
                combined.extend(padding.iter().cloned());
                out.push_row(combined);
            }
            None => {}
        }
    }

    stats.right_unmatched = index
        .iter()
        .filter(|(key, _)| !matched.contains(*key))
        .map(|(_, group)| group.len() as u64)
        .sum();
    stats.output_rows = out.len() as u64;

    Ok((out, stats))
}

// ============================================================================
// INTEGRATOR
// ============================================================================

/// The four conditioned datasets, ready to join
#[derive(Debug, Clone, Default)]
pub struct ConditionedSources {
    pub crash: Table,
    pub person: Table,
    pub vehicle: Table,
    pub weather: Table,
}

pub struct DatasetIntegrator;

impl DatasetIntegrator {
    pub fn new() -> Self {
        DatasetIntegrator
    }

    pub fn integrate(&self, sources: ConditionedSources) -> Result<(Table, StageReport)> {
        let ConditionedSources {
            crash,
            mut person,
            mut vehicle,
            weather,
        } = sources;

        require(&person, "person", &[COLLISION_ID, MERGE_DATE])?;
        require(&vehicle, "vehicle", &[COLLISION_ID, MERGE_DATE])?;
        require(&weather, "weather", &[MERGE_DATE])?;
        require(&crash, "crash", &[COLLISION_ID])?;

        // Files written by other tools may carry ids as "123.0"
        renormalize_ids(&mut person);
        renormalize_ids(&mut vehicle);
        let mut crash = crash.select(&crash_projection());
        renormalize_ids(&mut crash);

        let mut report = StageReport::new("integrate", person.len() as u64);
        tracing::info!(
            persons = person.len(),
            vehicles = vehicle.len(),
            weather_days = weather.len(),
            crashes = crash.len(),
            "starting integration"
        );

        // Step 1: person ⋈ vehicle
        let step1_spec = JoinSpec {
            kind: JoinKind::Inner,
            on: &[COLLISION_ID, MERGE_DATE],
            suffixes: ("_person", "_vehicle"),
        };
        let (step1, s1) = hash_join(&person, &vehicle, &step1_spec)?;
        report.expected("person_rows_without_vehicle", None, s1.left_unmatched, s1.left_rows);
        report.expected("vehicle_rows_without_person", None, s1.right_unmatched, s1.right_rows);
        report.anomaly("person_null_join_key", None, s1.left_null_keys, s1.left_rows);
        report.anomaly("vehicle_null_join_key", None, s1.right_null_keys, s1.right_rows);
        tracing::info!(rows = s1.output_rows, "person × vehicle joined");

        // Step 2: ⟕ weather
        let step2_spec = JoinSpec {
            kind: JoinKind::Left,
            on: &[MERGE_DATE],
            suffixes: ("", "_weather"),
        };
        let (step2, s2) = hash_join(&step1, &weather, &step2_spec)?;
        report.expected("rows_without_weather", Some(MERGE_DATE), s2.null_padded(JoinKind::Left), s2.left_rows);
        report.anomaly("weather_duplicate_day", Some(MERGE_DATE), s2.right_duplicates, s2.right_rows);
        check_row_count("weather_join_row_count", s1.output_rows, s2.output_rows)?;
        tracing::info!(rows = s2.output_rows, "weather joined");

        // Step 3: ⟕ crash
        let step3_spec = JoinSpec {
            kind: JoinKind::Left,
            on: &[COLLISION_ID],
            suffixes: ("", "_crash"),
        };
        let (step3, s3) = hash_join(&step2, &crash, &step3_spec)?;
        report.expected("rows_without_crash", Some(COLLISION_ID), s3.null_padded(JoinKind::Left), s3.left_rows);
        report.anomaly("crash_duplicate_collision_id", Some(COLLISION_ID), s3.right_duplicates, s3.right_rows);
        check_row_count("crash_join_row_count", s2.output_rows, s3.output_rows)?;

        validate_integrated(&step3)?;

        let rows_out = step3.len() as u64;
        tracing::info!(rows = rows_out, columns = step3.width(), "integration complete");
        Ok((step3, report.with_rows_out(rows_out)))
    }
}

impl Default for DatasetIntegrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Crash columns projected onto every integrated row
pub fn crash_projection() -> Vec<&'static str> {
    conditioned_columns()
        .into_iter()
        .filter(|c| *c != MERGE_DATE)
        .collect()
}

fn require(table: &Table, source_name: &str, fields: &[&str]) -> Result<()> {
    for field in fields {
        if !table.has_column(field) {
            return Err(PipelineError::MissingColumn {
                source_name: source_name.to_string(),
                field: field.to_string(),
                aliases: vec![field.to_string()],
                available: table.columns().to_vec(),
            });
        }
    }
    Ok(())
}

fn renormalize_ids(table: &mut Table) {
    if let Some(ids) = table.column_values(COLLISION_ID) {
        let ids: Vec<Value> = ids.into_iter().map(|v| v.and_then(normalize_collision_id)).collect();
        table.set_column(COLLISION_ID, ids);
    }
}

fn check_row_count(check: &str, expected: u64, actual: u64) -> Result<()> {
    if expected != actual {
        return Err(PipelineError::validation(
            check,
            format!("left join changed row count from {expected} to {actual}"),
        ));
    }
    Ok(())
}

/// Structural checks on the integrated table. Any failure aborts the run.
pub fn validate_integrated(table: &Table) -> Result<()> {
    match table.null_count(COLLISION_ID) {
        None => {
            return Err(PipelineError::validation(
                "collision_id_present",
                "integrated table has no collision_id column",
            ))
        }
        Some(0) => {}
        Some(n) => {
            return Err(PipelineError::validation(
                "collision_id_not_null",
                format!("{n} rows have a null collision_id"),
            ))
        }
    }

    if !table.has_column(INJURY_OCCURRED) {
        return Err(PipelineError::validation(
            "injury_occurred_present",
            "person-derived injury_occurred column is missing",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[Option<&str>]]) -> Table {
        Table::from_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| v.map(|s| s.to_string())).collect())
                .collect(),
        )
    }

    fn sources() -> ConditionedSources {
        let person = table(
            &["collision_id", "crash_date", "merge_date", "person_injury", "injury_occurred"],
            &[
                &[Some("1"), Some("2021-01-01 00:00:00"), Some("2021-01-01"), Some("Injured"), Some("1")],
                &[Some("1"), Some("2021-01-01 00:00:00"), Some("2021-01-01"), Some("Unspecified"), Some("0")],
                &[Some("1"), Some("2021-01-01 00:00:00"), Some("2021-01-01"), Some("Unspecified"), Some("0")],
                &[Some("2"), Some("2021-01-02 00:00:00"), Some("2021-01-02"), Some("Killed"), Some("1")],
                &[Some("9"), Some("2021-01-09 00:00:00"), Some("2021-01-09"), None, Some("0")],
            ],
        );
        let vehicle = table(
            &["collision_id", "crash_date", "merge_date", "vehicle_type"],
            &[
                &[Some("1"), Some("2021-01-01 00:00:00"), Some("2021-01-01"), Some("Sedan")],
                &[Some("1.0"), Some("2021-01-01 00:00:00"), Some("2021-01-01"), Some("Bus")],
                &[Some("2"), Some("2021-01-02 00:00:00"), Some("2021-01-02"), Some("Taxi")],
                &[Some("7"), Some("2021-01-07 00:00:00"), Some("2021-01-07"), Some("Bike")],
            ],
        );
        let weather = table(
            &["weather_date", "merge_date", "weather_condition"],
            &[
                &[Some("2021-01-01 00:00:00"), Some("2021-01-01"), Some("Snow")],
                &[Some("2021-01-01 00:00:00"), Some("2021-01-01"), Some("Rain")],
            ],
        );
        let crash = table(
            &["collision_id", "crash_date", "merge_date", "borough", "number_of_persons_injured"],
            &[
                &[Some("1"), Some("2021-01-01 00:00:00"), Some("2021-01-01"), Some("QUEENS"), Some("1")],
                &[Some("1"), Some("2021-01-01 00:00:00"), Some("2021-01-01"), Some("BRONX"), Some("1")],
            ],
        );
        ConditionedSources {
            crash,
            person,
            vehicle,
            weather,
        }
    }

    #[test]
    fn test_inner_join_multiplies_per_key() {
        let s = sources();
        let spec = JoinSpec {
            kind: JoinKind::Inner,
            on: &[COLLISION_ID, MERGE_DATE],
            suffixes: ("_person", "_vehicle"),
        };
        let mut vehicle = s.vehicle.clone();
        renormalize_ids(&mut vehicle);
        let (joined, stats) = hash_join(&s.person, &vehicle, &spec).unwrap();

        // key 1: 3 persons × 2 vehicles, key 2: 1 × 1
        assert_eq!(joined.len(), 7);
        assert_eq!(stats.left_unmatched, 1);
        assert_eq!(stats.right_unmatched, 1);
        assert!(joined.has_column("crash_date_person"));
        assert!(joined.has_column("crash_date_vehicle"));
        assert!(joined.has_column("vehicle_type"));
    }

    #[test]
    fn test_null_keys_never_match() {
        let left = table(&["k", "a"], &[&[None, Some("x")], &[Some("1"), Some("y")]]);
        let right = table(&["k", "b"], &[&[None, Some("p")], &[Some("1"), Some("q")]]);
        let spec = JoinSpec {
            kind: JoinKind::Left,
            on: &["k"],
            suffixes: ("_x", "_y"),
        };
        let (joined, stats) = hash_join(&left, &right, &spec).unwrap();

        assert_eq!(joined.len(), 2);
        assert_eq!(joined.value(0, 2), None);
        assert_eq!(joined.value(1, 2), Some("q"));
        assert_eq!(stats.left_null_keys, 1);
        assert_eq!(stats.right_null_keys, 1);
        assert_eq!(stats.null_padded(JoinKind::Left), 1);
    }

    #[test]
    fn test_left_join_keeps_first_right_row_per_key() {
        let left = table(&["k"], &[&[Some("1")], &[Some("1")]]);
        let right = table(&["k", "v"], &[&[Some("1"), Some("first")], &[Some("1"), Some("second")]]);
        let spec = JoinSpec {
            kind: JoinKind::Left,
            on: &["k"],
            suffixes: ("_x", "_y"),
        };
        let (joined, stats) = hash_join(&left, &right, &spec).unwrap();

        assert_eq!(joined.len(), 2);
        assert_eq!(joined.column_values("v").unwrap(), vec![Some("first"), Some("first")]);
        assert_eq!(stats.right_duplicates, 1);
    }

    #[test]
    fn test_integrate_preserves_left_join_counts_and_projects_crash() {
        let (integrated, report) = DatasetIntegrator::new().integrate(sources()).unwrap();

        assert_eq!(integrated.len(), 7);
        assert_eq!(integrated.null_count(COLLISION_ID), Some(0));
        assert!(integrated.has_column(INJURY_OCCURRED));

        // collision 1 rows all see the first weather row and the first crash row
        let idx = integrated.index_map();
        for row in integrated.rows().iter().filter(|r| r[idx[COLLISION_ID]].as_deref() == Some("1")) {
            assert_eq!(row[idx["weather_condition"]].as_deref(), Some("Snow"));
            assert_eq!(row[idx["borough"]].as_deref(), Some("QUEENS"));
            assert_eq!(row[idx[crate::columns::CRASH_DATE]].as_deref(), Some("2021-01-01 00:00:00"));
        }

        assert_eq!(report.count_of("weather_duplicate_day"), 1);
        assert_eq!(report.count_of("crash_duplicate_collision_id"), 1);
        assert_eq!(report.count_of("rows_without_weather"), 1);
        assert_eq!(report.count_of("rows_without_crash"), 1);
        assert_eq!(report.count_of("person_rows_without_vehicle"), 1);
    }

    #[test]
    fn test_missing_injury_indicator_aborts() {
        let mut s = sources();
        s.person.drop_column(INJURY_OCCURRED);
        let err = DatasetIntegrator::new().integrate(s).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { ref check, .. } if check == "injury_occurred_present"));
    }

    #[test]
    fn test_missing_join_key_is_fatal() {
        let mut s = sources();
        s.weather.drop_column(MERGE_DATE);
        let err = DatasetIntegrator::new().integrate(s).unwrap_err();
        assert!(err.is_fatal_schema_error());
        assert!(err.to_string().contains("weather"));
    }
}
