// 🎯 Collision View
// One representative row per collision: stable sort by (collision_id, timestamp),
// first row of each group wins. Null timestamps sort last; ties keep input order.

use crate::columns::COLLISION_ID;
use crate::dates::parse_timestamp;
use crate::diagnostics::StageReport;
use crate::error::{PipelineError, Result};
use crate::table::Table;
use chrono::NaiveDateTime;
use std::cmp::Ordering;

/// Ids that are all digits compare numerically, anything else as text.
/// Equal numbers with different spellings ("7", "007") fall back to text
/// so that only identical ids are ever adjacent.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn compare_timestamps(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone)]
pub struct CollisionView {
    timestamp_column: String,
}

impl CollisionView {
    pub fn new(timestamp_column: impl Into<String>) -> Self {
        CollisionView {
            timestamp_column: timestamp_column.into(),
        }
    }

    pub fn build(&self, table: &Table) -> Result<(Table, StageReport)> {
        let id_idx = table.column_index(COLLISION_ID).ok_or_else(|| PipelineError::MissingColumn {
            source_name: "collision view input".to_string(),
            field: COLLISION_ID.to_string(),
            aliases: vec![COLLISION_ID.to_string()],
            available: table.columns().to_vec(),
        })?;
        let ts_idx = table.column_index(&self.timestamp_column).ok_or_else(|| {
            PipelineError::MissingColumn {
                source_name: "collision view input".to_string(),
                field: self.timestamp_column.clone(),
                aliases: vec![self.timestamp_column.clone()],
                available: table.columns().to_vec(),
            }
        })?;

        let rows_in = table.len() as u64;
        let mut report = StageReport::new("collision_view", rows_in);

        let mut keyed: Vec<(&str, Option<NaiveDateTime>, usize)> = Vec::with_capacity(table.len());
        let mut null_ids = 0u64;
        for (pos, row) in table.rows().iter().enumerate() {
            match row[id_idx].as_deref() {
                Some(id) => keyed.push((id, row[ts_idx].as_deref().and_then(parse_timestamp), pos)),
                None => null_ids += 1,
            }
        }

        // sort_by is stable, so equal keys keep their input order
        keyed.sort_by(|a, b| compare_ids(a.0, b.0).then_with(|| compare_timestamps(a.1, b.1)));

        let mut view = Table::new(table.columns().to_vec());
        let mut previous: Option<&str> = None;
        for (id, _, pos) in keyed {
            if previous == Some(id) {
                continue;
            }
            previous = Some(id);
            view.push_row(table.rows()[pos].clone());
        }

        let rows_out = view.len() as u64;
        report.expected("duplicate_rows_collapsed", Some(COLLISION_ID), rows_in - rows_out - null_ids, rows_in);
        report.anomaly("null_collision_id_dropped", Some(COLLISION_ID), null_ids, rows_in);
        tracing::info!(rows_in, collisions = rows_out, "collision view built");

        Ok((view, report.with_rows_out(rows_out)))
    }
}
