// ⏳ Temporal Window
//
// Keep the most recent N years of one date column:
//   pass 1: stream only the date column, track max(year)
//   pass 2: stream every column, copy rows with year >= max - (N - 1)
// Neither pass holds more than one Parquet row group in memory.

use crate::dates::year_of;
use crate::diagnostics::StageReport;
use crate::error::{PipelineError, Result};
use crate::storage::{scan_table, TableSink};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of a window run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub max_year: i32,
    pub cutoff_year: i32,
}

#[derive(Debug, Clone)]
pub struct TemporalWindowFilter {
    date_column: String,
    years: u32,
    // years - 1, checked against i32 at construction
    span: i32,
}

impl TemporalWindowFilter {
    pub fn new(date_column: impl Into<String>, years: u32) -> Result<Self> {
        if years == 0 {
            return Err(PipelineError::Config("window length must be at least 1 year".into()));
        }
        let span = i32::try_from(years - 1).map_err(|_| {
            PipelineError::Config(format!("window length of {} years is out of range", years))
        })?;
        Ok(TemporalWindowFilter {
            date_column: date_column.into(),
            years,
            span,
        })
    }

    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    pub fn years(&self) -> u32 {
        self.years
    }

    pub fn cutoff_for(&self, max_year: i32) -> i32 {
        max_year.saturating_sub(self.span)
    }

    /// Pass 1: largest year in the date column. `None` if no value parses.
    pub fn max_year(&self, input: &Path) -> Result<Option<i32>> {
        let projection = [self.date_column.as_str()];
        let scan = scan_table(input, Some(&projection[..]))?;
        if scan.columns().is_empty() {
            return Err(self.missing_column(scan.columns()));
        }

        let mut max_year: Option<i32> = None;
        for row in scan {
            let row = row?;
            if let Some(year) = row[0].as_deref().and_then(year_of) {
                max_year = Some(max_year.map_or(year, |m| m.max(year)));
            }
        }
        Ok(max_year)
    }

    /// Write the windowed copy of `input` to `output`. The input is never modified.
    pub fn apply(&self, input: &Path, output: &Path) -> Result<(WindowBounds, StageReport)> {
        let max_year = self.max_year(input)?.ok_or_else(|| {
            PipelineError::validation(
                "window_max_year",
                format!("column '{}' has no parseable dates", self.date_column),
            )
        })?;
        let cutoff_year = self.cutoff_for(max_year);
        tracing::info!(
            column = %self.date_column,
            max_year,
            cutoff_year,
            "keeping records from cutoff year onwards"
        );

        let scan = scan_table(input, None)?;
        let columns = scan.columns().to_vec();
        let Some(date_idx) = columns.iter().position(|c| *c == self.date_column) else {
            return Err(self.missing_column(&columns));
        };

        let mut sink = TableSink::create(output, &columns)?;
        let mut rows_in = 0u64;
        let mut undated = 0u64;
        for row in scan {
            let row = row?;
            rows_in += 1;
            match row[date_idx].as_deref().and_then(year_of) {
                Some(year) if year >= cutoff_year => sink.write_row(&row)?,
                Some(_) => {}
                None => undated += 1,
            }
        }
        let rows_out = sink.finish()?;

        let mut report = StageReport::new("window", rows_in);
        report.expected("outside_window", Some(self.date_column.as_str()), rows_in - rows_out - undated, rows_in);
        report.anomaly("undated_row_excluded", Some(self.date_column.as_str()), undated, rows_in);

        Ok((WindowBounds { max_year, cutoff_year }, report.with_rows_out(rows_out)))
    }

    fn missing_column(&self, available: &[String]) -> PipelineError {
        PipelineError::MissingColumn {
            source_name: "window input".to_string(),
            field: self.date_column.clone(),
            aliases: vec![self.date_column.clone()],
            available: available.to_vec(),
        }
    }
}
