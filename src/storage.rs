// 💾 Table Storage - CSV + Parquet artifacts
//
// Whole-table reads for the in-memory stages, plus a streaming scan/sink pair
// for stages that must not hold a full table (temporal window). Every sink
// writes to `<path>.partial` and renames on `finish`, so a run that aborts
// never leaves a half-written artifact under the final name.

use crate::error::{PipelineError, Result};
use crate::table::{clean, Row, Table, Value};
use chrono::{DateTime, NaiveDate, Utc};
use parquet::basic::{Compression, LogicalType, Repetition, Type as PhysicalType};
use parquet::data_type::{ByteArray, ByteArrayType};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::reader::RowIter;
use parquet::record::Field;
use parquet::schema::types::{Type, TypePtr};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Rows buffered per Parquet row group
pub const ROW_GROUP_ROWS: usize = 65_536;

// ============================================================================
// FORMAT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("csv") => Ok(TableFormat::Csv),
            Some("parquet") | Some("pq") => Ok(TableFormat::Parquet),
            _ => Err(PipelineError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Parquet => "parquet",
        }
    }
}

// ============================================================================
// WHOLE-TABLE READ / WRITE
// ============================================================================

pub fn read_table(path: &Path) -> Result<Table> {
    read_table_counted(path).map(|(table, _)| table)
}

/// Whole-table read that also returns how many CSV cells held invalid UTF-8
/// and were decoded lossily (always 0 for Parquet).
pub fn read_table_counted(path: &Path) -> Result<(Table, u64)> {
    let mut scan = scan_table(path, None)?;
    let mut table = Table::new(scan.columns().to_vec());
    for row in scan.by_ref() {
        table.push_row(row?);
    }
    Ok((table, scan.lossy_cells()))
}

pub fn write_table(path: &Path, table: &Table) -> Result<u64> {
    let mut sink = TableSink::create(path, table.columns())?;
    for row in table.rows() {
        sink.write_row(row)?;
    }
    sink.finish()
}

/// Copy a raw extract to its audit snapshot path. Same-format copies are
/// byte-for-byte; cross-format copies are re-encoded.
pub fn copy_snapshot(src: &Path, dst: &Path) -> Result<()> {
    if TableFormat::from_path(src)? == TableFormat::from_path(dst)? {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        Ok(())
    } else {
        let table = read_table(src)?;
        write_table(dst, &table).map(|_| ())
    }
}

/// Row count without loading values (Parquet footer, or a CSV record pass)
pub fn count_rows(path: &Path) -> Result<u64> {
    match TableFormat::from_path(path)? {
        TableFormat::Parquet => {
            let reader = SerializedFileReader::new(File::open(path)?)?;
            Ok(reader.metadata().file_metadata().num_rows().max(0) as u64)
        }
        TableFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
            let mut count = 0u64;
            let mut record = csv::ByteRecord::new();
            while reader.read_byte_record(&mut record)? {
                count += 1;
            }
            Ok(count)
        }
    }
}

// ============================================================================
// STREAMING SCAN
// ============================================================================

/// Row stream over a stored table. With a projection only the requested
/// columns are decoded (Parquet pushes the projection into the reader);
/// requested names that do not exist are skipped, check `columns()`.
/// CSV bytes that are not valid UTF-8 become U+FFFD instead of failing the
/// read; `lossy_cells()` counts the affected cells.
pub struct TableScan {
    columns: Vec<String>,
    lossy_cells: u64,
    inner: ScanInner,
}

enum ScanInner {
    Csv {
        records: csv::ByteRecordsIntoIter<File>,
        picks: Vec<usize>,
    },
    Parquet {
        rows: RowIter<'static>,
        positions: HashMap<String, usize>,
    },
}

pub fn scan_table(path: &Path, projection: Option<&[&str]>) -> Result<TableScan> {
    match TableFormat::from_path(path)? {
        TableFormat::Csv => scan_csv(path, projection),
        TableFormat::Parquet => scan_parquet(path, projection),
    }
}

fn scan_csv(path: &Path, projection: Option<&[&str]>) -> Result<TableScan> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).into_owned())
        .collect();

    let picks: Vec<usize> = match projection {
        Some(names) => names
            .iter()
            .filter_map(|n| headers.iter().position(|h| h == n))
            .collect(),
        None => (0..headers.len()).collect(),
    };
    let columns = picks.iter().map(|i| headers[*i].clone()).collect();

    Ok(TableScan {
        columns,
        lossy_cells: 0,
        inner: ScanInner::Csv {
            records: reader.into_byte_records(),
            picks,
        },
    })
}

fn scan_parquet(path: &Path, projection: Option<&[&str]>) -> Result<TableScan> {
    let reader = SerializedFileReader::new(File::open(path)?)?;
    let root = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .root_schema_ptr();
    let fields: Vec<TypePtr> = root.get_fields().to_vec();

    let (selected, projected) = match projection {
        Some(names) => {
            let picked: Vec<TypePtr> = names
                .iter()
                .filter_map(|n| fields.iter().find(|f| f.name() == *n).cloned())
                .collect();
            let group = Type::group_type_builder(root.name())
                .with_fields(picked.clone())
                .build()?;
            (picked, Some(group))
        }
        None => (fields, None),
    };

    let columns: Vec<String> = selected.iter().map(|f| f.name().to_string()).collect();
    let positions = columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.clone(), i))
        .collect();

    let rows = if columns.is_empty() {
        // Nothing to decode; an empty projection is not a valid Parquet schema
        RowIter::from_file_into(Box::new(reader)).project(None)?
    } else {
        RowIter::from_file_into(Box::new(reader)).project(projected)?
    };

    Ok(TableScan {
        columns,
        lossy_cells: 0,
        inner: ScanInner::Parquet { rows, positions },
    })
}

impl TableScan {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Cells decoded so far that contained invalid UTF-8
    pub fn lossy_cells(&self) -> u64 {
        self.lossy_cells
    }
}

fn decode_cell(bytes: &[u8], lossy_cells: &mut u64) -> Value {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(text) => clean(text),
        Cow::Owned(text) => {
            *lossy_cells += 1;
            clean(&text)
        }
    }
}

impl Iterator for TableScan {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let width = self.columns.len();
        match &mut self.inner {
            ScanInner::Csv { records, picks } => {
                let lossy_cells = &mut self.lossy_cells;
                let record = records.next()?;
                Some(
                    record
                        .map(|r| {
                            picks
                                .iter()
                                .map(|i| r.get(*i).and_then(|b| decode_cell(b, lossy_cells)))
                                .collect()
                        })
                        .map_err(PipelineError::from),
                )
            }
            ScanInner::Parquet { rows, positions } => {
                let row = rows.next()?;
                Some(
                    row.map(|r| {
                        let mut out: Row = vec![None; width];
                        for (name, field) in r.get_column_iter() {
                            if let Some(i) = positions.get(name.as_str()) {
                                out[*i] = field_to_value(field);
                            }
                        }
                        out
                    })
                    .map_err(PipelineError::from),
                )
            }
        }
    }
}

/// Render any Parquet value as text; dates and timestamps in ISO form
fn field_to_value(field: &Field) -> Value {
    match field {
        Field::Null => None,
        Field::Str(s) => clean(s),
        Field::Bool(b) => Some(b.to_string()),
        Field::Int(v) => Some(v.to_string()),
        Field::Long(v) => Some(v.to_string()),
        Field::Float(v) => Some(v.to_string()),
        Field::Double(v) => Some(v.to_string()),
        Field::Date(days) => NaiveDate::from_num_days_from_ce_opt(days + 719_163)
            .map(|d| d.format("%Y-%m-%d").to_string()),
        Field::TimestampMillis(ms) => {
            epoch_text(ms.div_euclid(1_000), (ms.rem_euclid(1_000) * 1_000_000) as u32)
        }
        Field::TimestampMicros(us) => {
            epoch_text(us.div_euclid(1_000_000), (us.rem_euclid(1_000_000) * 1_000) as u32)
        }
        other => clean(&other.to_string()),
    }
}

fn epoch_text(secs: i64, nanos: u32) -> Value {
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(|dt| dt.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string())
}

// ============================================================================
// STREAMING SINK
// ============================================================================

pub struct TableSink {
    path: PathBuf,
    partial: PathBuf,
    width: usize,
    rows_written: u64,
    inner: SinkInner,
}

enum SinkInner {
    Csv(csv::Writer<File>),
    Parquet {
        writer: SerializedFileWriter<File>,
        buffer: Vec<Row>,
    },
}

impl TableSink {
    pub fn create(path: &Path, columns: &[String]) -> Result<Self> {
        let format = TableFormat::from_path(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut partial = path.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        let file = File::create(&partial)?;

        let inner = match format {
            TableFormat::Csv => {
                let mut writer = csv::Writer::from_writer(file);
                writer.write_record(columns)?;
                SinkInner::Csv(writer)
            }
            TableFormat::Parquet => {
                let schema = string_schema(columns)?;
                let props = WriterProperties::builder()
                    .set_compression(Compression::SNAPPY)
                    .build();
                SinkInner::Parquet {
                    writer: SerializedFileWriter::new(file, schema, Arc::new(props))?,
                    buffer: Vec::new(),
                }
            }
        };

        Ok(TableSink {
            path: path.to_path_buf(),
            partial,
            width: columns.len(),
            rows_written: 0,
            inner,
        })
    }

    pub fn write_row(&mut self, row: &[Value]) -> Result<()> {
        match &mut self.inner {
            SinkInner::Csv(writer) => {
                writer.write_record(
                    (0..self.width).map(|i| row.get(i).and_then(|v| v.as_deref()).unwrap_or("")),
                )?;
            }
            SinkInner::Parquet { writer, buffer } => {
                let mut owned = row.to_vec();
                owned.resize(self.width, None);
                buffer.push(owned);
                if buffer.len() >= ROW_GROUP_ROWS {
                    flush_row_group(writer, buffer, self.width)?;
                }
            }
        }
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush, close and move the artifact into place
    pub fn finish(self) -> Result<u64> {
        match self.inner {
            SinkInner::Csv(mut writer) => writer.flush()?,
            SinkInner::Parquet {
                mut writer,
                mut buffer,
            } => {
                if !buffer.is_empty() {
                    flush_row_group(&mut writer, &mut buffer, self.width)?;
                }
                writer.close()?;
            }
        }
        fs::rename(&self.partial, &self.path)?;
        Ok(self.rows_written)
    }
}

fn string_schema(columns: &[String]) -> Result<TypePtr> {
    let fields = columns
        .iter()
        .map(|name| {
            Type::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
                .with_repetition(Repetition::OPTIONAL)
                .with_logical_type(Some(LogicalType::String))
                .build()
                .map(Arc::new)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Arc::new(
        Type::group_type_builder("schema")
            .with_fields(fields)
            .build()?,
    ))
}

fn flush_row_group(
    writer: &mut SerializedFileWriter<File>,
    buffer: &mut Vec<Row>,
    width: usize,
) -> Result<()> {
    let mut row_group = writer.next_row_group()?;
    let mut col = 0;
    while let Some(mut column) = row_group.next_column()? {
        let mut values: Vec<ByteArray> = Vec::with_capacity(buffer.len());
        let mut levels: Vec<i16> = Vec::with_capacity(buffer.len());
        for row in buffer.iter() {
            match row.get(col).and_then(|v| v.as_deref()) {
                Some(text) => {
                    values.push(ByteArray::from(text));
                    levels.push(1);
                }
                None => levels.push(0),
            }
        }
        column
            .typed::<ByteArrayType>()
            .write_batch(&values, Some(&levels), None)?;
        column.close()?;
        col += 1;
    }
    debug_assert_eq!(col, width);
    row_group.close()?;
    buffer.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Table {
        Table::from_rows(
            vec!["collision_id".into(), "CRASH DATE".into(), "note".into()],
            vec![
                vec![Some("1".into()), Some("09/11/2021".into()), None],
                vec![Some("2".into()), None, Some("a, b".into())],
            ],
        )
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(TableFormat::from_path(Path::new("a.CSV")).unwrap(), TableFormat::Csv);
        assert_eq!(
            TableFormat::from_path(Path::new("x/y.parquet")).unwrap(),
            TableFormat::Parquet
        );
        assert!(TableFormat::from_path(Path::new("a.xlsx")).is_err());
    }

    #[test]
    fn test_csv_write_then_read_keeps_nulls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");
        assert_eq!(write_table(&path, &sample()).unwrap(), 2);

        let back = read_table(&path).unwrap();
        assert_eq!(back, sample());
        assert!(!dir.path().join("t.csv.partial").exists());
    }

    #[test]
    fn test_csv_invalid_utf8_is_decoded_lossily() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vehicles.csv");
        let mut bytes = b"COLLISION_ID,VEHICLE_MAKE\n1,CITRO".to_vec();
        bytes.push(0xD4);
        bytes.extend_from_slice(b"EN\n2,FORD\n");
        fs::write(&path, bytes).unwrap();

        let (table, lossy) = read_table_counted(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(lossy, 1);
        assert_eq!(table.value(0, 1), Some("CITRO\u{FFFD}EN"));
        assert_eq!(table.value(1, 1), Some("FORD"));
    }

    #[test]
    fn test_parquet_write_then_read_keeps_nulls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        write_table(&path, &sample()).unwrap();

        let back = read_table(&path).unwrap();
        assert_eq!(back, sample());
        assert_eq!(count_rows(&path).unwrap(), 2);
    }

    #[test]
    fn test_parquet_scan_projects_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        write_table(&path, &sample()).unwrap();

        let scan = scan_table(&path, Some(&["CRASH DATE", "missing"][..])).unwrap();
        assert_eq!(scan.columns(), &["CRASH DATE".to_string()]);
        let rows: Vec<Row> = scan.collect::<Result<_>>().unwrap();
        assert_eq!(rows, vec![vec![Some("09/11/2021".to_string())], vec![None]]);
    }

    #[test]
    fn test_parquet_spans_multiple_row_groups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.parquet");
        let mut sink = TableSink::create(&path, &["n".to_string()]).unwrap();
        for i in 0..(ROW_GROUP_ROWS + 10) {
            sink.write_row(&[Some(i.to_string())]).unwrap();
        }
        assert_eq!(sink.finish().unwrap(), (ROW_GROUP_ROWS + 10) as u64);
        assert_eq!(count_rows(&path).unwrap(), (ROW_GROUP_ROWS + 10) as u64);
    }

    #[test]
    fn test_snapshot_across_formats() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("raw.csv");
        write_table(&src, &sample()).unwrap();

        let same = dir.path().join("snap/raw_PRE.csv");
        copy_snapshot(&src, &same).unwrap();
        assert_eq!(fs::read(&src).unwrap(), fs::read(&same).unwrap());

        let other = dir.path().join("snap/raw_PRE.parquet");
        copy_snapshot(&src, &other).unwrap();
        assert_eq!(read_table(&other).unwrap(), sample());
    }
}
