//! Source extraction from columnar snapshots.
//!
//! A [`RecordSource`] yields raw records keyed by the upstream column
//! names. [`ParquetExtractor`] reads a Parquet snapshot with the arrow
//! reader; [`StaticSource`] serves records already in memory.
//!
//! Column types are folded into [`ScalarValue`]: integers to `Integer`,
//! floats and decimals to `Float`, dates and timestamps to RFC 3339 `Text`,
//! everything castable to UTF-8 to `Text`. Columns of any other type are
//! skipped with a warning rather than failing the load.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
    TimestampMillisecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use catalog_search_core::models::{RawRecord, ScalarValue};

const READ_BATCH_SIZE: usize = 8192;

/// Where raw catalog records come from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Every record in the snapshot.
    async fn load_full(&self) -> Result<Vec<RawRecord>>;

    /// Records updated at or after `since`.
    ///
    /// Records without a parseable update timestamp are included.
    async fn load_incremental(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>>;
}

/// Parse a raw timestamp value.
///
/// Integers are epoch milliseconds; text may be RFC 3339,
/// `YYYY-MM-DD HH:MM:SS` (UTC) or `YYYY-MM-DD`.
pub fn parse_timestamp(value: &ScalarValue) -> Option<DateTime<Utc>> {
    match value {
        ScalarValue::Integer(ms) => DateTime::<Utc>::from_timestamp_millis(*ms),
        ScalarValue::Text(s) => parse_timestamp_str(s),
        _ => None,
    }
}

pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn changed_since(records: Vec<RawRecord>, column: &str, since: DateTime<Utc>) -> Vec<RawRecord> {
    records
        .into_iter()
        .filter(|r| match r.get(column).and_then(parse_timestamp) {
            Some(ts) => ts >= since,
            None => true,
        })
        .collect()
}

// ============ Parquet ============

/// Reads a Parquet snapshot file.
pub struct ParquetExtractor {
    path: PathBuf,
    updated_at_column: String,
}

impl ParquetExtractor {
    pub fn new(path: impl Into<PathBuf>, updated_at_column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            updated_at_column: updated_at_column.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSource for ParquetExtractor {
    async fn load_full(&self) -> Result<Vec<RawRecord>> {
        let path = self.path.clone();
        let records = tokio::task::spawn_blocking(move || read_parquet(&path)).await??;
        tracing::info!(path = %self.path.display(), records = records.len(), "snapshot loaded");
        Ok(records)
    }

    async fn load_incremental(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>> {
        let records = self.load_full().await?;
        if !records
            .iter()
            .any(|r| r.contains_key(&self.updated_at_column))
        {
            tracing::warn!(
                column = %self.updated_at_column,
                "snapshot has no update timestamp column; treating every record as changed"
            );
            return Ok(records);
        }
        let changed = changed_since(records, &self.updated_at_column, since);
        tracing::info!(since = %since, changed = changed.len(), "incremental records selected");
        Ok(changed)
    }
}

/// Read every row of a Parquet file into raw records.
pub fn read_parquet(path: &Path) -> Result<Vec<RawRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open snapshot: {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("Failed to read Parquet metadata: {}", path.display()))?
        .with_batch_size(READ_BATCH_SIZE)
        .build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| "Failed to decode Parquet row group")?;
        append_batch(&batch, &mut records)?;
    }
    Ok(records)
}

enum Column {
    Int(Int64Array),
    Float(Float64Array),
    Bool(BooleanArray),
    Text(StringArray),
    Timestamp(TimestampMillisecondArray),
}

impl Column {
    fn value(&self, row: usize) -> ScalarValue {
        match self {
            Column::Int(a) if a.is_valid(row) => ScalarValue::Integer(a.value(row)),
            Column::Float(a) if a.is_valid(row) => ScalarValue::Float(a.value(row)),
            Column::Bool(a) if a.is_valid(row) => ScalarValue::Bool(a.value(row)),
            Column::Text(a) if a.is_valid(row) => ScalarValue::Text(a.value(row).to_string()),
            Column::Timestamp(a) if a.is_valid(row) => {
                match DateTime::<Utc>::from_timestamp_millis(a.value(row)) {
                    Some(ts) => ScalarValue::Text(ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    None => ScalarValue::Null,
                }
            }
            _ => ScalarValue::Null,
        }
    }
}

fn downcast<T: Clone + 'static>(array: &ArrayRef) -> Result<T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("unexpected array type {:?}", array.data_type()))
}

fn convert_column(array: &ArrayRef) -> Result<Column> {
    let column = match array.data_type() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => Column::Int(downcast(&cast(array, &DataType::Int64)?)?),
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => Column::Float(downcast(&cast(array, &DataType::Float64)?)?),
        DataType::Boolean => Column::Bool(downcast(array)?),
        DataType::Timestamp(_, tz) => {
            let target = DataType::Timestamp(TimeUnit::Millisecond, tz.clone());
            Column::Timestamp(downcast(&cast(array, &target)?)?)
        }
        DataType::Date32 | DataType::Date64 => {
            let target = DataType::Timestamp(TimeUnit::Millisecond, None);
            Column::Timestamp(downcast(&cast(array, &target)?)?)
        }
        _ => Column::Text(downcast(&cast(array, &DataType::Utf8)?)?),
    };
    Ok(column)
}

fn append_batch(batch: &RecordBatch, out: &mut Vec<RawRecord>) -> Result<()> {
    let schema = batch.schema();
    let mut columns: Vec<(String, Column)> = Vec::with_capacity(batch.num_columns());
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        match convert_column(array) {
            Ok(col) => columns.push((field.name().clone(), col)),
            Err(e) => tracing::warn!(
                column = %field.name(),
                data_type = ?field.data_type(),
                error = %e,
                "skipping unsupported column"
            ),
        }
    }

    out.reserve(batch.num_rows());
    for row in 0..batch.num_rows() {
        let record: RawRecord = columns
            .iter()
            .map(|(name, col)| (name.clone(), col.value(row)))
            .collect();
        out.push(record);
    }
    Ok(())
}

// ============ In-memory ============

/// Serves a fixed set of records; used by tests and embedders that
/// already hold the data.
pub struct StaticSource {
    records: Arc<Vec<RawRecord>>,
    updated_at_column: String,
}

impl StaticSource {
    pub fn new(records: Vec<RawRecord>, updated_at_column: impl Into<String>) -> Self {
        Self {
            records: Arc::new(records),
            updated_at_column: updated_at_column.into(),
        }
    }
}

#[async_trait]
impl RecordSource for StaticSource {
    async fn load_full(&self) -> Result<Vec<RawRecord>> {
        Ok(self.records.as_ref().clone())
    }

    async fn load_incremental(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>> {
        Ok(changed_since(
            self.records.as_ref().clone(),
            &self.updated_at_column,
            since,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Date32Array, Float32Array, Int32Array};
    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;
    use tempfile::TempDir;

    fn write_snapshot(dir: &TempDir) -> PathBuf {
        let schema = Arc::new(Schema::new(vec![
            Field::new("codprod", DataType::Int32, false),
            Field::new("descricao", DataType::Utf8, true),
            Field::new("preco", DataType::Float32, true),
            Field::new("dt_atualizacao", DataType::Date32, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("Caneta Azul"), None])),
                Arc::new(Float32Array::from(vec![Some(2.5), None])),
                // 2024-01-01 and 2024-03-01
                Arc::new(Date32Array::from(vec![Some(19723), Some(19783)])),
            ],
        )
        .unwrap();

        let path = dir.path().join("produtos.parquet");
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        path
    }

    #[tokio::test]
    async fn test_load_full_maps_types() {
        let dir = TempDir::new().unwrap();
        let src = ParquetExtractor::new(write_snapshot(&dir), "dt_atualizacao");
        let records = src.load_full().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["codprod"], ScalarValue::Integer(1));
        assert_eq!(records[0]["descricao"], ScalarValue::Text("Caneta Azul".into()));
        assert_eq!(records[0]["preco"], ScalarValue::Float(2.5));
        assert_eq!(
            records[0]["dt_atualizacao"],
            ScalarValue::Text("2024-01-01T00:00:00Z".into())
        );
        assert!(records[1]["descricao"].is_null());
    }

    #[tokio::test]
    async fn test_load_incremental_filters_by_timestamp() {
        let dir = TempDir::new().unwrap();
        let src = ParquetExtractor::new(write_snapshot(&dir), "dt_atualizacao");
        let since = parse_timestamp_str("2024-02-01").unwrap();
        let records = src.load_incremental(since).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["codprod"], ScalarValue::Integer(2));
    }

    #[tokio::test]
    async fn test_load_incremental_without_timestamp_column_is_full() {
        let dir = TempDir::new().unwrap();
        let src = ParquetExtractor::new(write_snapshot(&dir), "alterado_em");
        let since = parse_timestamp_str("2030-01-01").unwrap();
        assert_eq!(src.load_incremental(since).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let src = ParquetExtractor::new("/nonexistent/produtos.parquet", "dt_atualizacao");
        let err = src.load_full().await.unwrap_err();
        assert!(err.to_string().contains("Failed to open snapshot"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = parse_timestamp_str("2024-05-06T07:08:09Z").unwrap();
        assert_eq!(parse_timestamp_str("2024-05-06 07:08:09"), Some(expected));
        assert_eq!(
            parse_timestamp(&ScalarValue::Integer(expected.timestamp_millis())),
            Some(expected)
        );
        assert!(parse_timestamp_str("2024-05-06").is_some());
        assert!(parse_timestamp_str("ontem").is_none());
        assert!(parse_timestamp(&ScalarValue::Null).is_none());
    }

    #[tokio::test]
    async fn test_static_source_incremental_keeps_undated() {
        let mut dated = RawRecord::new();
        dated.insert("id".into(), ScalarValue::Integer(1));
        dated.insert("ts".into(), ScalarValue::Text("2020-01-01".into()));
        let mut undated = RawRecord::new();
        undated.insert("id".into(), ScalarValue::Integer(2));

        let src = StaticSource::new(vec![dated, undated], "ts");
        let since = parse_timestamp_str("2021-01-01").unwrap();
        let got = src.load_incremental(since).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["id"], ScalarValue::Integer(2));
    }
}
