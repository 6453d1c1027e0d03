//! Parquet journal of committed events

use crate::events::EventRecord;
use arrow::array::{Array, ArrayRef, StringArray, TimestampMicrosecondArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Journal schema; the full event is kept as JSON in `payload`
pub fn journal_schema() -> Schema {
    Schema::new(vec![
        Field::new("sequence", DataType::UInt64, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("kind", DataType::Utf8, false),
        Field::new("market", DataType::UInt64, true),
        Field::new("payload", DataType::Utf8, false),
    ])
}

/// Writes event records into timestamped Parquet files
pub struct EventJournal {
    output_dir: PathBuf,
}

impl EventJournal {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Ensure output directory exists
    pub fn ensure_dir(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// File path for a journal written at `timestamp`
    pub fn file_path(&self, prefix: &str, timestamp: DateTime<Utc>) -> PathBuf {
        let filename = format!("{}_{}.parquet", prefix, timestamp.format("%Y%m%d_%H%M%S"));
        self.output_dir.join(filename)
    }

    /// Write `records` to `path`; nothing is created for an empty slice
    pub fn write(&self, path: &Path, records: &[EventRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.ensure_dir()?;

        let schema = Arc::new(journal_schema());
        let file = File::create(path)?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

        let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        let timestamps: Vec<i64> = records
            .iter()
            .map(|r| r.timestamp.timestamp_micros())
            .collect();
        let kinds: Vec<&str> = records.iter().map(|r| r.event.kind()).collect();
        let markets: Vec<Option<u64>> = records
            .iter()
            .map(|r| r.event.market().map(|id| id.0))
            .collect();
        let payloads = records
            .iter()
            .map(|r| serde_json::to_string(&r.event))
            .collect::<Result<Vec<_>, _>>()?;

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(UInt64Array::from(sequences)) as ArrayRef,
                Arc::new(TimestampMicrosecondArray::from(timestamps).with_timezone("UTC"))
                    as ArrayRef,
                Arc::new(StringArray::from(kinds)) as ArrayRef,
                Arc::new(UInt64Array::from(markets)) as ArrayRef,
                Arc::new(StringArray::from(
                    payloads.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                )) as ArrayRef,
            ],
        )?;

        writer.write(&batch)?;
        writer.close()?;

        tracing::info!(path = ?path, count = records.len(), "Wrote event journal");

        Ok(())
    }
}

/// One journal row as read back from disk
#[derive(Debug, Clone, PartialEq)]
pub struct JournalRow {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub market: Option<u64>,
    pub payload: String,
}

/// Reader for journal files
pub struct JournalReader {
    path: PathBuf,
}

impl JournalReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read(&self) -> anyhow::Result<Vec<JournalRow>> {
        let file = File::open(&self.path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut rows = Vec::new();
        for batch_result in reader {
            let batch = batch_result?;

            let sequences = batch
                .column(0)
                .as_any()
                .downcast_ref::<UInt64Array>()
                .ok_or_else(|| anyhow::anyhow!("Invalid sequence column"))?;
            let timestamps = batch
                .column(1)
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(|| anyhow::anyhow!("Invalid timestamp column"))?;
            let kinds = batch
                .column(2)
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| anyhow::anyhow!("Invalid kind column"))?;
            let markets = batch
                .column(3)
                .as_any()
                .downcast_ref::<UInt64Array>()
                .ok_or_else(|| anyhow::anyhow!("Invalid market column"))?;
            let payloads = batch
                .column(4)
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| anyhow::anyhow!("Invalid payload column"))?;

            for i in 0..batch.num_rows() {
                let timestamp = DateTime::from_timestamp_micros(timestamps.value(i))
                    .ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))?;
                rows.push(JournalRow {
                    sequence: sequences.value(i),
                    timestamp,
                    kind: kinds.value(i).to_string(),
                    market: (!markets.is_null(i)).then(|| markets.value(i)),
                    payload: payloads.value(i).to_string(),
                });
            }
        }

        Ok(rows)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
