//! Parquet output for the alert subset

use crate::types::alert::{
    AlertSample, EnrichedTransaction, COL_NORMALIZED_COMMENT, COL_RISK_CATEGORY, COL_TAX_AMOUNT,
};
use crate::types::transaction::{
    CellValue, ColumnKind, ColumnRole, SourceColumn, COL_AMOUNT, COL_TRANSACTION_ID,
};
use arrow::array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const UTC: &str = "UTC";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error writing alerts: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("alert write timed out after {0:?}")]
    TimedOut(Duration),

    #[error("alert writer task failed: {0}")]
    Task(String),
}

fn data_type(kind: ColumnKind) -> DataType {
    match kind {
        ColumnKind::Bool => DataType::Boolean,
        ColumnKind::Int => DataType::Int64,
        ColumnKind::Float => DataType::Float64,
        ColumnKind::Text => DataType::Utf8,
        ColumnKind::Date => DataType::Date32,
        ColumnKind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        ColumnKind::TimestampTz => DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into())),
    }
}

fn source_field(column: &SourceColumn) -> Field {
    let nullable = !matches!(
        column.role,
        ColumnRole::TransactionId | ColumnRole::Amount
    );
    Field::new(&column.name, data_type(column.kind), nullable)
}

/// Arrow schema of the alert file: source columns in source order, then
/// the derived columns
pub fn alerts_schema(columns: &[SourceColumn]) -> SchemaRef {
    let mut fields: Vec<Field> = columns.iter().map(source_field).collect();
    fields.extend([
        Field::new(COL_NORMALIZED_COMMENT, DataType::Utf8, true),
        Field::new(COL_TAX_AMOUNT, DataType::Float64, false),
        Field::new(COL_RISK_CATEGORY, DataType::Utf8, false),
    ]);
    Arc::new(Schema::new(fields))
}

fn mismatch(column: &SourceColumn) -> ArrowError {
    ArrowError::InvalidArgumentError(format!(
        "column {} holds a value that is not {:?}",
        column.name, column.kind
    ))
}

/// Build the array for the `slot`-th extra column
fn extra_array(
    column: &SourceColumn,
    slot: usize,
    rows: &[EnrichedTransaction],
) -> Result<ArrayRef, ArrowError> {
    let cells = rows
        .iter()
        .map(|r| r.transaction.extra.get(slot).unwrap_or(&CellValue::Null));

    let array: ArrayRef = match column.kind {
        ColumnKind::Bool => Arc::new(
            cells
                .map(|c| match c {
                    CellValue::Bool(v) => Ok(Some(*v)),
                    CellValue::Null => Ok(None),
                    _ => Err(mismatch(column)),
                })
                .collect::<Result<BooleanArray, _>>()?,
        ),
        ColumnKind::Int => Arc::new(
            cells
                .map(|c| match c {
                    CellValue::Int(v) => Ok(Some(*v)),
                    CellValue::Null => Ok(None),
                    _ => Err(mismatch(column)),
                })
                .collect::<Result<Int64Array, _>>()?,
        ),
        ColumnKind::Float => Arc::new(
            cells
                .map(|c| match c {
                    CellValue::Float(v) => Ok(Some(*v)),
                    CellValue::Int(v) => Ok(Some(*v as f64)),
                    CellValue::Null => Ok(None),
                    _ => Err(mismatch(column)),
                })
                .collect::<Result<Float64Array, _>>()?,
        ),
        ColumnKind::Text => Arc::new(
            cells
                .map(|c| match c {
                    CellValue::Text(v) => Ok(Some(v.as_str())),
                    CellValue::Null => Ok(None),
                    _ => Err(mismatch(column)),
                })
                .collect::<Result<StringArray, _>>()?,
        ),
        ColumnKind::Date => Arc::new(
            cells
                .map(|c| match c {
                    CellValue::Date(v) => Ok(Some(*v)),
                    CellValue::Null => Ok(None),
                    _ => Err(mismatch(column)),
                })
                .collect::<Result<Date32Array, _>>()?,
        ),
        ColumnKind::Timestamp | ColumnKind::TimestampTz => {
            let micros = cells
                .map(|c| match c {
                    CellValue::Timestamp(v) => Ok(Some(*v)),
                    CellValue::Null => Ok(None),
                    _ => Err(mismatch(column)),
                })
                .collect::<Result<TimestampMicrosecondArray, _>>()?;
            if column.kind == ColumnKind::TimestampTz {
                Arc::new(micros.with_timezone(UTC))
            } else {
                Arc::new(micros)
            }
        }
    };
    Ok(array)
}

fn id_array(
    column: &SourceColumn,
    rows: &[EnrichedTransaction],
) -> Result<ArrayRef, ArrowError> {
    let ids = rows.iter().map(|r| r.transaction.transaction_id.as_str());
    if column.kind == ColumnKind::Int {
        let parsed = ids
            .map(|id| {
                id.parse::<i64>().map_err(|e| {
                    ArrowError::ParseError(format!("{} value {:?}: {}", column.name, id, e))
                })
            })
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(Arc::new(Int64Array::from(parsed)))
    } else {
        Ok(Arc::new(StringArray::from_iter_values(ids)))
    }
}

/// Build a record batch from enriched rows laid out as `columns`
pub fn to_record_batch(
    columns: &[SourceColumn],
    rows: &[EnrichedTransaction],
) -> Result<RecordBatch, ArrowError> {
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 3);
    let mut extra_slot = 0;

    for column in columns {
        let array: ArrayRef = match column.role {
            ColumnRole::TransactionId => id_array(column, rows)?,
            ColumnRole::Amount => Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| r.transaction.amount),
            )),
            ColumnRole::Comment => Arc::new(
                rows.iter()
                    .map(|r| r.transaction.comment.as_deref())
                    .collect::<StringArray>(),
            ),
            ColumnRole::Status => Arc::new(
                rows.iter()
                    .map(|r| r.transaction.status.as_deref())
                    .collect::<StringArray>(),
            ),
            ColumnRole::Extra => {
                extra_slot += 1;
                extra_array(column, extra_slot - 1, rows)?
            }
        };
        arrays.push(array);
    }

    let normalized: StringArray = rows.iter().map(|r| r.normalized_comment.as_deref()).collect();
    arrays.push(Arc::new(normalized));
    arrays.push(Arc::new(Float64Array::from_iter_values(
        rows.iter().map(|r| r.tax_amount),
    )));
    arrays.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.risk_category.label()),
    )));

    RecordBatch::try_new(alerts_schema(columns), arrays)
}

/// Three-column batch used for console previews
pub fn sample_batch(samples: &[AlertSample]) -> Result<RecordBatch, ArrowError> {
    let schema = Arc::new(Schema::new(vec![
        Field::new(COL_TRANSACTION_ID, DataType::Utf8, false),
        Field::new(COL_AMOUNT, DataType::Float64, false),
        Field::new(COL_NORMALIZED_COMMENT, DataType::Utf8, true),
    ]));

    let ids = StringArray::from_iter_values(samples.iter().map(|s| s.transaction_id.as_str()));
    let amounts = Float64Array::from_iter_values(samples.iter().map(|s| s.amount));
    let comments: StringArray = samples
        .iter()
        .map(|s| s.normalized_comment.as_deref())
        .collect();

    RecordBatch::try_new(
        schema,
        vec![Arc::new(ids), Arc::new(amounts), Arc::new(comments)],
    )
}

/// Write rows to `path`, replacing any existing file. Returns rows written.
pub fn write_alerts(
    path: &Path,
    columns: &[SourceColumn],
    rows: &[EnrichedTransaction],
) -> Result<usize, SinkError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build();

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, alerts_schema(columns), Some(props))?;
    if !rows.is_empty() {
        writer.write(&to_record_batch(columns, rows)?)?;
    }
    writer.close()?;

    Ok(rows.len())
}

/// Writes the alert subset to a Parquet file on the blocking pool
#[derive(Debug, Clone)]
pub struct AlertSink {
    path: PathBuf,
    timeout: Duration,
}

impl AlertSink {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    /// Get the output path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the alerts, bounded by the configured timeout
    pub async fn write(
        &self,
        columns: Vec<SourceColumn>,
        alerts: Vec<EnrichedTransaction>,
    ) -> Result<usize, SinkError> {
        let path = self.path.clone();
        let task = tokio::task::spawn_blocking(move || write_alerts(&path, &columns, &alerts));

        let written = tokio::time::timeout(self.timeout, task)
            .await
            .map_err(|_| SinkError::TimedOut(self.timeout))?
            .map_err(|e| SinkError::Task(e.to_string()))??;

        info!(
            rows = written,
            path = %self.path.display(),
            "Alerts written"
        );
        Ok(written)
    }
}
