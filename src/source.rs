//! Paged extraction of the transaction table from PostgreSQL

use crate::config::DatabaseConfig;
use crate::types::transaction::{
    CellValue, ColumnKind, ColumnRole, SourceColumn, Transaction, TransactionTable, COL_AMOUNT,
    COL_COMMENT, COL_STATUS, COL_TRANSACTION_ID,
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use futures::{Stream, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, Connection, Row, TypeInfo};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that abort an extraction
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("database connection failed: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("required column {0} not present in result set")]
    MissingColumn(&'static str),

    #[error("cannot decode column {column}: {message}")]
    Decode { column: String, message: String },

    #[error("column {column} has unsupported type {type_name}")]
    UnsupportedType { column: String, type_name: String },

    #[error("extraction timed out after {0:?}")]
    TimedOut(Duration),
}

/// Anything that can produce the complete transaction table in one call.
///
/// Implementations are all-or-nothing: either the whole table or an error.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_all(&self) -> Result<TransactionTable, SourceError>;
}

/// Check that `table` is a plain, optionally schema-qualified identifier
pub fn validate_table_name(table: &str) -> Result<(), SourceError> {
    let valid = !table.is_empty()
        && table.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'))
        });

    if valid {
        Ok(())
    } else {
        Err(SourceError::InvalidTable(table.to_string()))
    }
}

/// Build the extraction query for a (possibly schema-qualified) table
pub fn select_all_sql(table: &str) -> Result<String, SourceError> {
    validate_table_name(table)?;
    Ok(format!("SELECT * FROM {}", table))
}

/// PostgreSQL column types the extraction knows how to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgColumnType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Date,
    Timestamp,
    TimestampTz,
}

impl PgColumnType {
    /// Map a type name as reported by the server (`INT8`, `VARCHAR`, ...)
    pub fn from_type_name(name: &str) -> Option<Self> {
        let ty = match name.to_ascii_uppercase().as_str() {
            "BOOL" => Self::Bool,
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "INT8" => Self::Int8,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "NUMERIC" => Self::Numeric,
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => Self::Text,
            "DATE" => Self::Date,
            "TIMESTAMP" => Self::Timestamp,
            "TIMESTAMPTZ" => Self::TimestampTz,
            _ => return None,
        };
        Some(ty)
    }

    fn is_integer(self) -> bool {
        matches!(self, Self::Int2 | Self::Int4 | Self::Int8)
    }

    /// Output kind of a column of this type playing `role`, or `None` when
    /// the role cannot be filled by this type
    pub fn kind_for(self, role: ColumnRole) -> Option<ColumnKind> {
        match role {
            ColumnRole::TransactionId if self.is_integer() => Some(ColumnKind::Int),
            ColumnRole::TransactionId => {
                matches!(self, Self::Numeric | Self::Text).then_some(ColumnKind::Text)
            }
            ColumnRole::Amount => (self.is_integer()
                || matches!(self, Self::Float4 | Self::Float8 | Self::Numeric))
            .then_some(ColumnKind::Float),
            ColumnRole::Comment | ColumnRole::Status => {
                (self == Self::Text).then_some(ColumnKind::Text)
            }
            ColumnRole::Extra => Some(match self {
                Self::Bool => ColumnKind::Bool,
                Self::Int2 | Self::Int4 | Self::Int8 => ColumnKind::Int,
                Self::Float4 | Self::Float8 | Self::Numeric => ColumnKind::Float,
                Self::Text => ColumnKind::Text,
                Self::Date => ColumnKind::Date,
                Self::Timestamp => ColumnKind::Timestamp,
                Self::TimestampTz => ColumnKind::TimestampTz,
            }),
        }
    }
}

/// A result-set row whose cells can be read by ordinal
pub trait SourceRow {
    /// `(name, type name)` of every column, in result-set order
    fn describe(&self) -> Vec<(String, String)>;

    /// Read one cell. `Ok(CellValue::Null)` for SQL NULL.
    fn cell(
        &self,
        idx: usize,
        ty: PgColumnType,
        column: &SourceColumn,
    ) -> Result<CellValue, SourceError>;
}

/// Roles and types of every column in the result set
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    columns: Vec<SourceColumn>,
    types: Vec<PgColumnType>,
}

impl ColumnLayout {
    /// Assign roles by name (ignoring ASCII case) and check each column's
    /// type against its role. Columns other than the four required ones
    /// become extras, in result-set order.
    pub fn resolve<'a, I>(described: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let described: Vec<(&str, &str)> = described.into_iter().collect();
        let find = |wanted: &'static str| {
            described
                .iter()
                .position(|(name, _)| name.eq_ignore_ascii_case(wanted))
                .ok_or(SourceError::MissingColumn(wanted))
        };

        let required = [
            (find(COL_TRANSACTION_ID)?, ColumnRole::TransactionId),
            (find(COL_AMOUNT)?, ColumnRole::Amount),
            (find(COL_COMMENT)?, ColumnRole::Comment),
            (find(COL_STATUS)?, ColumnRole::Status),
        ];

        let mut columns = Vec::with_capacity(described.len());
        let mut types = Vec::with_capacity(described.len());
        for (idx, (name, type_name)) in described.iter().enumerate() {
            let role = required
                .iter()
                .find(|(pos, _)| *pos == idx)
                .map_or(ColumnRole::Extra, |(_, role)| *role);

            let unsupported = || SourceError::UnsupportedType {
                column: name.to_string(),
                type_name: type_name.to_string(),
            };
            let ty = PgColumnType::from_type_name(type_name).ok_or_else(unsupported)?;
            let kind = ty.kind_for(role).ok_or_else(unsupported)?;

            columns.push(SourceColumn::new(*name, role, kind));
            types.push(ty);
        }

        Ok(Self { columns, types })
    }

    pub fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    /// Decode one row into a transaction
    pub fn decode<R: SourceRow>(&self, row: &R) -> Result<Transaction, SourceError> {
        let cells = self
            .columns
            .iter()
            .zip(&self.types)
            .enumerate()
            .map(|(idx, (column, ty))| row.cell(idx, *ty, column))
            .collect::<Result<Vec<_>, _>>()?;
        self.assemble(cells)
    }

    /// Place already-decoded cells into a transaction by role
    pub fn assemble(&self, cells: Vec<CellValue>) -> Result<Transaction, SourceError> {
        if cells.len() != self.columns.len() {
            return Err(decode_error(
                "row",
                format!("row has {} cells, expected {}", cells.len(), self.columns.len()),
            ));
        }

        let mut transaction_id = None;
        let mut amount = None;
        let mut comment = None;
        let mut status = None;
        let mut extra = Vec::new();

        for (column, cell) in self.columns.iter().zip(cells) {
            match column.role {
                ColumnRole::TransactionId => {
                    transaction_id = Some(match cell {
                        CellValue::Int(v) => v.to_string(),
                        CellValue::Text(s) => s,
                        CellValue::Null => {
                            return Err(decode_error(&column.name, "null identifier"))
                        }
                        other => return Err(unexpected_value(column, &other)),
                    })
                }
                ColumnRole::Amount => {
                    amount = Some(match cell {
                        CellValue::Int(v) => v as f64,
                        CellValue::Float(v) => v,
                        CellValue::Null => return Err(decode_error(&column.name, "null amount")),
                        other => return Err(unexpected_value(column, &other)),
                    })
                }
                ColumnRole::Comment => comment = optional_text(column, cell)?,
                ColumnRole::Status => status = optional_text(column, cell)?,
                ColumnRole::Extra => extra.push(cell),
            }
        }

        Ok(Transaction {
            transaction_id: transaction_id
                .ok_or(SourceError::MissingColumn(COL_TRANSACTION_ID))?,
            amount: amount.ok_or(SourceError::MissingColumn(COL_AMOUNT))?,
            comment,
            status,
            extra,
        })
    }
}

fn decode_error(column: &str, message: impl Into<String>) -> SourceError {
    SourceError::Decode {
        column: column.to_string(),
        message: message.into(),
    }
}

fn unexpected_value(column: &SourceColumn, value: &CellValue) -> SourceError {
    decode_error(
        &column.name,
        format!("unexpected {:?} for {:?} column", value, column.kind),
    )
}

fn optional_text(
    column: &SourceColumn,
    cell: CellValue,
) -> Result<Option<String>, SourceError> {
    match cell {
        CellValue::Text(s) => Ok(Some(s)),
        CellValue::Null => Ok(None),
        other => Err(unexpected_value(column, &other)),
    }
}

/// Days from 0001-01-01 (CE day 1) to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

impl SourceRow for PgRow {
    fn describe(&self) -> Vec<(String, String)> {
        self.columns()
            .iter()
            .map(|c| (c.name().to_string(), c.type_info().name().to_string()))
            .collect()
    }

    fn cell(
        &self,
        idx: usize,
        ty: PgColumnType,
        column: &SourceColumn,
    ) -> Result<CellValue, SourceError> {
        let err = |e: sqlx::Error| decode_error(&column.name, e.to_string());

        let value = match ty {
            PgColumnType::Bool => self
                .try_get::<Option<bool>, _>(idx)
                .map_err(err)?
                .map(CellValue::Bool),
            PgColumnType::Int2 => self
                .try_get::<Option<i16>, _>(idx)
                .map_err(err)?
                .map(|v| CellValue::Int(v.into())),
            PgColumnType::Int4 => self
                .try_get::<Option<i32>, _>(idx)
                .map_err(err)?
                .map(|v| CellValue::Int(v.into())),
            PgColumnType::Int8 => self
                .try_get::<Option<i64>, _>(idx)
                .map_err(err)?
                .map(CellValue::Int),
            PgColumnType::Float4 => self
                .try_get::<Option<f32>, _>(idx)
                .map_err(err)?
                .map(|v| CellValue::Float(v.into())),
            PgColumnType::Float8 => self
                .try_get::<Option<f64>, _>(idx)
                .map_err(err)?
                .map(CellValue::Float),
            PgColumnType::Numeric => match self
                .try_get::<Option<Decimal>, _>(idx)
                .map_err(err)?
            {
                None => None,
                Some(d) if column.role == ColumnRole::TransactionId => {
                    Some(CellValue::Text(d.normalize().to_string()))
                }
                Some(d) => Some(CellValue::Float(d.to_f64().ok_or_else(|| {
                    decode_error(&column.name, format!("{} out of range", d))
                })?)),
            },
            PgColumnType::Text => self
                .try_get::<Option<String>, _>(idx)
                .map_err(err)?
                .map(CellValue::Text),
            PgColumnType::Date => self
                .try_get::<Option<NaiveDate>, _>(idx)
                .map_err(err)?
                .map(|d| CellValue::Date(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)),
            PgColumnType::Timestamp => self
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .map_err(err)?
                .map(|ts| CellValue::Timestamp(ts.and_utc().timestamp_micros())),
            PgColumnType::TimestampTz => self
                .try_get::<Option<DateTime<Utc>>, _>(idx)
                .map_err(err)?
                .map(|ts| CellValue::Timestamp(ts.timestamp_micros())),
        };

        Ok(value.unwrap_or(CellValue::Null))
    }
}

/// Record source backed by a single PostgreSQL connection
pub struct PostgresSource {
    options: PgConnectOptions,
    table: String,
    page_size: usize,
    timeout: Duration,
}

impl PostgresSource {
    /// Create a source from configuration
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            options: config.connect_options(),
            table: config.table.clone(),
            page_size: config.page_size.max(1),
            timeout: config.timeout(),
        }
    }

    /// Get the table name
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn extract(&self, sql: &str) -> Result<TransactionTable, SourceError> {
        let mut conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(SourceError::Connect)?;
        info!(table = %self.table, "Database connection established");

        let result = collect_pages(sqlx::query(sql).fetch(&mut conn), self.page_size).await;

        // Released on every path; a timeout drops the connection instead.
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close database connection cleanly");
        } else {
            info!("Database connection closed");
        }

        result
    }
}

#[async_trait]
impl RecordSource for PostgresSource {
    async fn fetch_all(&self) -> Result<TransactionTable, SourceError> {
        let sql = select_all_sql(&self.table)?;
        let start = Instant::now();

        info!(
            table = %self.table,
            page_size = self.page_size,
            "Extracting transactions in pages"
        );

        let table = tokio::time::timeout(self.timeout, self.extract(&sql))
            .await
            .map_err(|_| SourceError::TimedOut(self.timeout))??;

        info!(
            rows = table.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Extraction complete"
        );
        Ok(table)
    }
}

/// Drain a row stream page by page into one table.
///
/// The layout is resolved from the first row. Any row error or decode
/// failure aborts the whole extraction; no partial table is returned.
pub async fn collect_pages<St, R, E>(
    rows: St,
    page_size: usize,
) -> Result<TransactionTable, SourceError>
where
    St: Stream<Item = Result<R, E>>,
    R: SourceRow,
    SourceError: From<E>,
{
    let mut table = TransactionTable::new();
    let mut layout: Option<ColumnLayout> = None;
    let mut pages = std::pin::pin!(rows.chunks(page_size.max(1)));

    while let Some(chunk) = pages.next().await {
        let mut page = Vec::with_capacity(chunk.len());

        for row in chunk {
            let row = row?;
            if layout.is_none() {
                let described = row.describe();
                let resolved = ColumnLayout::resolve(
                    described.iter().map(|(name, ty)| (name.as_str(), ty.as_str())),
                )?;
                debug!(columns = ?resolved.columns(), "Resolved column layout");
                table.set_columns(resolved.columns().to_vec());
                layout = Some(resolved);
            }
            if let Some(cols) = &layout {
                page.push(cols.decode(&row)?);
            }
        }

        let count = page.len();
        table.extend_page(page);
        info!(page = table.pages(), rows = count, "Page fetched");
    }

    Ok(table)
}
