//! Raw transaction records as read from the source table

use serde::{Deserialize, Serialize};

/// Source column holding the transaction identifier
pub const COL_TRANSACTION_ID: &str = "ID_TRANSACCION";
/// Source column holding the transaction amount
pub const COL_AMOUNT: &str = "MONTO";
/// Source column holding the free-text comment
pub const COL_COMMENT: &str = "COMENTARIO";
/// Source column holding the status code
pub const COL_STATUS: &str = "ESTADO";

/// What a source column is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    TransactionId,
    Amount,
    Comment,
    Status,
    /// Not read by the rule, carried through to the output unchanged
    Extra,
}

/// Logical type of a source column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    Text,
    /// Days since 1970-01-01
    Date,
    /// Microseconds since the epoch, no time zone
    Timestamp,
    /// Microseconds since the epoch, UTC
    TimestampTz,
}

/// Name, role and type of one column of the source table
#[derive(Debug, Clone, PartialEq)]
pub struct SourceColumn {
    pub name: String,
    pub role: ColumnRole,
    pub kind: ColumnKind,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, role: ColumnRole, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            role,
            kind,
        }
    }
}

/// The four columns the rule reads, in their conventional order
pub fn standard_columns() -> Vec<SourceColumn> {
    vec![
        SourceColumn::new(COL_TRANSACTION_ID, ColumnRole::TransactionId, ColumnKind::Text),
        SourceColumn::new(COL_AMOUNT, ColumnRole::Amount, ColumnKind::Float),
        SourceColumn::new(COL_COMMENT, ColumnRole::Comment, ColumnKind::Text),
        SourceColumn::new(COL_STATUS, ColumnRole::Status, ColumnKind::Text),
    ]
}

/// Value of an extra column
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(i32),
    Timestamp(i64),
}

/// A single row of the transaction table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque transaction key
    #[serde(rename = "ID_TRANSACCION")]
    pub transaction_id: String,

    /// Transaction amount
    #[serde(rename = "MONTO")]
    pub amount: f64,

    /// Free-text comment, may be null
    #[serde(rename = "COMENTARIO")]
    pub comment: Option<String>,

    /// Status code (single letter, e.g. "F")
    #[serde(rename = "ESTADO")]
    pub status: Option<String>,

    /// Values of the extra columns, in the order the table lists them
    #[serde(skip)]
    pub extra: Vec<CellValue>,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(
        transaction_id: impl Into<String>,
        amount: f64,
        status: Option<&str>,
        comment: Option<&str>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            amount,
            comment: comment.map(str::to_string),
            status: status.map(str::to_string),
            extra: Vec::new(),
        }
    }

    /// Attach extra column values
    pub fn with_extra(mut self, extra: Vec<CellValue>) -> Self {
        self.extra = extra;
        self
    }
}

/// Ordered, fully materialized transaction table
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionTable {
    columns: Vec<SourceColumn>,
    rows: Vec<Transaction>,
    pages: usize,
}

impl TransactionTable {
    /// Empty table with the four standard columns
    pub fn new() -> Self {
        Self::with_columns(standard_columns())
    }

    /// Empty table with an explicit column list
    pub fn with_columns(columns: Vec<SourceColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            pages: 0,
        }
    }

    /// Append a page of rows, keeping source order
    pub fn extend_page(&mut self, page: Vec<Transaction>) {
        self.pages += 1;
        self.rows.extend(page);
    }

    pub fn set_columns(&mut self, columns: Vec<SourceColumn>) {
        self.columns = columns;
    }

    /// Source columns in result-set order
    pub fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[Transaction] {
        &self.rows
    }

    /// Number of pages appended so far
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Transaction>> for TransactionTable {
    fn from(rows: Vec<Transaction>) -> Self {
        let mut table = Self::new();
        if !rows.is_empty() {
            table.extend_page(rows);
        }
        table
    }
}

impl FromIterator<Transaction> for TransactionTable {
    fn from_iter<I: IntoIterator<Item = Transaction>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}
