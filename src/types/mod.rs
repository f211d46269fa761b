//! Type definitions for the transaction risk pipeline

pub mod alert;
pub mod transaction;

pub use alert::{AlertSample, EnrichedTransaction, RiskCategory, RiskRule};
pub use transaction::{
    CellValue, ColumnKind, ColumnRole, SourceColumn, Transaction, TransactionTable,
};
