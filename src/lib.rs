//! Transaction Risk Pipeline Library
//!
//! Batch extraction of transactions, rule-based risk classification,
//! LLM narration of the flagged rows and Parquet output.

pub mod config;
pub mod metrics;
pub mod narrator;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod transformer;
pub mod types;

pub use config::AppConfig;
pub use narrator::{NarrationError, NarrationErrorKind, Narrator, RiskNarrator};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use sink::AlertSink;
pub use source::{PostgresSource, RecordSource, SourceError};
pub use transformer::Transformer;
pub use types::{alert::EnrichedTransaction, transaction::Transaction};
