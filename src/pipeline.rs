//! Sequential orchestration: extract, transform, narrate, persist.

use crate::metrics::{RunMetrics, RunSummary};
use crate::narrator::{sample_alerts, Narrator};
use crate::sink::{AlertSink, SinkError};
use crate::source::{RecordSource, SourceError};
use crate::transformer::Transformer;
use std::time::Instant;
use tracing::{error, info, warn};

/// How a run ended, short of a sink failure
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The source failed; nothing downstream ran
    ExtractionFailed(SourceError),
    /// The source returned an empty table; nothing downstream ran
    NoData,
    /// All stages ran
    Completed(RunSummary),
}

/// One extraction-to-file run over injected collaborators
pub struct Pipeline<S, N> {
    source: S,
    transformer: Transformer,
    narrator: N,
    sink: AlertSink,
    preview_rows: usize,
}

impl<S: RecordSource, N: Narrator> Pipeline<S, N> {
    pub fn new(
        source: S,
        transformer: Transformer,
        narrator: N,
        sink: AlertSink,
        preview_rows: usize,
    ) -> Self {
        Self {
            source,
            transformer,
            narrator,
            sink,
            preview_rows,
        }
    }

    /// Run every stage to completion, in order.
    ///
    /// Extraction and narration failures are contained in the outcome; a
    /// sink failure is returned as an error.
    pub async fn run(&self, mut metrics: RunMetrics) -> Result<PipelineOutcome, SinkError> {
        let stage = Instant::now();
        let table = match self.source.fetch_all().await {
            Ok(table) => table,
            Err(e) => {
                error!(error = %e, "Extraction failed, pipeline stopped");
                return Ok(PipelineOutcome::ExtractionFailed(e));
            }
        };
        metrics.record_stage("extract", stage.elapsed());

        let stage = Instant::now();
        let Some(transformed) = self.transformer.transform(&table) else {
            warn!("Source table is empty, pipeline stopped");
            return Ok(PipelineOutcome::NoData);
        };
        metrics.record_stage("transform", stage.elapsed());
        drop(table);

        let total_rows = transformed.enriched.len();
        let columns = transformed.columns;
        let alerts = transformed.alerts;
        let alert_count = alerts.len();
        info!(rows = total_rows, alerts = alert_count, "Rows classified");

        let narration = if alerts.is_empty() {
            None
        } else {
            let stage = Instant::now();
            let result = self.narrator.narrate(&alerts).await;
            if let Err(e) = &result {
                warn!(kind = %e.kind(), error = %e, "Narration failed, continuing");
            }
            metrics.record_stage("narrate", stage.elapsed());
            Some(result)
        };

        let preview = sample_alerts(&alerts, self.preview_rows);

        let stage = Instant::now();
        let rows_written = self.sink.write(columns, alerts).await?;
        metrics.record_stage("write", stage.elapsed());

        Ok(PipelineOutcome::Completed(RunSummary {
            total_rows,
            alert_count,
            rows_written,
            alerts_path: self.sink.path().display().to_string(),
            preview,
            narration,
            started_at: metrics.started_at(),
            elapsed: metrics.elapsed(),
            stages: metrics.stages().to_vec(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrator::{NarrationError, NarrationErrorKind};
    use crate::types::alert::EnrichedTransaction;
    use crate::types::transaction::{
        CellValue, ColumnKind, ColumnRole, SourceColumn, Transaction, TransactionTable,
    };
    use async_trait::async_trait;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticSource(TransactionTable);

    #[async_trait]
    impl RecordSource for StaticSource {
        async fn fetch_all(&self) -> Result<TransactionTable, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl RecordSource for BrokenSource {
        async fn fetch_all(&self) -> Result<TransactionTable, SourceError> {
            Err(SourceError::MissingColumn("MONTO"))
        }
    }

    #[derive(Default)]
    struct CountingNarrator {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Narrator for CountingNarrator {
        async fn narrate(
            &self,
            alerts: &[EnrichedTransaction],
        ) -> Result<String, NarrationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NarrationError::new(
                    NarrationErrorKind::Transport,
                    "simulated network error",
                ))
            } else {
                Ok(format!("{} alerts reviewed", alerts.len()))
            }
        }
    }

    fn table() -> TransactionTable {
        TransactionTable::from(vec![
            Transaction::new("1", 5000.0, Some("F"), Some("  Retiro SOSPECHOSO  ")),
            Transaction::new("2", 5000.0, Some("P"), Some("ok")),
            Transaction::new("3", 4000.0, Some("F"), Some("x")),
        ])
    }

    fn pipeline<S: RecordSource>(
        source: S,
        narrator: CountingNarrator,
        path: &Path,
    ) -> Pipeline<S, CountingNarrator> {
        Pipeline::new(
            source,
            Transformer::default(),
            narrator,
            AlertSink::new(path, Duration::from_secs(10)),
            10,
        )
    }

    fn rows_in(path: &Path) -> i64 {
        let file = std::fs::File::open(path).unwrap();
        ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .metadata()
            .file_metadata()
            .num_rows()
    }

    #[tokio::test]
    async fn test_full_run_writes_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertas.parquet");
        let p = pipeline(StaticSource(table()), CountingNarrator::default(), &path);

        let summary = match p.run(RunMetrics::new()).await.unwrap() {
            PipelineOutcome::Completed(summary) => summary,
            other => panic!("expected completed run, got {other:?}"),
        };

        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.alert_count, 1);
        assert_eq!(summary.rows_written, 1);
        assert_eq!(summary.preview[0].transaction_id, "1");
        assert_eq!(summary.narration.unwrap().unwrap(), "1 alerts reviewed");
        assert_eq!(rows_in(&path), 1);
    }

    #[tokio::test]
    async fn test_extra_source_columns_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertas.parquet");

        let mut wide = TransactionTable::with_columns(vec![
            SourceColumn::new("ID_TRANSACCION", ColumnRole::TransactionId, ColumnKind::Int),
            SourceColumn::new("MONTO", ColumnRole::Amount, ColumnKind::Float),
            SourceColumn::new("COMENTARIO", ColumnRole::Comment, ColumnKind::Text),
            SourceColumn::new("ESTADO", ColumnRole::Status, ColumnKind::Text),
            SourceColumn::new("FECHA", ColumnRole::Extra, ColumnKind::Timestamp),
        ]);
        wide.extend_page(vec![
            Transaction::new("10", 7000.0, Some("F"), None)
                .with_extra(vec![CellValue::Timestamp(1_700_000_000_000_000)]),
            Transaction::new("11", 10.0, Some("F"), None).with_extra(vec![CellValue::Null]),
        ]);
        let p = pipeline(StaticSource(wide), CountingNarrator::default(), &path);

        let outcome = p.run(RunMetrics::new()).await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::Completed(_)));

        let file = std::fs::File::open(&path).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        let names: Vec<String> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names[4], "FECHA");
        assert_eq!(names.len(), 8);
        assert_eq!(builder.metadata().file_metadata().num_rows(), 1);
    }

    #[tokio::test]
    async fn test_narration_failure_still_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertas.parquet");
        let narrator = CountingNarrator {
            fail: true,
            ..Default::default()
        };
        let p = pipeline(StaticSource(table()), narrator, &path);

        let summary = match p.run(RunMetrics::new()).await.unwrap() {
            PipelineOutcome::Completed(summary) => summary,
            other => panic!("expected completed run, got {other:?}"),
        };

        let err = summary.narration.as_ref().unwrap().as_ref().unwrap_err();
        assert_eq!(err.kind(), NarrationErrorKind::Transport);
        summary.print();
        assert_eq!(rows_in(&path), 1);
    }

    #[tokio::test]
    async fn test_no_alerts_skips_narration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertas.parquet");
        let quiet = TransactionTable::from(vec![Transaction::new("2", 5000.0, Some("P"), None)]);
        let p = pipeline(StaticSource(quiet), CountingNarrator::default(), &path);

        let PipelineOutcome::Completed(summary) = p.run(RunMetrics::new()).await.unwrap() else {
            panic!("expected completed run");
        };

        assert!(summary.narration.is_none());
        assert_eq!(p.narrator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(rows_in(&path), 0);
    }

    #[tokio::test]
    async fn test_extraction_failure_stops_before_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertas.parquet");
        let p = pipeline(BrokenSource, CountingNarrator::default(), &path);

        let outcome = p.run(RunMetrics::new()).await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::ExtractionFailed(_)));
        assert!(!path.exists());
        assert_eq!(p.narrator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_table_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertas.parquet");
        let p = pipeline(
            StaticSource(TransactionTable::new()),
            CountingNarrator::default(),
            &path,
        );

        let outcome = p.run(RunMetrics::new()).await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::NoData));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_sink_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("alertas.parquet");
        let p = pipeline(StaticSource(table()), CountingNarrator::default(), &path);

        assert!(p.run(RunMetrics::new()).await.is_err());
    }
}
