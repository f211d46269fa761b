//! Run timing and the end-of-run summary.

use crate::narrator::NarrationError;
use crate::sink::sample_batch;
use crate::types::alert::AlertSample;
use arrow::error::ArrowError;
use arrow::util::pretty::pretty_format_batches;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Wall time spent in one stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageTiming {
    pub stage: &'static str,
    pub duration: Duration,
}

/// Timing collector for a single run
#[derive(Debug, Clone)]
pub struct RunMetrics {
    /// Start time for elapsed calculation
    start_time: Instant,
    /// Wall-clock start, shown in the summary
    started_at: DateTime<Utc>,
    stages: Vec<StageTiming>,
}

impl RunMetrics {
    /// Start timing now
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Start timing from an earlier instant (e.g. process start)
    pub fn starting_at(start_time: Instant) -> Self {
        Self {
            start_time,
            started_at: Utc::now(),
            stages: Vec::new(),
        }
    }

    /// Record how long a stage took
    pub fn record_stage(&mut self, stage: &'static str, duration: Duration) {
        self.stages.push(StageTiming { stage, duration });
    }

    pub fn stages(&self) -> &[StageTiming] {
        &self.stages
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters and results of a completed run
#[derive(Debug)]
pub struct RunSummary {
    /// Rows in the enriched table
    pub total_rows: usize,
    /// Rows in the alert subset
    pub alert_count: usize,
    /// Rows written to the output file
    pub rows_written: usize,
    pub alerts_path: String,
    /// First alerts, for the console preview
    pub preview: Vec<AlertSample>,
    /// `None` when there were no alerts to narrate
    pub narration: Option<Result<String, NarrationError>>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub stages: Vec<StageTiming>,
}

impl RunSummary {
    /// Percentage of rows classified as high risk
    pub fn alert_rate(&self) -> f64 {
        if self.total_rows > 0 {
            (self.alert_count as f64 / self.total_rows as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print summary statistics
    pub fn print(&self) {
        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            TRANSACTION RISK PIPELINE - RUN SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Started:            {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
        info!(
            "║ Rows Processed:   {:>10}  │  Alerts: {:>8} ({:>5.1}%)",
            self.total_rows,
            self.alert_count,
            self.alert_rate()
        );
        info!(
            "║ Total Time:       {:>9.2}s",
            self.elapsed.as_secs_f64()
        );
        for timing in &self.stages {
            info!(
                "║   {:<12} {:>9.2}s",
                timing.stage,
                timing.duration.as_secs_f64()
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        if !self.preview.is_empty() {
            match format_preview(&self.preview) {
                Ok(table) => {
                    info!("High-risk alert sample:");
                    for line in table.lines() {
                        info!("{}", line);
                    }
                }
                Err(e) => warn!(error = %e, "Could not render alert preview"),
            }
        }

        match &self.narration {
            Some(Ok(text)) => {
                info!("Risk analysis:");
                for line in text.lines() {
                    info!("  {}", line);
                }
            }
            Some(Err(e)) => {
                warn!(kind = %e.kind(), "Risk analysis unavailable: {}", e.message);
            }
            None => info!("No alerts to analyse"),
        }

        info!(
            rows = self.rows_written,
            path = %self.alerts_path,
            "Alerts saved"
        );
    }
}

/// Render alert samples as a text table
pub fn format_preview(samples: &[AlertSample]) -> Result<String, ArrowError> {
    let batch = sample_batch(samples)?;
    Ok(pretty_format_batches(&[batch])?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrator::NarrationErrorKind;

    fn summary(total_rows: usize, alert_count: usize) -> RunSummary {
        RunSummary {
            total_rows,
            alert_count,
            rows_written: alert_count,
            alerts_path: "alertas.parquet".to_string(),
            preview: Vec::new(),
            narration: None,
            started_at: Utc::now(),
            elapsed: Duration::from_millis(1500),
            stages: Vec::new(),
        }
    }

    #[test]
    fn test_alert_rate() {
        assert_eq!(summary(200, 50).alert_rate(), 25.0);
        assert_eq!(summary(0, 0).alert_rate(), 0.0);
    }

    #[test]
    fn test_stage_recording() {
        let mut metrics = RunMetrics::new();
        metrics.record_stage("extract", Duration::from_millis(30));
        metrics.record_stage("transform", Duration::from_millis(5));

        let names: Vec<&str> = metrics.stages().iter().map(|s| s.stage).collect();
        assert_eq!(names, vec!["extract", "transform"]);
        assert!(metrics.elapsed() >= Duration::ZERO);
    }

    #[test]
    fn test_preview_renders_projected_columns() {
        let samples = vec![AlertSample {
            transaction_id: "1".to_string(),
            amount: 5000.0,
            normalized_comment: Some("retiro sospechoso".to_string()),
        }];

        let table = format_preview(&samples).unwrap();
        assert!(table.contains("ID_TRANSACCION"));
        assert!(table.contains("COMENTARIO_LIMPIO"));
        assert!(table.contains("retiro sospechoso"));
    }

    #[test]
    fn test_print_handles_failed_narration() {
        let mut s = summary(10, 1);
        s.narration = Some(Err(NarrationError::new(
            NarrationErrorKind::Transport,
            "connection refused",
        )));
        s.print();
    }
}
