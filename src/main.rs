//! Transaction Risk Pipeline - Main Entry Point
//!
//! Extracts transactions from PostgreSQL, flags high-risk rows, asks an LLM
//! for a short analysis and stores the alerts as Parquet.

use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transaction_risk_pipeline::{
    config::{AppConfig, LoggingConfig},
    metrics::RunMetrics,
    narrator::RiskNarrator,
    pipeline::{Pipeline, PipelineOutcome},
    sink::AlertSink,
    source::PostgresSource,
    transformer::Transformer,
};

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("warn")
            .add_directive(format!("transaction_risk_pipeline={}", logging.level).parse()?),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let process_start = Instant::now();

    // Load configuration
    let config = AppConfig::load()?;
    init_logging(&config.logging).context("Invalid logging configuration")?;

    info!("Starting Transaction Risk Pipeline");
    info!(
        "Risk rule: amount > {:.2} and status == {:?}, tax rate {:.2}",
        config.rules.amount_threshold, config.rules.flagged_status, config.rules.tax_rate
    );

    // Initialize components
    let source = PostgresSource::new(&config.database);
    info!(
        table = %source.table(),
        host = %config.database.host,
        "Record source configured"
    );

    let narrator = RiskNarrator::new(&config.narrator)?;
    info!(model = %narrator.model(), "Narrator configured");

    let sink = AlertSink::new(&config.output.alerts_path, config.output.write_timeout());

    let pipeline = Pipeline::new(
        source,
        Transformer::new(config.rules.clone()),
        narrator,
        sink,
        config.output.preview_rows,
    );

    match pipeline.run(RunMetrics::starting_at(process_start)).await {
        Ok(PipelineOutcome::Completed(summary)) => summary.print(),
        Ok(PipelineOutcome::NoData) => {
            warn!("No transactions to process, nothing written");
        }
        Ok(PipelineOutcome::ExtractionFailed(e)) => {
            error!(error = %e, "Pipeline stopped: could not read transactions");
        }
        Err(e) => {
            return Err(e).context("Failed to write alert file");
        }
    }

    Ok(())
}
