//! Test Transaction Seeder
//!
//! Generates random transactions and inserts them into the configured source
//! table so the pipeline has something to classify.
//!
//! Usage: seed-transactions [count] [fraud_rate] [batch_size]

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::{Connection, PgConnection};
use tracing::{info, warn};
use transaction_risk_pipeline::config::AppConfig;
use transaction_risk_pipeline::source::validate_table_name;
use transaction_risk_pipeline::types::Transaction;

/// Transaction generator for testing
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
    transaction_counter: i64,
}

impl TransactionGenerator {
    fn new(first_id: i64) -> Self {
        Self {
            rng: rand::thread_rng(),
            transaction_counter: first_id,
        }
    }

    /// Generate an ordinary transaction
    fn generate_legitimate(&mut self) -> Transaction {
        self.transaction_counter += 1;
        let amount = (self.rng.gen_range(10.0..3500.0_f64) * 100.0).round() / 100.0;
        let status = self.random_choice(&["P", "A", "A", "A", "F"]);
        let comment = self.random_choice(&[
            "Pago de servicios",
            "  Compra supermercado ",
            "Transferencia a terceros",
            "RECARGA celular",
            "",
        ]);

        Transaction::new(
            self.transaction_counter.to_string(),
            amount,
            Some(status),
            (!comment.is_empty()).then_some(comment),
        )
    }

    /// Generate a transaction that the risk rule flags
    fn generate_suspicious(&mut self) -> Transaction {
        self.transaction_counter += 1;
        let amount = (self.rng.gen_range(4000.01..25000.0_f64) * 100.0).round() / 100.0;
        let comment = self.random_choice(&[
            "  Retiro SOSPECHOSO  ",
            "Transferencia internacional URGENTE",
            "retiro cajero madrugada",
            " Compra online sin verificar ",
        ]);

        Transaction::new(
            self.transaction_counter.to_string(),
            amount,
            Some("F"),
            Some(comment),
        )
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

async fn ensure_table(conn: &mut PgConnection, table: &str) -> Result<()> {
    if let Some((schema, _)) = table.rsplit_once('.') {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(&mut *conn)
            .await
            .context("Failed to create schema")?;
    }

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} (\
            ID_TRANSACCION BIGINT PRIMARY KEY, \
            MONTO NUMERIC(14, 2) NOT NULL, \
            COMENTARIO VARCHAR(200), \
            ESTADO CHAR(1), \
            FECHA TIMESTAMP NOT NULL DEFAULT NOW())",
        table
    ))
    .execute(&mut *conn)
    .await
    .context("Failed to create transaction table")?;

    Ok(())
}

async fn insert_batch(conn: &mut PgConnection, table: &str, batch: &[Transaction]) -> Result<()> {
    let mut tx = conn.begin().await?;
    let sql = format!(
        "INSERT INTO {} (ID_TRANSACCION, MONTO, COMENTARIO, ESTADO) \
         VALUES ($1::BIGINT, $2::NUMERIC, $3, $4)",
        table
    );

    for row in batch {
        let id: i64 = row.transaction_id.parse()?;
        sqlx::query(&sql)
            .bind(id)
            .bind(row.amount)
            .bind(row.comment.as_deref())
            .bind(row.status.as_deref())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Positional command-line arguments
#[derive(Debug, PartialEq)]
struct SeedArgs {
    count: u64,
    fraud_rate: f64,
    batch_size: usize,
}

impl SeedArgs {
    /// Parse `[count] [fraud_rate] [batch_size]`; unparsable values use defaults
    fn parse(args: &[String]) -> Result<Self> {
        let count = args.first().and_then(|s| s.parse().ok()).unwrap_or(1000);
        let fraud_rate: f64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(0.05);
        let batch_size = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(500).max(1);

        anyhow::ensure!(
            (0.0..=1.0).contains(&fraud_rate),
            "fraud_rate must be between 0 and 1, got {}",
            fraud_rate
        );

        Ok(Self {
            count,
            fraud_rate,
            batch_size,
        })
    }
}

fn run_dry_mode(count: u64, fraud_rate: f64) -> Result<()> {
    info!("Running in dry-run mode (no database connection)");

    let mut generator = TransactionGenerator::new(0);
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let transaction = if rng.gen_bool(fraud_rate) {
            generator.generate_suspicious()
        } else {
            generator.generate_legitimate()
        };

        if (i + 1) % 10 == 0 || i == 0 {
            let json = serde_json::to_string_pretty(&transaction)?;
            info!("Sample transaction {}:\n{}", i + 1, json);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("seed_transactions=info".parse()?),
        )
        .init();

    info!("Starting Test Transaction Seeder");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let SeedArgs {
        count,
        fraud_rate,
        batch_size,
    } = SeedArgs::parse(&args)?;

    let config = AppConfig::load()?;
    let table = config.database.table.as_str();
    validate_table_name(table)?;

    info!(
        table = %table,
        count = count,
        fraud_rate = fraud_rate,
        batch_size = batch_size,
        "Configuration loaded"
    );

    let mut conn = match PgConnection::connect_with(&config.database.connect_options()).await {
        Ok(c) => {
            info!("Connected to database");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to database. Running in dry-run mode.");
            return run_dry_mode(count, fraud_rate);
        }
    };

    ensure_table(&mut conn, table).await?;

    let max_id: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT MAX(ID_TRANSACCION)::BIGINT FROM {}",
        table
    ))
    .fetch_one(&mut conn)
    .await?;

    let mut generator = TransactionGenerator::new(max_id.unwrap_or(0));
    let mut rng = rand::thread_rng();
    let mut batch = Vec::with_capacity(batch_size);
    let mut legitimate_count = 0u64;
    let mut suspicious_count = 0u64;

    for i in 0..count {
        let transaction = if rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            legitimate_count += 1;
            generator.generate_legitimate()
        };
        batch.push(transaction);

        if batch.len() == batch_size || i + 1 == count {
            insert_batch(&mut conn, table, &batch).await?;
            batch.clear();
            info!(
                "Inserted {}/{} transactions ({} legitimate, {} suspicious)",
                i + 1,
                count,
                legitimate_count,
                suspicious_count
            );
        }
    }

    conn.close().await?;

    info!(
        "Completed! Inserted {} transactions ({} legitimate, {} suspicious)",
        count, legitimate_count, suspicious_count
    );

    Ok(())
}
