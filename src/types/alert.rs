//! Enriched transactions and risk classification

use crate::types::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Derived column: normalized comment
pub const COL_NORMALIZED_COMMENT: &str = "COMENTARIO_LIMPIO";
/// Derived column: tax amount
pub const COL_TAX_AMOUNT: &str = "IMPUESTO_IVA";
/// Derived column: risk category
pub const COL_RISK_CATEGORY: &str = "CATEGORIA_RIESGO";

/// Amount above which a flagged transaction becomes high risk
pub const DEFAULT_AMOUNT_THRESHOLD: f64 = 4000.0;
/// Status code that marks a transaction as flagged
pub const DEFAULT_FLAGGED_STATUS: &str = "F";
/// Flat tax rate applied to every amount
pub const DEFAULT_TAX_RATE: f64 = 0.19;

/// Risk category assigned to each transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    #[serde(rename = "ALTO RIESGO")]
    High,
    #[serde(rename = "NORMAL")]
    Normal,
}

impl RiskCategory {
    /// Label written to the output column
    pub fn label(&self) -> &'static str {
        match self {
            RiskCategory::High => "ALTO RIESGO",
            RiskCategory::Normal => "NORMAL",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Business constants of the classification rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskRule {
    /// Strict lower bound on the amount (exclusive)
    pub amount_threshold: f64,
    /// Status code that must match exactly
    pub flagged_status: String,
    /// Rate used to derive the tax amount
    pub tax_rate: f64,
}

impl RiskRule {
    /// Classify a single transaction
    pub fn classify(&self, amount: f64, status: Option<&str>) -> RiskCategory {
        if amount > self.amount_threshold && status == Some(self.flagged_status.as_str()) {
            RiskCategory::High
        } else {
            RiskCategory::Normal
        }
    }

    pub fn tax_for(&self, amount: f64) -> f64 {
        amount * self.tax_rate
    }
}

impl Default for RiskRule {
    fn default() -> Self {
        Self {
            amount_threshold: DEFAULT_AMOUNT_THRESHOLD,
            flagged_status: DEFAULT_FLAGGED_STATUS.to_string(),
            tax_rate: DEFAULT_TAX_RATE,
        }
    }
}

/// Transaction with the three derived columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,

    #[serde(rename = "COMENTARIO_LIMPIO")]
    pub normalized_comment: Option<String>,

    #[serde(rename = "IMPUESTO_IVA")]
    pub tax_amount: f64,

    #[serde(rename = "CATEGORIA_RIESGO")]
    pub risk_category: RiskCategory,
}

impl EnrichedTransaction {
    pub fn is_alert(&self) -> bool {
        self.risk_category == RiskCategory::High
    }

    /// Projection sent to the narration service
    pub fn sample(&self) -> AlertSample {
        AlertSample {
            transaction_id: self.transaction.transaction_id.clone(),
            amount: self.transaction.amount,
            normalized_comment: self.normalized_comment.clone(),
        }
    }
}

/// Reduced view of an alert used for narration and previews
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSample {
    #[serde(rename = "ID_TRANSACCION")]
    pub transaction_id: String,
    #[serde(rename = "MONTO")]
    pub amount: f64,
    #[serde(rename = "COMENTARIO_LIMPIO")]
    pub normalized_comment: Option<String>,
}
