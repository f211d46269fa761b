//! Rule-based enrichment and classification of the transaction table.
//!
//! Every row gets a normalized comment, a tax amount and a risk category;
//! rows classified as high risk form the alert subset. The pass is pure:
//! the same table and rule always produce the same output.

use crate::types::alert::{EnrichedTransaction, RiskRule};
use crate::types::transaction::{SourceColumn, Transaction, TransactionTable};
use tracing::{debug, info};

/// Result of transforming a non-empty table
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    /// Source columns of the input table, in source order
    pub columns: Vec<SourceColumn>,
    /// Every source row with the derived columns, in source order
    pub enriched: Vec<EnrichedTransaction>,
    /// High-risk rows, in source order
    pub alerts: Vec<EnrichedTransaction>,
}

/// Applies the risk rule to a materialized table
pub struct Transformer {
    rule: RiskRule,
}

impl Transformer {
    pub fn new(rule: RiskRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &RiskRule {
        &self.rule
    }

    /// Enrich the whole table and split out the alert subset.
    ///
    /// Returns `None` for an empty table.
    pub fn transform(&self, table: &TransactionTable) -> Option<Transformed> {
        if table.is_empty() {
            debug!("Empty transaction table, nothing to transform");
            return None;
        }

        info!(rows = table.len(), "Starting transformation");

        let enriched: Vec<EnrichedTransaction> =
            table.rows().iter().map(|tx| self.enrich(tx)).collect();

        let alerts: Vec<EnrichedTransaction> =
            enriched.iter().filter(|row| row.is_alert()).cloned().collect();

        info!(
            rows = enriched.len(),
            alerts = alerts.len(),
            "Transformation complete"
        );

        Some(Transformed {
            columns: table.columns().to_vec(),
            enriched,
            alerts,
        })
    }

    /// Derive the three columns for a single row
    pub fn enrich(&self, tx: &Transaction) -> EnrichedTransaction {
        EnrichedTransaction {
            normalized_comment: tx.comment.as_deref().map(normalize_comment),
            tax_amount: self.rule.tax_for(tx.amount),
            risk_category: self.rule.classify(tx.amount, tx.status.as_deref()),
            transaction: tx.clone(),
        }
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(RiskRule::default())
    }
}

/// Lower-case and trim surrounding whitespace
pub fn normalize_comment(comment: &str) -> String {
    comment.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::alert::RiskCategory;
    use proptest::prelude::*;

    fn single(tx: Transaction) -> Transformed {
        Transformer::default()
            .transform(&TransactionTable::from(vec![tx]))
            .unwrap()
    }

    #[test]
    fn test_suspicious_withdrawal_is_flagged() {
        let out = single(Transaction::new(
            "1",
            5000.0,
            Some("F"),
            Some("  Retiro SOSPECHOSO  "),
        ));

        let row = &out.enriched[0];
        assert_eq!(row.normalized_comment.as_deref(), Some("retiro sospechoso"));
        assert!((row.tax_amount - 950.0).abs() < 1e-9);
        assert_eq!(row.risk_category, RiskCategory::High);
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0], *row);
    }

    #[test]
    fn test_pending_status_is_normal() {
        let out = single(Transaction::new("2", 5000.0, Some("P"), Some("ok")));

        assert_eq!(out.enriched[0].risk_category, RiskCategory::Normal);
        assert!(out.alerts.is_empty());
    }

    #[test]
    fn test_threshold_amount_is_normal() {
        let out = single(Transaction::new("3", 4000.0, Some("F"), Some("x")));

        assert_eq!(out.enriched[0].risk_category, RiskCategory::Normal);
        assert!(out.alerts.is_empty());
    }

    #[test]
    fn test_empty_table_yields_nothing() {
        assert!(Transformer::default()
            .transform(&TransactionTable::new())
            .is_none());
    }

    #[test]
    fn test_null_comment_stays_null() {
        let out = single(Transaction::new("4", 10.0, Some("F"), None));
        assert_eq!(out.enriched[0].normalized_comment, None);
    }

    #[test]
    fn test_tax_on_zero_and_negative_amounts() {
        let table = TransactionTable::from(vec![
            Transaction::new("z", 0.0, Some("F"), None),
            Transaction::new("n", -250.0, Some("F"), None),
        ]);
        let out = Transformer::default().transform(&table).unwrap();

        assert_eq!(out.enriched[0].tax_amount, 0.0);
        assert!((out.enriched[1].tax_amount + 47.5).abs() < 1e-9);
        assert!(out.alerts.is_empty());
    }

    #[test]
    fn test_alerts_keep_source_order() {
        let table = TransactionTable::from(vec![
            Transaction::new("a", 9000.0, Some("F"), None),
            Transaction::new("b", 100.0, Some("F"), None),
            Transaction::new("c", 4500.0, Some("F"), None),
            Transaction::new("d", 7000.0, Some("P"), None),
            Transaction::new("e", 4001.0, Some("F"), None),
        ]);
        let out = Transformer::default().transform(&table).unwrap();

        let ids: Vec<&str> = out
            .alerts
            .iter()
            .map(|r| r.transaction.transaction_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c", "e"]);
        assert_eq!(out.enriched.len(), 5);
    }

    #[test]
    fn test_extra_columns_pass_through() {
        use crate::types::transaction::{CellValue, ColumnKind, ColumnRole, SourceColumn};

        let mut columns = crate::types::transaction::standard_columns();
        columns.push(SourceColumn::new("CUENTA", ColumnRole::Extra, ColumnKind::Text));
        let mut table = TransactionTable::with_columns(columns.clone());
        table.extend_page(vec![Transaction::new("a", 9000.0, Some("F"), None)
            .with_extra(vec![CellValue::Text("ES-01".to_string())])]);

        let out = Transformer::default().transform(&table).unwrap();
        assert_eq!(out.columns, columns);
        assert_eq!(
            out.alerts[0].transaction.extra,
            vec![CellValue::Text("ES-01".to_string())]
        );
    }

    fn arb_transaction() -> impl Strategy<Value = Transaction> {
        (
            "[0-9]{1,6}",
            -10_000.0f64..20_000.0,
            prop::option::of(prop::sample::select(vec!["F", "P", "A", "f"])),
            prop::option::of("[ a-zA-Z]{0,12}"),
        )
            .prop_map(|(id, amount, status, comment)| Transaction {
                transaction_id: id,
                amount,
                comment,
                status: status.map(str::to_string),
                extra: Vec::new(),
            })
    }

    proptest! {
        #[test]
        fn prop_rule_matches_definition(tx in arb_transaction()) {
            let row = Transformer::default().enrich(&tx);
            let expected = if tx.amount > 4000.0 && tx.status.as_deref() == Some("F") {
                RiskCategory::High
            } else {
                RiskCategory::Normal
            };
            prop_assert_eq!(row.risk_category, expected);
        }

        #[test]
        fn prop_tax_and_comment_derivations(tx in arb_transaction()) {
            let row = Transformer::default().enrich(&tx);
            prop_assert_eq!(row.tax_amount, tx.amount * 0.19);
            prop_assert_eq!(
                row.normalized_comment,
                tx.comment.as_ref().map(|c| c.trim().to_lowercase())
            );
        }

        #[test]
        fn prop_alerts_are_ordered_subset(rows in prop::collection::vec(arb_transaction(), 1..40)) {
            let out = Transformer::default()
                .transform(&TransactionTable::from(rows.clone()))
                .unwrap();

            let expected: Vec<&EnrichedTransaction> =
                out.enriched.iter().filter(|r| r.is_alert()).collect();
            let actual: Vec<&EnrichedTransaction> = out.alerts.iter().collect();
            prop_assert_eq!(actual, expected);

            let matching = rows
                .iter()
                .filter(|t| t.amount > 4000.0 && t.status.as_deref() == Some("F"))
                .count();
            prop_assert_eq!(out.alerts.len(), matching);
        }
    }
}
