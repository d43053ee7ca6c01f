// ⚖️ Identity Reconciler
// Joins expense records to registry entities and validates operator CNPJs.
//
// The join is a left outer join with the expense side driving: every expense
// record produces exactly one reconciled record, matched or not. CNPJ
// validation is computed independently of join success - a matched operator
// with a broken checksum is still inconsistent.

use crate::cnpj::CnpjValidator;
use crate::extractor::ExpenseRecord;
use crate::normalizer::{normalize_registry_id, RegistryEntity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// RECONCILED RECORD
// ============================================================================

/// An expense record enriched with registry attributes. Registry fields are
/// None when the operator has no registry match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledRecord {
    /// Normalized join key
    pub registry_id: String,
    pub year: i32,
    pub quarter: u8,
    pub description: String,
    pub amount: f64,
    pub tax_id: Option<String>,
    pub legal_name: Option<String>,
    pub state: Option<String>,
    /// Match found AND Modulus-11 checksum passed
    pub cnpj_valido: bool,
}

/// The valid/invalid split is a deliberate audit trail, not a filter: both
/// sides are written to disk, and only the valid side feeds the aggregator.
#[derive(Debug)]
pub struct ReconciliationOutput {
    pub valid: Vec<ReconciledRecord>,
    pub invalid: Vec<ReconciledRecord>,
    pub summary: ReconciliationSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub valid: usize,
    pub invalid: usize,
}

impl ReconciliationSummary {
    pub fn report(&self) -> String {
        format!(
            "{} linhas: {} com match, {} sem match, {} CNPJs válidos, {} inválidos",
            self.total, self.matched, self.unmatched, self.valid, self.invalid
        )
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler {
    validator: CnpjValidator,
}

impl Reconciler {
    pub fn new() -> Self {
        Reconciler {
            validator: CnpjValidator::new(),
        }
    }

    /// Left join expenses against the registry by normalized identifier, then
    /// partition on CNPJ validity.
    ///
    /// The registry map is already deduplicated (one entity per key), so the
    /// join can never duplicate an expense row.
    pub fn reconcile(
        &self,
        expenses: Vec<ExpenseRecord>,
        registry: &HashMap<String, RegistryEntity>,
    ) -> ReconciliationOutput {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        let mut summary = ReconciliationSummary::default();

        for expense in expenses {
            summary.total += 1;
            let registry_id = normalize_registry_id(&expense.registry_id);

            let entity = registry.get(&registry_id);
            if entity.is_some() {
                summary.matched += 1;
            } else {
                summary.unmatched += 1;
            }

            // Sem match => sem CNPJ => inválido por convenção, não é erro
            let cnpj_valido = entity
                .and_then(|e| e.tax_id.as_deref())
                .map(|cnpj| self.validator.validate(cnpj))
                .unwrap_or(false);

            let record = ReconciledRecord {
                registry_id,
                year: expense.year,
                quarter: expense.quarter,
                description: expense.description,
                amount: expense.amount,
                tax_id: entity.and_then(|e| e.tax_id.clone()),
                legal_name: entity.and_then(|e| e.legal_name.clone()),
                state: entity.and_then(|e| e.state.clone()),
                cnpj_valido,
            };

            if cnpj_valido {
                summary.valid += 1;
                valid.push(record);
            } else {
                summary.invalid += 1;
                invalid.push(record);
            }
        }

        ReconciliationOutput {
            valid,
            invalid,
            summary,
        }
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn expense(registry_id: &str, year: i32, quarter: u8, amount: f64) -> ExpenseRecord {
        ExpenseRecord {
            registry_id: registry_id.to_string(),
            year,
            quarter,
            description: "EVENTOS CONHECIDOS OU AVISADOS".to_string(),
            amount,
        }
    }

    fn registry_with(entries: &[(&str, Option<&str>, Option<&str>, Option<&str>)]) -> HashMap<String, RegistryEntity> {
        entries
            .iter()
            .map(|(id, cnpj, name, uf)| {
                (
                    id.to_string(),
                    RegistryEntity {
                        registry_id: id.to_string(),
                        tax_id: cnpj.map(|s| s.to_string()),
                        legal_name: name.map(|s| s.to_string()),
                        state: uf.map(|s| s.to_string()),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_join_matches_after_normalization() {
        let registry = registry_with(&[("12345", Some("11444777000161"), Some("ACME SAUDE"), Some("SP"))]);
        let reconciler = Reconciler::new();

        // Expense side carries the ".0" serialization artifact
        let output = reconciler.reconcile(vec![expense("12345.0", 2024, 1, 100.0)], &registry);

        assert_eq!(output.valid.len(), 1);
        assert_eq!(output.invalid.len(), 0);
        let record = &output.valid[0];
        assert_eq!(record.registry_id, "12345");
        assert_eq!(record.legal_name.as_deref(), Some("ACME SAUDE"));
        assert_eq!(record.state.as_deref(), Some("SP"));
        assert!(record.cnpj_valido);
    }

    #[test]
    fn test_unmatched_expense_survives_with_nulls() {
        let registry = registry_with(&[]);
        let reconciler = Reconciler::new();

        let output = reconciler.reconcile(vec![expense("99999", 2024, 1, 100.0)], &registry);

        assert_eq!(output.valid.len(), 0);
        assert_eq!(output.invalid.len(), 1);
        let record = &output.invalid[0];
        assert_eq!(record.tax_id, None);
        assert_eq!(record.legal_name, None);
        assert_eq!(record.state, None);
        assert!(!record.cnpj_valido);
        assert_eq!(output.summary.unmatched, 1);
    }

    #[test]
    fn test_matched_with_bad_cnpj_is_invalid() {
        let registry = registry_with(&[("12345", Some("11444777000162"), Some("ACME SAUDE"), Some("SP"))]);
        let reconciler = Reconciler::new();

        let output = reconciler.reconcile(vec![expense("12345", 2024, 1, 100.0)], &registry);

        assert_eq!(output.summary.matched, 1);
        assert_eq!(output.invalid.len(), 1);
        // Registry attributes are still attached - the audit report needs them
        assert_eq!(output.invalid[0].legal_name.as_deref(), Some("ACME SAUDE"));
        assert!(!output.invalid[0].cnpj_valido);
    }

    #[test]
    fn test_matched_without_tax_id_is_invalid() {
        let registry = registry_with(&[("12345", None, Some("ACME SAUDE"), None)]);
        let reconciler = Reconciler::new();

        let output = reconciler.reconcile(vec![expense("12345", 2024, 1, 100.0)], &registry);

        assert_eq!(output.summary.matched, 1);
        assert!(!output.invalid[0].cnpj_valido);
    }

    #[test]
    fn test_every_expense_produces_exactly_one_record() {
        let registry = registry_with(&[("12345", Some("11444777000161"), Some("ACME SAUDE"), Some("SP"))]);
        let reconciler = Reconciler::new();

        let expenses = vec![
            expense("12345", 2024, 1, 100.0),
            expense("12345.0", 2024, 1, 50.0),
            expense("99999", 2024, 2, 200.0),
        ];
        let count = expenses.len();
        let output = reconciler.reconcile(expenses, &registry);

        assert_eq!(output.valid.len() + output.invalid.len(), count);
        assert_eq!(output.summary.total, count);
        assert_eq!(output.summary.valid + output.summary.invalid, count);
    }
}
