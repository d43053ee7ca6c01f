// 📊 Aggregator
// Per-operator descriptive statistics over the valid reconciled set.
//
// The rollup is two-phase by contract: line items are first summed into one
// total per operator-quarter, and the statistics run over those quarter
// totals. Computing stddev straight over line items gives a different (wrong)
// answer whenever an operator books several line items in the same quarter.

use crate::reconciler::ReconciledRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// OPERATOR AGGREGATE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorAggregate {
    pub legal_name: String,
    /// None when the registry layout had no UF column
    pub state: Option<String>,
    pub total_expense: f64,
    pub quarterly_mean: f64,
    pub quarterly_stddev: f64,
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Aggregator
    }

    /// Group by (legal_name, state) and compute total / mean / sample stddev
    /// of the per-quarter sums.
    ///
    /// All statistics run on full precision; rounding to 2 decimals happens
    /// once, at the very end. The result is sorted descending by total for
    /// presentation - consumers must not rely on the order.
    pub fn aggregate(&self, records: &[ReconciledRecord]) -> Vec<OperatorAggregate> {
        // Fase 1: total por operadora-trimestre
        let mut quarter_totals: HashMap<(String, Option<String>, i32, u8), f64> = HashMap::new();
        for record in records {
            let key = (
                record.legal_name.clone().unwrap_or_default(),
                record.state.clone(),
                record.year,
                record.quarter,
            );
            *quarter_totals.entry(key).or_insert(0.0) += record.amount;
        }

        // Fase 2: estatísticas sobre os totais trimestrais
        let mut per_operator: HashMap<(String, Option<String>), Vec<f64>> = HashMap::new();
        for ((name, state, _year, _quarter), total) in quarter_totals {
            per_operator.entry((name, state)).or_default().push(total);
        }

        let mut aggregates: Vec<OperatorAggregate> = per_operator
            .into_iter()
            .map(|((legal_name, state), quarters)| {
                let total: f64 = quarters.iter().sum();
                let mean = total / quarters.len() as f64;
                let stddev = sample_stddev(&quarters, mean);

                OperatorAggregate {
                    legal_name,
                    state,
                    total_expense: round2(total),
                    quarterly_mean: round2(mean),
                    quarterly_stddev: round2(stddev),
                }
            })
            .collect();

        aggregates.sort_by(|a, b| b.total_expense.total_cmp(&a.total_expense));
        aggregates
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample standard deviation (n-1 denominator). Undefined for a single
/// observation; the pipeline substitutes 0.0 so reporting always has a
/// totally-ordered numeric value.
fn sample_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance: f64 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// TESTS
// ============================================================================
