// 📂 Stage artifacts
// Every stage hands its output to the next through a ";"-separated file with
// pt-BR decimals, matching the convention of the source files. Artifacts from
// completed stages stay on disk even when a later stage fails.

use crate::aggregator::OperatorAggregate;
use crate::config::FIELD_SEPARATOR;
use crate::extractor::ExpenseRecord;
use crate::reconciler::ReconciledRecord;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::path::Path;

/// Consolidated expense rows (extractor output)
pub const CONSOLIDATED_FILE: &str = "consolidado_despesas.csv";
/// Artifact A: valid reconciled rows
pub const ENRICHED_FILE: &str = "despesas_enriquecidas.csv";
/// Artifact B: inconsistency report for manual audit
pub const INCONSISTENCIES_FILE: &str = "inconsistencias.csv";
/// Artifact C: per-operator aggregates
pub const AGGREGATED_FILE: &str = "agregado_operadoras.csv";

// ============================================================================
// DECIMAL FORMATTING
// ============================================================================

/// Full-precision pt-BR rendering ("," decimal mark, no thousands separator).
pub fn format_decimal_br(value: f64) -> String {
    value.to_string().replace('.', ",")
}

/// Fixed two-decimal pt-BR rendering, for the already-rounded aggregates.
pub fn format_decimal_br_2dp(value: f64) -> String {
    format!("{:.2}", value).replace('.', ",")
}

// ============================================================================
// CONSOLIDATED EXPENSES
// ============================================================================

pub fn write_consolidated(path: &Path, records: &[ExpenseRecord]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(FIELD_SEPARATOR)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(["RegistroANS", "Ano", "Trimestre", "DESCRICAO", "ValorDespesas"])?;
    for record in records {
        writer.write_record(&[
            record.registry_id.clone(),
            record.year.to_string(),
            record.quarter.to_string(),
            record.description.clone(),
            format_decimal_br(record.amount),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_consolidated(path: &Path) -> Result<(Vec<ExpenseRecord>, usize)> {
    let mut reader = ReaderBuilder::new()
        .delimiter(FIELD_SEPARATOR)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Arquivo de despesas não encontrado: {}", path.display()))?;

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };

        let parsed = (|| {
            Some(ExpenseRecord {
                registry_id: record.get(0)?.to_string(),
                year: record.get(1)?.parse().ok()?,
                quarter: record.get(2)?.parse().ok()?,
                description: record.get(3)?.to_string(),
                amount: crate::normalizer::parse_decimal_auto(record.get(4)?)?,
            })
        })();

        match parsed {
            Some(r) => records.push(r),
            None => skipped += 1,
        }
    }

    Ok((records, skipped))
}

// ============================================================================
// RECONCILED EXPENSES (Artifacts A and B share the same shape)
// ============================================================================

pub fn write_reconciled(path: &Path, records: &[ReconciledRecord]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(FIELD_SEPARATOR)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record([
        "RegistroANS",
        "Ano",
        "Trimestre",
        "DESCRICAO",
        "ValorDespesas",
        "CNPJ",
        "RazaoSocial",
        "UF",
    ])?;
    for record in records {
        writer.write_record(&[
            record.registry_id.clone(),
            record.year.to_string(),
            record.quarter.to_string(),
            record.description.clone(),
            format_decimal_br(record.amount),
            record.tax_id.clone().unwrap_or_default(),
            record.legal_name.clone().unwrap_or_default(),
            record.state.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Read Artifact A back. Rows in this file are the valid partition by
/// construction, so `cnpj_valido` is true for all of them.
pub fn read_reconciled(path: &Path) -> Result<(Vec<ReconciledRecord>, usize)> {
    let mut reader = ReaderBuilder::new()
        .delimiter(FIELD_SEPARATOR)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Arquivo enriquecido não encontrado: {}", path.display()))?;

    let mut records = Vec::new();
    let mut skipped = 0usize;

    let optional = |value: Option<&str>| -> Option<String> {
        value.map(|v| v.to_string()).filter(|v| !v.is_empty())
    };

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };

        let parsed = (|| {
            Some(ReconciledRecord {
                registry_id: record.get(0)?.to_string(),
                year: record.get(1)?.parse().ok()?,
                quarter: record.get(2)?.parse().ok()?,
                description: record.get(3)?.to_string(),
                amount: crate::normalizer::parse_decimal_auto(record.get(4)?)?,
                tax_id: optional(record.get(5)),
                legal_name: optional(record.get(6)),
                state: optional(record.get(7)),
                cnpj_valido: true,
            })
        })();

        match parsed {
            Some(r) => records.push(r),
            None => skipped += 1,
        }
    }

    Ok((records, skipped))
}

// ============================================================================
// AGGREGATES (Artifact C)
// ============================================================================

pub fn write_aggregates(path: &Path, aggregates: &[OperatorAggregate]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(FIELD_SEPARATOR)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(["RazaoSocial", "UF", "TotalDespesas", "MediaTrimestral", "DesvioPadrao"])?;
    for agg in aggregates {
        writer.write_record(&[
            agg.legal_name.clone(),
            agg.state.clone().unwrap_or_default(),
            format_decimal_br_2dp(agg.total_expense),
            format_decimal_br_2dp(agg.quarterly_mean),
            format_decimal_br_2dp(agg.quarterly_stddev),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_aggregates(path: &Path) -> Result<(Vec<OperatorAggregate>, usize)> {
    let mut reader = ReaderBuilder::new()
        .delimiter(FIELD_SEPARATOR)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Arquivo agregado não encontrado: {}", path.display()))?;

    let mut aggregates = Vec::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };

        let parsed = (|| {
            Some(OperatorAggregate {
                legal_name: record.get(0)?.to_string(),
                state: record.get(1).map(|v| v.to_string()).filter(|v| !v.is_empty()),
                total_expense: crate::normalizer::parse_decimal_auto(record.get(2)?)?,
                quarterly_mean: crate::normalizer::parse_decimal_auto(record.get(3)?)?,
                quarterly_stddev: crate::normalizer::parse_decimal_auto(record.get(4)?)?,
            })
        })();

        match parsed {
            Some(a) => aggregates.push(a),
            None => skipped += 1,
        }
    }

    Ok((aggregates, skipped))
}

// ============================================================================
// TESTS
// ============================================================================
