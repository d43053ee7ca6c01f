// 🐘 Relational loader
// Reads Artifacts A and C back from disk and performs a destructive
// truncate-then-insert full refresh of the three reporting tables.
//
// Concurrent pipeline runs against the same database are not supported; the
// full refresh is destructive by design and serialization is the operator's
// job, not this module's.

use crate::artifacts::{self, AGGREGATED_FILE, ENRICHED_FILE};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS operadoras (
            registro_ans TEXT PRIMARY KEY,
            cnpj TEXT,
            razao_social TEXT
        );
        CREATE TABLE IF NOT EXISTS despesas_detalhadas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            registro_ans TEXT REFERENCES operadoras(registro_ans),
            ano INTEGER,
            trimestre INTEGER,
            descricao TEXT,
            valor_despesa REAL
        );
        CREATE TABLE IF NOT EXISTS despesas_agregadas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            razao_social TEXT,
            uf TEXT,
            total_despesas REAL,
            media_trimestral REAL,
            desvio_padrao REAL
        );",
    )
    .context("Failed to create tables")?;
    Ok(())
}

/// Full-refresh cleanup. Order matters: facts before the referenced registry.
pub fn truncate_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DELETE FROM despesas_detalhadas;
         DELETE FROM despesas_agregadas;
         DELETE FROM operadoras;",
    )
    .context("Failed to truncate tables")?;
    Ok(())
}

// ============================================================================
// LOAD
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadSummary {
    pub operators: usize,
    pub expenses: usize,
    pub aggregates: usize,
    pub lines_skipped: usize,
}

/// Load Artifacts A and C into the database inside one transaction.
/// The operator table is derived from Artifact A, deduplicated by registry ID
/// (first occurrence wins, same rule as the registry itself).
pub fn load_from_artifacts(conn: &mut Connection, processed_dir: &Path) -> Result<LoadSummary> {
    let (reconciled, skipped_a) = artifacts::read_reconciled(&processed_dir.join(ENRICHED_FILE))?;
    let (aggregates, skipped_c) = artifacts::read_aggregates(&processed_dir.join(AGGREGATED_FILE))?;

    let mut summary = LoadSummary {
        lines_skipped: skipped_a + skipped_c,
        ..Default::default()
    };

    let tx = conn.transaction().context("Failed to start transaction")?;
    truncate_tables(&tx)?;

    {
        let mut insert_operator = tx.prepare(
            "INSERT INTO operadoras (registro_ans, cnpj, razao_social) VALUES (?1, ?2, ?3)",
        )?;
        let mut insert_expense = tx.prepare(
            "INSERT INTO despesas_detalhadas (registro_ans, ano, trimestre, descricao, valor_despesa)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        let mut insert_aggregate = tx.prepare(
            "INSERT INTO despesas_agregadas (razao_social, uf, total_despesas, media_trimestral, desvio_padrao)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;

        let mut seen: HashSet<&str> = HashSet::new();
        for record in &reconciled {
            if seen.insert(record.registry_id.as_str()) {
                insert_operator.execute(params![
                    record.registry_id,
                    record.tax_id,
                    record.legal_name,
                ])?;
                summary.operators += 1;
            }
            insert_expense.execute(params![
                record.registry_id,
                record.year,
                record.quarter,
                record.description,
                record.amount,
            ])?;
            summary.expenses += 1;
        }

        for agg in &aggregates {
            insert_aggregate.execute(params![
                agg.legal_name,
                agg.state,
                agg.total_expense,
                agg.quarterly_mean,
                agg.quarterly_stddev,
            ])?;
            summary.aggregates += 1;
        }
    }

    tx.commit().context("Failed to commit load")?;
    Ok(summary)
}

pub fn verify_counts(conn: &Connection) -> Result<(i64, i64, i64)> {
    let operators: i64 = conn.query_row("SELECT COUNT(*) FROM operadoras", [], |r| r.get(0))?;
    let expenses: i64 =
        conn.query_row("SELECT COUNT(*) FROM despesas_detalhadas", [], |r| r.get(0))?;
    let aggregates: i64 =
        conn.query_row("SELECT COUNT(*) FROM despesas_agregadas", [], |r| r.get(0))?;
    Ok((operators, expenses, aggregates))
}

// ============================================================================
// QUERIES (read-only, used by the API server)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorExpenseStat {
    pub razao_social: String,
    pub uf: Option<String>,
    pub total_despesas: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopOperator {
    pub razao_social: String,
    pub registro_ans: String,
    pub total_despesas: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_gasto_geral: f64,
    pub total_operadoras_analisadas: i64,
}

/// Substring search on legal name (case-insensitive), largest spenders first.
pub fn search_operators(
    conn: &Connection,
    busca: Option<&str>,
    limit: i64,
) -> Result<Vec<OperatorExpenseStat>> {
    let mut stmt = conn.prepare(
        "SELECT razao_social, uf, total_despesas
         FROM despesas_agregadas
         WHERE (?1 IS NULL OR lower(razao_social) LIKE '%' || lower(?1) || '%')
         ORDER BY total_despesas DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![busca, limit], |row| {
        Ok(OperatorExpenseStat {
            razao_social: row.get(0)?,
            uf: row.get(1)?,
            total_despesas: row.get(2)?,
        })
    })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to query operators")
}

/// Top-N operators by summed detail expense (join against the registry).
pub fn top_operators(conn: &Connection, limit: i64) -> Result<Vec<TopOperator>> {
    let mut stmt = conn.prepare(
        "SELECT o.razao_social, o.registro_ans, SUM(d.valor_despesa) AS total_despesas
         FROM despesas_detalhadas d
         JOIN operadoras o ON d.registro_ans = o.registro_ans
         GROUP BY o.razao_social, o.registro_ans
         ORDER BY total_despesas DESC
         LIMIT ?1",
    )?;

    let rows = stmt.query_map(params![limit], |row| {
        Ok(TopOperator {
            razao_social: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            registro_ans: row.get(1)?,
            total_despesas: row.get(2)?,
        })
    })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to query top operators")
}

pub fn dashboard_summary(conn: &Connection) -> Result<DashboardSummary> {
    let total: Option<f64> =
        conn.query_row("SELECT SUM(valor_despesa) FROM despesas_detalhadas", [], |r| r.get(0))?;
    let operators: i64 = conn.query_row("SELECT COUNT(*) FROM operadoras", [], |r| r.get(0))?;

    Ok(DashboardSummary {
        total_gasto_geral: total.unwrap_or(0.0),
        total_operadoras_analisadas: operators,
    })
}

// ============================================================================
// TESTS
// ============================================================================
