// 📦 Archive Extractor
// Opens the quarterly statement bundles (zip) and turns their tabular members
// into a flat set of assistance-expense records.
//
// ANS publishes mixed formats inside the same bundle: latin-1 CSV/TXT with ";"
// separators and pt-BR decimals, plus the occasional spreadsheet. Anything
// else inside a bundle is not data and is skipped silently.

use crate::config::{PipelineConfig, REQUIRED_STATEMENT_COLUMNS};
use crate::normalizer::{canonicalize_header, parse_decimal_auto, parse_decimal_br};
use anyhow::{Context, Result};
use calamine::Reader;
use chrono::{Datelike, NaiveDate};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

// ============================================================================
// RECORDS
// ============================================================================

/// One accepted assistance-expense line item.
///
/// `registry_id` is carried exactly as the source provided it (it may still
/// have the ".0" artifact); the reconciler normalizes both join sides.
/// The amount keeps the source sign - accounting convention for expense
/// balances is an open question upstream, so no abs()/flip here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub registry_id: String,
    pub year: i32,
    pub quarter: u8,
    pub description: String,
    pub amount: f64,
}

/// Structured counts for the extraction stage. Every dropped row or member is
/// accounted for here - no silent drops.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub bundles_processed: usize,
    pub bundles_failed: usize,
    pub members_read: usize,
    pub members_skipped_format: usize,
    pub members_skipped_columns: usize,
    pub members_failed: usize,
    pub rows_scanned: usize,
    pub rows_filtered_out: usize,
    pub rows_bad_date: usize,
    pub rows_bad_amount: usize,
    pub rows_accepted: usize,
}

#[derive(Debug)]
pub struct ExtractionOutput {
    pub records: Vec<ExpenseRecord>,
    pub summary: ExtractionSummary,
}

/// Outcome of parsing a single bundle member.
enum MemberOutcome {
    Accepted(Vec<ExpenseRecord>, MemberCounts),
    MissingColumns,
}

#[derive(Default)]
struct MemberCounts {
    scanned: usize,
    filtered_out: usize,
    bad_date: usize,
    bad_amount: usize,
}

// ============================================================================
// DATE HANDLING
// ============================================================================

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

/// Parse the statement date column. Timestamps keep only the date part.
pub fn parse_statement_date(raw: &str) -> Option<NaiveDate> {
    let token = raw.trim().split_whitespace().next()?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
}

/// Fiscal quarter from the statement date (1-4).
pub fn quarter_of(date: NaiveDate) -> u8 {
    (date.month0() / 3) as u8 + 1
}

// ============================================================================
// EXTRACTOR
// ============================================================================

pub struct ArchiveExtractor {
    /// Filter keywords, upper-cased once at construction
    keywords: Vec<String>,
}

impl ArchiveExtractor {
    pub fn new(keywords: &[String]) -> Self {
        ArchiveExtractor {
            keywords: keywords.iter().map(|k| k.to_uppercase()).collect(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.filter_keywords)
    }

    /// Case-insensitive content filter: retain only assistance-expense rows.
    /// This is a business rule, not an optimization - downstream aggregates
    /// assume exclusively assistance-expense content.
    pub fn matches_filter(&self, description: &str) -> bool {
        let upper = description.to_uppercase();
        self.keywords.iter().any(|k| upper.contains(k))
    }

    /// Extract every bundle, concatenating accepted rows. A corrupt bundle or
    /// member is logged and counted; it never aborts the remaining work.
    pub fn extract_all(&self, bundles: &[PathBuf]) -> ExtractionOutput {
        let mut records = Vec::new();
        let mut summary = ExtractionSummary::default();

        for bundle in bundles {
            let name = bundle
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("bundle.zip");
            println!("📦 Processando: {}", name);

            match self.extract_bundle(bundle, &mut summary) {
                Ok(mut bundle_records) => {
                    summary.bundles_processed += 1;
                    records.append(&mut bundle_records);
                }
                Err(e) => {
                    summary.bundles_failed += 1;
                    println!("❌ Erro crítico no zip {}: {:#}", name, e);
                }
            }
        }

        summary.rows_accepted = records.len();
        ExtractionOutput { records, summary }
    }

    fn extract_bundle(
        &self,
        path: &Path,
        summary: &mut ExtractionSummary,
    ) -> Result<Vec<ExpenseRecord>> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open bundle: {}", path.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("Failed to read zip archive: {}", path.display()))?;

        let mut records = Vec::new();

        for index in 0..archive.len() {
            // The member handle stays scoped to this iteration; an unreadable
            // member must not leak into the next one
            let (member_name, bytes) = {
                let mut member = match archive.by_index(index) {
                    Ok(m) => m,
                    Err(e) => {
                        summary.members_failed += 1;
                        println!("   ❌ Erro ao abrir membro #{}: {}", index, e);
                        continue;
                    }
                };
                if member.is_dir() {
                    continue;
                }
                let name = member.name().to_string();
                if !is_tabular(&name) {
                    summary.members_skipped_format += 1;
                    continue;
                }

                let mut bytes = Vec::with_capacity(member.size() as usize);
                if let Err(e) = member.read_to_end(&mut bytes) {
                    summary.members_failed += 1;
                    println!("   ❌ Erro ao ler {}: {}", name, e);
                    continue;
                }
                (name, bytes)
            };

            println!("   📄 Lendo: {}", member_name);
            let outcome = if is_spreadsheet(&member_name) {
                self.parse_spreadsheet_member(&bytes)
            } else {
                self.parse_delimited_member(&bytes)
            };

            match outcome {
                Ok(MemberOutcome::Accepted(mut member_records, counts)) => {
                    summary.members_read += 1;
                    summary.rows_scanned += counts.scanned;
                    summary.rows_filtered_out += counts.filtered_out;
                    summary.rows_bad_date += counts.bad_date;
                    summary.rows_bad_amount += counts.bad_amount;
                    println!("      ✅ Dados extraídos: {} linhas", member_records.len());
                    records.append(&mut member_records);
                }
                Ok(MemberOutcome::MissingColumns) => {
                    summary.members_skipped_columns += 1;
                    println!("      ⚠️ Ignorado (sem colunas obrigatórias)");
                }
                Err(e) => {
                    summary.members_failed += 1;
                    println!("      ❌ Erro ao processar {}: {:#}", member_name, e);
                }
            }
        }

        Ok(records)
    }

    /// CSV/TXT member: latin-1, ";" separator, pt-BR decimals.
    fn parse_delimited_member(&self, bytes: &[u8]) -> Result<MemberOutcome> {
        let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);

        let mut reader = ReaderBuilder::new()
            .delimiter(crate::config::FIELD_SEPARATOR)
            .has_headers(true)
            .flexible(true)
            .from_reader(decoded.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read member header row")?
            .iter()
            .map(canonicalize_header)
            .collect();

        let columns = match resolve_statement_columns(&headers) {
            Some(c) => c,
            None => return Ok(MemberOutcome::MissingColumns),
        };

        let mut records = Vec::new();
        let mut counts = MemberCounts::default();

        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(_) => {
                    // Linha quebrada ainda conta como lida
                    counts.scanned += 1;
                    counts.bad_amount += 1;
                    continue;
                }
            };
            counts.scanned += 1;

            let description = record.get(columns.description).unwrap_or("").trim();
            if !self.matches_filter(description) {
                counts.filtered_out += 1;
                continue;
            }

            let date = match parse_statement_date(record.get(columns.date).unwrap_or("")) {
                Some(d) => d,
                None => {
                    counts.bad_date += 1;
                    continue;
                }
            };

            let amount = match parse_decimal_br(record.get(columns.balance).unwrap_or("")) {
                Some(v) => v,
                None => {
                    counts.bad_amount += 1;
                    continue;
                }
            };

            records.push(ExpenseRecord {
                registry_id: record.get(columns.registry_id).unwrap_or("").to_string(),
                year: date.year(),
                quarter: quarter_of(date),
                description: description.to_string(),
                amount,
            });
        }

        Ok(MemberOutcome::Accepted(records, counts))
    }

    /// Spreadsheet member: default cell typing, first worksheet only.
    fn parse_spreadsheet_member(&self, bytes: &[u8]) -> Result<MemberOutcome> {
        let cursor = std::io::Cursor::new(bytes.to_vec());
        let mut workbook = calamine::open_workbook_auto_from_rs(cursor)
            .context("Failed to open spreadsheet member")?;

        let range = workbook
            .worksheet_range_at(0)
            .context("Spreadsheet has no worksheets")?
            .context("Failed to read first worksheet")?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(row) => row.iter().map(|c| canonicalize_header(&c.to_string())).collect(),
            None => return Ok(MemberOutcome::MissingColumns),
        };

        let columns = match resolve_statement_columns(&headers) {
            Some(c) => c,
            None => return Ok(MemberOutcome::MissingColumns),
        };

        let mut records = Vec::new();
        let mut counts = MemberCounts::default();

        for row in rows {
            counts.scanned += 1;

            let description = row
                .get(columns.description)
                .map(|c| c.to_string())
                .unwrap_or_default();
            let description = description.trim();
            if !self.matches_filter(description) {
                counts.filtered_out += 1;
                continue;
            }

            let date = match row.get(columns.date).and_then(cell_date) {
                Some(d) => d,
                None => {
                    counts.bad_date += 1;
                    continue;
                }
            };

            let amount = match row.get(columns.balance).and_then(cell_amount) {
                Some(v) => v,
                None => {
                    counts.bad_amount += 1;
                    continue;
                }
            };

            records.push(ExpenseRecord {
                registry_id: row
                    .get(columns.registry_id)
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
                year: date.year(),
                quarter: quarter_of(date),
                description: description.to_string(),
                amount,
            });
        }

        Ok(MemberOutcome::Accepted(records, counts))
    }
}

// ============================================================================
// MEMBER HELPERS
// ============================================================================

fn extension_of(name: &str) -> String {
    name.rsplit('.').next().unwrap_or("").to_lowercase()
}

fn is_tabular(name: &str) -> bool {
    matches!(extension_of(name).as_str(), "csv" | "txt" | "xlsx" | "xls")
}

fn is_spreadsheet(name: &str) -> bool {
    matches!(extension_of(name).as_str(), "xlsx" | "xls")
}

/// Positions of the required statement columns within a canonicalized header
/// row. All four must be present or the member is unusable.
struct StatementColumns {
    date: usize,
    registry_id: usize,
    description: usize,
    balance: usize,
}

fn resolve_statement_columns(headers: &[String]) -> Option<StatementColumns> {
    let position = |name: &str| headers.iter().position(|h| h == name);
    Some(StatementColumns {
        date: position(REQUIRED_STATEMENT_COLUMNS[0])?,
        registry_id: position(REQUIRED_STATEMENT_COLUMNS[1])?,
        description: position(REQUIRED_STATEMENT_COLUMNS[2])?,
        balance: position(REQUIRED_STATEMENT_COLUMNS[3])?,
    })
}

fn cell_date(cell: &calamine::Data) -> Option<NaiveDate> {
    use calamine::DataType;
    if let Some(dt) = cell.as_datetime() {
        return Some(dt.date());
    }
    parse_statement_date(&cell.to_string())
}

// String cells may hold either convention depending on how the sheet was
// produced, so the lenient parser decides by the presence of a comma.
fn cell_amount(cell: &calamine::Data) -> Option<f64> {
    match cell {
        calamine::Data::Float(f) => Some(*f),
        calamine::Data::Int(i) => Some(*i as f64),
        other => parse_decimal_auto(&other.to_string()),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ArchiveExtractor {
        ArchiveExtractor::new(&["EVENTO".to_string(), "SINISTRO".to_string()])
    }

    fn parse_csv(content: &str) -> (Vec<ExpenseRecord>, MemberCounts) {
        match extractor().parse_delimited_member(content.as_bytes()).unwrap() {
            MemberOutcome::Accepted(records, counts) => (records, counts),
            MemberOutcome::MissingColumns => panic!("expected accepted member"),
        }
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let ex = extractor();
        assert!(ex.matches_filter("Despesas com Eventos de Saúde"));
        assert!(ex.matches_filter("SINISTROS RETIDOS"));
        assert!(ex.matches_filter("sinistro avisado"));
        assert!(!ex.matches_filter("Despesas Administrativas"));
        assert!(!ex.matches_filter(""));
    }

    #[test]
    fn test_quarter_derivation() {
        let q = |y, m, d| quarter_of(NaiveDate::from_ymd_opt(y, m, d).unwrap());
        assert_eq!(q(2024, 1, 1), 1);
        assert_eq!(q(2024, 3, 31), 1);
        assert_eq!(q(2024, 4, 1), 2);
        assert_eq!(q(2024, 9, 30), 3);
        assert_eq!(q(2024, 12, 31), 4);
    }

    #[test]
    fn test_parse_statement_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(parse_statement_date("2024-03-31"), Some(expected));
        assert_eq!(parse_statement_date("31/03/2024"), Some(expected));
        assert_eq!(parse_statement_date("2024/03/31"), Some(expected));
        assert_eq!(parse_statement_date("2024-03-31 00:00:00"), Some(expected));
        assert_eq!(parse_statement_date("não é data"), None);
        assert_eq!(parse_statement_date(""), None);
    }

    #[test]
    fn test_member_rows_filtered_and_parsed() {
        let csv = "\
DATA;REG_ANS;CD_CONTA_CONTABIL;DESCRICAO;VL_SALDO_FINAL
2024-03-31;12345;411;EVENTOS CONHECIDOS OU AVISADOS;1.234,56
2024-03-31;12345;311;RECEITA DE CONTRAPRESTACOES;999,99
2024-06-30;67890;411;SINISTROS RETIDOS;-500,00
";
        let (records, counts) = parse_csv(csv);
        assert_eq!(records.len(), 2);
        assert_eq!(counts.scanned, 3);
        assert_eq!(counts.filtered_out, 1);

        assert_eq!(records[0].registry_id, "12345");
        assert_eq!(records[0].year, 2024);
        assert_eq!(records[0].quarter, 1);
        assert_eq!(records[0].amount, 1234.56);

        // Negative balance preserved as-is
        assert_eq!(records[1].amount, -500.00);
        assert_eq!(records[1].quarter, 2);
    }

    #[test]
    fn test_rows_with_bad_dates_are_dropped() {
        let csv = "\
DATA;REG_ANS;DESCRICAO;VL_SALDO_FINAL
data-invalida;12345;EVENTOS;100,00
2024-03-31;12345;EVENTOS;100,00
";
        let (records, counts) = parse_csv(csv);
        assert_eq!(records.len(), 1);
        assert_eq!(counts.bad_date, 1);
    }

    #[test]
    fn test_rows_with_bad_amounts_are_dropped() {
        let csv = "\
DATA;REG_ANS;DESCRICAO;VL_SALDO_FINAL
2024-03-31;12345;EVENTOS;;
2024-03-31;12345;EVENTOS;abc
2024-03-31;12345;EVENTOS;200,75
";
        let (records, counts) = parse_csv(csv);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount, 200.75);
        assert_eq!(counts.bad_amount, 2);
    }

    #[test]
    fn test_thousands_separator_without_decimal_comma() {
        // "1.234" é mil duzentos e trinta e quatro, nunca 1,234
        let csv = "\
DATA;REG_ANS;DESCRICAO;VL_SALDO_FINAL
2024-03-31;12345;EVENTOS;1.234
2024-03-31;12345;EVENTOS;1.234.567
";
        let (records, counts) = parse_csv(csv);
        assert_eq!(records.len(), 2);
        assert_eq!(counts.bad_amount, 0);
        assert_eq!(records[0].amount, 1234.0);
        assert_eq!(records[1].amount, 1234567.0);
    }

    #[test]
    fn test_member_counts_balance() {
        // Every scanned row lands in exactly one bucket
        let csv = "\
DATA;REG_ANS;DESCRICAO;VL_SALDO_FINAL
2024-03-31;12345;EVENTOS;100,00
2024-03-31;12345;RECEITAS;999,99
data-invalida;12345;EVENTOS;100,00
2024-03-31;12345;EVENTOS;abc
";
        let (records, counts) = parse_csv(csv);
        assert_eq!(records.len(), 1);
        assert_eq!(
            counts.scanned,
            counts.filtered_out + counts.bad_date + counts.bad_amount + records.len()
        );
    }

    #[test]
    fn test_member_without_required_columns_is_skipped() {
        let csv = "\
COLUNA_A;COLUNA_B
1;2
";
        let outcome = extractor().parse_delimited_member(csv.as_bytes()).unwrap();
        assert!(matches!(outcome, MemberOutcome::MissingColumns));
    }

    #[test]
    fn test_header_canonicalization_tolerates_case_and_spaces() {
        let csv = "\
 data ;Reg_Ans; Descricao ;vl_saldo_final
2024-03-31;12345;EVENTOS;100,00
";
        let (records, _) = parse_csv(csv);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_latin1_member_decodes() {
        // "PROVISÃO DE EVENTOS" with latin-1 encoded Ã
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"DATA;REG_ANS;DESCRICAO;VL_SALDO_FINAL\n");
        bytes.extend_from_slice(b"2024-03-31;12345;PROVIS\xC3O DE EVENTOS;10,00\n");

        match extractor().parse_delimited_member(&bytes).unwrap() {
            MemberOutcome::Accepted(records, _) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].description, "PROVISÃO DE EVENTOS");
            }
            MemberOutcome::MissingColumns => panic!("member should parse"),
        }
    }

    #[test]
    fn test_tabular_member_detection() {
        assert!(is_tabular("1T2024.csv"));
        assert!(is_tabular("dados/2T2024.TXT"));
        assert!(is_tabular("planilha.xlsx"));
        assert!(is_tabular("antigo.XLS"));
        assert!(!is_tabular("leia-me.pdf"));
        assert!(!is_tabular("logo.png"));
        assert!(!is_tabular("sem_extensao"));
    }

    #[test]
    fn test_extract_all_tolerates_missing_bundle() {
        let ex = extractor();
        let output = ex.extract_all(&[PathBuf::from("/nonexistent/bundle.zip")]);
        assert_eq!(output.records.len(), 0);
        assert_eq!(output.summary.bundles_failed, 1);
        assert_eq!(output.summary.bundles_processed, 0);
    }
}
