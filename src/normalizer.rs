// 📐 Schema Normalizer
// Maps the registry's (CADOP) flexible column layout into a typed mapping and
// canonicalizes the join key shared by both sides of the reconciliation.

use crate::config::FIELD_SEPARATOR;
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// COLUMN SYNONYMS
// ============================================================================

// Ordered by precedence: the first synonym found in the header row wins.
// ANS has shipped the registry under more than one layout over the years.
pub const REGISTRY_ID_SYNONYMS: &[&str] = &["REGISTRO_OPERADORA", "REGISTRO_ANS", "REG_ANS"];
pub const TAX_ID_SYNONYMS: &[&str] = &["CNPJ", "NR_CNPJ"];
pub const LEGAL_NAME_SYNONYMS: &[&str] = &["RAZAO_SOCIAL", "NM_RAZAO_SOCIAL"];
pub const STATE_SYNONYMS: &[&str] = &["UF", "SIGLA_UF"];

#[derive(Error, Debug)]
pub enum NormalizerError {
    /// The registry file is unusable without its identifier column - this is
    /// fatal for the reconciler, unlike the optional name/state columns.
    #[error("registry identifier column not found (tried {0:?})")]
    IdentifierColumnMissing(Vec<String>),

    #[error("registry file has no header row")]
    EmptyRegistry,
}

/// Resolved positions of the registry's logical fields within one concrete
/// header layout. Only the identifier is mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryColumnMap {
    pub registry_id: usize,
    pub tax_id: Option<usize>,
    pub legal_name: Option<usize>,
    pub state: Option<usize>,
}

impl RegistryColumnMap {
    /// Resolve columns by ordered synonym search over canonicalized headers.
    pub fn resolve(headers: &[String]) -> std::result::Result<Self, NormalizerError> {
        let canonical: Vec<String> = headers.iter().map(|h| canonicalize_header(h)).collect();

        let registry_id = find_column(&canonical, REGISTRY_ID_SYNONYMS).ok_or_else(|| {
            NormalizerError::IdentifierColumnMissing(
                REGISTRY_ID_SYNONYMS.iter().map(|s| s.to_string()).collect(),
            )
        })?;

        Ok(RegistryColumnMap {
            registry_id,
            tax_id: find_column(&canonical, TAX_ID_SYNONYMS),
            legal_name: find_column(&canonical, LEGAL_NAME_SYNONYMS),
            state: find_column(&canonical, STATE_SYNONYMS),
        })
    }
}

/// Trim + uppercase, the same canonical form used for statement members.
pub fn canonicalize_header(header: &str) -> String {
    header.trim().to_uppercase()
}

fn find_column(canonical_headers: &[String], synonyms: &[&str]) -> Option<usize> {
    for synonym in synonyms {
        if let Some(idx) = canonical_headers.iter().position(|h| h == synonym) {
            return Some(idx);
        }
    }
    None
}

// ============================================================================
// IDENTIFIER NORMALIZATION
// ============================================================================

/// Canonicalize an operator registry ID for joining.
///
/// Strips surrounding whitespace and the trailing ".0" artifact that numeric
/// re-serialization introduces ("123456.0" -> "123456"). Idempotent: applying
/// it to an already-normalized value is a no-op.
pub fn normalize_registry_id(raw: &str) -> String {
    let mut id = raw.trim();
    // Strip until no ".0" tail remains, otherwise double application of the
    // normalizer could still change the value
    while let Some(stripped) = id.strip_suffix(".0") {
        id = stripped;
    }
    id.to_string()
}

// ============================================================================
// LOCALE-AWARE DECIMAL PARSING
// ============================================================================

/// Parse a pt-BR decimal as written in statement members: "." is always a
/// thousands separator and "," the decimal mark. "1.234,56" -> 1234.56,
/// "1.234" -> 1234.0. A "." never means a decimal point under this convention.
pub fn parse_decimal_br(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.replace('.', "").replace(',', ".").parse::<f64>().ok()
}

/// Lenient variant for values outside the statement convention: a comma
/// triggers the pt-BR rule, otherwise the value reads as a plain ASCII
/// decimal. Used for spreadsheet cells re-rendered by the workbook reader
/// and for re-reading pipeline artifacts, which never carry a thousands
/// separator.
pub fn parse_decimal_auto(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains(',') {
        parse_decimal_br(trimmed)
    } else {
        trimmed.parse::<f64>().ok()
    }
}

// ============================================================================
// REGISTRY ENTITY
// ============================================================================

/// One operator from the CADOP registry. The join key is already normalized;
/// everything else is optional because the optional columns may be absent
/// from a given registry layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntity {
    pub registry_id: String,
    pub tax_id: Option<String>,
    pub legal_name: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub lines_read: usize,
    pub lines_skipped: usize,
    pub duplicates_dropped: usize,
    pub entities: usize,
}

// ============================================================================
// REGISTRY LOADER
// ============================================================================

pub struct RegistryNormalizer;

impl RegistryNormalizer {
    pub fn new() -> Self {
        RegistryNormalizer
    }

    /// Load and normalize the registry file (latin-1, ";"-separated, all
    /// columns read as text). Malformed lines are skipped and counted, never
    /// fatal. Duplicate registry IDs keep the first occurrence.
    pub fn load_registry(
        &self,
        path: &Path,
    ) -> Result<(HashMap<String, RegistryEntity>, RegistrySummary)> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read registry file: {}", path.display()))?;
        let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);

        self.load_registry_from_str(&decoded)
    }

    pub fn load_registry_from_str(
        &self,
        content: &str,
    ) -> Result<(HashMap<String, RegistryEntity>, RegistrySummary)> {
        let mut reader = ReaderBuilder::new()
            .delimiter(FIELD_SEPARATOR)
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read registry header row")?
            .iter()
            .map(|h| h.to_string())
            .collect();
        if headers.is_empty() {
            return Err(NormalizerError::EmptyRegistry.into());
        }

        let columns = RegistryColumnMap::resolve(&headers)?;

        let mut entities: HashMap<String, RegistryEntity> = HashMap::new();
        let mut summary = RegistrySummary::default();

        for record in reader.records() {
            summary.lines_read += 1;

            // Linha quebrada no arquivo fonte: pula e segue
            let record = match record {
                Ok(r) => r,
                Err(_) => {
                    summary.lines_skipped += 1;
                    continue;
                }
            };

            let raw_id = match record.get(columns.registry_id) {
                Some(v) if !v.trim().is_empty() => v,
                _ => {
                    summary.lines_skipped += 1;
                    continue;
                }
            };
            let registry_id = normalize_registry_id(raw_id);

            if entities.contains_key(&registry_id) {
                // First occurrence wins - arbitrary tie-break, kept from source
                summary.duplicates_dropped += 1;
                continue;
            }

            let field_at = |idx: Option<usize>| -> Option<String> {
                idx.and_then(|i| record.get(i))
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            };

            entities.insert(
                registry_id.clone(),
                RegistryEntity {
                    registry_id,
                    tax_id: field_at(columns.tax_id),
                    legal_name: field_at(columns.legal_name),
                    state: field_at(columns.state),
                },
            );
        }

        summary.entities = entities.len();
        Ok((entities, summary))
    }
}

impl Default for RegistryNormalizer {
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

    #[test]
    fn test_normalize_strips_trailing_artifact() {
        assert_eq!(normalize_registry_id("123456.0"), "123456");
        assert_eq!(normalize_registry_id("  123456.0  "), "123456");
        assert_eq!(normalize_registry_id(" 123456 "), "123456");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in ["123456.0", " 123456 ", "123456", "12.0.0", ""] {
            let once = normalize_registry_id(input);
            let twice = normalize_registry_id(&once);
            assert_eq!(once, twice, "normalization must be idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_normalize_only_strips_zero_suffix() {
        // Um ID terminando em outro decimal fica intacto
        assert_eq!(normalize_registry_id("123.05"), "123.05");
        assert_eq!(normalize_registry_id("12.0.0"), "12");
    }

    #[test]
    fn test_parse_decimal_br() {
        assert_eq!(parse_decimal_br("1.234,56"), Some(1234.56));
        assert_eq!(parse_decimal_br("-1.234,56"), Some(-1234.56));
        assert_eq!(parse_decimal_br("100,5"), Some(100.5));
        assert_eq!(parse_decimal_br("200"), Some(200.0));
        assert_eq!(parse_decimal_br(""), None);
        assert_eq!(parse_decimal_br("abc"), None);
    }

    #[test]
    fn test_parse_decimal_br_dot_is_always_thousands() {
        // Sem vírgula o "." continua sendo separador de milhar
        assert_eq!(parse_decimal_br("1.234"), Some(1234.0));
        assert_eq!(parse_decimal_br("1.234.567"), Some(1234567.0));
        assert_eq!(parse_decimal_br("-1.234"), Some(-1234.0));
        // O mesmo valor em ASCII viraria 20075 aqui de propósito
        assert_eq!(parse_decimal_br("200.75"), Some(20075.0));
    }

    #[test]
    fn test_parse_decimal_auto_accepts_ascii() {
        assert_eq!(parse_decimal_auto("200.75"), Some(200.75));
        assert_eq!(parse_decimal_auto("-500"), Some(-500.0));
        assert_eq!(parse_decimal_auto("1.234,56"), Some(1234.56));
        assert_eq!(parse_decimal_auto("35,36"), Some(35.36));
        assert_eq!(parse_decimal_auto(""), None);
    }

    #[test]
    fn test_column_map_precedence() {
        let headers = vec![
            "Registro_Operadora".to_string(),
            "CNPJ".to_string(),
            "Razao_Social".to_string(),
            "UF".to_string(),
        ];
        let map = RegistryColumnMap::resolve(&headers).unwrap();
        assert_eq!(map.registry_id, 0);
        assert_eq!(map.tax_id, Some(1));
        assert_eq!(map.legal_name, Some(2));
        assert_eq!(map.state, Some(3));
    }

    #[test]
    fn test_column_map_alternate_synonyms() {
        let headers = vec![
            "SIGLA_UF".to_string(),
            "REG_ANS".to_string(),
            "NM_RAZAO_SOCIAL".to_string(),
        ];
        let map = RegistryColumnMap::resolve(&headers).unwrap();
        assert_eq!(map.registry_id, 1);
        assert_eq!(map.legal_name, Some(2));
        assert_eq!(map.state, Some(0));
        assert_eq!(map.tax_id, None);
    }

    #[test]
    fn test_column_map_missing_identifier_is_error() {
        let headers = vec!["CNPJ".to_string(), "RAZAO_SOCIAL".to_string()];
        let err = RegistryColumnMap::resolve(&headers).unwrap_err();
        assert!(matches!(err, NormalizerError::IdentifierColumnMissing(_)));
    }

    #[test]
    fn test_load_registry_dedup_first_wins() {
        let content = "\
REGISTRO_OPERADORA;CNPJ;RAZAO_SOCIAL;UF
12345;11444777000161;ACME SAUDE;SP
12345;99999999999999;ACME SAUDE DUPLICADA;RJ
67890;00000000000191;BETA PLANOS;MG
";
        let normalizer = RegistryNormalizer::new();
        let (entities, summary) = normalizer.load_registry_from_str(content).unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!(summary.duplicates_dropped, 1);
        assert_eq!(summary.lines_read, 3);

        let acme = &entities["12345"];
        assert_eq!(acme.tax_id.as_deref(), Some("11444777000161"));
        assert_eq!(acme.legal_name.as_deref(), Some("ACME SAUDE"));
        assert_eq!(acme.state.as_deref(), Some("SP"));
    }

    #[test]
    fn test_load_registry_normalizes_ids() {
        let content = "\
REGISTRO_OPERADORA;RAZAO_SOCIAL
 12345.0 ;ACME SAUDE
";
        let normalizer = RegistryNormalizer::new();
        let (entities, _) = normalizer.load_registry_from_str(content).unwrap();
        assert!(entities.contains_key("12345"));
    }

    #[test]
    fn test_load_registry_missing_optional_columns() {
        let content = "\
REGISTRO_OPERADORA
12345
";
        let normalizer = RegistryNormalizer::new();
        let (entities, _) = normalizer.load_registry_from_str(content).unwrap();
        let entity = &entities["12345"];
        assert_eq!(entity.tax_id, None);
        assert_eq!(entity.legal_name, None);
        assert_eq!(entity.state, None);
    }

    #[test]
    fn test_load_registry_skips_short_lines() {
        let content = "\
REGISTRO_OPERADORA;CNPJ;RAZAO_SOCIAL;UF
12345;11444777000161;ACME SAUDE;SP
;;;
67890;00000000000191;BETA PLANOS;MG
";
        let normalizer = RegistryNormalizer::new();
        let (entities, summary) = normalizer.load_registry_from_str(content).unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(summary.lines_skipped, 1);
    }
}
