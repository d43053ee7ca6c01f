// Pipeline configuration
// Everything the original kept as module-level constants lives here as an
// immutable value handed to each stage at construction.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default keyword terms identifying assistance-expense line items.
/// A classe 4 no plano de contas da ANS geralmente é despesa assistencial.
pub const DEFAULT_FILTER_KEYWORDS: &[&str] = &["EVENTO", "SINISTRO"];

/// Required columns in a statement member, after trim + uppercase.
pub const REQUIRED_STATEMENT_COLUMNS: &[&str] = &["DATA", "REG_ANS", "DESCRICAO", "VL_SALDO_FINAL"];

/// Field separator used by ANS files and by every artifact this pipeline writes.
pub const FIELD_SEPARATOR: u8 = b';';

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory with the downloaded zip bundles and the registry CSV
    pub raw_dir: PathBuf,

    /// Directory where stage artifacts are written
    pub processed_dir: PathBuf,

    /// SQLite database populated by the loader
    pub db_path: PathBuf,

    /// Content filter terms (matched case-insensitively against DESCRICAO)
    pub filter_keywords: Vec<String>,
}

impl PipelineConfig {
    /// Configuration rooted at a data directory: `<data>/raw`, `<data>/processed`.
    pub fn new(data_dir: &Path) -> Self {
        PipelineConfig {
            raw_dir: data_dir.join("raw"),
            processed_dir: data_dir.join("processed"),
            db_path: data_dir.join("ans_despesas.db"),
            filter_keywords: DEFAULT_FILTER_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.filter_keywords = keywords;
        self
    }

    /// Create the processed directory if missing. The raw directory is the
    /// fetcher's responsibility and is never created here.
    pub fn ensure_processed_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.processed_dir)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(Path::new("data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths_rooted_at_data_dir() {
        let config = PipelineConfig::new(Path::new("/tmp/ans"));
        assert_eq!(config.raw_dir, PathBuf::from("/tmp/ans/raw"));
        assert_eq!(config.processed_dir, PathBuf::from("/tmp/ans/processed"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/ans/ans_despesas.db"));
    }

    #[test]
    fn test_default_keywords() {
        let config = PipelineConfig::default();
        assert_eq!(config.filter_keywords, vec!["EVENTO", "SINISTRO"]);
    }

    #[test]
    fn test_with_keywords_overrides() {
        let config = PipelineConfig::default().with_keywords(vec!["PROVISAO".to_string()]);
        assert_eq!(config.filter_keywords, vec!["PROVISAO"]);
    }
}
