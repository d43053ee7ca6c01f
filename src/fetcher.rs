// 🔎 Raw data discovery
// Filesystem boundary of the external fetcher: the downloader drops zip
// bundles and the CADOP registry CSV into data/raw, and the pipeline finds
// them here. Download, retry and scraping policy live outside this crate.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Enumerate the statement bundles (*.zip) in the raw directory, sorted by
/// name for a stable processing order. An empty directory is not an error -
/// the consolidation stage reports "no data" on its own.
pub fn list_bundles(raw_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(raw_dir)
        .with_context(|| format!("Pasta de dados brutos não encontrada: {}", raw_dir.display()))?;

    let mut bundles: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| has_extension(p, "zip"))
        .collect();
    bundles.sort();
    Ok(bundles)
}

/// Locate the registry CSV. Files named after the CADOP export win over any
/// other CSV lying around; no CSV at all is fatal for the reconciler.
pub fn find_registry_file(raw_dir: &Path) -> Result<PathBuf> {
    let entries = std::fs::read_dir(raw_dir)
        .with_context(|| format!("Pasta de dados brutos não encontrada: {}", raw_dir.display()))?;

    let mut csvs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| has_extension(p, "csv"))
        .collect();
    csvs.sort();

    let preferred = csvs.iter().find(|p| {
        let name = p
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_lowercase();
        name.contains("cadop") || name.contains("operadora")
    });

    match preferred.or(csvs.first()) {
        Some(path) => Ok(path.clone()),
        None => bail!(
            "Cadastro de operadoras (CSV) não encontrado em {}",
            raw_dir.display()
        ),
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_list_bundles_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2024_2T2024.zip"), b"x").unwrap();
        fs::write(dir.path().join("2024_1T2024.ZIP"), b"x").unwrap();
        fs::write(dir.path().join("Relatorio_cadop.csv"), b"x").unwrap();
        fs::write(dir.path().join("leia-me.txt"), b"x").unwrap();

        let bundles = list_bundles(dir.path()).unwrap();
        assert_eq!(bundles.len(), 2);
        assert!(bundles[0].to_string_lossy().contains("1T2024"));
    }

    #[test]
    fn test_find_registry_prefers_cadop_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("aaa_outro.csv"), b"x").unwrap();
        fs::write(dir.path().join("Relatorio_cadop.csv"), b"x").unwrap();

        let registry = find_registry_file(dir.path()).unwrap();
        assert!(registry.to_string_lossy().contains("cadop"));
    }

    #[test]
    fn test_find_registry_missing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bundle.zip"), b"x").unwrap();
        assert!(find_registry_file(dir.path()).is_err());
    }

    #[test]
    fn test_missing_raw_dir_is_fatal() {
        assert!(list_bundles(Path::new("/nonexistent/raw")).is_err());
    }
}
