// ANS Despesas - CLI
// Runs the full consolidation pipeline or a single stage against a data
// directory. Stages communicate exclusively through the artifacts on disk, so
// each one can be re-run in isolation.

use anyhow::Result;
use rusqlite::Connection;
use std::env;
use std::path::Path;

use ans_despesas::artifacts::{
    self, AGGREGATED_FILE, CONSOLIDATED_FILE, ENRICHED_FILE, INCONSISTENCIES_FILE,
};
use ans_despesas::{
    db, fetcher, Aggregator, ArchiveExtractor, PipelineConfig, Reconciler, RegistryNormalizer,
};

fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("pipeline");
    let data_dir = args.get(2).map(String::as_str).unwrap_or("data");
    let config = PipelineConfig::new(Path::new(data_dir));

    let result = match command {
        "pipeline" => run_pipeline(&config),
        "consolidate" => run_consolidate(&config),
        "transform" => run_transform(&config),
        "aggregate" => run_aggregate(&config),
        "import" => run_import(&config),
        other => {
            eprintln!("❌ Comando desconhecido: {}", other);
            eprintln!("   Uso: ans-despesas [pipeline|consolidate|transform|aggregate|import] [data-dir]");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("\n❌ Falha na execução: {:#}", e);
        std::process::exit(1);
    }
}

fn banner(title: &str) {
    println!("\n{}", title);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

fn run_pipeline(config: &PipelineConfig) -> Result<()> {
    run_consolidate(config)?;
    run_transform(config)?;
    run_aggregate(config)?;
    run_import(config)?;
    println!("\n🎉 Pipeline completo!");
    Ok(())
}

/// Stage 1: unzip the quarterly bundles and consolidate the expense rows.
fn run_consolidate(config: &PipelineConfig) -> Result<()> {
    banner("📦 Etapa 1: Consolidação das demonstrações contábeis");
    config.ensure_processed_dir()?;

    let bundles = fetcher::list_bundles(&config.raw_dir)?;
    if bundles.is_empty() {
        println!("⚠️ Nenhum pacote .zip encontrado em {}", config.raw_dir.display());
    }

    let extractor = ArchiveExtractor::from_config(config);
    let output = extractor.extract_all(&bundles);

    let path = config.processed_dir.join(CONSOLIDATED_FILE);
    artifacts::write_consolidated(&path, &output.records)?;

    let s = &output.summary;
    println!("\n✓ Pacotes processados: {} ({} com falha)", s.bundles_processed, s.bundles_failed);
    println!("✓ Membros lidos: {} ({} sem colunas, {} formato ignorado, {} com falha)",
        s.members_read, s.members_skipped_columns, s.members_skipped_format, s.members_failed);
    println!("✓ Linhas aceitas: {} de {} ({} filtradas, {} data inválida, {} valor inválido)",
        s.rows_accepted, s.rows_scanned, s.rows_filtered_out, s.rows_bad_date, s.rows_bad_amount);
    println!("✓ Artefato gerado: {}", path.display());
    Ok(())
}

/// Stage 2: join against the registry and split by CNPJ validity.
fn run_transform(config: &PipelineConfig) -> Result<()> {
    banner("⚖️ Etapa 2: Enriquecimento e validação de CNPJ");
    config.ensure_processed_dir()?;

    let registry_path = fetcher::find_registry_file(&config.raw_dir)?;
    println!("📂 Cadastro: {}", registry_path.display());
    let normalizer = RegistryNormalizer::new();
    let (registry, registry_summary) = normalizer.load_registry(&registry_path)?;
    println!("✓ Operadoras no cadastro: {} ({} duplicadas, {} linhas puladas)",
        registry_summary.entities, registry_summary.duplicates_dropped, registry_summary.lines_skipped);

    let consolidated_path = config.processed_dir.join(CONSOLIDATED_FILE);
    let (expenses, skipped) = artifacts::read_consolidated(&consolidated_path)?;
    if skipped > 0 {
        println!("⚠️ {} linhas ilegíveis no consolidado", skipped);
    }

    let reconciler = Reconciler::new();
    let output = reconciler.reconcile(expenses, &registry);

    let valid_path = config.processed_dir.join(ENRICHED_FILE);
    let invalid_path = config.processed_dir.join(INCONSISTENCIES_FILE);
    artifacts::write_reconciled(&valid_path, &output.valid)?;
    artifacts::write_reconciled(&invalid_path, &output.invalid)?;

    println!("\n✓ {}", output.summary.report());
    println!("✓ Artefatos gerados: {} e {}", valid_path.display(), invalid_path.display());
    Ok(())
}

/// Stage 3: per-operator statistics over the valid partition.
fn run_aggregate(config: &PipelineConfig) -> Result<()> {
    banner("📊 Etapa 3: Agregação por operadora");
    config.ensure_processed_dir()?;

    let enriched_path = config.processed_dir.join(ENRICHED_FILE);
    let (records, skipped) = artifacts::read_reconciled(&enriched_path)?;
    if skipped > 0 {
        println!("⚠️ {} linhas ilegíveis no arquivo enriquecido", skipped);
    }

    let aggregator = Aggregator::new();
    let aggregates = aggregator.aggregate(&records);

    let path = config.processed_dir.join(AGGREGATED_FILE);
    artifacts::write_aggregates(&path, &aggregates)?;

    println!("\n✓ Operadoras agregadas: {}", aggregates.len());
    if let Some(top) = aggregates.first() {
        println!("✓ Maior despesa total: {} ({})",
            top.legal_name, artifacts::format_decimal_br_2dp(top.total_expense));
    }
    println!("✓ Artefato gerado: {}", path.display());
    Ok(())
}

/// Stage 4: full refresh of the SQLite reporting database.
fn run_import(config: &PipelineConfig) -> Result<()> {
    banner("🗄️ Etapa 4: Carga no banco de dados");

    let mut conn = Connection::open(&config.db_path)?;
    db::setup_database(&conn)?;

    let summary = db::load_from_artifacts(&mut conn, &config.processed_dir)?;
    let (operators, expenses, aggregates) = db::verify_counts(&conn)?;

    println!("✓ Operadoras: {}", operators);
    println!("✓ Despesas detalhadas: {}", expenses);
    println!("✓ Agregados: {}", aggregates);
    if summary.lines_skipped > 0 {
        println!("⚠️ {} linhas ilegíveis ignoradas na carga", summary.lines_skipped);
    }
    println!("✓ Banco: {}", config.db_path.display());
    Ok(())
}
