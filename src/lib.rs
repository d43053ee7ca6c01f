// ANS Despesas - Core Library
// Consolidation, reconciliation and aggregation of quarterly accounting
// statements published by the Brazilian health-insurance regulator (ANS).

pub mod aggregator;
pub mod artifacts;
pub mod cnpj;
pub mod config;
pub mod db;
pub mod extractor;
pub mod fetcher;
pub mod normalizer;
pub mod reconciler;

// Re-export commonly used types
pub use aggregator::{Aggregator, OperatorAggregate};
pub use cnpj::CnpjValidator;
pub use config::PipelineConfig;
pub use db::{
    dashboard_summary, load_from_artifacts, search_operators, setup_database, top_operators,
    truncate_tables, verify_counts, DashboardSummary, LoadSummary, OperatorExpenseStat,
    TopOperator,
};
pub use extractor::{ArchiveExtractor, ExpenseRecord, ExtractionSummary};
pub use normalizer::{
    normalize_registry_id, parse_decimal_auto, parse_decimal_br, RegistryEntity,
    RegistryNormalizer, RegistrySummary,
};
pub use reconciler::{ReconciledRecord, Reconciler, ReconciliationOutput, ReconciliationSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
