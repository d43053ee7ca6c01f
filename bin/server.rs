// ANS Despesas - Query API
// Read-only REST surface over the reporting database. The pipeline is the
// only writer; this process never mutates the database.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use ans_despesas::{dashboard_summary, search_operators, top_operators, PipelineConfig};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message),
        }
    }
}

const DEFAULT_SEARCH_LIMIT: i64 = 50;

#[derive(Deserialize)]
struct SearchParams {
    busca: Option<String>,
    limit: Option<i64>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/operadoras?busca=&limit= - Search aggregated operators by name
async fn get_operadoras(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, 1000);

    match search_operators(&conn, params.busca.as_deref(), limit) {
        Ok(operators) => (StatusCode::OK, Json(ApiResponse::ok(operators))).into_response(),
        Err(e) => {
            eprintln!("Erro na busca de operadoras: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("Erro interno na consulta".to_string())),
            )
                .into_response()
        }
    }
}

/// GET /api/dashboard/top-10 - Largest operators by detailed expense
async fn get_top_10(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match top_operators(&conn, 10) {
        Ok(top) => (StatusCode::OK, Json(ApiResponse::ok(top))).into_response(),
        Err(e) => {
            eprintln!("Erro no top-10: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("Erro interno na consulta".to_string())),
            )
                .into_response()
        }
    }
}

/// GET /api/dashboard/resumo - Overall totals
async fn get_resumo(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match dashboard_summary(&conn) {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::ok(summary))).into_response(),
        Err(e) => {
            eprintln!("Erro no resumo: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("Erro interno na consulta".to_string())),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    println!("🌐 ANS Despesas - API de Consulta");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let data_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    let config = PipelineConfig::new(std::path::Path::new(&data_dir));

    if !config.db_path.exists() {
        eprintln!("❌ Banco de dados não encontrado: {}", config.db_path.display());
        eprintln!("   Execute primeiro: cargo run --release pipeline");
        std::process::exit(1);
    }

    let conn = Connection::open(&config.db_path).expect("Failed to open database");
    println!("✓ Banco aberto: {}", config.db_path.display());

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/operadoras", get(get_operadoras))
        .route("/dashboard/top-10", get(get_top_10))
        .route("/dashboard/resumo", get(get_resumo))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Servidor em http://localhost:3000");
    println!("   API: http://localhost:3000/api/operadoras");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
