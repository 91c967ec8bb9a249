// Billing Manager - Web Server
// JSON API over the primary store and billing ledger (axum)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Local;
use rusqlite::Connection;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use billing_manager::{
    db, generate_expense_items, init_tracing, load_config, preview, reconcile, AlertManager,
    AlertReport, BillingError, Config, ExpenseItem, ReconciliationEngine, ReconciliationReport,
    DEFAULT_CONFIG_FILE,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    primary: Arc<Mutex<Connection>>,
    billing: Arc<Mutex<Connection>>,
    config: Arc<Config>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Serialize)]
struct GenerateResponse {
    contract_id: i64,
    inserted: usize,
}

// ============================================================================
// Errors
// ============================================================================

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        let status = match &e {
            BillingError::ContractNotFound(_)
            | BillingError::ExpenseNotFound(_)
            | BillingError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
            BillingError::AlreadyMatched { .. } => StatusCode::CONFLICT,
            e if e.is_domain_error() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %e, "request failed");
        }

        ApiError {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::err(self.message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, ApiError> {
    conn.lock().map_err(|_| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "database lock poisoned".to_string(),
    })
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/contracts/:id/expenses - Expense items of one contract
async fn get_contract_expenses(
    State(state): State<AppState>,
    Path(contract_id): Path<i64>,
) -> ApiResult<Vec<ExpenseItem>> {
    let conn = lock(&state.primary)?;
    let items = db::get_expense_items_by_contract(&conn, contract_id)?;
    Ok(Json(ApiResponse::ok(items)))
}

/// POST /api/contracts/:id/generate - Generate missing expense items
async fn generate_contract_expenses(
    State(state): State<AppState>,
    Path(contract_id): Path<i64>,
) -> ApiResult<GenerateResponse> {
    let conn = lock(&state.primary)?;
    let inserted = generate_expense_items(&conn, contract_id)?;
    Ok(Json(ApiResponse::ok(GenerateResponse {
        contract_id,
        inserted,
    })))
}

/// POST /api/reconcile - Match pending payments and mark both stores
async fn run_reconcile(State(state): State<AppState>) -> ApiResult<ReconciliationReport> {
    let engine = ReconciliationEngine::from_config(&state.config.reconciliation);
    let primary = lock(&state.primary)?;
    let billing = lock(&state.billing)?;
    let report = reconcile(&primary, &billing, &engine)?;
    Ok(Json(ApiResponse::ok(report)))
}

/// GET /api/reconcile/preview - Dry run
async fn preview_reconcile(State(state): State<AppState>) -> ApiResult<ReconciliationReport> {
    let engine = ReconciliationEngine::from_config(&state.config.reconciliation);
    let primary = lock(&state.primary)?;
    let billing = lock(&state.billing)?;
    let report = preview(&primary, &billing, &engine)?;
    Ok(Json(ApiResponse::ok(report)))
}

/// GET /api/alerts - Invoice-waiting + overdue payments as of today
async fn get_alerts(State(state): State<AppState>) -> ApiResult<AlertReport> {
    let manager = AlertManager::from_config(&state.config.alerts);
    let conn = lock(&state.primary)?;
    let report = manager.all_alerts(&conn, Local::now().date_naive())?;
    Ok(Json(ApiResponse::ok(report)))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    println!("🌐 Billing Manager - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path = std::env::var("BILLING_MANAGER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = load_config(&config_path)?;

    let primary = db::open_primary_store(&config.database.primary_path)?;
    let billing = db::open_billing_store(&config.database.billing_path)?;
    println!("✓ Primary store: {}", config.database.primary_path.display());
    println!("✓ Billing store: {}", config.database.billing_path.display());

    // Create shared state
    let state = AppState {
        primary: Arc::new(Mutex::new(primary)),
        billing: Arc::new(Mutex::new(billing)),
        config: Arc::new(config),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/contracts/:id/expenses", get(get_contract_expenses))
        .route("/contracts/:id/generate", post(generate_contract_expenses))
        .route("/reconcile", post(run_reconcile))
        .route("/reconcile/preview", get(preview_reconcile))
        .route("/alerts", get(get_alerts))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = std::env::var("BILLING_SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(%addr, "server listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/health", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;

    Ok(())
}
