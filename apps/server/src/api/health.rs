use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use folio_market_data::ProviderDiagnostics;

use crate::main_lib::AppState;

/// Liveness probe.
pub async fn healthz() -> &'static str {
    "ok"
}

/// Circuit, stats, rate window and health for every provider.
async fn provider_diagnostics(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<ProviderDiagnostics>> {
    Json(state.orchestrator.diagnostics().await)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/providers/diagnostics", get(provider_diagnostics))
}
