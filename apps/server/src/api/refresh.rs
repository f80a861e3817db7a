use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};
use folio_core::errors::Result as CoreResult;
use folio_core::refresh::{RefreshMode, RefreshRun, StartRefreshRequest, StartRefreshResponse};

/// Trigger body. Every field is optional; an empty body means an `auto`
/// run over the tracked symbols.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    mode: Option<String>,
    symbols: Option<Vec<String>>,
    force: Option<bool>,
}

impl RefreshBody {
    fn into_request(self) -> CoreResult<StartRefreshRequest> {
        let mode = match self.mode {
            Some(raw) => raw.parse::<RefreshMode>()?,
            None => RefreshMode::default(),
        };
        Ok(StartRefreshRequest {
            mode,
            symbols: self.symbols,
            force: self.force.unwrap_or(false),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    limit: Option<usize>,
}

/// Returns 202 for a new run and 200 when joining one in progress.
async fn start_refresh(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<StartRefreshResponse>)> {
    let body: RefreshBody = if body.iter().all(u8::is_ascii_whitespace) {
        RefreshBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid refresh request: {}", e)))?
    };

    let response = state
        .orchestrator
        .start_refresh(body.into_request()?)
        .await?;
    let status = if response.coalesced {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(response)))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RefreshRun>> {
    Ok(Json(state.orchestrator.get_run(&run_id)?))
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRunsQuery>,
) -> Json<Vec<RefreshRun>> {
    let mut runs = state.orchestrator.list_runs();
    if let Some(limit) = query.limit {
        runs.truncate(limit);
    }
    Json(runs)
}

async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RefreshRun>> {
    Ok(Json(state.orchestrator.cancel(&run_id)?))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/refresh", get(list_runs).post(start_refresh))
        .route("/refresh/{id}", get(get_run))
        .route("/refresh/{id}/cancel", post(cancel_run))
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::errors::Error;

    #[test]
    fn test_body_defaults_to_auto() {
        let request = RefreshBody::default().into_request().unwrap();
        assert_eq!(request, StartRefreshRequest::default());
        assert_eq!(request.mode, RefreshMode::Auto);
    }

    #[test]
    fn test_unknown_mode_is_validation_error() {
        let body = RefreshBody {
            mode: Some("turbo".into()),
            ..Default::default()
        };
        assert!(matches!(body.into_request(), Err(Error::Validation(_))));
    }
}
