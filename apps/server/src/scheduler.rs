//! Background scheduler for periodic `auto` refresh runs.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::main_lib::AppState;
use folio_core::errors::Error;
use folio_core::refresh::{RefreshMode, StartRefreshRequest, StartRefreshResponse};

/// Starts the background refresh scheduler.
pub fn start_refresh_scheduler(
    state: Arc<AppState>,
    every: Duration,
    initial_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Refresh scheduler started ({}s interval)", every.as_secs());

        tokio::time::sleep(initial_delay).await;

        // First tick is immediate
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            run_scheduled_refresh(&state).await;
        }
    })
}

/// Trigger one `auto` run over the tracked universe.
pub async fn run_scheduled_refresh(state: &Arc<AppState>) -> Option<StartRefreshResponse> {
    let request = StartRefreshRequest {
        mode: RefreshMode::Auto,
        symbols: None,
        force: false,
    };

    match state.orchestrator.start_refresh(request).await {
        Ok(response) if response.coalesced => {
            debug!(
                "Scheduled refresh joined run {} already in progress",
                response.run_id
            );
            Some(response)
        }
        Ok(response) => {
            info!("Scheduled refresh started run {}", response.run_id);
            Some(response)
        }
        Err(Error::MissingPrerequisite(reason)) => {
            debug!("Scheduled refresh skipped: {}", reason);
            None
        }
        Err(e) => {
            warn!("Scheduled refresh failed to start: {}", e);
            None
        }
    }
}
