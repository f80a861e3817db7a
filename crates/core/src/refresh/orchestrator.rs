//! Refresh orchestration.
//!
//! ```text
//! RefreshOrchestrator
//!       │
//!       ├─► RunRegistry (run state, coalescing, cancellation)
//!       ├─► MarketDataClient (cache gateway + resilient provider)
//!       ├─► QuoteStore (upsert by symbol/day)
//!       └─► RecomputeTrigger (downstream work)
//! ```
//!
//! A trigger validates input, resolves the universe and registers a run,
//! then returns. The run itself executes on a spawned task: resolve the
//! mode, partition into provider-sized batches, fetch and persist each
//! batch independently, drop cached history for what was stored and request
//! a recompute when something was stored.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use folio_market_data::clock::add_duration;
use folio_market_data::{CacheMode, Clock, MarketDataClient, ProviderDiagnostics, RetryClass};

use super::model::{
    BatchResult, BatchStatus, RefreshMode, RefreshRun, RunError, RunStatus, StartRefreshRequest,
    StartRefreshResponse,
};
use super::recompute::RecomputeTrigger;
use super::registry::{Begin, RunRegistry, DEFAULT_RUN_HISTORY};
use crate::errors::{Error, Result};
use crate::quotes::{normalize_symbols, universe_key, QuoteStore};

// =============================================================================
// Configuration
// =============================================================================

pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 4;
pub const DEFAULT_MINIMAL_SIZE: usize = 5;
/// Stored quotes fetched longer ago than this are stale.
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Batches in flight at once (further capped by the credit limit).
    pub max_concurrent_batches: usize,
    /// Symbols refreshed by a `minimal` run at most.
    pub minimal_size: usize,
    pub staleness_threshold: Duration,
    /// Completed runs kept in memory.
    pub run_history: usize,
    /// Universe used when no symbols are tracked yet.
    pub default_symbols: Vec<String>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            minimal_size: DEFAULT_MINIMAL_SIZE,
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            run_history: DEFAULT_RUN_HISTORY,
            default_symbols: Vec::new(),
        }
    }
}

/// What a run will actually do once its mode is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RefreshPlan {
    mode: RefreshMode,
    symbols: Vec<String>,
    cache_mode: CacheMode,
}

impl RefreshPlan {
    fn cached() -> Self {
        Self {
            mode: RefreshMode::Cached,
            symbols: Vec::new(),
            cache_mode: CacheMode::Use,
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct RefreshOrchestrator {
    client: MarketDataClient,
    store: Arc<dyn QuoteStore>,
    recompute: Arc<dyn RecomputeTrigger>,
    registry: RunRegistry,
    clock: Arc<dyn Clock>,
    config: RefreshConfig,
}

impl RefreshOrchestrator {
    pub fn new(
        client: MarketDataClient,
        store: Arc<dyn QuoteStore>,
        recompute: Arc<dyn RecomputeTrigger>,
        clock: Arc<dyn Clock>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            registry: RunRegistry::new(config.run_history),
            client,
            store,
            recompute,
            clock,
            config,
        }
    }

    pub fn client(&self) -> &MarketDataClient {
        &self.client
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Register a refresh run and start it in the background.
    ///
    /// Returns immediately. A trigger for a universe that already has a
    /// PENDING or RUNNING run joins that run (`coalesced = true`). Only
    /// invalid input and missing prerequisites are errors here; anything a
    /// provider does is recorded on the run.
    pub async fn start_refresh(
        self: &Arc<Self>,
        request: StartRefreshRequest,
    ) -> Result<StartRefreshResponse> {
        let universe = self.resolve_universe(request.symbols.as_deref()).await?;
        let target = universe_key(&universe);

        match self.registry.begin(
            &target,
            request.mode,
            request.force,
            universe,
            self.clock.now(),
        ) {
            Begin::Coalesced(run) => {
                info!(
                    "Refresh for {} symbol(s) coalesced into run {}",
                    run.symbols.len(),
                    run.id
                );
                Ok(StartRefreshResponse {
                    run_id: run.id,
                    status: run.status,
                    coalesced: true,
                })
            }
            Begin::Started { run, token } => {
                let response = StartRefreshResponse {
                    run_id: run.id.clone(),
                    status: run.status,
                    coalesced: false,
                };
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.drive(run.id, token).await;
                });
                Ok(response)
            }
        }
    }

    pub fn get_run(&self, run_id: &str) -> Result<RefreshRun> {
        self.registry
            .get(run_id)
            .ok_or_else(|| Error::NotFound(format!("Refresh run {}", run_id)))
    }

    /// Known runs, newest first.
    pub fn list_runs(&self) -> Vec<RefreshRun> {
        self.registry.list()
    }

    /// Request cooperative cancellation of a run.
    ///
    /// Batches that have not started are skipped; in-flight calls finish.
    pub fn cancel(&self, run_id: &str) -> Result<RefreshRun> {
        let run = self.registry.cancel(run_id)?;
        if !run.status.is_terminal() {
            info!("Run {}: cancellation requested", run_id);
        }
        Ok(run)
    }

    /// Wait until a run reaches a terminal status.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RefreshRun> {
        let mut rx = self
            .registry
            .subscribe(run_id)
            .ok_or_else(|| Error::NotFound(format!("Refresh run {}", run_id)))?;
        if rx.wait_for(|status| status.is_terminal()).await.is_err() {
            return Err(Error::NotFound(format!("Refresh run {}", run_id)));
        }
        self.get_run(run_id)
    }

    /// Provider circuit, stats, rate window and health.
    pub async fn diagnostics(&self) -> Vec<ProviderDiagnostics> {
        vec![self.client.diagnostics().await]
    }

    // =========================================================================
    // Universe and planning
    // =========================================================================

    async fn resolve_universe(&self, requested: Option<&[String]>) -> Result<Vec<String>> {
        let universe = match requested {
            Some([]) => {
                return Err(Error::Validation(
                    "symbols must not be empty when given".to_string(),
                ))
            }
            Some(symbols) => normalize_symbols(symbols)?,
            None => {
                let tracked = self.store.list_symbols()?;
                if tracked.is_empty() {
                    normalize_symbols(&self.config.default_symbols)?
                } else {
                    tracked
                }
            }
        };

        if universe.is_empty() {
            return Err(Error::MissingPrerequisite(
                "No tracked symbols to refresh".to_string(),
            ));
        }

        let added = self.store.ensure_symbols(&universe).await?;
        if added > 0 {
            debug!("Registered {} new symbol(s)", added);
        }
        Ok(universe)
    }

    async fn plan(&self, run: &RefreshRun) -> RefreshPlan {
        match run.mode {
            RefreshMode::Full => RefreshPlan {
                mode: RefreshMode::Full,
                symbols: run.symbols.clone(),
                cache_mode: CacheMode::Refresh,
            },
            RefreshMode::Cached => RefreshPlan::cached(),
            RefreshMode::Minimal => {
                let headroom = self.headroom().await;
                self.minimal_plan(&run.symbols, run.force, headroom)
            }
            RefreshMode::Auto => self.auto_plan(run).await,
        }
    }

    async fn auto_plan(&self, run: &RefreshRun) -> RefreshPlan {
        if self.client.is_blocked() {
            debug!("Run {}: circuit open, serving cached data", run.id);
            return RefreshPlan::cached();
        }

        let headroom = self.headroom().await;
        if headroom == 0 {
            debug!("Run {}: no rate-limit headroom, serving cached data", run.id);
            return RefreshPlan::cached();
        }

        if !run.force && self.stale_first(&run.symbols, false).is_empty() {
            debug!("Run {}: all symbols fresh, serving cached data", run.id);
            return RefreshPlan::cached();
        }

        let batches_needed = run.symbols.len().div_ceil(self.client.max_batch_size());
        if headroom as usize >= batches_needed {
            RefreshPlan {
                mode: RefreshMode::Full,
                symbols: run.symbols.clone(),
                cache_mode: CacheMode::Refresh,
            }
        } else {
            self.minimal_plan(&run.symbols, run.force, headroom)
        }
    }

    fn minimal_plan(&self, symbols: &[String], force: bool, headroom: u32) -> RefreshPlan {
        let cap = self
            .config
            .minimal_size
            .min(headroom as usize * self.client.max_batch_size());
        let mut selected = self.stale_first(symbols, force);
        selected.truncate(cap);

        RefreshPlan {
            mode: RefreshMode::Minimal,
            symbols: selected,
            cache_mode: if force {
                CacheMode::Refresh
            } else {
                CacheMode::Use
            },
        }
    }

    /// Symbols ordered stalest first: never fetched, then oldest fetch.
    /// Fresh symbols are left out unless `include_fresh`.
    fn stale_first(&self, symbols: &[String], include_fresh: bool) -> Vec<String> {
        let latest = match self.store.read_latest(symbols) {
            Ok(latest) => latest,
            Err(err) => {
                warn!("Could not read stored quotes, treating all as stale: {}", err);
                Default::default()
            }
        };
        let now = self.clock.now();

        let mut ranked: Vec<(Option<DateTime<Utc>>, &String)> = symbols
            .iter()
            .map(|s| (latest.get(s).map(|q| q.fetched_at), s))
            .filter(|(fetched_at, _)| include_fresh || !self.is_fresh(*fetched_at, now))
            .collect();
        // None sorts before Some
        ranked.sort();
        ranked.into_iter().map(|(_, s)| s.clone()).collect()
    }

    fn is_fresh(&self, fetched_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        fetched_at
            .map(|at| add_duration(at, self.config.staleness_threshold) > now)
            .unwrap_or(false)
    }

    async fn headroom(&self) -> u32 {
        self.client.headroom().await.unwrap_or_else(|err| {
            warn!("Could not read rate-limit headroom: {}", err);
            0
        })
    }

    // =========================================================================
    // Execution
    // =========================================================================

    async fn drive(&self, run_id: String, token: CancellationToken) {
        let started_at = self.clock.now();
        let run = match self.registry.update(&run_id, |r| {
            r.status = RunStatus::Running;
            r.started_at = Some(started_at);
        }) {
            Ok(run) => run,
            Err(err) => {
                error!("Run {}: could not start: {}", run_id, err);
                return;
            }
        };

        let plan = self.plan(&run).await;
        info!(
            "Run {}: {} mode resolved to {}, {} of {} symbol(s) to fetch",
            run_id,
            run.mode,
            plan.mode,
            plan.symbols.len(),
            run.symbols.len()
        );
        self.update_run(&run_id, |r| r.resolved_mode = Some(plan.mode));

        let batches: Vec<Vec<String>> = plan
            .symbols
            .chunks(self.client.max_batch_size())
            .map(|chunk| chunk.to_vec())
            .collect();
        let refreshed = self
            .run_batches(&run_id, batches, plan.cache_mode, &token)
            .await;

        if !refreshed.is_empty() {
            if let Err(err) = self.recompute.on_quotes_refreshed(&run_id, &refreshed).await {
                warn!("Run {}: recompute trigger failed: {}", run_id, err);
                let run_error = RunError {
                    batch: None,
                    symbols: refreshed.clone(),
                    code: err.code().to_string(),
                    message: format!("Recompute failed: {}", err),
                };
                self.update_run(&run_id, |r| r.errors.push(run_error));
            }
        }

        match self.registry.finish(&run_id, self.clock.now()) {
            Ok(run) => {
                let totals = run.totals();
                info!(
                    "Run {}: {:?} ({} batch(es), {} fetched, {} inserted, {} updated, {} error(s))",
                    run.id,
                    run.status,
                    run.batches.len(),
                    totals.fetched,
                    totals.inserted,
                    totals.updated,
                    run.errors.len()
                );
            }
            Err(err) => error!("Run {}: could not finish: {}", run_id, err),
        }
    }

    /// Execute every batch and return the symbols that were stored.
    async fn run_batches(
        &self,
        run_id: &str,
        batches: Vec<Vec<String>>,
        cache_mode: CacheMode,
        token: &CancellationToken,
    ) -> Vec<String> {
        if batches.is_empty() {
            return Vec::new();
        }

        let concurrency = self
            .config
            .max_concurrent_batches
            .min(self.client.credits_per_window() as usize)
            .max(1);
        let halted: OnceLock<(String, String)> = OnceLock::new();

        let results: Vec<BatchResult> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, symbols)| {
                self.run_batch(run_id, index, symbols, cache_mode, token, &halted)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut refreshed: Vec<String> = results
            .iter()
            .filter(|b| b.status == BatchStatus::Succeeded)
            .flat_map(|b| b.symbols.iter().cloned())
            .collect();
        refreshed.sort();

        self.update_run(run_id, |r| {
            r.batches.sort_by_key(|b| b.index);
            r.errors.sort_by_key(|e| e.batch);
        });
        refreshed
    }

    async fn run_batch(
        &self,
        run_id: &str,
        index: usize,
        symbols: Vec<String>,
        cache_mode: CacheMode,
        token: &CancellationToken,
        halted: &OnceLock<(String, String)>,
    ) -> BatchResult {
        let result = if token.is_cancelled() {
            BatchResult::skipped(
                index,
                symbols,
                "cancelled",
                "Run cancelled before the batch started".to_string(),
            )
        } else if let Some((code, message)) = halted.get() {
            BatchResult::skipped(index, symbols, code, message.clone())
        } else {
            self.fetch_and_store(index, symbols, cache_mode, halted).await
        };

        if result.status != BatchStatus::Succeeded {
            debug!(
                "Run {}: batch {} {:?}: {:?}",
                run_id,
                index,
                result.status,
                result.error.as_ref().map(|e| &e.message)
            );
        }
        self.update_run(run_id, |r| r.record_batch(result.clone()));
        result
    }

    fn update_run<F>(&self, run_id: &str, f: F)
    where
        F: FnOnce(&mut RefreshRun),
    {
        if let Err(err) = self.registry.update(run_id, f) {
            error!("Run {}: could not record progress: {}", run_id, err);
        }
    }

    async fn fetch_and_store(
        &self,
        index: usize,
        symbols: Vec<String>,
        cache_mode: CacheMode,
        halted: &OnceLock<(String, String)>,
    ) -> BatchResult {
        // Attempts are bounded by the provider request timeout.
        let batch = match self.client.fetch_quotes(&symbols, cache_mode).await {
            Ok(batch) => batch,
            Err(err) => {
                if err.retry_class() == RetryClass::ShortCircuit {
                    let _ = halted.set((
                        err.code().to_string(),
                        format!("Skipped after provider stopped accepting calls: {}", err),
                    ));
                }
                warn!("Batch {} ({:?}) failed: {}", index, symbols, err);
                return BatchResult::failed(index, symbols, err.code(), err.to_string());
            }
        };

        let outcome = match self.store.upsert_quotes(&batch.quotes).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Batch {} ({:?}) could not be stored: {}", index, symbols, err);
                return BatchResult::failed(index, symbols, err.code(), err.to_string());
            }
        };
        self.client.invalidate_history(&symbols).await;

        BatchResult {
            index,
            symbols,
            status: BatchStatus::Succeeded,
            fetched: batch.quotes.len(),
            inserted: outcome.inserted,
            updated: outcome.updated,
            degraded: batch.degraded,
            error: None,
        }
    }
}
