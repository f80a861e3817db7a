use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use folio_core::quotes::QuoteStore;
use folio_core::refresh::{LogRecompute, RefreshOrchestrator};
use folio_market_data::{
    CacheGateway, Clock, FinnhubProvider, MarketDataClient, MemoryCacheStore, ResilientProvider,
    SystemClock,
};
use folio_storage_sqlite::{db, QuoteRepository, SqliteWindowStore};

pub struct AppState {
    pub orchestrator: Arc<RefreshOrchestrator>,
    pub quote_store: Arc<dyn QuoteStore>,
    pub db_path: String,
    pub started_at: DateTime<Utc>,
}

pub fn init_tracing() {
    let log_format = std::env::var("FOLIO_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

/// Open storage and wire the provider, cache and orchestrator.
///
/// Must run inside a Tokio runtime (spawns the storage writer).
pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    if config.finnhub_api_key.is_empty() {
        bail!("FOLIO_FINNHUB_API_KEY is not set");
    }

    let (pool, writer) = db::open(&config.db_path)
        .with_context(|| format!("Cannot open database at {}", config.db_path))?;
    tracing::info!("Database path in use: {}", config.db_path);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let window_store = Arc::new(SqliteWindowStore::new(pool.clone(), writer.clone()));
    let quote_repository = Arc::new(QuoteRepository::new(pool, writer));

    let mut finnhub = FinnhubProvider::new(config.finnhub_api_key.clone());
    if let Some(base_url) = &config.finnhub_base_url {
        finnhub = finnhub.with_base_url(base_url.clone());
    }
    let provider = Arc::new(ResilientProvider::new(
        Arc::new(finnhub),
        config.resilience.clone(),
        window_store,
        clock.clone(),
    )?);

    let cache = CacheGateway::new(
        Arc::new(MemoryCacheStore::new(clock.clone())),
        clock.clone(),
        config.cache_ttls.clone(),
        config.cache_fallback,
    );
    let client = MarketDataClient::new(provider, cache);

    let orchestrator = Arc::new(RefreshOrchestrator::new(
        client,
        quote_repository.clone(),
        Arc::new(LogRecompute),
        clock.clone(),
        config.refresh.clone(),
    ));

    Ok(Arc::new(AppState {
        orchestrator,
        quote_store: quote_repository,
        db_path: config.db_path.clone(),
        started_at: clock.now(),
    }))
}
