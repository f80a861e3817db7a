use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use folio_core::refresh::RefreshConfig;
use folio_market_data::{
    CacheTtls, CircuitBreakerConfig, RateLimitConfig, ResilienceConfig, RetryPolicy,
};

/// Auto refresh cadence when `FOLIO_SCHEDULER_INTERVAL_SECS` is not set.
pub const DEFAULT_SCHEDULER_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_SCHEDULER_INITIAL_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    pub cors_allow: Vec<String>,
    pub request_timeout: Duration,
    pub finnhub_api_key: String,
    pub finnhub_base_url: Option<String>,
    pub resilience: ResilienceConfig,
    pub cache_ttls: CacheTtls,
    /// Serve expired cache entries, flagged degraded, when the provider fails.
    pub cache_fallback: bool,
    pub refresh: RefreshConfig,
    /// `None` disables the scheduler.
    pub scheduler_interval: Option<Duration>,
    pub scheduler_initial_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            db_path: "./db/folio.db".into(),
            cors_allow: vec!["*".into()],
            request_timeout: Duration::from_secs(30),
            finnhub_api_key: String::new(),
            finnhub_base_url: None,
            resilience: ResilienceConfig::default(),
            cache_ttls: CacheTtls::default(),
            cache_fallback: false,
            refresh: RefreshConfig::default(),
            scheduler_interval: Some(DEFAULT_SCHEDULER_INTERVAL),
            scheduler_initial_delay: DEFAULT_SCHEDULER_INITIAL_DELAY,
        }
    }
}

impl Config {
    /// Load `.env` if present, then read `FOLIO_*` variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);
        let defaults = Self::default();

        let listen_addr = vars.parse("FOLIO_LISTEN_ADDR", defaults.listen_addr)?;
        let db_path = vars.string("FOLIO_DB_PATH").unwrap_or(defaults.db_path);
        let cors_allow = vars
            .list("FOLIO_CORS_ALLOW_ORIGINS")
            .unwrap_or(defaults.cors_allow);
        let request_timeout = vars.millis("FOLIO_REQUEST_TIMEOUT_MS", defaults.request_timeout)?;

        let rate_limit = RateLimitConfig {
            credits: vars.parse("FOLIO_RATE_LIMIT_CREDITS", defaults.resilience.rate_limit.credits)?,
            window: vars.secs(
                "FOLIO_RATE_LIMIT_WINDOW_SECS",
                defaults.resilience.rate_limit.window,
            )?,
            policy: match vars.string("FOLIO_RATE_LIMIT_POLICY") {
                Some(raw) => raw.parse().map_err(|e: String| anyhow!(e))?,
                None => defaults.resilience.rate_limit.policy,
            },
        };
        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: vars.parse(
                "FOLIO_BREAKER_THRESHOLD",
                defaults.resilience.circuit_breaker.failure_threshold,
            )?,
            recovery_timeout: vars.secs(
                "FOLIO_BREAKER_RECOVERY_SECS",
                defaults.resilience.circuit_breaker.recovery_timeout,
            )?,
        };
        let retry = RetryPolicy {
            max_retries: vars.parse("FOLIO_RETRY_MAX", defaults.resilience.retry.max_retries)?,
            base_delay: vars.millis(
                "FOLIO_RETRY_BASE_DELAY_MS",
                defaults.resilience.retry.base_delay,
            )?,
            max_delay: vars.millis("FOLIO_RETRY_MAX_DELAY_MS", defaults.resilience.retry.max_delay)?,
            jitter: vars.parse("FOLIO_RETRY_JITTER", defaults.resilience.retry.jitter)?,
        };
        let resilience = ResilienceConfig {
            circuit_breaker,
            rate_limit,
            retry,
            request_timeout: vars.millis(
                "FOLIO_PROVIDER_TIMEOUT_MS",
                defaults.resilience.request_timeout,
            )?,
        };

        let cache_ttls = CacheTtls {
            live: vars.secs("FOLIO_CACHE_LIVE_TTL_SECS", defaults.cache_ttls.live)?,
            stable: vars.secs("FOLIO_CACHE_STABLE_TTL_SECS", defaults.cache_ttls.stable)?,
        };

        let refresh = RefreshConfig {
            max_concurrent_batches: vars.parse(
                "FOLIO_REFRESH_CONCURRENCY",
                defaults.refresh.max_concurrent_batches,
            )?,
            minimal_size: vars.parse("FOLIO_REFRESH_MINIMAL_SIZE", defaults.refresh.minimal_size)?,
            staleness_threshold: vars.secs(
                "FOLIO_REFRESH_STALE_SECS",
                defaults.refresh.staleness_threshold,
            )?,
            run_history: vars.parse("FOLIO_RUN_HISTORY", defaults.refresh.run_history)?,
            default_symbols: vars
                .list("FOLIO_DEFAULT_SYMBOLS")
                .unwrap_or(defaults.refresh.default_symbols),
        };

        // 0 turns the scheduler off
        let scheduler_interval = match vars.string("FOLIO_SCHEDULER_INTERVAL_SECS") {
            None => defaults.scheduler_interval,
            Some(_) => match vars.parse::<u64>("FOLIO_SCHEDULER_INTERVAL_SECS", 0)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        };

        Ok(Self {
            listen_addr,
            db_path,
            cors_allow,
            request_timeout,
            finnhub_api_key: vars.string("FOLIO_FINNHUB_API_KEY").unwrap_or_default(),
            finnhub_base_url: vars.string("FOLIO_FINNHUB_BASE_URL"),
            resilience,
            cache_ttls,
            cache_fallback: vars.parse("FOLIO_CACHE_FALLBACK", defaults.cache_fallback)?,
            refresh,
            scheduler_interval,
            scheduler_initial_delay: vars.secs(
                "FOLIO_SCHEDULER_INITIAL_DELAY_SECS",
                defaults.scheduler_initial_delay,
            )?,
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed, non-empty value.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.string(key).map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }

    fn parse<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| anyhow!("{}", e))
                .with_context(|| format!("Invalid {}='{}'", key, raw)),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> anyhow::Result<Duration> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> anyhow::Result<Duration> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default_ms).map(Duration::from_millis)
    }
}
