use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use super::model::RateLimitWindowDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::rate_limit_windows;
use folio_core::errors::Error;
use folio_market_data::{ProviderError, RateLimitWindow, Reservation, WindowStore};

/// Rate-limit windows kept in SQLite.
///
/// Each reservation is a read-modify-write inside one immediate transaction,
/// so every process pointed at the same database file draws from the same
/// budget.
pub struct SqliteWindowStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteWindowStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

fn store_error(err: Error) -> ProviderError {
    ProviderError::WindowStore(err.to_string())
}

#[async_trait]
impl WindowStore for SqliteWindowStore {
    async fn reserve(
        &self,
        provider: &str,
        cost: u32,
        limit: u32,
        width: Duration,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ProviderError> {
        let provider = provider.to_string();

        self.writer
            .exec(move |conn| {
                let stored = rate_limit_windows::table
                    .find(&provider)
                    .select(RateLimitWindowDB::as_select())
                    .first::<RateLimitWindowDB>(conn)
                    .optional()
                    .into_core()?;

                let mut window = match stored {
                    Some(row) => RateLimitWindow::try_from(row).map_err(Error::from)?,
                    None => RateLimitWindow::fresh(&provider, now, limit, width),
                };
                window.credits_limit = limit;
                window.window_width = width;

                let reservation = window.reserve(cost, now);
                diesel::replace_into(rate_limit_windows::table)
                    .values(RateLimitWindowDB::from_window(reservation.window(), now))
                    .execute(conn)
                    .into_core()?;

                Ok(reservation)
            })
            .await
            .map_err(store_error)
    }

    async fn current(&self, provider: &str) -> Result<Option<RateLimitWindow>, ProviderError> {
        let mut conn = get_connection(&self.pool).map_err(store_error)?;
        let stored = rate_limit_windows::table
            .find(provider)
            .select(RateLimitWindowDB::as_select())
            .first::<RateLimitWindowDB>(&mut conn)
            .optional()
            .into_core()
            .map_err(store_error)?;

        stored
            .map(|row| RateLimitWindow::try_from(row).map_err(|e| store_error(e.into())))
            .transpose()
    }

    async fn reset(&self, provider: &str) -> Result<(), ProviderError> {
        let provider = provider.to_string();
        self.writer
            .exec(move |conn| {
                diesel::delete(rate_limit_windows::table.find(&provider))
                    .execute(conn)
                    .into_core()?;
                Ok(())
            })
            .await
            .map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const WIDTH: Duration = Duration::from_secs(60);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
    }

    fn open_at(path: &std::path::Path) -> SqliteWindowStore {
        let (pool, writer) = db::open(path.to_str().unwrap()).unwrap();
        SqliteWindowStore::new(pool, writer)
    }

    #[tokio::test]
    async fn test_reserve_until_exhausted_then_roll_over() {
        let dir = TempDir::new().unwrap();
        let store = open_at(&dir.path().join("limits.db"));

        for _ in 0..3 {
            let r = store.reserve("FINNHUB", 1, 3, WIDTH, t0()).await.unwrap();
            assert!(matches!(r, Reservation::Granted(_)));
        }

        let later = t0() + chrono::Duration::seconds(20);
        match store.reserve("FINNHUB", 1, 3, WIDTH, later).await.unwrap() {
            Reservation::Denied { retry_after, window } => {
                assert_eq!(retry_after, Duration::from_secs(40));
                assert_eq!(window.credits_consumed, 3);
            }
            other => panic!("expected denial, got {:?}", other),
        }

        let next_window = t0() + chrono::Duration::seconds(60);
        let r = store.reserve("FINNHUB", 1, 3, WIDTH, next_window).await.unwrap();
        assert_eq!(r.window().window_start, next_window);
        assert_eq!(r.window().credits_consumed, 1);
    }

    #[tokio::test]
    async fn test_two_handles_share_one_budget() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.db");
        let a = open_at(&path);
        let b = open_at(&path);

        assert!(matches!(
            a.reserve("FINNHUB", 1, 2, WIDTH, t0()).await.unwrap(),
            Reservation::Granted(_)
        ));
        assert!(matches!(
            b.reserve("FINNHUB", 1, 2, WIDTH, t0()).await.unwrap(),
            Reservation::Granted(_)
        ));
        assert!(matches!(
            a.reserve("FINNHUB", 1, 2, WIDTH, t0()).await.unwrap(),
            Reservation::Denied { .. }
        ));

        let seen = b.current("FINNHUB").await.unwrap().unwrap();
        assert_eq!(seen.credits_consumed, 2);
        assert_eq!(seen.window_start, t0());
    }

    #[tokio::test]
    async fn test_reset_forgets_window() {
        let dir = TempDir::new().unwrap();
        let store = open_at(&dir.path().join("limits.db"));

        assert!(store.current("FINNHUB").await.unwrap().is_none());
        store.reserve("FINNHUB", 1, 5, WIDTH, t0()).await.unwrap();
        assert!(store.current("FINNHUB").await.unwrap().is_some());

        store.reset("FINNHUB").await.unwrap();
        assert!(store.current("FINNHUB").await.unwrap().is_none());
    }
}
