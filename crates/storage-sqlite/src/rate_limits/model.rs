use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::time::Duration;

use crate::errors::StorageError;
use folio_market_data::RateLimitWindow;

/// Database model for a provider's rate-limit window.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::rate_limit_windows)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RateLimitWindowDB {
    pub provider: String,
    pub window_start: String,
    pub credits_consumed: i32,
    pub credits_limit: i32,
    pub window_width_ms: i64,
    pub updated_at: String,
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl RateLimitWindowDB {
    pub fn from_window(window: &RateLimitWindow, updated_at: DateTime<Utc>) -> Self {
        Self {
            provider: window.provider.clone(),
            window_start: window.window_start.to_rfc3339(),
            credits_consumed: to_i32(window.credits_consumed),
            credits_limit: to_i32(window.credits_limit),
            window_width_ms: i64::try_from(window.window_width.as_millis()).unwrap_or(i64::MAX),
            updated_at: updated_at.to_rfc3339(),
        }
    }
}

impl TryFrom<RateLimitWindowDB> for RateLimitWindow {
    type Error = StorageError;

    fn try_from(db: RateLimitWindowDB) -> Result<Self, Self::Error> {
        let window_start = DateTime::parse_from_rfc3339(&db.window_start)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                StorageError::Decode(format!("window_start '{}': {}", db.window_start, e))
            })?;

        Ok(RateLimitWindow {
            provider: db.provider,
            window_start,
            credits_consumed: u32::try_from(db.credits_consumed).unwrap_or(0),
            credits_limit: u32::try_from(db.credits_limit).unwrap_or(0),
            window_width: Duration::from_millis(u64::try_from(db.window_width_ms).unwrap_or(0)),
        })
    }
}
