use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;
use diesel::SqliteConnection;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::model::{QuoteDB, SymbolDB, DAY_FORMAT};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::{daily_quotes, symbols};
use crate::utils::chunk_for_sqlite;
use folio_core::errors::{Error, Result};
use folio_core::quotes::{QuoteStore, UpsertOutcome};
use folio_market_data::Quote;

/// Rows per `REPLACE INTO` statement (11 columns each).
const QUOTE_WRITE_CHUNK: usize = 80;

/// SQLite-backed [`QuoteStore`].
///
/// Reads go straight to the pool; writes are serialized through the
/// writer actor, each call in one immediate transaction.
pub struct QuoteRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl QuoteRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

/// Number of `(symbol, day)` keys in `rows` that are already stored.
fn count_existing(conn: &mut SqliteConnection, rows: &[QuoteDB]) -> Result<usize> {
    let wanted: HashSet<(&str, &str)> = rows
        .iter()
        .map(|r| (r.symbol.as_str(), r.day.as_str()))
        .collect();
    let syms: Vec<&str> = rows
        .iter()
        .map(|r| r.symbol.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let (Some(first_day), Some(last_day)) = (
        rows.iter().map(|r| r.day.as_str()).min(),
        rows.iter().map(|r| r.day.as_str()).max(),
    ) else {
        return Ok(0);
    };

    let mut found = 0;
    for chunk in chunk_for_sqlite(&syms) {
        let keys: Vec<(String, String)> = daily_quotes::table
            .filter(daily_quotes::symbol.eq_any(chunk.to_vec()))
            .filter(daily_quotes::day.between(first_day, last_day))
            .select((daily_quotes::symbol, daily_quotes::day))
            .load(conn)
            .into_core()?;
        found += keys
            .iter()
            .filter(|(s, d)| wanted.contains(&(s.as_str(), d.as_str())))
            .count();
    }
    Ok(found)
}

#[async_trait]
impl QuoteStore for QuoteRepository {
    async fn upsert_quotes(&self, quotes: &[Quote]) -> Result<UpsertOutcome> {
        if quotes.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        // Later duplicates of a key win
        let updated_at = Utc::now().to_rfc3339();
        let mut by_key: BTreeMap<(String, NaiveDate), QuoteDB> = BTreeMap::new();
        for quote in quotes {
            by_key.insert(
                (quote.symbol.clone(), quote.day),
                QuoteDB::from_quote(quote, &updated_at),
            );
        }
        let rows: Vec<QuoteDB> = by_key.into_values().collect();

        let outcome = self
            .writer
            .exec(move |conn| {
                let existing = count_existing(conn, &rows)?;
                for chunk in rows.chunks(QUOTE_WRITE_CHUNK) {
                    diesel::replace_into(daily_quotes::table)
                        .values(chunk)
                        .execute(conn)
                        .into_core()?;
                }
                Ok(UpsertOutcome {
                    inserted: rows.len() - existing,
                    updated: existing,
                })
            })
            .await?;

        debug!(
            "Upserted quotes: {} inserted, {} updated",
            outcome.inserted, outcome.updated
        );
        Ok(outcome)
    }

    async fn ensure_symbols(&self, symbols: &[String]) -> Result<usize> {
        if symbols.is_empty() {
            return Ok(0);
        }
        let created_at = Utc::now().to_rfc3339();
        let rows: Vec<SymbolDB> = symbols
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|s| SymbolDB {
                symbol: s.clone(),
                created_at: created_at.clone(),
            })
            .collect();

        self.writer
            .exec(move |conn| {
                let mut added = 0;
                for chunk in chunk_for_sqlite(&rows) {
                    added += diesel::insert_or_ignore_into(symbols::table)
                        .values(chunk)
                        .execute(conn)
                        .into_core()?;
                }
                Ok(added)
            })
            .await
    }

    fn read_latest(&self, symbols: &[String]) -> Result<HashMap<String, Quote>> {
        let mut result = HashMap::new();
        if symbols.is_empty() {
            return Ok(result);
        }
        let mut conn = get_connection(&self.pool)?;

        for chunk in chunk_for_sqlite(symbols) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "WITH ranked AS ( \
                    SELECT q.*, \
                        ROW_NUMBER() OVER (PARTITION BY q.symbol ORDER BY q.day DESC) AS rn \
                    FROM daily_quotes q WHERE q.symbol IN ({}) \
                ) \
                SELECT symbol, day, open, high, low, close, volume, currency, source, \
                    fetched_at, updated_at \
                FROM ranked WHERE rn = 1 ORDER BY symbol",
                placeholders
            );

            let mut query = sql_query(sql).into_boxed::<Sqlite>();
            for symbol in chunk {
                query = query.bind::<Text, _>(symbol.as_str());
            }

            let rows: Vec<QuoteDB> = query.load::<QuoteDB>(&mut conn).into_core()?;
            for row in rows {
                let quote = Quote::try_from(row).map_err(Error::from)?;
                result.insert(quote.symbol.clone(), quote);
            }
        }

        Ok(result)
    }

    fn list_symbols(&self) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        symbols::table
            .select(symbols::symbol)
            .order(symbols::symbol.asc())
            .load::<String>(&mut conn)
            .into_core()
    }

    fn quotes_in_range(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Quote>> {
        let mut conn = get_connection(&self.pool)?;
        let start = start.format(DAY_FORMAT).to_string();
        let end = end.format(DAY_FORMAT).to_string();

        daily_quotes::table
            .filter(daily_quotes::symbol.eq(symbol))
            .filter(daily_quotes::day.between(start, end))
            .order(daily_quotes::day.asc())
            .select(QuoteDB::as_select())
            .load::<QuoteDB>(&mut conn)
            .into_core()?
            .into_iter()
            .map(|row| Quote::try_from(row).map_err(Error::from))
            .collect()
    }
}
