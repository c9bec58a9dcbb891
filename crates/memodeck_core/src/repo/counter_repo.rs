//! Daily counter store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Get-or-create per-user and per-user-per-deck daily counter rows,
//!   idempotently under concurrent first touch.
//! - Apply additive increments to counted fields.
//! - Resolve per-user global limits and learning-step settings.
//!
//! # Invariants
//! - A uniqueness violation during create is recovered by re-reading the
//!   winning row, never surfaced to callers.
//! - Increments only ever add; counted fields never decrease.

use crate::model::card::{DeckId, UserId};
use crate::model::counter::{
    CounterDelta, DailyCounter, DailyDeckCounter, DeckUsage, GlobalLimits,
};
use crate::repo::{count_to_u32, parse_day, parse_uuid, RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row};
use std::collections::HashMap;

/// Store interface for daily counters and per-user limit settings.
pub trait CounterStore {
    /// Read-only lookup of the user's counter row for one day.
    fn daily_counter(&self, user_uuid: UserId, day: NaiveDate)
        -> RepoResult<Option<DailyCounter>>;
    /// Returns today's counter row for the user, creating it lazily.
    fn get_or_create_daily(&self, user_uuid: UserId, day: NaiveDate) -> RepoResult<DailyCounter>;
    /// Returns today's per-deck counter row, creating it lazily.
    fn get_or_create_deck(
        &self,
        user_uuid: UserId,
        deck_uuid: DeckId,
        day: NaiveDate,
    ) -> RepoResult<DailyDeckCounter>;
    /// Adds `delta` to the user's daily counter, creating the row if needed.
    fn add_to_daily(
        &self,
        user_uuid: UserId,
        day: NaiveDate,
        delta: &CounterDelta,
    ) -> RepoResult<()>;
    /// Adds to one deck's daily counter, creating the row if needed.
    fn add_to_deck(
        &self,
        user_uuid: UserId,
        deck_uuid: DeckId,
        day: NaiveDate,
        introduced_new: u32,
        reviews_done: u32,
    ) -> RepoResult<()>;
    /// Used-today totals for the given decks; missing rows read as zero.
    fn deck_usage(
        &self,
        user_uuid: UserId,
        deck_uuids: &[DeckId],
        day: NaiveDate,
    ) -> RepoResult<HashMap<DeckId, DeckUsage>>;
    /// Global daily caps from user settings, with documented defaults when
    /// no row or NULL fields exist.
    fn global_limits(&self, user_uuid: UserId) -> RepoResult<GlobalLimits>;
    /// Raw learning-step ladder text from user settings, when present.
    fn learning_steps_text(&self, user_uuid: UserId) -> RepoResult<Option<String>>;
}

/// SQLite-backed counter store.
pub struct SqliteCounterStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCounterStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn read_daily(&self, user_uuid: UserId, day: NaiveDate) -> RepoResult<Option<DailyCounter>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_uuid, day, introduced_new, reviews_done,
                    again_count, good_count, easy_count
             FROM daily_counters
             WHERE user_uuid = ?1 AND day = ?2;",
        )?;

        let mut rows = stmt.query(params![user_uuid.to_string(), day.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_daily_row(row)?));
        }

        Ok(None)
    }

    fn read_deck(
        &self,
        user_uuid: UserId,
        deck_uuid: DeckId,
        day: NaiveDate,
    ) -> RepoResult<Option<DailyDeckCounter>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_uuid, deck_uuid, day, introduced_new, reviews_done
             FROM daily_deck_counters
             WHERE user_uuid = ?1 AND deck_uuid = ?2 AND day = ?3;",
        )?;

        let mut rows = stmt.query(params![
            user_uuid.to_string(),
            deck_uuid.to_string(),
            day.to_string()
        ])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_deck_row(row)?));
        }

        Ok(None)
    }
}

impl CounterStore for SqliteCounterStore<'_> {
    fn daily_counter(
        &self,
        user_uuid: UserId,
        day: NaiveDate,
    ) -> RepoResult<Option<DailyCounter>> {
        self.read_daily(user_uuid, day)
    }

    fn get_or_create_daily(&self, user_uuid: UserId, day: NaiveDate) -> RepoResult<DailyCounter> {
        if let Some(counter) = self.read_daily(user_uuid, day)? {
            return Ok(counter);
        }

        let inserted = self.conn.execute(
            "INSERT INTO daily_counters (user_uuid, day) VALUES (?1, ?2);",
            params![user_uuid.to_string(), day.to_string()],
        );
        discard_create_race(inserted)?;

        self.read_daily(user_uuid, day)?.ok_or_else(|| {
            RepoError::InvalidData(format!(
                "daily counter missing after get-or-create for user {user_uuid} day {day}"
            ))
        })
    }

    fn get_or_create_deck(
        &self,
        user_uuid: UserId,
        deck_uuid: DeckId,
        day: NaiveDate,
    ) -> RepoResult<DailyDeckCounter> {
        if let Some(counter) = self.read_deck(user_uuid, deck_uuid, day)? {
            return Ok(counter);
        }

        let inserted = self.conn.execute(
            "INSERT INTO daily_deck_counters (user_uuid, deck_uuid, day) VALUES (?1, ?2, ?3);",
            params![
                user_uuid.to_string(),
                deck_uuid.to_string(),
                day.to_string()
            ],
        );
        discard_create_race(inserted)?;

        self.read_deck(user_uuid, deck_uuid, day)?.ok_or_else(|| {
            RepoError::InvalidData(format!(
                "deck counter missing after get-or-create for user {user_uuid} deck {deck_uuid} day {day}"
            ))
        })
    }

    fn add_to_daily(
        &self,
        user_uuid: UserId,
        day: NaiveDate,
        delta: &CounterDelta,
    ) -> RepoResult<()> {
        self.get_or_create_daily(user_uuid, day)?;

        self.conn.execute(
            "UPDATE daily_counters
             SET
                introduced_new = introduced_new + ?1,
                reviews_done = reviews_done + ?2,
                again_count = again_count + ?3,
                good_count = good_count + ?4,
                easy_count = easy_count + ?5,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE user_uuid = ?6 AND day = ?7;",
            params![
                i64::from(delta.introduced_new),
                i64::from(delta.reviews_done),
                i64::from(delta.again_count),
                i64::from(delta.good_count),
                i64::from(delta.easy_count),
                user_uuid.to_string(),
                day.to_string(),
            ],
        )?;

        Ok(())
    }

    fn add_to_deck(
        &self,
        user_uuid: UserId,
        deck_uuid: DeckId,
        day: NaiveDate,
        introduced_new: u32,
        reviews_done: u32,
    ) -> RepoResult<()> {
        self.get_or_create_deck(user_uuid, deck_uuid, day)?;

        self.conn.execute(
            "UPDATE daily_deck_counters
             SET
                introduced_new = introduced_new + ?1,
                reviews_done = reviews_done + ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE user_uuid = ?3 AND deck_uuid = ?4 AND day = ?5;",
            params![
                i64::from(introduced_new),
                i64::from(reviews_done),
                user_uuid.to_string(),
                deck_uuid.to_string(),
                day.to_string(),
            ],
        )?;

        Ok(())
    }

    fn deck_usage(
        &self,
        user_uuid: UserId,
        deck_uuids: &[DeckId],
        day: NaiveDate,
    ) -> RepoResult<HashMap<DeckId, DeckUsage>> {
        let mut usage: HashMap<DeckId, DeckUsage> = deck_uuids
            .iter()
            .map(|deck_uuid| (*deck_uuid, DeckUsage::default()))
            .collect();

        if deck_uuids.is_empty() {
            return Ok(usage);
        }

        let placeholders = vec!["?"; deck_uuids.len()].join(", ");
        let sql = format!(
            "SELECT deck_uuid, introduced_new, reviews_done
             FROM daily_deck_counters
             WHERE user_uuid = ? AND day = ? AND deck_uuid IN ({placeholders});"
        );

        let mut bind_values: Vec<Value> = vec![
            Value::Text(user_uuid.to_string()),
            Value::Text(day.to_string()),
        ];
        for deck_uuid in deck_uuids {
            bind_values.push(Value::Text(deck_uuid.to_string()));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        while let Some(row) = rows.next()? {
            let deck_text: String = row.get("deck_uuid")?;
            let deck_uuid = parse_uuid(&deck_text, "daily_deck_counters.deck_uuid")?;
            usage.insert(
                deck_uuid,
                DeckUsage {
                    introduced_new: count_to_u32(
                        row.get("introduced_new")?,
                        "daily_deck_counters.introduced_new",
                    )?,
                    reviews_done: count_to_u32(
                        row.get("reviews_done")?,
                        "daily_deck_counters.reviews_done",
                    )?,
                },
            );
        }

        Ok(usage)
    }

    fn global_limits(&self, user_uuid: UserId) -> RepoResult<GlobalLimits> {
        let mut stmt = self.conn.prepare(
            "SELECT new_per_day, review_per_day
             FROM user_settings
             WHERE user_uuid = ?1;",
        )?;

        let mut rows = stmt.query([user_uuid.to_string()])?;
        let defaults = GlobalLimits::default();
        if let Some(row) = rows.next()? {
            let new_per_day = match row.get::<_, Option<i64>>("new_per_day")? {
                Some(value) => count_to_u32(value, "user_settings.new_per_day")?,
                None => defaults.new_per_day,
            };
            let review_per_day = match row.get::<_, Option<i64>>("review_per_day")? {
                Some(value) => count_to_u32(value, "user_settings.review_per_day")?,
                None => defaults.review_per_day,
            };
            return Ok(GlobalLimits {
                new_per_day,
                review_per_day,
            });
        }

        Ok(defaults)
    }

    fn learning_steps_text(&self, user_uuid: UserId) -> RepoResult<Option<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT learning_steps
             FROM user_settings
             WHERE user_uuid = ?1;",
        )?;

        let mut rows = stmt.query([user_uuid.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(row.get("learning_steps")?));
        }

        Ok(None)
    }
}

/// Swallows exactly the uniqueness violation raised when a concurrent first
/// touch already created the row; every other error propagates.
fn discard_create_race(result: rusqlite::Result<usize>) -> RepoResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn parse_daily_row(row: &Row<'_>) -> RepoResult<DailyCounter> {
    let user_text: String = row.get("user_uuid")?;
    let day_text: String = row.get("day")?;

    Ok(DailyCounter {
        user_uuid: parse_uuid(&user_text, "daily_counters.user_uuid")?,
        day: parse_day(&day_text, "daily_counters.day")?,
        introduced_new: count_to_u32(row.get("introduced_new")?, "daily_counters.introduced_new")?,
        reviews_done: count_to_u32(row.get("reviews_done")?, "daily_counters.reviews_done")?,
        again_count: count_to_u32(row.get("again_count")?, "daily_counters.again_count")?,
        good_count: count_to_u32(row.get("good_count")?, "daily_counters.good_count")?,
        easy_count: count_to_u32(row.get("easy_count")?, "daily_counters.easy_count")?,
    })
}

fn parse_deck_row(row: &Row<'_>) -> RepoResult<DailyDeckCounter> {
    let user_text: String = row.get("user_uuid")?;
    let deck_text: String = row.get("deck_uuid")?;
    let day_text: String = row.get("day")?;

    Ok(DailyDeckCounter {
        user_uuid: parse_uuid(&user_text, "daily_deck_counters.user_uuid")?,
        deck_uuid: parse_uuid(&deck_text, "daily_deck_counters.deck_uuid")?,
        day: parse_day(&day_text, "daily_deck_counters.day")?,
        introduced_new: count_to_u32(
            row.get("introduced_new")?,
            "daily_deck_counters.introduced_new",
        )?,
        reviews_done: count_to_u32(row.get("reviews_done")?, "daily_deck_counters.reviews_done")?,
    })
}
