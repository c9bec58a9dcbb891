//! Scheduling-state repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Point lookup and creation of the 1:1 scheduling state row.
//! - Version-guarded state writes (optimistic concurrency).
//! - Append-only review-log persistence.
//!
//! # Invariants
//! - `update_state_checked` writes nothing when the stored version differs
//!   from the expected token.
//! - Review logs are never updated or deleted here.

use crate::model::card::CardId;
use crate::model::sched::{CardState, ReviewLog, SchedState};
use crate::repo::{count_to_u32, datetime_from_millis, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

/// Repository interface for scheduling state and review logs.
pub trait SchedRepository {
    /// Point lookup of the scheduling state for one card.
    fn get_state(&self, card_uuid: CardId) -> RepoResult<Option<SchedState>>;
    /// Creates the state row at card-creation time (CRUD boundary).
    fn insert_state(&self, state: &SchedState) -> RepoResult<()>;
    /// Writes `next` only if the stored version still equals
    /// `expected_version`; fails with a version conflict otherwise.
    fn update_state_checked(&self, next: &SchedState, expected_version: i64) -> RepoResult<()>;
    /// Appends one immutable review-log row.
    fn append_review_log(&self, log: &ReviewLog) -> RepoResult<()>;
}

/// SQLite-backed scheduling state repository.
pub struct SqliteSchedRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSchedRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl SchedRepository for SqliteSchedRepository<'_> {
    fn get_state(&self, card_uuid: CardId) -> RepoResult<Option<SchedState>> {
        let mut stmt = self.conn.prepare(
            "SELECT card_uuid, user_uuid, state, due_at, interval_days, ease_factor,
                    learning_step, lapses, version
             FROM sched_states
             WHERE card_uuid = ?1;",
        )?;

        let mut rows = stmt.query([card_uuid.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_state_row(row)?));
        }

        Ok(None)
    }

    fn insert_state(&self, state: &SchedState) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO sched_states (
                card_uuid,
                user_uuid,
                state,
                due_at,
                interval_days,
                ease_factor,
                learning_step,
                lapses,
                version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                state.card_uuid.to_string(),
                state.user_uuid.to_string(),
                state.state.as_db(),
                state.due_at.timestamp_millis(),
                state.interval_days,
                state.ease_factor,
                i64::from(state.learning_step),
                i64::from(state.lapses),
                state.version,
            ],
        )?;

        Ok(())
    }

    fn update_state_checked(&self, next: &SchedState, expected_version: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE sched_states
             SET
                state = ?1,
                due_at = ?2,
                interval_days = ?3,
                ease_factor = ?4,
                learning_step = ?5,
                lapses = ?6,
                version = ?7,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE card_uuid = ?8
               AND version = ?9;",
            params![
                next.state.as_db(),
                next.due_at.timestamp_millis(),
                next.interval_days,
                next.ease_factor,
                i64::from(next.learning_step),
                i64::from(next.lapses),
                next.version,
                next.card_uuid.to_string(),
                expected_version,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::VersionConflict {
                card_uuid: next.card_uuid,
                expected: expected_version,
            });
        }

        Ok(())
    }

    fn append_review_log(&self, log: &ReviewLog) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO review_logs (
                card_uuid,
                user_uuid,
                rating,
                state_before,
                state_after,
                interval_before,
                interval_after,
                ease_factor_before,
                ease_factor_after,
                elapsed_ms,
                reviewed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                log.card_uuid.to_string(),
                log.user_uuid.to_string(),
                log.rating.as_db(),
                log.state_before.as_db(),
                log.state_after.as_db(),
                log.interval_before,
                log.interval_after,
                log.ease_factor_before,
                log.ease_factor_after,
                log.elapsed_ms,
                log.reviewed_at.timestamp_millis(),
            ],
        )?;

        Ok(())
    }
}

fn parse_state_row(row: &Row<'_>) -> RepoResult<SchedState> {
    let card_text: String = row.get("card_uuid")?;
    let user_text: String = row.get("user_uuid")?;

    let state_text: String = row.get("state")?;
    let state = CardState::parse_db(&state_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid state `{state_text}` in sched_states.state"))
    })?;

    Ok(SchedState {
        card_uuid: parse_uuid(&card_text, "sched_states.card_uuid")?,
        user_uuid: parse_uuid(&user_text, "sched_states.user_uuid")?,
        state,
        due_at: datetime_from_millis(row.get("due_at")?, "sched_states.due_at")?,
        interval_days: row.get("interval_days")?,
        ease_factor: row.get("ease_factor")?,
        learning_step: count_to_u32(row.get("learning_step")?, "sched_states.learning_step")?,
        lapses: count_to_u32(row.get("lapses")?, "sched_states.lapses")?,
        version: row.get("version")?,
    })
}
