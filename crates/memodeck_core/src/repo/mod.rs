//! Storage repositories over the migrated SQLite schema.
//!
//! # Responsibility
//! - Keep SQL details inside the core persistence boundary.
//! - Share the repository error taxonomy across card/sched/counter stores.
//!
//! # Invariants
//! - Read paths must reject invalid persisted state instead of masking it.
//! - Write paths never mutate rows outside the caller's user scope.

use crate::db::DbError;
use crate::model::card::CardId;
use chrono::{DateTime, NaiveDate, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod card_repo;
pub mod counter_repo;
pub mod sched_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Persisted data failed to parse into domain types.
    InvalidData(String),
    /// A version-guarded write found a different token than expected.
    VersionConflict { card_uuid: CardId, expected: i64 },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::VersionConflict { card_uuid, expected } => write!(
                f,
                "scheduling state version mismatch for card {card_uuid}: expected {expected}"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
            Self::VersionConflict { .. } => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn parse_day(value: &str, column: &str) -> RepoResult<NaiveDate> {
    value
        .parse::<NaiveDate>()
        .map_err(|_| RepoError::InvalidData(format!("invalid day value `{value}` in {column}")))
}

pub(crate) fn datetime_from_millis(value: i64, column: &str) -> RepoResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid timestamp `{value}` in {column}"))
    })
}

pub(crate) fn count_to_u32(value: i64, column: &str) -> RepoResult<u32> {
    u32::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid count `{value}` in {column}")))
}
