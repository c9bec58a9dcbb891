//! Scheduling state machine records.
//!
//! # Responsibility
//! - Define card scheduling state, ratings, and the immutable review log.
//! - Map state/rating enums to their storage strings.
//!
//! # Invariants
//! - `ease_factor` stays within [`EF_MIN`, `EF_MAX`] after every mutation.
//! - `lapses` and `version` are monotonically non-decreasing.
//! - Exactly one `SchedState` exists per card for its whole lifetime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::model::card::{CardId, UserId};

/// Ease factor assigned to freshly created scheduling states.
pub const EF_INITIAL: f64 = 2.5;
/// Lower ease bound; lapses can never push ease below this.
pub const EF_MIN: f64 = 1.3;
/// Upper ease bound; easy bonuses can never push ease above this.
pub const EF_MAX: f64 = 3.0;

/// Scheduling lifecycle of one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    /// Never introduced, or explicitly reset.
    New,
    /// Walking the learning-step ladder.
    Learning,
    /// Graduated; intervals grow with the ease factor.
    Review,
}

impl CardState {
    /// Storage string for this state.
    pub fn as_db(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Learning => "learning",
            Self::Review => "review",
        }
    }

    /// Parses the storage string; `None` when unknown.
    pub fn parse_db(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "learning" => Some(Self::Learning),
            "review" => Some(Self::Review),
            _ => None,
        }
    }
}

/// Three-valued recall-quality signal supplied after showing a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Again,
    Good,
    Easy,
}

impl Rating {
    /// All ratings in grading order, for preview and test iteration.
    pub const ALL: [Rating; 3] = [Rating::Again, Rating::Good, Rating::Easy];

    /// Storage string for this rating.
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Again => "again",
            Self::Good => "good",
            Self::Easy => "easy",
        }
    }
}

/// Error for rating values arriving from outside the typed core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingParseError(pub String);

impl Display for RatingParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid rating `{}`; expected again|good|easy", self.0)
    }
}

impl Error for RatingParseError {}

impl FromStr for Rating {
    type Err = RatingParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "again" => Ok(Self::Again),
            "good" => Ok(Self::Good),
            "easy" => Ok(Self::Easy),
            other => Err(RatingParseError(other.to_string())),
        }
    }
}

/// Mutable scheduling state, 1:1 with a card.
///
/// Owned and exclusively mutated by the scheduling engine; `version` is the
/// optimistic-concurrency token checked on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedState {
    pub card_uuid: CardId,
    pub user_uuid: UserId,
    pub state: CardState,
    pub due_at: DateTime<Utc>,
    pub interval_days: f64,
    pub ease_factor: f64,
    /// Index into the configured learning-step ladder.
    pub learning_step: u32,
    pub lapses: u32,
    pub version: i64,
}

impl SchedState {
    /// Initial state for a freshly created card, due immediately.
    pub fn initial(card_uuid: CardId, user_uuid: UserId, now: DateTime<Utc>) -> Self {
        Self {
            card_uuid,
            user_uuid,
            state: CardState::New,
            due_at: now,
            interval_days: 0.0,
            ease_factor: EF_INITIAL,
            learning_step: 0,
            lapses: 0,
            version: 0,
        }
    }
}

/// Immutable record of one applied rating.
///
/// Created only by the scheduling engine; never mutated or deleted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewLog {
    pub card_uuid: CardId,
    pub user_uuid: UserId,
    pub rating: Rating,
    pub state_before: CardState,
    pub state_after: CardState,
    pub interval_before: f64,
    pub interval_after: f64,
    pub ease_factor_before: f64,
    pub ease_factor_after: f64,
    /// Time the learner spent on the card, when the client reports it.
    pub elapsed_ms: Option<i64>,
    pub reviewed_at: DateTime<Utc>,
}
