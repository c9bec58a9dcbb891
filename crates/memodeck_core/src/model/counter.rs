//! Daily aggregate counter records.
//!
//! # Responsibility
//! - Define per-user-per-day and per-user-per-deck-per-day counter rows.
//! - Define the limit and count records session building composes.
//!
//! # Invariants
//! - At most one row exists per `(user, day)` and `(user, deck, day)`.
//! - Counted fields only ever grow within a day.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::card::{DeckId, UserId};
use crate::model::sched::Rating;

/// Global new-card cap applied when a user has no stored settings.
pub const DEFAULT_NEW_PER_DAY: u32 = 12;
/// Global review cap applied when a user has no stored settings.
pub const DEFAULT_REVIEW_PER_DAY: u32 = 150;

/// Per-user aggregate counters for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounter {
    pub user_uuid: UserId,
    pub day: NaiveDate,
    pub introduced_new: u32,
    pub reviews_done: u32,
    pub again_count: u32,
    pub good_count: u32,
    pub easy_count: u32,
}

impl DailyCounter {
    /// Zero-valued counter for a day that has not been touched yet.
    pub fn empty(user_uuid: UserId, day: NaiveDate) -> Self {
        Self {
            user_uuid,
            day,
            introduced_new: 0,
            reviews_done: 0,
            again_count: 0,
            good_count: 0,
            easy_count: 0,
        }
    }
}

/// Per-deck slice of the daily counters, used to enforce per-deck caps
/// inside an all-decks session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyDeckCounter {
    pub user_uuid: UserId,
    pub deck_uuid: DeckId,
    pub day: NaiveDate,
    pub introduced_new: u32,
    pub reviews_done: u32,
}

/// Used-today totals consulted when resolving remaining deck capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckUsage {
    pub introduced_new: u32,
    pub reviews_done: u32,
}

/// Global per-user daily caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLimits {
    pub new_per_day: u32,
    pub review_per_day: u32,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            new_per_day: DEFAULT_NEW_PER_DAY,
            review_per_day: DEFAULT_REVIEW_PER_DAY,
        }
    }
}

/// Due-card counts by section for queue display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueCounts {
    pub new: u32,
    pub learning: u32,
    pub review: u32,
}

/// Additive field deltas applied to one daily counter row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub introduced_new: u32,
    pub reviews_done: u32,
    pub again_count: u32,
    pub good_count: u32,
    pub easy_count: u32,
}

impl CounterDelta {
    /// Delta produced by one logged rating application.
    ///
    /// `introduced_new` is set when the card left the `new` state with this
    /// rating.
    pub fn for_rating(rating: Rating, introduced_new: bool) -> Self {
        let mut delta = Self {
            introduced_new: u32::from(introduced_new),
            reviews_done: 1,
            ..Self::default()
        };
        match rating {
            Rating::Again => delta.again_count = 1,
            Rating::Good => delta.good_count = 1,
            Rating::Easy => delta.easy_count = 1,
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::{CounterDelta, GlobalLimits};
    use crate::model::sched::Rating;

    #[test]
    fn default_limits_match_documented_values() {
        let limits = GlobalLimits::default();
        assert_eq!(limits.new_per_day, 12);
        assert_eq!(limits.review_per_day, 150);
    }

    #[test]
    fn rating_delta_counts_one_review_and_one_rating_bucket() {
        let delta = CounterDelta::for_rating(Rating::Easy, true);
        assert_eq!(delta.introduced_new, 1);
        assert_eq!(delta.reviews_done, 1);
        assert_eq!(delta.easy_count, 1);
        assert_eq!(delta.again_count + delta.good_count, 0);
    }
}
