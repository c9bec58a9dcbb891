//! Rating application use-case.
//!
//! # Responsibility
//! - Apply one graded rating as a single all-or-nothing unit: state write,
//!   review-log append, and daily counter updates.
//! - Enforce the optimistic-concurrency version token.
//!
//! # Invariants
//! - No partial commits: any detected error aborts the whole transaction.
//! - `MissingSchedState` is a data-integrity failure, never auto-repaired.
//! - Counters and scheduling state never diverge.

use crate::clock::Clock;
use crate::model::card::{CardId, UserId};
use crate::model::counter::CounterDelta;
use crate::model::sched::{CardState, Rating, ReviewLog, SchedState};
use crate::repo::card_repo::{CardRepository, SqliteCardRepository};
use crate::repo::counter_repo::{CounterStore, SqliteCounterStore};
use crate::repo::sched_repo::{SchedRepository, SqliteSchedRepository};
use crate::repo::RepoError;
use crate::sched::engine::{next_step, preview_due_times, PreviewTimes, SchedulerConfig, SchedulerPolicy};
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from rating application.
#[derive(Debug)]
pub enum ReviewError {
    /// Card does not exist or is not owned by the user.
    CardNotFound(CardId),
    /// Card exists without a scheduling state row; surfaced as a server
    /// error, never repaired here.
    MissingSchedState(CardId),
    /// The caller's version token is stale; re-read and retry.
    Conflict { card_uuid: CardId, expected: i64 },
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for ReviewError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CardNotFound(card_uuid) => write!(f, "card not found: {card_uuid}"),
            Self::MissingSchedState(card_uuid) => {
                write!(f, "card {card_uuid} has no scheduling state")
            }
            Self::Conflict { card_uuid, expected } => write!(
                f,
                "stale scheduling version {expected} for card {card_uuid}; re-read and retry"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReviewError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ReviewError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::VersionConflict { card_uuid, expected } => {
                Self::Conflict { card_uuid, expected }
            }
            other => Self::Repo(other),
        }
    }
}

/// One rating application request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingRequest {
    pub card_uuid: CardId,
    pub rating: Rating,
    /// Version observed when the card was shown; stale tokens are rejected
    /// with [`ReviewError::Conflict`]. `None` skips the caller-side check.
    pub expected_version: Option<i64>,
    /// Time the learner spent on the card, when the client reports it.
    pub elapsed_ms: Option<i64>,
    /// Overrides the service clock, for deterministic callers.
    pub now: Option<DateTime<Utc>>,
}

impl RatingRequest {
    /// Request carrying only the rating, with every optional field unset.
    pub fn new(card_uuid: CardId, rating: Rating) -> Self {
        Self {
            card_uuid,
            rating,
            expected_version: None,
            elapsed_ms: None,
            now: None,
        }
    }
}

/// Result of one applied rating.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingOutcome {
    /// Scheduling state after the transition.
    pub state: SchedState,
    /// False when the active policy treats the rating as an uncounted
    /// in-session repeat (no review log, no counter movement).
    pub logged: bool,
}

/// Rating application service over one connection.
pub struct ReviewService<'conn, C: Clock> {
    conn: &'conn mut Connection,
    clock: C,
    config: SchedulerConfig,
}

impl<'conn, C: Clock> ReviewService<'conn, C> {
    /// Creates a service from a migrated connection, clock, and engine
    /// configuration.
    pub fn new(conn: &'conn mut Connection, clock: C, config: SchedulerConfig) -> Self {
        Self {
            conn,
            clock,
            config,
        }
    }

    /// Applies one rating atomically: scheduling state, review log, and
    /// daily counters move together or not at all.
    pub fn apply_rating(
        &mut self,
        user_uuid: UserId,
        request: &RatingRequest,
    ) -> Result<RatingOutcome, ReviewError> {
        let now = request.now.unwrap_or_else(|| self.clock.now());
        let today = now.date_naive();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RepoError::from)?;
        let outcome = apply_in_tx(&tx, user_uuid, request, now, today, &self.config)?;
        tx.commit().map_err(RepoError::from)?;

        info!(
            "event=rating_applied module=review status=ok card={} rating={} state={} interval_days={} logged={}",
            request.card_uuid,
            request.rating.as_db(),
            outcome.state.state.as_db(),
            outcome.state.interval_days,
            outcome.logged
        );
        Ok(outcome)
    }

    /// Would-be due instants for each rating of one card, read-only.
    pub fn preview(
        &self,
        card_uuid: CardId,
        now: Option<DateTime<Utc>>,
    ) -> Result<PreviewTimes, ReviewError> {
        let now = now.unwrap_or_else(|| self.clock.now());
        let sched = SqliteSchedRepository::new(&*self.conn);
        let current = sched
            .get_state(card_uuid)?
            .ok_or(ReviewError::MissingSchedState(card_uuid))?;
        Ok(preview_due_times(&current, now, &self.config))
    }
}

fn apply_in_tx(
    conn: &Connection,
    user_uuid: UserId,
    request: &RatingRequest,
    now: DateTime<Utc>,
    today: chrono::NaiveDate,
    config: &SchedulerConfig,
) -> Result<RatingOutcome, ReviewError> {
    let cards = SqliteCardRepository::new(conn);
    let sched = SqliteSchedRepository::new(conn);
    let counters = SqliteCounterStore::new(conn);

    let card = cards
        .get_card(user_uuid, request.card_uuid)?
        .ok_or(ReviewError::CardNotFound(request.card_uuid))?;
    let current = sched
        .get_state(request.card_uuid)?
        .ok_or(ReviewError::MissingSchedState(request.card_uuid))?;

    if let Some(expected) = request.expected_version {
        if expected != current.version {
            return Err(ReviewError::Conflict {
                card_uuid: request.card_uuid,
                expected,
            });
        }
    }

    let step = next_step(&current, request.rating, now, config);
    let mut next = current.clone();
    next.state = step.state;
    next.due_at = step.due_at;
    next.interval_days = step.interval_days;
    next.ease_factor = step.ease_factor;
    next.learning_step = step.learning_step;
    next.version = current.version + 1;
    if request.rating == Rating::Again && current.state == CardState::Review {
        next.lapses = current.lapses + 1;
    }

    sched.update_state_checked(&next, current.version)?;

    let logged = should_log(config.policy, request.rating);
    if logged {
        sched.append_review_log(&ReviewLog {
            card_uuid: request.card_uuid,
            user_uuid,
            rating: request.rating,
            state_before: current.state,
            state_after: next.state,
            interval_before: current.interval_days,
            interval_after: next.interval_days,
            ease_factor_before: current.ease_factor,
            ease_factor_after: next.ease_factor,
            elapsed_ms: request.elapsed_ms,
            reviewed_at: now,
        })?;

        let introduced = current.state == CardState::New;
        let delta = CounterDelta::for_rating(request.rating, introduced);
        counters.add_to_daily(user_uuid, today, &delta)?;
        if config.per_deck_tracking {
            counters.add_to_deck(
                user_uuid,
                card.deck_uuid,
                today,
                delta.introduced_new,
                delta.reviews_done,
            )?;
        }
    }

    Ok(RatingOutcome { state: next, logged })
}

/// The direct-to-review policy treats `again` as an in-session repeat:
/// nothing is logged and no counter moves.
fn should_log(policy: SchedulerPolicy, rating: Rating) -> bool {
    match policy {
        SchedulerPolicy::StepLadder => true,
        SchedulerPolicy::DirectToReview => rating != Rating::Again,
    }
}
