//! SM-2 style scheduling state machine.
//!
//! # Responsibility
//! - Compute the next scheduling state for one (state, rating, instant)
//!   triple.
//! - Keep the two supported graduation policies behind an explicit switch.
//!
//! # Invariants
//! - `ease_factor` is clamped to [`EF_MIN`, `EF_MAX`] after every
//!   adjustment, never before.
//! - Pure: no storage access, no side effects beyond the returned value.

use chrono::{DateTime, Duration, Utc};

use crate::model::sched::{CardState, Rating, SchedState, EF_MAX, EF_MIN};

/// Default learning-step ladder in minutes: 10 minutes, then 1 day.
pub const DEFAULT_LEARNING_STEPS_MINUTES: [i64; 2] = [10, 1440];

/// First review interval after graduation, in days.
const REVIEW_INTERVAL_FIRST: f64 = 1.0;
/// Second review interval, in days.
const REVIEW_INTERVAL_SECOND: f64 = 6.0;
/// Interval multiplier applied on a review lapse.
const LAPSE_MULTIPLIER: f64 = 0.5;
/// Interval multiplier applied on an easy review.
const EASY_BONUS: f64 = 1.3;
/// Ease delta on graduating or reviewing easy.
const EASE_BONUS_EASY: f64 = 0.15;
/// Ease delta on a review lapse.
const EASE_PENALTY_LAPSE: f64 = 0.2;

/// Graduation policy for new cards.
///
/// Production data carries two divergent behaviors with different due-date
/// and counter semantics; callers must pick one explicitly, the engine never
/// mixes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerPolicy {
    /// New cards walk the learning-step ladder before reaching review.
    #[default]
    StepLadder,
    /// New cards graduate straight to review on good/easy. `again` keeps the
    /// card `new` with its due instant untouched (an in-session repeat) and
    /// is never logged or counted.
    DirectToReview,
}

/// Engine configuration: graduation policy, step ladder, counter scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub policy: SchedulerPolicy,
    /// Learning-step ladder in minutes; must not be empty.
    pub learning_steps_minutes: Vec<i64>,
    /// Maintain per-deck daily counters alongside the global ones.
    pub per_deck_tracking: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SchedulerPolicy::default(),
            learning_steps_minutes: DEFAULT_LEARNING_STEPS_MINUTES.to_vec(),
            per_deck_tracking: true,
        }
    }
}

impl SchedulerConfig {
    /// Parses the comma-separated minute ladder stored in user settings
    /// (e.g. `"10,1440"`). Returns `None` when the text holds no positive
    /// integers.
    pub fn steps_from_text(text: &str) -> Option<Vec<i64>> {
        let steps: Vec<i64> = text
            .split(',')
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .filter(|minutes| *minutes > 0)
            .collect();
        if steps.is_empty() {
            None
        } else {
            Some(steps)
        }
    }

    fn first_step_minutes(&self) -> i64 {
        self.learning_steps_minutes
            .first()
            .copied()
            .unwrap_or(DEFAULT_LEARNING_STEPS_MINUTES[0])
    }
}

/// Result of one engine step: the replacement values for the mutable
/// scheduling fields. Lapse and version bookkeeping stay with the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedStep {
    pub state: CardState,
    pub due_at: DateTime<Utc>,
    pub interval_days: f64,
    pub ease_factor: f64,
    pub learning_step: u32,
}

/// Would-be due instants for each rating, for review UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewTimes {
    pub again: DateTime<Utc>,
    pub good: DateTime<Utc>,
    pub easy: DateTime<Utc>,
}

/// Computes the next scheduling state for `current` graded with `rating`
/// at `now`.
///
/// Pure function of its arguments plus the configured constants; persistence
/// is the caller's responsibility.
pub fn next_step(
    current: &SchedState,
    rating: Rating,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> SchedStep {
    match current.state {
        CardState::New => next_from_new(current, rating, now, config),
        CardState::Learning => next_from_learning(current, rating, now, config),
        CardState::Review => next_from_review(current, rating, now),
    }
}

/// Computes the due instant each rating would produce, without mutating
/// anything.
pub fn preview_due_times(
    current: &SchedState,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> PreviewTimes {
    PreviewTimes {
        again: next_step(current, Rating::Again, now, config).due_at,
        good: next_step(current, Rating::Good, now, config).due_at,
        easy: next_step(current, Rating::Easy, now, config).due_at,
    }
}

fn next_from_new(
    current: &SchedState,
    rating: Rating,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> SchedStep {
    match (config.policy, rating) {
        (SchedulerPolicy::StepLadder, Rating::Again | Rating::Good) => {
            first_learning_step(current, now, config)
        }
        (SchedulerPolicy::StepLadder, Rating::Easy) => graduate(now, bump_ease(current.ease_factor)),
        (SchedulerPolicy::DirectToReview, Rating::Again) => SchedStep {
            state: CardState::New,
            due_at: current.due_at,
            interval_days: 0.0,
            ease_factor: current.ease_factor,
            learning_step: 0,
        },
        (SchedulerPolicy::DirectToReview, Rating::Good) => graduate(now, current.ease_factor),
        (SchedulerPolicy::DirectToReview, Rating::Easy) => {
            graduate(now, bump_ease(current.ease_factor))
        }
    }
}

fn next_from_learning(
    current: &SchedState,
    rating: Rating,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> SchedStep {
    match rating {
        // Failed recall resets to the first step.
        Rating::Again => first_learning_step(current, now, config),
        Rating::Good => {
            let next_index = current.learning_step as usize + 1;
            match config.learning_steps_minutes.get(next_index) {
                Some(&minutes) => SchedStep {
                    state: CardState::Learning,
                    due_at: now + Duration::minutes(minutes),
                    interval_days: 0.0,
                    ease_factor: current.ease_factor,
                    learning_step: next_index as u32,
                },
                // Ladder exhausted: graduate with ease unchanged.
                None => graduate(now, current.ease_factor),
            }
        }
        Rating::Easy => graduate(now, bump_ease(current.ease_factor)),
    }
}

fn next_from_review(current: &SchedState, rating: Rating, now: DateTime<Utc>) -> SchedStep {
    let interval = current.interval_days;
    let ease = current.ease_factor;

    match rating {
        Rating::Again => {
            let next_interval = (interval * LAPSE_MULTIPLIER).round().max(1.0);
            SchedStep {
                state: CardState::Review,
                due_at: now + Duration::days(next_interval as i64),
                interval_days: next_interval,
                ease_factor: clamp_ease(ease - EASE_PENALTY_LAPSE),
                learning_step: 0,
            }
        }
        Rating::Good => {
            let next_interval = if interval < REVIEW_INTERVAL_SECOND {
                REVIEW_INTERVAL_SECOND
            } else {
                (interval * ease).round()
            };
            SchedStep {
                state: CardState::Review,
                due_at: now + Duration::days(next_interval as i64),
                interval_days: next_interval,
                ease_factor: ease,
                learning_step: 0,
            }
        }
        Rating::Easy => {
            let next_interval = if interval < REVIEW_INTERVAL_SECOND {
                (REVIEW_INTERVAL_SECOND * EASY_BONUS).round()
            } else {
                (interval * ease * EASY_BONUS).round()
            };
            SchedStep {
                state: CardState::Review,
                due_at: now + Duration::days(next_interval as i64),
                interval_days: next_interval,
                ease_factor: clamp_ease(ease + EASE_BONUS_EASY),
                learning_step: 0,
            }
        }
    }
}

fn first_learning_step(
    current: &SchedState,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> SchedStep {
    SchedStep {
        state: CardState::Learning,
        due_at: now + Duration::minutes(config.first_step_minutes()),
        interval_days: 0.0,
        ease_factor: current.ease_factor,
        learning_step: 0,
    }
}

fn graduate(now: DateTime<Utc>, ease_factor: f64) -> SchedStep {
    SchedStep {
        state: CardState::Review,
        due_at: now + Duration::days(REVIEW_INTERVAL_FIRST as i64),
        interval_days: REVIEW_INTERVAL_FIRST,
        ease_factor,
        learning_step: 0,
    }
}

fn bump_ease(ease: f64) -> f64 {
    clamp_ease(ease + EASE_BONUS_EASY)
}

fn clamp_ease(value: f64) -> f64 {
    value.clamp(EF_MIN, EF_MAX)
}
