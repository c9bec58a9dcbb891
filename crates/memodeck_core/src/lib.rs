//! Core scheduling and session-assembly logic for MemoDeck.
//! This crate is the single source of truth for spaced-repetition invariants.

pub mod clock;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod sched;
pub mod service;

pub use clock::{Clock, FixedClock, SystemClock};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::card::{Card, CardId, CardStub, Deck, DeckId, UserId};
pub use model::counter::{
    CounterDelta, DailyCounter, DailyDeckCounter, DeckUsage, DueCounts, GlobalLimits,
};
pub use model::sched::{CardState, Rating, RatingParseError, ReviewLog, SchedState};
pub use repo::card_repo::{CardRepository, PoolEntry, SqliteCardRepository};
pub use repo::counter_repo::{CounterStore, SqliteCounterStore};
pub use repo::sched_repo::{SchedRepository, SqliteSchedRepository};
pub use repo::{RepoError, RepoResult};
pub use sched::engine::{
    next_step, preview_due_times, PreviewTimes, SchedStep, SchedulerConfig, SchedulerPolicy,
};
pub use service::review_service::{RatingOutcome, RatingRequest, ReviewError, ReviewService};
pub use service::session_service::{
    DeckAllocation, QueueStats, RemainingQuota, SessionError, SessionMeta, SessionScope,
    SessionSections, SessionService, TodayProgress,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
