//! Session assembly and queue statistics use-cases.
//!
//! # Responsibility
//! - Build bounded, fair study sessions across decks under global and
//!   per-deck daily caps.
//! - Derive user-facing queue counts and progress statistics.
//!
//! # Invariants
//! - Per-deck and global caps are never exceeded for the sections they
//!   constrain; the learning section is always exhaustive.
//! - Deck sweep order is alphabetical by name with uuid tie-break.
//! - Session building mutates nothing besides lazy counter creation.
//! - Single-deck sessions consult only that deck's own cap and usage.

use crate::clock::Clock;
use crate::model::card::{CardStub, DeckId, UserId};
use crate::model::counter::{DailyCounter, DeckUsage, DueCounts, GlobalLimits};
use crate::model::sched::CardState;
use crate::repo::card_repo::{CardRepository, PoolEntry, SqliteCardRepository};
use crate::repo::counter_repo::{CounterStore, SqliteCounterStore};
use crate::repo::RepoError;
use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

const FRONT_PREVIEW_MAX_CHARS: usize = 100;

/// Deck scope for one session build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope {
    /// Every deck owned by the user, under global and per-deck caps.
    AllDecks,
    /// One deck under its own cap; global counters are never consulted.
    SingleDeck(DeckId),
}

impl SessionScope {
    /// Parses the wire form (`"all"` / `"deck"` plus id) used by the layer
    /// above the core.
    pub fn parse(scope: &str, deck_uuid: Option<DeckId>) -> Result<Self, SessionError> {
        match (scope, deck_uuid) {
            ("all", _) => Ok(Self::AllDecks),
            ("deck", Some(deck_uuid)) => Ok(Self::SingleDeck(deck_uuid)),
            ("deck", None) => Err(SessionError::InvalidScope(
                "deck scope requires a deck id".to_string(),
            )),
            (other, _) => Err(SessionError::InvalidScope(format!(
                "unknown scope `{other}`; expected all|deck"
            ))),
        }
    }
}

/// Errors from session building and queue statistics.
#[derive(Debug)]
pub enum SessionError {
    /// Malformed scope input from the layer above.
    InvalidScope(String),
    /// Deck absent or not owned by the user.
    DeckNotFound(DeckId),
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidScope(message) => write!(f, "invalid session scope: {message}"),
            Self::DeckNotFound(deck_uuid) => write!(f, "deck not found: {deck_uuid}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SessionError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Ordered card stubs for the three session sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSections {
    pub new: Vec<CardStub>,
    pub learning: Vec<CardStub>,
    pub review: Vec<CardStub>,
}

impl SessionSections {
    /// Flattens new -> learning -> review for legacy queue consumers.
    pub fn into_flattened(self) -> Vec<CardStub> {
        let mut all = self.new;
        all.extend(self.learning);
        all.extend(self.review);
        all
    }
}

/// Cap/usage snapshot for one deck in the allocation report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeckAllocation {
    pub new_cap: u32,
    pub review_cap: u32,
    pub new_used_before: u32,
    pub new_used_after: u32,
    pub review_used_before: u32,
    pub review_used_after: u32,
}

/// Allocation report returned with each built session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionMeta {
    pub total_new: usize,
    pub total_learning: usize,
    pub total_review: usize,
    /// Deck names in sweep order.
    pub deck_order: Vec<String>,
    /// Effective global caps for this session. For single-deck scope these
    /// are the deck's own caps.
    pub global_limits: GlobalLimits,
    pub per_deck: BTreeMap<DeckId, DeckAllocation>,
}

/// Today's progress snapshot from the daily counter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TodayProgress {
    pub day: NaiveDate,
    pub reviews_done: u32,
    pub introduced_new: u32,
    pub again_count: u32,
    pub good_count: u32,
    pub easy_count: u32,
}

/// Remaining daily quota after subtracting today's usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemainingQuota {
    pub new: u32,
    pub reviews: u32,
}

/// Composite read-only statistics for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub due_counts: DueCounts,
    pub limits: GlobalLimits,
    pub today: TodayProgress,
    pub remaining: RemainingQuota,
    /// Cards reachable in today's queue once remaining quota is applied.
    pub total_due: u32,
}

/// Session assembly service over one connection.
pub struct SessionService<'conn, C: Clock> {
    conn: &'conn Connection,
    clock: C,
}

/// Capped-section selector for round-robin allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuotaKind {
    New,
    Review,
}

/// Per-deck cap tracking mutated during allocation.
#[derive(Debug, Clone, Copy)]
struct DeckQuota {
    new_cap: u32,
    review_cap: u32,
    new_used: u32,
    review_used: u32,
}

impl DeckQuota {
    fn reached(&self, kind: QuotaKind) -> bool {
        match kind {
            QuotaKind::New => self.new_used >= self.new_cap,
            QuotaKind::Review => self.review_used >= self.review_cap,
        }
    }

    fn consume(&mut self, kind: QuotaKind) {
        match kind {
            QuotaKind::New => self.new_used += 1,
            QuotaKind::Review => self.review_used += 1,
        }
    }
}

impl<'conn, C: Clock> SessionService<'conn, C> {
    /// Creates a service from a migrated connection and clock.
    pub fn new(conn: &'conn Connection, clock: C) -> Self {
        Self { conn, clock }
    }

    /// Builds a structured session: three randomized, fairly allocated
    /// sections plus an allocation report.
    ///
    /// Read-only apart from lazy daily-counter creation; pool ordering comes
    /// from the injected `rng`.
    pub fn build_session<R: Rng>(
        &self,
        user_uuid: UserId,
        scope: SessionScope,
        now: Option<DateTime<Utc>>,
        today: Option<NaiveDate>,
        rng: &mut R,
    ) -> Result<(SessionSections, SessionMeta), SessionError> {
        let now = now.unwrap_or_else(|| self.clock.now());
        let today = today.unwrap_or_else(|| now.date_naive());
        let cards = SqliteCardRepository::new(self.conn);
        let counters = SqliteCounterStore::new(self.conn);

        let decks = match scope {
            SessionScope::SingleDeck(deck_uuid) => {
                let deck = cards
                    .get_deck(user_uuid, deck_uuid)?
                    .ok_or(SessionError::DeckNotFound(deck_uuid))?;
                vec![deck]
            }
            SessionScope::AllDecks => cards.list_decks(user_uuid)?,
        };

        if decks.is_empty() {
            return Ok((SessionSections::default(), SessionMeta::default()));
        }

        let deck_order: Vec<DeckId> = decks.iter().map(|deck| deck.uuid).collect();
        let deck_names: Vec<String> = decks.iter().map(|deck| deck.name.clone()).collect();

        let mut new_pools = HashMap::new();
        let mut learning_pools = HashMap::new();
        let mut review_pools = HashMap::new();
        for deck in &decks {
            new_pools.insert(
                deck.uuid,
                shuffled_pool(cards.pool(user_uuid, deck.uuid, CardState::New, now)?, rng),
            );
            learning_pools.insert(
                deck.uuid,
                shuffled_pool(
                    cards.pool(user_uuid, deck.uuid, CardState::Learning, now)?,
                    rng,
                ),
            );
            review_pools.insert(
                deck.uuid,
                shuffled_pool(
                    cards.pool(user_uuid, deck.uuid, CardState::Review, now)?,
                    rng,
                ),
            );
        }

        let user_limits = counters.global_limits(user_uuid)?;
        let mut quotas: BTreeMap<DeckId, DeckQuota> = BTreeMap::new();
        let effective_limits;
        let global_new_remaining;
        let global_review_remaining;

        match scope {
            SessionScope::AllDecks => {
                let usage = counters.deck_usage(user_uuid, &deck_order, today)?;
                for deck in &decks {
                    let used = usage.get(&deck.uuid).copied().unwrap_or_default();
                    quotas.insert(
                        deck.uuid,
                        DeckQuota {
                            new_cap: deck.new_per_day.unwrap_or(user_limits.new_per_day),
                            review_cap: deck.review_per_day.unwrap_or(user_limits.review_per_day),
                            new_used: used.introduced_new,
                            review_used: used.reviews_done,
                        },
                    );
                }

                let counter = counters.get_or_create_daily(user_uuid, today)?;
                effective_limits = user_limits;
                global_new_remaining =
                    Some(user_limits.new_per_day.saturating_sub(counter.introduced_new));
                global_review_remaining =
                    Some(user_limits.review_per_day.saturating_sub(counter.reviews_done));
            }
            SessionScope::SingleDeck(_) => {
                // Only this deck's own cap and usage apply; the global
                // counter row is neither read nor created.
                let deck = &decks[0];
                let new_cap = deck.new_per_day.unwrap_or(user_limits.new_per_day);
                let review_cap = deck.review_per_day.unwrap_or(user_limits.review_per_day);
                let used = counters
                    .deck_usage(user_uuid, &deck_order, today)?
                    .get(&deck.uuid)
                    .copied()
                    .unwrap_or_default();
                quotas.insert(
                    deck.uuid,
                    DeckQuota {
                        new_cap,
                        review_cap,
                        new_used: used.introduced_new,
                        review_used: used.reviews_done,
                    },
                );

                effective_limits = GlobalLimits {
                    new_per_day: new_cap,
                    review_per_day: review_cap,
                };
                global_new_remaining = None;
                global_review_remaining = None;
            }
        }

        let used_before: BTreeMap<DeckId, DeckUsage> = quotas
            .iter()
            .map(|(deck_uuid, quota)| {
                (
                    *deck_uuid,
                    DeckUsage {
                        introduced_new: quota.new_used,
                        reviews_done: quota.review_used,
                    },
                )
            })
            .collect();

        let new_entries = round_robin_allocate(
            &deck_order,
            &mut new_pools,
            &mut quotas,
            Some(QuotaKind::New),
            global_new_remaining,
        );
        let learning_entries =
            round_robin_allocate(&deck_order, &mut learning_pools, &mut quotas, None, None);
        let review_entries = round_robin_allocate(
            &deck_order,
            &mut review_pools,
            &mut quotas,
            Some(QuotaKind::Review),
            global_review_remaining,
        );

        let per_deck: BTreeMap<DeckId, DeckAllocation> = quotas
            .iter()
            .map(|(deck_uuid, quota)| {
                let before = used_before.get(deck_uuid).copied().unwrap_or_default();
                (
                    *deck_uuid,
                    DeckAllocation {
                        new_cap: quota.new_cap,
                        review_cap: quota.review_cap,
                        new_used_before: before.introduced_new,
                        new_used_after: quota.new_used,
                        review_used_before: before.reviews_done,
                        review_used_after: quota.review_used,
                    },
                )
            })
            .collect();

        let sections = SessionSections {
            new: new_entries.into_iter().map(stub_from_entry).collect(),
            learning: learning_entries.into_iter().map(stub_from_entry).collect(),
            review: review_entries.into_iter().map(stub_from_entry).collect(),
        };

        let meta = SessionMeta {
            total_new: sections.new.len(),
            total_learning: sections.learning.len(),
            total_review: sections.review.len(),
            deck_order: deck_names,
            global_limits: effective_limits,
            per_deck,
        };

        info!(
            "event=session_built module=session status=ok decks={} new={} learning={} review={}",
            meta.deck_order.len(),
            meta.total_new,
            meta.total_learning,
            meta.total_review
        );
        Ok((sections, meta))
    }

    /// Head of the flattened legacy queue, or `None` when nothing is due.
    pub fn next_card<R: Rng>(
        &self,
        user_uuid: UserId,
        deck_uuid: Option<DeckId>,
        now: Option<DateTime<Utc>>,
        rng: &mut R,
    ) -> Result<Option<CardStub>, SessionError> {
        let scope = deck_uuid.map_or(SessionScope::AllDecks, SessionScope::SingleDeck);
        let (sections, _) = self.build_session(user_uuid, scope, now, None, rng)?;
        Ok(sections.into_flattened().into_iter().next())
    }

    /// Due-card counts per section, optionally restricted to some decks.
    pub fn queue_counts(
        &self,
        user_uuid: UserId,
        deck_filter: Option<&[DeckId]>,
        now: Option<DateTime<Utc>>,
    ) -> Result<DueCounts, SessionError> {
        let now = now.unwrap_or_else(|| self.clock.now());
        SqliteCardRepository::new(self.conn)
            .due_counts(user_uuid, deck_filter, now)
            .map_err(Into::into)
    }

    /// Composite queue statistics: due counts, limits, today's progress,
    /// and remaining quota. Strictly read-only and idempotent between
    /// ratings; an untouched day reads as all zeros.
    pub fn queue_stats(
        &self,
        user_uuid: UserId,
        now: Option<DateTime<Utc>>,
    ) -> Result<QueueStats, SessionError> {
        let now = now.unwrap_or_else(|| self.clock.now());
        let today = now.date_naive();
        let cards = SqliteCardRepository::new(self.conn);
        let counters = SqliteCounterStore::new(self.conn);

        let limits = counters.global_limits(user_uuid)?;
        let counter = counters
            .daily_counter(user_uuid, today)?
            .unwrap_or_else(|| DailyCounter::empty(user_uuid, today));
        let due_counts = cards.due_counts(user_uuid, None, now)?;

        let remaining = RemainingQuota {
            new: limits.new_per_day.saturating_sub(counter.introduced_new),
            reviews: limits.review_per_day.saturating_sub(counter.reviews_done),
        };
        let total_due = due_counts.learning
            + due_counts.review.min(remaining.reviews)
            + due_counts.new.min(remaining.new);

        Ok(QueueStats {
            due_counts,
            limits,
            today: TodayProgress {
                day: counter.day,
                reviews_done: counter.reviews_done,
                introduced_new: counter.introduced_new,
                again_count: counter.again_count,
                good_count: counter.good_count,
                easy_count: counter.easy_count,
            },
            remaining,
            total_due,
        })
    }
}

/// Sweeps the ordered deck list, taking one card per deck per pass while
/// per-deck and global capacity remain. A pass with no progress, or global
/// exhaustion, terminates the section.
fn round_robin_allocate(
    deck_order: &[DeckId],
    pools: &mut HashMap<DeckId, VecDeque<PoolEntry>>,
    quotas: &mut BTreeMap<DeckId, DeckQuota>,
    kind: Option<QuotaKind>,
    mut global_remaining: Option<u32>,
) -> Vec<PoolEntry> {
    let mut allocated = Vec::new();

    loop {
        let mut progress = false;

        for deck_uuid in deck_order {
            if global_remaining == Some(0) {
                break;
            }

            let Some(pool) = pools.get_mut(deck_uuid) else {
                continue;
            };
            if pool.is_empty() {
                continue;
            }

            if let Some(kind) = kind {
                if let Some(quota) = quotas.get(deck_uuid) {
                    if quota.reached(kind) {
                        continue;
                    }
                }
            }

            let Some(entry) = pool.pop_front() else {
                continue;
            };
            allocated.push(entry);
            progress = true;

            if let Some(kind) = kind {
                if let Some(quota) = quotas.get_mut(deck_uuid) {
                    quota.consume(kind);
                }
            }
            if let Some(remaining) = global_remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
        }

        if !progress || global_remaining == Some(0) {
            break;
        }
    }

    allocated
}

fn shuffled_pool<R: Rng>(mut entries: Vec<PoolEntry>, rng: &mut R) -> VecDeque<PoolEntry> {
    entries.shuffle(rng);
    entries.into()
}

fn stub_from_entry(entry: PoolEntry) -> CardStub {
    CardStub {
        uuid: entry.card.uuid,
        deck_uuid: entry.card.deck_uuid,
        front_preview: derive_front_preview(&entry.card.front),
        state: entry.state,
        tags: entry.tags,
        due_at: entry.due_at,
        created_at: entry.card.created_at,
    }
}

/// Collapses whitespace and truncates the card front for queue display.
pub fn derive_front_preview(front: &str) -> String {
    let normalized = WHITESPACE_RE.replace_all(front, " ");
    let trimmed = normalized.trim();
    if trimmed.chars().count() > FRONT_PREVIEW_MAX_CHARS {
        let mut preview: String = trimmed.chars().take(FRONT_PREVIEW_MAX_CHARS).collect();
        preview.push_str("...");
        preview
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{derive_front_preview, SessionError, SessionScope};
    use uuid::Uuid;

    #[test]
    fn scope_parse_accepts_known_forms() {
        assert_eq!(
            SessionScope::parse("all", None).unwrap(),
            SessionScope::AllDecks
        );
        let deck_uuid = Uuid::new_v4();
        assert_eq!(
            SessionScope::parse("deck", Some(deck_uuid)).unwrap(),
            SessionScope::SingleDeck(deck_uuid)
        );
    }

    #[test]
    fn scope_parse_rejects_deck_without_id_and_unknown_values() {
        assert!(matches!(
            SessionScope::parse("deck", None),
            Err(SessionError::InvalidScope(_))
        ));
        assert!(matches!(
            SessionScope::parse("everything", None),
            Err(SessionError::InvalidScope(_))
        ));
    }

    #[test]
    fn front_preview_collapses_whitespace_and_truncates() {
        assert_eq!(derive_front_preview("  what is\n\nthe  capital "), "what is the capital");

        let long = "x".repeat(140);
        let preview = derive_front_preview(&long);
        assert_eq!(preview.chars().count(), 103);
        assert!(preview.ends_with("..."));
    }
}
