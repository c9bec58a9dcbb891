//! Card and deck domain records.
//!
//! # Responsibility
//! - Define the study-item records shared by the scheduler and the session
//!   builder.
//! - Keep id semantics explicit via per-aggregate aliases.
//!
//! # Invariants
//! - A suspended card is excluded from every session pool.
//! - Deck cap overrides of `None` inherit the user's global defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::sched::CardState;

/// Stable identifier of an already-resolved user.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type UserId = Uuid;

/// Stable identifier for one deck.
pub type DeckId = Uuid;

/// Stable identifier for one card.
pub type CardId = Uuid;

/// Deck record with optional per-deck daily cap overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    pub uuid: DeckId,
    pub user_uuid: UserId,
    pub name: String,
    /// Daily new-card cap for this deck; `None` inherits the global default.
    pub new_per_day: Option<u32>,
    /// Daily review cap for this deck; `None` inherits the global default.
    pub review_per_day: Option<u32>,
}

/// Atomic study unit.
///
/// Content fields are owned by the CRUD layer; the core only reads them to
/// build session stubs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub uuid: CardId,
    pub user_uuid: UserId,
    pub deck_uuid: DeckId,
    pub front: String,
    pub back: String,
    /// Excluded from all pools when set.
    pub suspended: bool,
    pub created_at: DateTime<Utc>,
}

/// Minimal card projection carried by session sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardStub {
    pub uuid: CardId,
    pub deck_uuid: DeckId,
    /// Whitespace-collapsed front text, truncated for queue display.
    pub front_preview: String,
    pub state: CardState,
    pub tags: Vec<String>,
    /// `None` for cards that have never been scheduled.
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
