//! Deck/card repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide deck listing and point lookups scoped to one user.
//! - Build the eligible-card pool and due-count queries session assembly
//!   runs on.
//!
//! # Invariants
//! - Deck listings are ordered by `name ASC, uuid ASC` (deterministic
//!   tie-break).
//! - Suspended cards never appear in pools or due counts.
//! - Pool rows come back in stable `uuid` order; shuffling is the caller's
//!   concern.

use crate::model::card::{Card, CardId, Deck, DeckId, UserId};
use crate::model::counter::DueCounts;
use crate::model::sched::CardState;
use crate::repo::{count_to_u32, datetime_from_millis, parse_uuid, RepoError, RepoResult};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const DECK_SELECT_SQL: &str = "SELECT
    uuid,
    user_uuid,
    name,
    new_per_day,
    review_per_day
FROM decks";

const POOL_SELECT_SQL: &str = "SELECT
    c.uuid,
    c.user_uuid,
    c.deck_uuid,
    c.front,
    c.back,
    c.suspended,
    c.created_at,
    s.state AS sched_state,
    s.due_at AS sched_due_at
FROM cards c";

/// One eligible card plus the scheduling fields pools are keyed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub card: Card,
    /// `New` when no scheduling state row exists yet.
    pub state: CardState,
    pub due_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

/// Repository interface for deck/card reads consumed by session assembly.
pub trait CardRepository {
    /// Lists the user's decks ordered by name with uuid tie-break.
    fn list_decks(&self, user_uuid: UserId) -> RepoResult<Vec<Deck>>;
    /// Point lookup of one deck owned by the user.
    fn get_deck(&self, user_uuid: UserId, deck_uuid: DeckId) -> RepoResult<Option<Deck>>;
    /// Point lookup of one card owned by the user.
    fn get_card(&self, user_uuid: UserId, card_uuid: CardId) -> RepoResult<Option<Card>>;
    /// Eligible cards of one deck for the given section, in stable order.
    fn pool(
        &self,
        user_uuid: UserId,
        deck_uuid: DeckId,
        section: CardState,
        now: DateTime<Utc>,
    ) -> RepoResult<Vec<PoolEntry>>;
    /// Due-card counts per section, optionally restricted to some decks.
    fn due_counts(
        &self,
        user_uuid: UserId,
        deck_filter: Option<&[DeckId]>,
        now: DateTime<Utc>,
    ) -> RepoResult<DueCounts>;
}

/// SQLite-backed deck/card repository.
pub struct SqliteCardRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCardRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl CardRepository for SqliteCardRepository<'_> {
    fn list_decks(&self, user_uuid: UserId) -> RepoResult<Vec<Deck>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DECK_SELECT_SQL}
             WHERE user_uuid = ?1
             ORDER BY name ASC, uuid ASC;"
        ))?;

        let mut rows = stmt.query([user_uuid.to_string()])?;
        let mut decks = Vec::new();
        while let Some(row) = rows.next()? {
            decks.push(parse_deck_row(row)?);
        }

        Ok(decks)
    }

    fn get_deck(&self, user_uuid: UserId, deck_uuid: DeckId) -> RepoResult<Option<Deck>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DECK_SELECT_SQL}
             WHERE user_uuid = ?1 AND uuid = ?2;"
        ))?;

        let mut rows = stmt.query(params![user_uuid.to_string(), deck_uuid.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_deck_row(row)?));
        }

        Ok(None)
    }

    fn get_card(&self, user_uuid: UserId, card_uuid: CardId) -> RepoResult<Option<Card>> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, user_uuid, deck_uuid, front, back, suspended, created_at
             FROM cards
             WHERE user_uuid = ?1 AND uuid = ?2;",
        )?;

        let mut rows = stmt.query(params![user_uuid.to_string(), card_uuid.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_card_row(row)?));
        }

        Ok(None)
    }

    fn pool(
        &self,
        user_uuid: UserId,
        deck_uuid: DeckId,
        section: CardState,
        now: DateTime<Utc>,
    ) -> RepoResult<Vec<PoolEntry>> {
        let shape = section_filter(section);
        let sql = format!(
            "{POOL_SELECT_SQL} {} sched_states s ON s.card_uuid = c.uuid
             WHERE c.user_uuid = ? AND c.deck_uuid = ? AND c.suspended = 0
               AND {}
             ORDER BY c.uuid ASC;",
            shape.join, shape.filter
        );

        let mut bind_values: Vec<Value> = vec![
            Value::Text(user_uuid.to_string()),
            Value::Text(deck_uuid.to_string()),
        ];
        if shape.binds_now {
            bind_values.push(Value::Integer(now.timestamp_millis()));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let card = parse_card_row(row)?;
            let state = match row.get::<_, Option<String>>("sched_state")? {
                Some(value) => CardState::parse_db(&value).ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "invalid state `{value}` in sched_states.state"
                    ))
                })?,
                None => CardState::New,
            };
            let due_at = match row.get::<_, Option<i64>>("sched_due_at")? {
                Some(value) => Some(datetime_from_millis(value, "sched_states.due_at")?),
                None => None,
            };
            let tags = load_tags_for_card(self.conn, &card.uuid.to_string())?;
            entries.push(PoolEntry {
                card,
                state,
                due_at,
                tags,
            });
        }

        Ok(entries)
    }

    fn due_counts(
        &self,
        user_uuid: UserId,
        deck_filter: Option<&[DeckId]>,
        now: DateTime<Utc>,
    ) -> RepoResult<DueCounts> {
        Ok(DueCounts {
            new: self.count_section(user_uuid, deck_filter, CardState::New, now)?,
            learning: self.count_section(user_uuid, deck_filter, CardState::Learning, now)?,
            review: self.count_section(user_uuid, deck_filter, CardState::Review, now)?,
        })
    }
}

impl SqliteCardRepository<'_> {
    fn count_section(
        &self,
        user_uuid: UserId,
        deck_filter: Option<&[DeckId]>,
        section: CardState,
        now: DateTime<Utc>,
    ) -> RepoResult<u32> {
        let shape = section_filter(section);
        let mut sql = format!(
            "SELECT COUNT(*) FROM cards c {} sched_states s ON s.card_uuid = c.uuid
             WHERE c.user_uuid = ? AND c.suspended = 0
               AND {}",
            shape.join, shape.filter
        );

        let mut bind_values: Vec<Value> = vec![Value::Text(user_uuid.to_string())];
        if shape.binds_now {
            bind_values.push(Value::Integer(now.timestamp_millis()));
        }

        if let Some(deck_uuids) = deck_filter {
            let placeholders = vec!["?"; deck_uuids.len()].join(", ");
            sql.push_str(&format!(" AND c.deck_uuid IN ({placeholders})"));
            for deck_uuid in deck_uuids {
                bind_values.push(Value::Text(deck_uuid.to_string()));
            }
        }
        sql.push(';');

        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(bind_values), |row| row.get(0))?;
        count_to_u32(count, "cards count")
    }
}

struct SectionFilter {
    join: &'static str,
    filter: &'static str,
    binds_now: bool,
}

fn section_filter(section: CardState) -> SectionFilter {
    match section {
        CardState::New => SectionFilter {
            join: "LEFT JOIN",
            filter: "(s.state IS NULL OR s.state = 'new')",
            binds_now: false,
        },
        CardState::Learning => SectionFilter {
            join: "INNER JOIN",
            filter: "s.state = 'learning' AND s.due_at <= ?",
            binds_now: true,
        },
        CardState::Review => SectionFilter {
            join: "INNER JOIN",
            filter: "s.state = 'review' AND s.due_at <= ?",
            binds_now: true,
        },
    }
}

fn parse_deck_row(row: &Row<'_>) -> RepoResult<Deck> {
    let uuid_text: String = row.get("uuid")?;
    let user_text: String = row.get("user_uuid")?;

    Ok(Deck {
        uuid: parse_uuid(&uuid_text, "decks.uuid")?,
        user_uuid: parse_uuid(&user_text, "decks.user_uuid")?,
        name: row.get("name")?,
        new_per_day: parse_cap(row.get("new_per_day")?, "decks.new_per_day")?,
        review_per_day: parse_cap(row.get("review_per_day")?, "decks.review_per_day")?,
    })
}

fn parse_card_row(row: &Row<'_>) -> RepoResult<Card> {
    let uuid_text: String = row.get("uuid")?;
    let user_text: String = row.get("user_uuid")?;
    let deck_text: String = row.get("deck_uuid")?;

    let suspended = match row.get::<_, i64>("suspended")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid suspended value `{other}` in cards.suspended"
            )));
        }
    };

    Ok(Card {
        uuid: parse_uuid(&uuid_text, "cards.uuid")?,
        user_uuid: parse_uuid(&user_text, "cards.user_uuid")?,
        deck_uuid: parse_uuid(&deck_text, "cards.deck_uuid")?,
        front: row.get("front")?,
        back: row.get("back")?,
        suspended,
        created_at: datetime_from_millis(row.get("created_at")?, "cards.created_at")?,
    })
}

fn parse_cap(value: Option<i64>, column: &str) -> RepoResult<Option<u32>> {
    match value {
        Some(cap) => Ok(Some(count_to_u32(cap, column)?)),
        None => Ok(None),
    }
}

fn load_tags_for_card(conn: &Connection, card_uuid: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name
         FROM card_tags ct
         INNER JOIN tags t ON t.id = ct.tag_id
         WHERE ct.card_uuid = ?1
         ORDER BY t.name ASC;",
    )?;
    let mut rows = stmt.query([card_uuid])?;
    let mut tags = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        tags.push(value);
    }
    Ok(tags)
}
