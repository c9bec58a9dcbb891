use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use memodeck_core::db::open_db_in_memory;
use memodeck_core::{
    CardState, CardStub, CounterDelta, CounterStore, FixedClock, SchedRepository, SchedState,
    SessionError, SessionScope, SessionService, SqliteCounterStore, SqliteSchedRepository,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::{params, Connection};
use uuid::Uuid;

fn base_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

fn base_day() -> NaiveDate {
    base_instant().date_naive()
}

fn seed_deck(
    conn: &Connection,
    user_uuid: Uuid,
    name: &str,
    new_per_day: Option<u32>,
    review_per_day: Option<u32>,
) -> Uuid {
    let deck_uuid = Uuid::new_v4();
    conn.execute(
        "INSERT INTO decks (uuid, user_uuid, name, new_per_day, review_per_day)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            deck_uuid.to_string(),
            user_uuid.to_string(),
            name,
            new_per_day,
            review_per_day
        ],
    )
    .unwrap();
    deck_uuid
}

fn seed_card(conn: &Connection, user_uuid: Uuid, deck_uuid: Uuid, front: &str) -> Uuid {
    let card_uuid = Uuid::new_v4();
    conn.execute(
        "INSERT INTO cards (uuid, user_uuid, deck_uuid, front, back)
         VALUES (?1, ?2, ?3, ?4, 'back');",
        params![
            card_uuid.to_string(),
            user_uuid.to_string(),
            deck_uuid.to_string(),
            front
        ],
    )
    .unwrap();
    card_uuid
}

fn seed_new_cards(conn: &Connection, user_uuid: Uuid, deck_uuid: Uuid, count: usize) {
    for index in 0..count {
        seed_card(conn, user_uuid, deck_uuid, &format!("card {index}"));
    }
}

fn seed_due_state(conn: &Connection, user_uuid: Uuid, card_uuid: Uuid, state: CardState) {
    let mut sched = SchedState::initial(card_uuid, user_uuid, base_instant() - Duration::hours(1));
    sched.state = state;
    if state == CardState::Review {
        sched.interval_days = 6.0;
    }
    SqliteSchedRepository::new(conn).insert_state(&sched).unwrap();
}

fn set_user_limits(conn: &Connection, user_uuid: Uuid, new_per_day: u32, review_per_day: u32) {
    conn.execute(
        "INSERT INTO user_settings (user_uuid, new_per_day, review_per_day)
         VALUES (?1, ?2, ?3);",
        params![user_uuid.to_string(), new_per_day, review_per_day],
    )
    .unwrap();
}

fn deck_sequence(stubs: &[CardStub]) -> Vec<Uuid> {
    stubs.iter().map(|stub| stub.deck_uuid).collect()
}

fn daily_counter_exists(conn: &Connection, user_uuid: Uuid) -> bool {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM daily_counters WHERE user_uuid = ?1;",
            [user_uuid.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    count > 0
}

#[test]
fn round_robin_respects_per_deck_caps_in_alphabetical_order() {
    let conn = open_db_in_memory().unwrap();
    let user_uuid = Uuid::new_v4();
    let deck_a = seed_deck(&conn, user_uuid, "Alpha", Some(2), None);
    let deck_b = seed_deck(&conn, user_uuid, "Beta", Some(1), None);
    let deck_c = seed_deck(&conn, user_uuid, "Gamma", Some(0), None);
    for deck_uuid in [deck_a, deck_b, deck_c] {
        seed_new_cards(&conn, user_uuid, deck_uuid, 5);
    }

    let service = SessionService::new(&conn, FixedClock(base_instant()));
    let mut rng = StdRng::seed_from_u64(7);
    let (sections, meta) = service
        .build_session(
            user_uuid,
            SessionScope::AllDecks,
            Some(base_instant()),
            Some(base_day()),
            &mut rng,
        )
        .unwrap();

    assert_eq!(sections.new.len(), 3);
    assert_eq!(deck_sequence(&sections.new), vec![deck_a, deck_b, deck_a]);
    assert_eq!(meta.deck_order, vec!["Alpha", "Beta", "Gamma"]);
    assert_eq!(meta.total_new, 3);

    let alloc_a = meta.per_deck.get(&deck_a).unwrap();
    assert_eq!((alloc_a.new_cap, alloc_a.new_used_before, alloc_a.new_used_after), (2, 0, 2));
    let alloc_c = meta.per_deck.get(&deck_c).unwrap();
    assert_eq!((alloc_c.new_cap, alloc_c.new_used_after), (0, 0));
}

#[test]
fn global_new_limit_stops_allocation_mid_sweep() {
    let conn = open_db_in_memory().unwrap();
    let user_uuid = Uuid::new_v4();
    set_user_limits(&conn, user_uuid, 2, 100);
    let deck_a = seed_deck(&conn, user_uuid, "Ants", None, None);
    let deck_b = seed_deck(&conn, user_uuid, "Bees", None, None);
    let deck_c = seed_deck(&conn, user_uuid, "Cats", None, None);
    for deck_uuid in [deck_a, deck_b, deck_c] {
        seed_new_cards(&conn, user_uuid, deck_uuid, 4);
    }

    let service = SessionService::new(&conn, FixedClock(base_instant()));
    let mut rng = StdRng::seed_from_u64(11);
    let (sections, meta) = service
        .build_session(
            user_uuid,
            SessionScope::AllDecks,
            Some(base_instant()),
            Some(base_day()),
            &mut rng,
        )
        .unwrap();

    // Global exhaustion stops the first sweep before Cats is reached.
    assert_eq!(sections.new.len(), 2);
    assert_eq!(deck_sequence(&sections.new), vec![deck_a, deck_b]);
    assert_eq!(meta.global_limits.new_per_day, 2);
}

#[test]
fn counters_already_spent_today_shrink_remaining_quota() {
    let conn = open_db_in_memory().unwrap();
    let user_uuid = Uuid::new_v4();
    set_user_limits(&conn, user_uuid, 12, 150);
    let deck_uuid = seed_deck(&conn, user_uuid, "Solo", None, None);
    seed_new_cards(&conn, user_uuid, deck_uuid, 6);

    let counters = SqliteCounterStore::new(&conn);
    let delta = CounterDelta {
        introduced_new: 11,
        reviews_done: 11,
        ..CounterDelta::default()
    };
    counters.add_to_daily(user_uuid, base_day(), &delta).unwrap();
    counters
        .add_to_deck(user_uuid, deck_uuid, base_day(), 11, 11)
        .unwrap();

    let service = SessionService::new(&conn, FixedClock(base_instant()));
    let mut rng = StdRng::seed_from_u64(3);
    let (sections, meta) = service
        .build_session(
            user_uuid,
            SessionScope::AllDecks,
            Some(base_instant()),
            Some(base_day()),
            &mut rng,
        )
        .unwrap();

    // 12 global - 11 introduced leaves a single slot; the deck cap agrees.
    assert_eq!(sections.new.len(), 1);
    let alloc = meta.per_deck.get(&deck_uuid).unwrap();
    assert_eq!(alloc.new_used_before, 11);
    assert_eq!(alloc.new_used_after, 12);
}

#[test]
fn learning_section_is_exhaustive_and_uncapped() {
    let conn = open_db_in_memory().unwrap();
    let user_uuid = Uuid::new_v4();
    set_user_limits(&conn, user_uuid, 1, 1);
    let deck_uuid = seed_deck(&conn, user_uuid, "Drills", Some(1), Some(1));
    for index in 0..9 {
        let card_uuid = seed_card(&conn, user_uuid, deck_uuid, &format!("learning {index}"));
        seed_due_state(&conn, user_uuid, card_uuid, CardState::Learning);
    }

    let service = SessionService::new(&conn, FixedClock(base_instant()));
    let mut rng = StdRng::seed_from_u64(5);
    let (sections, meta) = service
        .build_session(
            user_uuid,
            SessionScope::AllDecks,
            Some(base_instant()),
            Some(base_day()),
            &mut rng,
        )
        .unwrap();

    assert_eq!(sections.learning.len(), 9);
    assert_eq!(meta.total_learning, 9);
    assert!(sections
        .learning
        .iter()
        .all(|stub| stub.state == CardState::Learning));
}

#[test]
fn pools_exclude_suspended_and_not_yet_due_cards() {
    let conn = open_db_in_memory().unwrap();
    let user_uuid = Uuid::new_v4();
    let deck_uuid = seed_deck(&conn, user_uuid, "Mixed", None, None);

    let suspended_uuid = seed_card(&conn, user_uuid, deck_uuid, "suspended");
    conn.execute(
        "UPDATE cards SET suspended = 1 WHERE uuid = ?1;",
        [suspended_uuid.to_string()],
    )
    .unwrap();

    let future_uuid = seed_card(&conn, user_uuid, deck_uuid, "future review");
    let mut future_state = SchedState::initial(future_uuid, user_uuid, base_instant());
    future_state.state = CardState::Review;
    future_state.due_at = base_instant() + Duration::days(3);
    SqliteSchedRepository::new(&conn)
        .insert_state(&future_state)
        .unwrap();

    // One stateless card and one explicit `new` state both land in the
    // new pool.
    let stateless_uuid = seed_card(&conn, user_uuid, deck_uuid, "stateless");
    let explicit_uuid = seed_card(&conn, user_uuid, deck_uuid, "explicit new");
    SqliteSchedRepository::new(&conn)
        .insert_state(&SchedState::initial(explicit_uuid, user_uuid, base_instant()))
        .unwrap();

    let service = SessionService::new(&conn, FixedClock(base_instant()));
    let mut rng = StdRng::seed_from_u64(13);
    let (sections, _) = service
        .build_session(
            user_uuid,
            SessionScope::AllDecks,
            Some(base_instant()),
            Some(base_day()),
            &mut rng,
        )
        .unwrap();

    let mut new_ids: Vec<Uuid> = sections.new.iter().map(|stub| stub.uuid).collect();
    new_ids.sort();
    let mut expected = vec![stateless_uuid, explicit_uuid];
    expected.sort();
    assert_eq!(new_ids, expected);
    assert!(sections.review.is_empty());
    assert!(sections.learning.is_empty());
}

#[test]
fn single_deck_scope_ignores_global_counters_entirely() {
    let conn = open_db_in_memory().unwrap();
    let user_uuid = Uuid::new_v4();
    // Global limits would forbid any new card; the deck override allows 3.
    set_user_limits(&conn, user_uuid, 0, 0);
    let deck_uuid = seed_deck(&conn, user_uuid, "Focus", Some(3), Some(5));
    seed_new_cards(&conn, user_uuid, deck_uuid, 6);

    // Usage already booked against this deck today shrinks its own quota.
    SqliteCounterStore::new(&conn)
        .add_to_deck(user_uuid, deck_uuid, base_day(), 1, 0)
        .unwrap();

    let service = SessionService::new(&conn, FixedClock(base_instant()));
    let mut rng = StdRng::seed_from_u64(17);
    let (sections, meta) = service
        .build_session(
            user_uuid,
            SessionScope::SingleDeck(deck_uuid),
            Some(base_instant()),
            Some(base_day()),
            &mut rng,
        )
        .unwrap();

    assert_eq!(sections.new.len(), 2);
    assert_eq!(meta.global_limits.new_per_day, 3);
    assert!(!daily_counter_exists(&conn, user_uuid));

    let alloc = meta.per_deck.get(&deck_uuid).unwrap();
    assert_eq!(alloc.new_used_before, 1);
    assert_eq!(alloc.new_used_after, 3);
}

#[test]
fn single_deck_scope_rejects_foreign_or_missing_decks() {
    let conn = open_db_in_memory().unwrap();
    let user_uuid = Uuid::new_v4();
    let other_user = Uuid::new_v4();
    let foreign_deck = seed_deck(&conn, other_user, "Theirs", None, None);

    let service = SessionService::new(&conn, FixedClock(base_instant()));
    let mut rng = StdRng::seed_from_u64(19);

    let err = service
        .build_session(
            user_uuid,
            SessionScope::SingleDeck(foreign_deck),
            Some(base_instant()),
            Some(base_day()),
            &mut rng,
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::DeckNotFound(id) if id == foreign_deck));

    let err = service
        .build_session(
            user_uuid,
            SessionScope::SingleDeck(Uuid::new_v4()),
            Some(base_instant()),
            Some(base_day()),
            &mut rng,
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::DeckNotFound(_)));
}

#[test]
fn same_seed_builds_identical_sessions() {
    let conn = open_db_in_memory().unwrap();
    let user_uuid = Uuid::new_v4();
    let deck_a = seed_deck(&conn, user_uuid, "Left", None, None);
    let deck_b = seed_deck(&conn, user_uuid, "Right", None, None);
    seed_new_cards(&conn, user_uuid, deck_a, 8);
    for index in 0..4 {
        let card_uuid = seed_card(&conn, user_uuid, deck_b, &format!("due {index}"));
        seed_due_state(&conn, user_uuid, card_uuid, CardState::Review);
    }

    let service = SessionService::new(&conn, FixedClock(base_instant()));
    let mut first_rng = StdRng::seed_from_u64(23);
    let (first, _) = service
        .build_session(
            user_uuid,
            SessionScope::AllDecks,
            Some(base_instant()),
            Some(base_day()),
            &mut first_rng,
        )
        .unwrap();

    let mut second_rng = StdRng::seed_from_u64(23);
    let (second, _) = service
        .build_session(
            user_uuid,
            SessionScope::AllDecks,
            Some(base_instant()),
            Some(base_day()),
            &mut second_rng,
        )
        .unwrap();

    assert_eq!(first, second);
}

#[test]
fn flattened_queue_orders_sections_new_learning_review() {
    let conn = open_db_in_memory().unwrap();
    let user_uuid = Uuid::new_v4();
    let deck_uuid = seed_deck(&conn, user_uuid, "Order", None, None);

    let new_uuid = seed_card(&conn, user_uuid, deck_uuid, "new card");
    let learning_uuid = seed_card(&conn, user_uuid, deck_uuid, "learning card");
    seed_due_state(&conn, user_uuid, learning_uuid, CardState::Learning);
    let review_uuid = seed_card(&conn, user_uuid, deck_uuid, "review card");
    seed_due_state(&conn, user_uuid, review_uuid, CardState::Review);

    let service = SessionService::new(&conn, FixedClock(base_instant()));
    let mut rng = StdRng::seed_from_u64(29);
    let (sections, _) = service
        .build_session(
            user_uuid,
            SessionScope::AllDecks,
            Some(base_instant()),
            Some(base_day()),
            &mut rng,
        )
        .unwrap();

    let flattened = sections.into_flattened();
    assert_eq!(
        flattened.iter().map(|stub| stub.uuid).collect::<Vec<_>>(),
        vec![new_uuid, learning_uuid, review_uuid]
    );

    let mut next_rng = StdRng::seed_from_u64(31);
    let head = service
        .next_card(user_uuid, None, Some(base_instant()), &mut next_rng)
        .unwrap()
        .unwrap();
    assert_eq!(head.uuid, new_uuid);
    assert_eq!(head.state, CardState::New);
}

#[test]
fn empty_deck_set_yields_empty_session() {
    let conn = open_db_in_memory().unwrap();
    let user_uuid = Uuid::new_v4();

    let service = SessionService::new(&conn, FixedClock(base_instant()));
    let mut rng = StdRng::seed_from_u64(37);
    let (sections, meta) = service
        .build_session(
            user_uuid,
            SessionScope::AllDecks,
            Some(base_instant()),
            Some(base_day()),
            &mut rng,
        )
        .unwrap();

    assert!(sections.new.is_empty());
    assert!(sections.learning.is_empty());
    assert!(sections.review.is_empty());
    assert!(meta.deck_order.is_empty());
    assert!(meta.per_deck.is_empty());
}
