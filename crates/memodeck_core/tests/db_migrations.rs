use memodeck_core::db::migrations::latest_version;
use memodeck_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "decks");
    assert_table_exists(&conn, "cards");
    assert_table_exists(&conn, "sched_states");
    assert_table_exists(&conn, "review_logs");
    assert_table_exists(&conn, "daily_counters");
    assert_table_exists(&conn, "daily_deck_counters");
    assert_table_exists(&conn, "user_settings");
    assert_table_exists(&conn, "tags");
    assert_table_exists(&conn, "card_tags");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memodeck.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "sched_states");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn ease_factor_check_constraint_rejects_out_of_range_rows() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO decks (uuid, user_uuid, name) VALUES ('d1', 'u1', 'Deck');",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO cards (uuid, user_uuid, deck_uuid, front, back)
         VALUES ('c1', 'u1', 'd1', 'front', 'back');",
        [],
    )
    .unwrap();

    let err = conn
        .execute(
            "INSERT INTO sched_states (card_uuid, user_uuid, due_at, ease_factor)
             VALUES ('c1', 'u1', 0, 5.0);",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("check_ease_factor") || err.to_string().contains("CHECK"));
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
