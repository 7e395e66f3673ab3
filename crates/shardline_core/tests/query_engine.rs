use shardline_core::{
    DatabaseGroup, GroupConfig, QueryOutcome, ShardError, ShardId, StatementCaching, Value,
};
use std::path::Path;

const SHARD: ShardId = ShardId(1);

#[test]
fn insert_update_delete_report_their_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = group_with_items(dir.path());

    let first = group
        .query(
            "INSERT INTO items (library_id, name) VALUES (?, ?)",
            &[Value::Integer(1), text("alpha")],
            SHARD,
        )
        .unwrap();
    assert_eq!(first, QueryOutcome::InsertedId(1));

    let ignored = group
        .query(
            "INSERT OR IGNORE INTO items (id, library_id, name) VALUES (?, ?, ?)",
            &[Value::Integer(1), Value::Integer(1), text("duplicate")],
            SHARD,
        )
        .unwrap();
    assert_eq!(ignored, QueryOutcome::NothingInserted);

    let updated = group
        .query(
            "UPDATE items SET name = ? WHERE library_id = ?",
            &[text("beta"), Value::Integer(1)],
            SHARD,
        )
        .unwrap();
    assert_eq!(updated.affected(), Some(1));

    let deleted = group
        .query("DELETE FROM items WHERE library_id = ?", &[Value::Integer(9)], SHARD)
        .unwrap();
    assert_eq!(deleted, QueryOutcome::Affected(0));
}

#[test]
fn null_parameters_become_sql_null_comparisons() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = group_with_items(dir.path());
    insert(&mut group, 1, Some("named"));
    insert(&mut group, 1, None);
    insert(&mut group, 2, None);

    let unnamed = group
        .column_query(
            "SELECT id FROM items WHERE name = ? AND library_id = ? ORDER BY id",
            &[Value::Null, Value::Integer(1)],
            SHARD,
        )
        .unwrap()
        .unwrap();
    assert_eq!(unnamed, vec![Value::Integer(2)]);

    let named = group
        .column_query(
            "SELECT id FROM items WHERE name <> ? ORDER BY id",
            &[Value::Null],
            SHARD,
        )
        .unwrap()
        .unwrap();
    assert_eq!(named, vec![Value::Integer(1)]);

    // In a write, `= ?` is an assignment.
    let cleared = group
        .query(
            "UPDATE items SET name = ? WHERE id = ?",
            &[Value::Null, Value::Integer(1)],
            SHARD,
        )
        .unwrap();
    assert_eq!(cleared.affected(), Some(1));
    let remaining = group
        .value_query("SELECT COUNT(*) FROM items WHERE name IS NULL", &[], SHARD)
        .unwrap();
    assert_eq!(remaining, Some(Value::Integer(3)));
}

#[test]
fn null_rewriting_rejects_mismatched_placeholders() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = group_with_items(dir.path());

    let err = group
        .query(
            "SELECT id FROM items WHERE name = ? AND library_id = ?",
            &[Value::Null],
            SHARD,
        )
        .unwrap_err();
    assert!(matches!(err, ShardError::InvalidInput(_)));
}

#[test]
fn integer_columns_come_back_as_integers() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = group_with_items(dir.path());
    group
        .query(
            "CREATE TABLE counters (name TEXT, hits INT(11) UNSIGNED, label TEXT)",
            &[],
            SHARD,
        )
        .unwrap();
    group
        .query(
            "INSERT INTO counters (name, hits, label) VALUES (?, ?, ?)",
            &[text("home"), text("42"), text("42")],
            SHARD,
        )
        .unwrap();

    let row = group
        .row_query("SELECT name, hits, label FROM counters", &[], SHARD)
        .unwrap()
        .unwrap();
    assert_eq!(row.columns(), ["name", "hits", "label"]);
    assert_eq!(row.get_i64("hits"), Some(42));
    assert_eq!(row.get("label"), Some(&text("42")));
    assert_eq!(row.get_text("name"), Some("home"));
}

#[test]
fn empty_results_are_none_and_writes_are_rejected_by_value_queries() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = group_with_items(dir.path());

    assert_eq!(
        group.value_query("SELECT name FROM items", &[], SHARD).unwrap(),
        None
    );
    assert!(group
        .row_query("SELECT * FROM items", &[], SHARD)
        .unwrap()
        .is_none());
    assert!(group
        .column_query("SELECT id FROM items", &[], SHARD)
        .unwrap()
        .is_none());

    let err = group
        .value_query("DELETE FROM items", &[], SHARD)
        .unwrap_err();
    assert!(matches!(err, ShardError::InvalidInput(_)));
}

#[test]
fn failed_statements_keep_sql_params_and_shard() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = group_with_items(dir.path());

    let err = group
        .query("SELECT missing FROM items WHERE id = ?", &[Value::Integer(5)], SHARD)
        .unwrap_err();
    match err {
        ShardError::QueryFailed(failure) => {
            assert_eq!(failure.shard_id, SHARD);
            assert_eq!(failure.sql, "SELECT missing FROM items WHERE id = ?");
            assert_eq!(failure.params, vec![Value::Integer(5)]);
            assert_eq!(failure.code, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn hashed_caching_reuses_one_statement_per_shard() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = group_with_items(dir.path());

    for library_id in 1..=3 {
        group
            .query_with(
                "INSERT INTO items (library_id, name) VALUES (?, ?)",
                &[Value::Integer(library_id), text("cached")],
                SHARD,
                &StatementCaching::Hashed,
            )
            .unwrap();
    }
    assert_eq!(group.cached_statement_count(), 1);

    group
        .query_with("SELECT 1", &[], ShardId(2), &StatementCaching::Hashed)
        .unwrap();
    assert_eq!(group.cached_statement_count(), 2);
}

#[test]
fn keyed_caching_reuses_the_first_statement_for_a_key() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = group_with_items(dir.path());
    insert(&mut group, 1, Some("one"));
    let key = StatementCaching::Keyed("item_name".to_string());

    let first = group
        .query_with("SELECT name FROM items WHERE id = ?", &[Value::Integer(1)], SHARD, &key)
        .unwrap();
    let reused = group
        .query_with("SELECT id FROM items WHERE id = ?", &[Value::Integer(1)], SHARD, &key)
        .unwrap();

    assert_eq!(first, reused);
    assert_eq!(group.cached_statement_count(), 1);
}

#[test]
fn statement_cache_stays_within_configured_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GroupConfig::new(dir.path().join("master.db"));
    config.statement_cache_capacity = 4;
    let mut group = DatabaseGroup::open("main", &config).unwrap();
    assert_eq!(group.statement_cache_capacity(), 4);
    seed_items(&mut group);

    // Each NULL mask rewrites the keyed statement into distinct SQL text.
    let key = StatementCaching::Keyed("item_lookup".to_string());
    for mask in 0..16_i64 {
        let params = (0..4)
            .map(|bit| {
                if mask & (1 << bit) == 0 {
                    Value::Integer(bit)
                } else {
                    Value::Null
                }
            })
            .collect::<Vec<_>>();
        group
            .query_with(
                "SELECT id FROM items WHERE id = ? AND library_id = ? AND name = ? AND id <> ?",
                &params,
                SHARD,
                &key,
            )
            .unwrap();
        assert!(group.cached_statement_count() <= 4);
    }
    assert_eq!(group.cached_statement_count(), 4);
}

#[test]
fn prepared_statements_bind_nulls_without_rewriting() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = group_with_items(dir.path());

    let statement = group
        .get_statement(
            "INSERT INTO items (library_id, name) VALUES (?, ?)",
            &StatementCaching::Hashed,
            SHARD,
        )
        .unwrap();
    assert!(statement.is_write_query());
    assert_eq!(statement.shard_id(), SHARD);

    let again = group
        .get_statement(
            "INSERT INTO items (library_id, name) VALUES (?, ?)",
            &StatementCaching::Hashed,
            SHARD,
        )
        .unwrap();
    assert_eq!(statement, again);

    let outcome = group
        .execute_statement(&statement, &[Value::Integer(4), Value::Null])
        .unwrap();
    assert_eq!(outcome.inserted_id(), Some(1));
    assert_eq!(
        group
            .value_query("SELECT name FROM items WHERE id = 1", &[], SHARD)
            .unwrap(),
        Some(Value::Null)
    );

    let err = group
        .get_statement("SELEC nothing", &StatementCaching::Off, SHARD)
        .unwrap_err();
    assert!(matches!(err, ShardError::QueryFailed(_)));
}

#[test]
fn bulk_insert_splits_rows_into_bounded_statements() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = group_with_items(dir.path());
    let rows = (0..25)
        .map(|index| vec![text(&format!("item-{index}"))])
        .collect::<Vec<_>>();

    let summary = group
        .bulk_insert(
            "INSERT INTO items (library_id, name) VALUES",
            &rows,
            10,
            Some(&Value::Integer(77)),
            SHARD,
        )
        .unwrap();
    assert_eq!(summary.statements, 3);
    assert_eq!(summary.rows, 25);

    let count = group
        .value_query(
            "SELECT COUNT(*) FROM items WHERE library_id = ?",
            &[Value::Integer(77)],
            SHARD,
        )
        .unwrap();
    assert_eq!(count, Some(Value::Integer(25)));

    let empty = group
        .bulk_insert("INSERT INTO items (library_id, name) VALUES", &[], 10, None, SHARD)
        .unwrap();
    assert_eq!(empty.statements, 0);
}

fn group_with_items(dir: &Path) -> DatabaseGroup {
    let mut group = DatabaseGroup::open("main", &GroupConfig::new(dir.join("master.db"))).unwrap();
    seed_items(&mut group);
    group
}

fn seed_items(group: &mut DatabaseGroup) {
    group
        .query(
            "INSERT INTO shard_hosts (host_id, address, port) VALUES (1, 'localhost', 0)",
            &[],
            ShardId::MASTER,
        )
        .unwrap();
    group
        .query(
            "INSERT INTO shards (shard_id, host_id, db) VALUES (1, 1, 'shard1.db'), (2, 1, 'shard2.db')",
            &[],
            ShardId::MASTER,
        )
        .unwrap();
    group
        .query(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, library_id BIGINT NOT NULL, name TEXT)",
            &[],
            SHARD,
        )
        .unwrap();
}

fn insert(group: &mut DatabaseGroup, library_id: i64, name: Option<&str>) {
    group
        .query(
            "INSERT INTO items (library_id, name) VALUES (?, ?)",
            &[Value::Integer(library_id), name.map_or(Value::Null, text)],
            SHARD,
        )
        .unwrap();
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}
