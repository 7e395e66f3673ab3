use rusqlite::Connection;
use shardline_core::{
    DatabaseGroup, GroupConfig, LibraryId, NotFoundTarget, ShardError, ShardId, ShardState, Value,
};
use std::path::Path;

#[test]
fn resolves_library_and_keeps_cached_mapping_until_fresh_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = seeded_group(dir.path());
    group.assign_library(LibraryId(10), ShardId(1)).unwrap();

    assert_eq!(group.resolve_shard(LibraryId(10)).unwrap(), ShardId(1));

    // Move the library behind the cache's back.
    group
        .query(
            "UPDATE libraries SET shard_id = ? WHERE library_id = ?",
            &[Value::Integer(2), Value::Integer(10)],
            ShardId::MASTER,
        )
        .unwrap();

    assert_eq!(group.resolve_shard(LibraryId(10)).unwrap(), ShardId(1));
    assert_eq!(group.resolve_shard_fresh(LibraryId(10)).unwrap(), ShardId(2));
    assert_eq!(group.resolve_shard(LibraryId(10)).unwrap(), ShardId(2));
}

#[test]
fn unknown_library_and_shard_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = seeded_group(dir.path());

    let err = group.resolve_shard(LibraryId(404)).unwrap_err();
    assert!(matches!(
        err,
        ShardError::NotFound(NotFoundTarget::Library(LibraryId(404)))
    ));

    let err = group.shard_info(ShardId(99)).unwrap_err();
    assert!(matches!(
        err,
        ShardError::NotFound(NotFoundTarget::Shard(ShardId(99)))
    ));

    let err = group.assign_library(LibraryId(1), ShardId(99)).unwrap_err();
    assert!(matches!(err, ShardError::NotFound(_)));
    assert!(matches!(
        group.resolve_shard(LibraryId(1)),
        Err(ShardError::NotFound(_))
    ));
}

#[test]
fn shard_info_carries_host_target_and_effective_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = seeded_group(dir.path());

    let info = group.shard_info(ShardId(3)).unwrap();
    assert_eq!(info.host, "db-b.internal");
    assert_eq!(info.port, 3307);
    assert_eq!(info.database, "shard3.db");
    assert_eq!(info.username.as_deref(), Some("app"));
    assert!(info.tls);
    assert_eq!(info.state, ShardState::Up);
    assert!(group.is_writable(ShardId(3)).unwrap());

    set_host_state(&mut group, 2, "readonly");
    assert_eq!(group.shard_info(ShardId(3)).unwrap().state, ShardState::Up);
    assert_eq!(
        group.shard_info_fresh(ShardId(3)).unwrap().state,
        ShardState::ReadOnly
    );
    assert!(!group.is_writable(ShardId(3)).unwrap());
}

#[test]
fn unknown_state_strings_fail_closed() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = seeded_group(dir.path());
    set_shard_state(&mut group, 2, "maintenance");

    assert_eq!(group.shard_info(ShardId(2)).unwrap().state, ShardState::Down);
}

#[test]
fn down_shard_is_unavailable_without_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = seeded_group(dir.path());
    set_shard_state(&mut group, 2, "down");

    let err = group.query("SELECT 1", &[], ShardId(2)).unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        ShardError::ShardUnavailable { shard_id: ShardId(2), .. }
    ));
    assert!(!group.is_connected(ShardId(2)));
    assert!(!dir.path().join("shard2.db").exists());
}

#[test]
fn readonly_shard_serves_reads_and_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let shard_file = Connection::open(dir.path().join("shard1.db")).unwrap();
    shard_file
        .execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO items (id, name) VALUES (1, 'kept');",
        )
        .unwrap();
    drop(shard_file);

    let mut group = seeded_group(dir.path());
    set_shard_state(&mut group, 1, "readonly");

    let name = group
        .value_query("SELECT name FROM items WHERE id = ?", &[Value::Integer(1)], ShardId(1))
        .unwrap();
    assert_eq!(name, Some(Value::Text("kept".to_string())));

    let err = group
        .query(
            "INSERT INTO items (name) VALUES (?)",
            &[Value::Text("new".to_string())],
            ShardId(1),
        )
        .unwrap_err();
    assert!(matches!(err, ShardError::ShardReadOnly(ShardId(1))));
    assert!(!err.is_retryable());
}

#[test]
fn shard_reopened_for_writes_after_leaving_readonly() {
    let dir = tempfile::tempdir().unwrap();
    let shard_file = Connection::open(dir.path().join("shard1.db")).unwrap();
    shard_file
        .execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);")
        .unwrap();
    drop(shard_file);

    let mut group = seeded_group(dir.path());
    set_shard_state(&mut group, 1, "readonly");
    let count = group
        .value_query("SELECT COUNT(*) FROM items", &[], ShardId(1))
        .unwrap();
    assert_eq!(count, Some(Value::Integer(0)));

    set_shard_state(&mut group, 1, "up");
    assert_eq!(group.shard_info_fresh(ShardId(1)).unwrap().state, ShardState::Up);

    let outcome = group
        .query(
            "INSERT INTO items (name) VALUES (?)",
            &[Value::Text("written".to_string())],
            ShardId(1),
        )
        .unwrap();
    assert_eq!(outcome.inserted_id(), Some(1));
    assert!(group.is_connected(ShardId(1)));

    let on_disk = Connection::open(dir.path().join("shard1.db")).unwrap();
    let name: String = on_disk
        .query_row("SELECT name FROM items WHERE id = 1", [], |row| row.get(0))
        .unwrap();
    assert_eq!(name, "written");
}

#[test]
fn next_shard_accepts_state_spellings_the_directory_accepts() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = seeded_group(dir.path());
    group.assign_library(LibraryId(1), ShardId(1)).unwrap();
    set_shard_state(&mut group, 2, "UP");
    set_shard_state(&mut group, 3, " Up ");
    set_host_state(&mut group, 2, "Up");

    assert_eq!(group.shard_info(ShardId(3)).unwrap().state, ShardState::Up);
    assert_eq!(group.next_shard().unwrap(), ShardId(2));

    group.assign_library(LibraryId(2), ShardId(2)).unwrap();
    group.assign_library(LibraryId(3), ShardId(3)).unwrap();
    set_shard_state(&mut group, 1, "READONLY");
    assert_eq!(group.next_shard().unwrap(), ShardId(2));

    set_shard_state(&mut group, 2, "Down");
    set_shard_state(&mut group, 3, "maintenance");
    assert!(matches!(
        group.next_shard(),
        Err(ShardError::NotFound(NotFoundTarget::Shard(ShardId::MASTER)))
    ));
}

#[test]
fn next_shard_prefers_least_loaded_writable_shard() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = seeded_group(dir.path());
    group.assign_library(LibraryId(1), ShardId(1)).unwrap();
    group.assign_library(LibraryId(2), ShardId(1)).unwrap();
    group.assign_library(LibraryId(3), ShardId(2)).unwrap();

    assert_eq!(group.next_shard().unwrap(), ShardId(3));

    set_host_state(&mut group, 2, "down");
    assert_eq!(group.next_shard().unwrap(), ShardId(2));
    assert_eq!(
        group.shard_ids().unwrap(),
        vec![ShardId(1), ShardId(2), ShardId(3)]
    );
}

#[test]
fn master_is_shard_zero_and_follows_group_writability() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GroupConfig::new(dir.path().join("master.db"));
    config.master_writable = false;
    let mut group = DatabaseGroup::open("main", &config).unwrap();

    assert!(!group.is_writable(ShardId::MASTER).unwrap());
    assert!(group.query("SELECT 1", &[], ShardId::MASTER).is_ok());
    let err = group
        .query("DELETE FROM libraries", &[], ShardId::MASTER)
        .unwrap_err();
    assert!(matches!(err, ShardError::ShardReadOnly(ShardId::MASTER)));
}

#[test]
fn single_host_group_only_addresses_shard_zero() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GroupConfig::new(dir.path().join("ids.db"));
    config.sharded = false;
    let mut group = DatabaseGroup::open("ids", &config).unwrap();

    group
        .query("CREATE TABLE counters (name TEXT PRIMARY KEY, value INTEGER)", &[], ShardId::MASTER)
        .unwrap();
    assert!(group.shard_ids().unwrap().is_empty());
    assert!(matches!(
        group.resolve_shard(LibraryId(1)),
        Err(ShardError::NotFound(NotFoundTarget::Library(_)))
    ));
    assert!(matches!(
        group.query("SELECT 1", &[], ShardId(1)),
        Err(ShardError::NotFound(NotFoundTarget::Shard(ShardId(1))))
    ));
}

#[test]
fn close_is_idempotent_and_releases_connections() {
    let dir = tempfile::tempdir().unwrap();
    let mut group = seeded_group(dir.path());
    group.query("SELECT 1", &[], ShardId(1)).unwrap();
    group.query("SELECT 1", &[], ShardId(3)).unwrap();
    assert!(group.is_connected(ShardId(1)));

    let report = group.close();
    assert_eq!(report.released, 3);
    assert!(report.is_clean());
    assert_eq!(group.close().released, 0);
    assert!(!group.is_connected(ShardId(1)));

    let err = group.query("SELECT 1", &[], ShardId::MASTER).unwrap_err();
    assert!(err.is_retryable());
}

/// Master with two hosts: host 1 carries shards 1 and 2, host 2 carries shard 3.
fn seeded_group(dir: &Path) -> DatabaseGroup {
    let mut group = DatabaseGroup::open("main", &GroupConfig::new(dir.join("master.db"))).unwrap();
    for (host_id, address, port, tls) in [(1, "db-a.internal", 3306, 0), (2, "db-b.internal", 3307, 1)] {
        group
            .query(
                "INSERT INTO shard_hosts (host_id, address, port, username, password, tls)
                 VALUES (?, ?, ?, ?, ?, ?)",
                &[
                    Value::Integer(host_id),
                    Value::Text(address.to_string()),
                    Value::Integer(port),
                    Value::Text("app".to_string()),
                    Value::Text("secret".to_string()),
                    Value::Integer(tls),
                ],
                ShardId::MASTER,
            )
            .unwrap();
    }
    for (shard_id, host_id) in [(1, 1), (2, 1), (3, 2)] {
        group
            .query(
                "INSERT INTO shards (shard_id, host_id, db) VALUES (?, ?, ?)",
                &[
                    Value::Integer(shard_id),
                    Value::Integer(host_id),
                    Value::Text(format!("shard{shard_id}.db")),
                ],
                ShardId::MASTER,
            )
            .unwrap();
    }
    group
}

fn set_shard_state(group: &mut DatabaseGroup, shard_id: i64, state: &str) {
    group
        .query(
            "UPDATE shards SET state = ? WHERE shard_id = ?",
            &[Value::Text(state.to_string()), Value::Integer(shard_id)],
            ShardId::MASTER,
        )
        .unwrap();
}

fn set_host_state(group: &mut DatabaseGroup, host_id: i64, state: &str) {
    group
        .query(
            "UPDATE shard_hosts SET state = ? WHERE host_id = ?",
            &[Value::Text(state.to_string()), Value::Integer(host_id)],
            ShardId::MASTER,
        )
        .unwrap();
}
