//! Per-shard connection ownership.
//!
//! # Responsibility
//! - Lazily open and memoize one connection per shard.
//! - Enforce shard state before handing a connection out.
//! - Drive physical per-shard transaction statements for the coordinator.
//!
//! # Invariants
//! - Connections are never shared across shard ids.
//! - State checks run before any connection attempt.
//! - `close()` is safe to call repeatedly.
//! - A handle opened while its shard was read-only is never used for writes;
//!   it is reopened once the shard accepts writes again.

use super::{ShardDirectory, ShardId, ShardInfo, ShardState};
use crate::error::{ShardError, ShardResult};
use crate::txn::ShardTransactions;
use log::{error, info, warn};
use rusqlite::{Connection, OpenFlags};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const MEMORY_DATABASE: &str = ":memory:";

/// Opens a physical connection for a shard record.
pub trait ShardConnector {
    fn connect(&self, info: &ShardInfo) -> rusqlite::Result<Connection>;
}

/// Connector mapping each shard's database name to a SQLite file.
///
/// Host, port, credentials and TLS flags are carried through for logging only.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    data_dir: PathBuf,
    create_missing: bool,
    busy_timeout: Duration,
    statement_cache_capacity: usize,
}

impl SqliteConnector {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            create_missing: true,
            busy_timeout: Duration::from_secs(5),
            statement_cache_capacity: 64,
        }
    }

    pub fn with_create_missing(mut self, create_missing: bool) -> Self {
        self.create_missing = create_missing;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// File backing a shard's database.
    pub fn shard_path(&self, info: &ShardInfo) -> PathBuf {
        self.data_dir.join(&info.database)
    }
}

impl ShardConnector for SqliteConnector {
    fn connect(&self, info: &ShardInfo) -> rusqlite::Result<Connection> {
        let conn = if info.database == MEMORY_DATABASE {
            Connection::open_in_memory()?
        } else {
            let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            if info.state == ShardState::ReadOnly {
                flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
            } else {
                flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
                if self.create_missing {
                    flags |= OpenFlags::SQLITE_OPEN_CREATE;
                }
            }
            Connection::open_with_flags(self.shard_path(info), flags)?
        };

        configure_connection(&conn, self.busy_timeout, self.statement_cache_capacity)?;
        Ok(conn)
    }
}

/// Applies the pragmas and cache sizing every managed connection shares.
pub(crate) fn configure_connection(
    conn: &Connection,
    busy_timeout: Duration,
    statement_cache_capacity: usize,
) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    conn.set_prepared_statement_cache_capacity(statement_cache_capacity);
    Ok(())
}

/// A memoized shard handle and the access mode it was opened with.
struct HeldConnection {
    conn: Connection,
    read_only: bool,
}

/// Owner of the master connection and every lazily opened shard connection.
pub struct ConnectionManager {
    master: Option<Connection>,
    master_writable: bool,
    shards: HashMap<ShardId, HeldConnection>,
    connector: Box<dyn ShardConnector>,
}

impl ConnectionManager {
    pub fn new(
        master: Connection,
        master_writable: bool,
        connector: Box<dyn ShardConnector>,
    ) -> Self {
        Self {
            master: Some(master),
            master_writable,
            shards: HashMap::new(),
            connector,
        }
    }

    /// Master database connection (shard `0`).
    pub fn master(&self) -> ShardResult<&Connection> {
        self.master
            .as_ref()
            .ok_or_else(|| ShardError::unavailable(ShardId::MASTER, "connection closed"))
    }

    pub fn master_writable(&self) -> bool {
        self.master_writable
    }

    /// Returns the memoized connection for a shard, opening it on first use.
    ///
    /// # Errors
    /// - `ShardUnavailable` when the shard is down or cannot be opened, or when
    ///   a read-only handle would have to be reopened mid-transaction.
    /// - `ShardReadOnly` when `for_writing` and the shard does not accept writes.
    /// - `NotFound` when the directory has no such shard.
    pub fn get_connection(
        &mut self,
        directory: &mut ShardDirectory,
        shard_id: ShardId,
        for_writing: bool,
    ) -> ShardResult<&Connection> {
        if shard_id.is_master() {
            if for_writing && !self.master_writable {
                return Err(ShardError::ShardReadOnly(shard_id));
            }
            return self.master();
        }

        let master = self
            .master
            .as_ref()
            .ok_or_else(|| ShardError::unavailable(ShardId::MASTER, "connection closed"))?;
        let shard = directory.shard_info(master, shard_id)?;
        match shard.state {
            ShardState::Down => {
                return Err(ShardError::unavailable(shard_id, "shard is marked down"));
            }
            ShardState::ReadOnly if for_writing => {
                return Err(ShardError::ShardReadOnly(shard_id));
            }
            _ => {}
        }

        if for_writing {
            self.drop_read_only_handle(shard_id)?;
        }

        match self.shards.entry(shard_id) {
            Entry::Occupied(entry) => Ok(&entry.into_mut().conn),
            Entry::Vacant(entry) => {
                let conn = open_shard(self.connector.as_ref(), &shard)?;
                let held = entry.insert(HeldConnection {
                    conn,
                    read_only: shard.state == ShardState::ReadOnly,
                });
                Ok(&held.conn)
            }
        }
    }

    /// Connection already held for a shard, if any.
    pub fn held(&self, shard_id: ShardId) -> Option<&Connection> {
        if shard_id.is_master() {
            return self.master.as_ref();
        }
        self.shards.get(&shard_id).map(|held| &held.conn)
    }

    pub fn is_connected(&self, shard_id: ShardId) -> bool {
        self.held(shard_id).is_some()
    }

    /// Number of shard connections held, master excluded.
    pub fn shard_connection_count(&self) -> usize {
        self.shards.len()
    }

    /// Releases every held connection, master included.
    ///
    /// Close failures are logged and the handle is dropped; returns how many
    /// handles were released by this call.
    pub fn close(&mut self) -> usize {
        let mut released = 0;
        let mut shard_ids = self.shards.keys().copied().collect::<Vec<_>>();
        shard_ids.sort();
        for shard_id in shard_ids {
            if let Some(held) = self.shards.remove(&shard_id) {
                release(shard_id, held.conn);
                released += 1;
            }
        }
        if let Some(conn) = self.master.take() {
            release(ShardId::MASTER, conn);
            released += 1;
        }
        released
    }

    /// Releases a handle opened read-only so the next use reopens it writable.
    fn drop_read_only_handle(&mut self, shard_id: ShardId) -> ShardResult<()> {
        match self.shards.get(&shard_id) {
            Some(held) if held.read_only => {
                if !held.conn.is_autocommit() {
                    return Err(ShardError::unavailable(
                        shard_id,
                        "read-only connection is inside an open transaction",
                    ));
                }
            }
            _ => return Ok(()),
        }
        if let Some(held) = self.shards.remove(&shard_id) {
            info!(
                "event=shard_reopen module=shard status=start shard_id={} reason=now_writable",
                shard_id
            );
            release(shard_id, held.conn);
        }
        Ok(())
    }

    fn require_held(&self, shard_id: ShardId) -> ShardResult<&Connection> {
        self.held(shard_id)
            .ok_or_else(|| ShardError::unavailable(shard_id, "no open connection"))
    }

    fn run_control(&self, shard_id: ShardId, sql: &str) -> ShardResult<()> {
        self.require_held(shard_id)?
            .execute_batch(sql)
            .map_err(|err| ShardError::from_driver(err, sql, &[], shard_id))
    }
}

impl ShardTransactions for ConnectionManager {
    fn begin_shard(&mut self, shard_id: ShardId) -> ShardResult<()> {
        self.run_control(shard_id, "BEGIN")
    }

    fn commit_shard(&mut self, shard_id: ShardId) -> ShardResult<()> {
        self.run_control(shard_id, "COMMIT")
    }

    fn rollback_shard(&mut self, shard_id: ShardId) -> ShardResult<()> {
        self.run_control(shard_id, "ROLLBACK")
    }
}

fn open_shard(connector: &dyn ShardConnector, shard: &ShardInfo) -> ShardResult<Connection> {
    let started_at = Instant::now();
    info!(
        "event=shard_connect module=shard status=start shard_id={} host={} port={} db={} tls={}",
        shard.shard_id, shard.host, shard.port, shard.database, shard.tls
    );

    match connector.connect(shard) {
        Ok(conn) => {
            info!(
                "event=shard_connect module=shard status=ok shard_id={} duration_ms={}",
                shard.shard_id,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=shard_connect module=shard status=error shard_id={} duration_ms={} error_code=shard_unavailable error={}",
                shard.shard_id,
                started_at.elapsed().as_millis(),
                err
            );
            Err(ShardError::unavailable(shard.shard_id, err))
        }
    }
}

fn release(shard_id: ShardId, conn: Connection) {
    if let Err((_conn, err)) = conn.close() {
        warn!(
            "event=shard_close module=shard status=error shard_id={} error={}",
            shard_id, err
        );
    }
}

/// Resolves the shard data directory for a master database path.
pub(crate) fn default_data_dir(master_path: &Path) -> PathBuf {
    master_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
