//! Library-to-shard and shard-to-target resolution with a read-through cache.
//!
//! # Responsibility
//! - Resolve a library to its shard through the master `libraries` table.
//! - Load shard connection targets and effective state.
//!
//! # Invariants
//! - Cached entries never expire; `*_fresh` lookups bypass and refresh them.
//! - Unknown persisted state strings are treated as `Down` (fail closed).

use super::{LibraryId, ShardId, ShardInfo, ShardState};
use crate::error::{NotFoundTarget, ShardError, ShardResult};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::HashMap;

const LIBRARY_SHARD_SQL: &str = "SELECT shard_id FROM libraries WHERE library_id = ?1";

const SHARD_INFO_SQL: &str = "SELECT
    s.shard_id,
    s.db,
    s.state AS shard_state,
    h.address,
    h.port,
    h.username,
    h.password,
    h.tls,
    h.state AS host_state
FROM shards s
JOIN shard_hosts h ON h.host_id = s.host_id
WHERE s.shard_id = ?1";

const SHARD_IDS_SQL: &str = "SELECT shard_id FROM shards ORDER BY shard_id ASC";

/// Every shard with its raw states, least loaded first. State filtering
/// happens in Rust so it follows `ShardState::parse`.
const NEXT_SHARD_SQL: &str = "SELECT s.shard_id, s.state AS shard_state, h.state AS host_state,
       COUNT(l.library_id) AS library_count
FROM shards s
JOIN shard_hosts h ON h.host_id = s.host_id
LEFT JOIN libraries l ON l.shard_id = s.shard_id
GROUP BY s.shard_id
ORDER BY library_count ASC, s.shard_id ASC";

/// Shard directory owned by one database group.
///
/// Created with the group and dropped with it; nothing here is process-global.
#[derive(Debug, Default)]
pub struct ShardDirectory {
    library_shards: HashMap<LibraryId, ShardId>,
    shard_infos: HashMap<ShardId, ShardInfo>,
}

impl ShardDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the shard a library lives on, reading through the cache.
    pub fn resolve_shard(
        &mut self,
        master: &Connection,
        library_id: LibraryId,
    ) -> ShardResult<ShardId> {
        if let Some(shard_id) = self.library_shards.get(&library_id) {
            return Ok(*shard_id);
        }
        self.resolve_shard_fresh(master, library_id)
    }

    /// Resolves a library's shard from the master, replacing any cached entry.
    pub fn resolve_shard_fresh(
        &mut self,
        master: &Connection,
        library_id: LibraryId,
    ) -> ShardResult<ShardId> {
        let shard_id = master
            .query_row(LIBRARY_SHARD_SQL, [library_id.0], |row| row.get::<_, i64>(0))
            .optional()
            .map_err(|err| {
                ShardError::from_driver(
                    err,
                    LIBRARY_SHARD_SQL,
                    &[Value::Integer(library_id.0)],
                    ShardId::MASTER,
                )
            })?
            .map(ShardId)
            .ok_or(ShardError::NotFound(NotFoundTarget::Library(library_id)))?;

        debug!(
            "event=shard_resolve module=shard status=ok library_id={} shard_id={}",
            library_id, shard_id
        );
        self.library_shards.insert(library_id, shard_id);
        Ok(shard_id)
    }

    /// Returns the connection target and effective state of a shard.
    pub fn shard_info(&mut self, master: &Connection, shard_id: ShardId) -> ShardResult<ShardInfo> {
        if let Some(info) = self.shard_infos.get(&shard_id) {
            return Ok(info.clone());
        }
        self.shard_info_fresh(master, shard_id)
    }

    /// Reloads a shard record from the master, replacing any cached entry.
    pub fn shard_info_fresh(
        &mut self,
        master: &Connection,
        shard_id: ShardId,
    ) -> ShardResult<ShardInfo> {
        if shard_id.is_master() {
            return Err(ShardError::NotFound(NotFoundTarget::Shard(shard_id)));
        }

        let info = master
            .query_row(SHARD_INFO_SQL, [shard_id.0], parse_shard_row)
            .optional()
            .map_err(|err| {
                ShardError::from_driver(
                    err,
                    SHARD_INFO_SQL,
                    &[Value::Integer(shard_id.0)],
                    ShardId::MASTER,
                )
            })?
            .ok_or(ShardError::NotFound(NotFoundTarget::Shard(shard_id)))?;

        self.shard_infos.insert(shard_id, info.clone());
        Ok(info)
    }

    /// True iff the shard's effective state is `Up`.
    pub fn is_writable(&mut self, master: &Connection, shard_id: ShardId) -> ShardResult<bool> {
        Ok(self.shard_info(master, shard_id)?.is_writable())
    }

    /// Lists every shard id known to the directory, ascending.
    pub fn shard_ids(&self, master: &Connection) -> ShardResult<Vec<ShardId>> {
        let mut stmt = master
            .prepare(SHARD_IDS_SQL)
            .map_err(|err| ShardError::from_driver(err, SHARD_IDS_SQL, &[], ShardId::MASTER))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|err| ShardError::from_driver(err, SHARD_IDS_SQL, &[], ShardId::MASTER))?;
        Ok(ids.into_iter().map(ShardId).collect())
    }

    /// Picks the writable shard holding the fewest libraries for a new library.
    pub fn next_shard(&self, master: &Connection) -> ShardResult<ShardId> {
        let driver_err = |err: rusqlite::Error| {
            ShardError::from_driver(err, NEXT_SHARD_SQL, &[], ShardId::MASTER)
        };
        let mut stmt = master.prepare(NEXT_SHARD_SQL).map_err(driver_err)?;
        let candidates = stmt
            .query_map([], |row| {
                let shard_id = ShardId(row.get("shard_id")?);
                let shard_state =
                    parse_state(shard_id, "shards.state", &row.get::<_, String>("shard_state")?);
                let host_state = parse_state(
                    shard_id,
                    "shard_hosts.state",
                    &row.get::<_, String>("host_state")?,
                );
                Ok((shard_id, shard_state.most_restrictive(host_state)))
            })
            .map_err(driver_err)?;

        for candidate in candidates {
            let (shard_id, state) = candidate.map_err(driver_err)?;
            if state == ShardState::Up {
                return Ok(shard_id);
            }
        }
        Err(ShardError::NotFound(NotFoundTarget::Shard(ShardId::MASTER)))
    }

    pub fn cached_libraries(&self) -> usize {
        self.library_shards.len()
    }

    pub fn cached_shards(&self) -> usize {
        self.shard_infos.len()
    }
}

fn parse_shard_row(row: &Row<'_>) -> rusqlite::Result<ShardInfo> {
    let shard_id = ShardId(row.get("shard_id")?);
    let shard_state = parse_state(shard_id, "shards.state", &row.get::<_, String>("shard_state")?);
    let host_state = parse_state(
        shard_id,
        "shard_hosts.state",
        &row.get::<_, String>("host_state")?,
    );

    let raw_port: i64 = row.get("port")?;
    let port = u16::try_from(raw_port).unwrap_or_else(|_| {
        warn!(
            "event=shard_info module=shard status=error shard_id={} error_code=invalid_port port={}",
            shard_id, raw_port
        );
        0
    });

    Ok(ShardInfo {
        shard_id,
        host: row.get("address")?,
        port,
        username: row.get("username")?,
        password: row.get("password")?,
        database: row.get("db")?,
        tls: row.get::<_, i64>("tls")? != 0,
        state: shard_state.most_restrictive(host_state),
    })
}

fn parse_state(shard_id: ShardId, column: &str, value: &str) -> ShardState {
    ShardState::parse(value).unwrap_or_else(|| {
        warn!(
            "event=shard_info module=shard status=error shard_id={} error_code=invalid_state column={} value={}",
            shard_id, column, value
        );
        ShardState::Down
    })
}
