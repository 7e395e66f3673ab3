//! Master connection bootstrap.
//!
//! # Responsibility
//! - Open file or in-memory master connections.
//! - Apply the pragmas and statement cache sizing shared by all connections.
//! - Run directory migrations for sharded groups before returning.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Sharded masters have the directory schema fully applied.

use super::migrations::apply_migrations;
use super::DbResult;
use crate::shard::connection::configure_connection;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Settings applied while opening a master database.
#[derive(Debug, Clone)]
pub struct MasterOptions {
    pub busy_timeout: Duration,
    pub statement_cache_capacity: usize,
    /// Apply the shard directory schema (sharded groups only).
    pub directory_schema: bool,
}

impl Default for MasterOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            statement_cache_capacity: 64,
            directory_schema: true,
        }
    }
}

/// Opens a master database file and applies pending migrations.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>, options: &MasterOptions) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=file");

    let mut conn = match Connection::open(path) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=file duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    finish_open(&mut conn, options, "file", started_at)?;
    Ok(conn)
}

/// Opens an in-memory master database and applies pending migrations.
pub fn open_db_in_memory(options: &MasterOptions) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=memory");

    let mut conn = Connection::open_in_memory()?;
    finish_open(&mut conn, options, "memory", started_at)?;
    Ok(conn)
}

fn finish_open(
    conn: &mut Connection,
    options: &MasterOptions,
    mode: &str,
    started_at: Instant,
) -> DbResult<()> {
    match bootstrap_connection(conn, options) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} directory_schema={} duration_ms={}",
                mode,
                options.directory_schema,
                started_at.elapsed().as_millis()
            );
            Ok(())
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, options: &MasterOptions) -> DbResult<()> {
    configure_connection(conn, options.busy_timeout, options.statement_cache_capacity)?;
    if options.directory_schema {
        apply_migrations(conn)?;
    }
    Ok(())
}
