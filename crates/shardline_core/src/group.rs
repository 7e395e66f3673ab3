//! Database group: the call surface business code uses.
//!
//! # Responsibility
//! - Route every statement to the shard it names, enforcing shard state.
//! - Join every touched shard to the group's open virtual transaction.
//! - Expose directory lookups, statement caching and bulk inserts.
//!
//! # Invariants
//! - One coordinator, one directory cache and one connection per shard per group.
//! - A statement is classified, NULL-rewritten and state-checked before it
//!   reaches a connection.
//! - Single-host groups only address shard `0`.

use crate::config::GroupConfig;
use crate::db::{open_db, open_db_in_memory, MasterOptions};
use crate::error::{NotFoundTarget, ShardError, ShardResult};
use crate::query::engine;
use crate::query::{
    fingerprint, plan_bulk_insert, BulkInsertSummary, PreparedStatement, QueryOutcome, Row,
    StatementCache, StatementCaching,
};
use crate::shard::{
    ConnectionManager, LibraryId, ShardConnector, ShardDirectory, ShardId, ShardInfo,
    SqliteConnector,
};
use crate::sql::{classify, substitute_nulls};
use crate::txn::{TransactionCoordinator, TxnEvent, TxnOutcome};
use log::{info, warn};
use rusqlite::types::Value;
use rusqlite::Connection;

const ASSIGN_LIBRARY_SQL: &str = "INSERT INTO libraries (library_id, shard_id) VALUES (?, ?)";
const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 64;

/// Result of `DatabaseGroup::close`.
#[derive(Debug, Default)]
pub struct CloseReport {
    /// Handles released by this call, master included.
    pub released: usize,
    /// Failure while rolling back a transaction left open at close time.
    pub rollback_error: Option<ShardError>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.rollback_error.is_none()
    }
}

/// One logical database: a master plus (when sharded) its shards.
pub struct DatabaseGroup {
    name: String,
    sharded: bool,
    directory: ShardDirectory,
    connections: ConnectionManager,
    statements: StatementCache,
    coordinator: TransactionCoordinator,
}

impl DatabaseGroup {
    /// Opens a group from configuration, bootstrapping the master schema.
    pub fn open(name: impl Into<String>, config: &GroupConfig) -> ShardResult<Self> {
        let name = name.into();
        let options = MasterOptions {
            busy_timeout: config.busy_timeout(),
            statement_cache_capacity: config.statement_cache_capacity,
            directory_schema: config.sharded,
        };
        let master = if config.is_in_memory() {
            open_db_in_memory(&options)?
        } else {
            open_db(&config.master_path, &options)?
        };

        let connector = SqliteConnector::new(config.resolved_data_dir())
            .with_create_missing(config.create_missing_shards)
            .with_busy_timeout(config.busy_timeout())
            .with_statement_cache_capacity(config.statement_cache_capacity);

        Ok(Self::from_parts(
            name,
            master,
            config.master_writable,
            config.sharded,
            Box::new(connector),
        )
        .with_statement_cache_capacity(config.statement_cache_capacity))
    }

    /// Assembles a group from an already bootstrapped master connection.
    pub fn from_parts(
        name: impl Into<String>,
        master: Connection,
        master_writable: bool,
        sharded: bool,
        connector: Box<dyn ShardConnector>,
    ) -> Self {
        let name = name.into();
        Self {
            coordinator: TransactionCoordinator::new(name.clone()),
            name,
            sharded,
            directory: ShardDirectory::new(),
            connections: ConnectionManager::new(master, master_writable, connector),
            statements: StatementCache::with_capacity(DEFAULT_STATEMENT_CACHE_CAPACITY),
        }
    }

    /// Bounds the group-level statement cache; existing entries are dropped.
    pub fn with_statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statements = StatementCache::with_capacity(capacity);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_sharded(&self) -> bool {
        self.sharded
    }

    // ---- virtual transactions -------------------------------------------

    pub fn begin_transaction(&mut self) {
        self.coordinator.begin();
    }

    pub fn commit(&mut self) -> ShardResult<TxnOutcome> {
        self.coordinator.commit(&mut self.connections)
    }

    /// Rolls back; `all` unwinds every nesting level at once.
    pub fn rollback(&mut self, all: bool) -> ShardResult<TxnOutcome> {
        self.coordinator.rollback(&mut self.connections, all)
    }

    pub fn transaction_in_progress(&self) -> bool {
        self.coordinator.in_transaction()
    }

    pub fn nesting_level(&self) -> u32 {
        self.coordinator.nesting_level()
    }

    pub fn transaction_timestamp(&self) -> ShardResult<String> {
        self.coordinator.timestamp()
    }

    pub fn transaction_timestamp_unix(&self) -> ShardResult<i64> {
        self.coordinator.timestamp_unix()
    }

    pub fn transaction_timestamp_micros(&self) -> ShardResult<i64> {
        self.coordinator.timestamp_micros()
    }

    /// Registers a lifecycle handler, e.g. to mirror a write-back cache.
    pub fn add_callback(&mut self, event: TxnEvent, handler: impl FnMut() + 'static) {
        self.coordinator.add_callback(event, handler);
    }

    /// Shards touched by the open virtual transaction, ascending.
    pub fn touched_shards(&self) -> Vec<ShardId> {
        self.coordinator.touched_shards()
    }

    // ---- shard directory --------------------------------------------------

    pub fn resolve_shard(&mut self, library_id: LibraryId) -> ShardResult<ShardId> {
        self.require_sharded(NotFoundTarget::Library(library_id))?;
        let master = self.connections.master()?;
        self.directory.resolve_shard(master, library_id)
    }

    /// Resolves from the master, bypassing and refreshing the cache.
    pub fn resolve_shard_fresh(&mut self, library_id: LibraryId) -> ShardResult<ShardId> {
        self.require_sharded(NotFoundTarget::Library(library_id))?;
        let master = self.connections.master()?;
        self.directory.resolve_shard_fresh(master, library_id)
    }

    pub fn shard_info(&mut self, shard_id: ShardId) -> ShardResult<ShardInfo> {
        self.require_sharded(NotFoundTarget::Shard(shard_id))?;
        let master = self.connections.master()?;
        self.directory.shard_info(master, shard_id)
    }

    pub fn shard_info_fresh(&mut self, shard_id: ShardId) -> ShardResult<ShardInfo> {
        self.require_sharded(NotFoundTarget::Shard(shard_id))?;
        let master = self.connections.master()?;
        self.directory.shard_info_fresh(master, shard_id)
    }

    /// True iff the shard accepts writes. Shard `0` follows the group setting.
    pub fn is_writable(&mut self, shard_id: ShardId) -> ShardResult<bool> {
        if shard_id.is_master() {
            return Ok(self.connections.master_writable());
        }
        self.require_sharded(NotFoundTarget::Shard(shard_id))?;
        let master = self.connections.master()?;
        self.directory.is_writable(master, shard_id)
    }

    pub fn shard_ids(&self) -> ShardResult<Vec<ShardId>> {
        if !self.sharded {
            return Ok(Vec::new());
        }
        self.directory.shard_ids(self.connections.master()?)
    }

    /// Writable shard with the fewest libraries, for placing a new library.
    pub fn next_shard(&self) -> ShardResult<ShardId> {
        self.require_sharded(NotFoundTarget::Shard(ShardId::MASTER))?;
        self.directory.next_shard(self.connections.master()?)
    }

    /// Records a library-to-shard mapping on the master. Joins the open
    /// virtual transaction, if any.
    pub fn assign_library(&mut self, library_id: LibraryId, shard_id: ShardId) -> ShardResult<()> {
        self.require_sharded(NotFoundTarget::Library(library_id))?;
        self.shard_info(shard_id)?;
        self.query(
            ASSIGN_LIBRARY_SQL,
            &[Value::Integer(library_id.0), Value::Integer(shard_id.0)],
            ShardId::MASTER,
        )?;
        info!(
            "event=library_assign module=group status=ok group={} library_id={} shard_id={}",
            self.name, library_id, shard_id
        );
        Ok(())
    }

    // ---- queries ------------------------------------------------------------

    /// Executes a statement on `shard_id` without statement caching.
    pub fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        shard_id: ShardId,
    ) -> ShardResult<QueryOutcome> {
        self.query_with(sql, params, shard_id, &StatementCaching::Off)
    }

    /// Executes a statement on `shard_id`, reusing a cached statement when
    /// `caching` asks for it.
    pub fn query_with(
        &mut self,
        sql: &str,
        params: &[Value],
        shard_id: ShardId,
        caching: &StatementCaching,
    ) -> ShardResult<QueryOutcome> {
        let kind = classify(sql);
        let bound = substitute_nulls(sql, params, kind)?;

        // A caller key describes the statement before NULL rewriting.
        let caching = match caching {
            StatementCaching::Keyed(_) if bound.rewritten => StatementCaching::Hashed,
            other => other.clone(),
        };

        let statement = match fingerprint(&bound.sql, &caching) {
            Some(key) => match self.statements.lookup(shard_id, &key) {
                Some(statement) => statement,
                None => {
                    let statement = PreparedStatement::new(&bound.sql, shard_id, kind, Some(key));
                    self.statements.insert(statement.clone());
                    statement
                }
            },
            None => PreparedStatement::new(&bound.sql, shard_id, kind, None),
        };

        self.run_statement(&statement, &bound.params)
    }

    /// First column of every row; `None` when the result is empty.
    pub fn column_query(
        &mut self,
        sql: &str,
        params: &[Value],
        shard_id: ShardId,
    ) -> ShardResult<Option<Vec<Value>>> {
        let rows = self.read_rows(sql, params, shard_id)?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            rows.into_iter()
                .map(|row| row.into_values().into_iter().next().unwrap_or(Value::Null))
                .collect(),
        ))
    }

    /// First row; `None` when the result is empty.
    pub fn row_query(
        &mut self,
        sql: &str,
        params: &[Value],
        shard_id: ShardId,
    ) -> ShardResult<Option<Row>> {
        Ok(self.read_rows(sql, params, shard_id)?.into_iter().next())
    }

    /// First column of the first row; `None` when the result is empty.
    pub fn value_query(
        &mut self,
        sql: &str,
        params: &[Value],
        shard_id: ShardId,
    ) -> ShardResult<Option<Value>> {
        Ok(self
            .row_query(sql, params, shard_id)?
            .map(|row| row.into_values().into_iter().next().unwrap_or(Value::Null)))
    }

    /// Inserts `rows` in statements of at most `max_rows_per_statement` rows.
    ///
    /// `sql_prefix` is the statement up to its value list, e.g.
    /// `INSERT INTO items (library_id, key) VALUES`.
    pub fn bulk_insert(
        &mut self,
        sql_prefix: &str,
        rows: &[Vec<Value>],
        max_rows_per_statement: usize,
        leading: Option<&Value>,
        shard_id: ShardId,
    ) -> ShardResult<BulkInsertSummary> {
        let chunks = plan_bulk_insert(sql_prefix, rows, max_rows_per_statement, leading)?;
        let mut summary = BulkInsertSummary::default();
        for chunk in chunks {
            self.query_with(&chunk.sql, &chunk.params, shard_id, &StatementCaching::Hashed)?;
            summary.statements += 1;
            summary.rows += chunk.rows;
        }

        if summary.statements > 0 {
            info!(
                "event=bulk_insert module=group status=ok group={} shard_id={} statements={} rows={}",
                self.name, shard_id, summary.statements, summary.rows
            );
        }
        Ok(summary)
    }

    /// Prepares `sql` on `shard_id`, returning a cached descriptor when
    /// `caching` hits. Preparation errors surface immediately.
    ///
    /// Preparing does not join the shard to the open virtual transaction;
    /// `execute_statement` does.
    pub fn get_statement(
        &mut self,
        sql: &str,
        caching: &StatementCaching,
        shard_id: ShardId,
    ) -> ShardResult<PreparedStatement> {
        let key = fingerprint(sql, caching);
        if let Some(key) = key.as_deref() {
            if let Some(statement) = self.statements.lookup(shard_id, key) {
                return Ok(statement);
            }
        }

        let statement = PreparedStatement::new(sql, shard_id, classify(sql), key);
        let conn = self.checked_connection(shard_id, statement.is_write_query())?;
        let prepared = if statement.fingerprint().is_some() {
            conn.prepare_cached(sql).map(|_| ())
        } else {
            conn.prepare(sql).map(|_| ())
        };
        prepared.map_err(|err| ShardError::from_driver(err, sql, &[], shard_id))?;

        self.statements.insert(statement.clone());
        Ok(statement)
    }

    /// Executes a statement from `get_statement`. NULL parameters are bound
    /// as SQL NULL; the statement text is never rewritten.
    pub fn execute_statement(
        &mut self,
        statement: &PreparedStatement,
        params: &[Value],
    ) -> ShardResult<QueryOutcome> {
        self.run_statement(statement, params)
    }

    pub fn cached_statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn statement_cache_capacity(&self) -> usize {
        self.statements.capacity()
    }

    pub fn is_connected(&self, shard_id: ShardId) -> bool {
        self.connections.is_connected(shard_id)
    }

    /// Rolls back any open virtual transaction and releases every connection.
    ///
    /// Safe to call more than once. Connections are released even when the
    /// rollback fails; the failure is returned in the report.
    pub fn close(&mut self) -> CloseReport {
        let mut report = CloseReport::default();
        if self.coordinator.in_transaction() {
            warn!(
                "event=group_close module=group status=error group={} error_code=transaction_open",
                self.name
            );
            if let Err(err) = self.coordinator.rollback(&mut self.connections, true) {
                warn!(
                    "event=group_close module=group status=error group={} error_code=rollback_failed error={}",
                    self.name, err
                );
                report.rollback_error = Some(err);
            }
        }
        self.statements.clear();
        report.released = self.connections.close();
        info!(
            "event=group_close module=group status=ok group={} released={} clean={}",
            self.name,
            report.released,
            report.is_clean()
        );
        report
    }

    fn read_rows(&mut self, sql: &str, params: &[Value], shard_id: ShardId) -> ShardResult<Vec<Row>> {
        match self.query(sql, params, shard_id)? {
            QueryOutcome::Rows(rows) => Ok(rows),
            _ => Err(ShardError::InvalidInput(
                "column/row/value queries require a SELECT or SHOW statement".to_string(),
            )),
        }
    }

    fn run_statement(
        &mut self,
        statement: &PreparedStatement,
        params: &[Value],
    ) -> ShardResult<QueryOutcome> {
        let conn = self.connection_for(statement.shard_id(), statement.is_write_query())?;
        engine::run(conn, statement, params)
    }

    /// State-checks the shard and returns its connection.
    fn checked_connection(
        &mut self,
        shard_id: ShardId,
        for_writing: bool,
    ) -> ShardResult<&Connection> {
        if !shard_id.is_master() {
            self.require_sharded(NotFoundTarget::Shard(shard_id))?;
        }
        self.connections
            .get_connection(&mut self.directory, shard_id, for_writing)
    }

    /// Like `checked_connection`, and joins the shard to the open transaction.
    fn connection_for(&mut self, shard_id: ShardId, for_writing: bool) -> ShardResult<&Connection> {
        self.checked_connection(shard_id, for_writing)?;
        self.coordinator.touch(&mut self.connections, shard_id)?;
        self.connections
            .held(shard_id)
            .ok_or_else(|| ShardError::unavailable(shard_id, "no open connection"))
    }

    fn require_sharded(&self, target: NotFoundTarget) -> ShardResult<()> {
        if self.sharded {
            Ok(())
        } else {
            Err(ShardError::NotFound(target))
        }
    }
}
