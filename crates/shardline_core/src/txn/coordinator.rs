//! Reference-counted virtual transaction state machine.
//!
//! # Invariants
//! - Idle is represented by the absence of state; there is no level-0 state.
//! - One timestamp is sampled per virtual transaction, at the outermost begin.
//! - A nested rollback poisons the transaction; the outermost commit then
//!   rolls back every touched shard instead.
//! - `touched` only grows while open and is dropped with the state.

use super::ShardTransactions;
use crate::error::{ShardError, ShardResult};
use crate::shard::ShardId;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Lifecycle points external caches can mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnEvent {
    /// Outermost transaction opened.
    Begin,
    /// Every touched shard committed.
    Commit,
    /// Transaction rolled back, or a commit failed and was unwound.
    Reset,
}

/// What a `commit()`/`rollback()` call physically did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOutcome {
    /// Only the nesting level changed.
    Nested,
    /// Shards committed, in the order they were committed.
    Committed(Vec<ShardId>),
    /// Shards rolled back, in the order they were rolled back.
    RolledBack(Vec<ShardId>),
}

type Callback = Box<dyn FnMut()>;

#[derive(Debug)]
struct TransactionState {
    id: Uuid,
    nesting_level: u32,
    started_at: DateTime<Utc>,
    touched: BTreeSet<ShardId>,
    pending_rollback: bool,
}

impl TransactionState {
    fn open() -> Self {
        Self {
            id: Uuid::new_v4(),
            nesting_level: 1,
            started_at: Utc::now(),
            touched: BTreeSet::new(),
            pending_rollback: false,
        }
    }

    fn close_order(&self) -> Vec<ShardId> {
        self.touched.iter().rev().copied().collect()
    }
}

/// Coordinator for one database group's virtual transaction.
pub struct TransactionCoordinator {
    group: String,
    state: Option<TransactionState>,
    callbacks: Vec<(TxnEvent, Callback)>,
}

impl TransactionCoordinator {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            state: None,
            callbacks: Vec::new(),
        }
    }

    /// Registers a handler; handlers for one event run in registration order.
    pub fn add_callback(&mut self, event: TxnEvent, handler: impl FnMut() + 'static) {
        self.callbacks.push((event, Box::new(handler)));
    }

    pub fn in_transaction(&self) -> bool {
        self.state.is_some()
    }

    /// Current nesting depth; `0` when idle.
    pub fn nesting_level(&self) -> u32 {
        self.state.as_ref().map_or(0, |state| state.nesting_level)
    }

    pub fn transaction_id(&self) -> Option<Uuid> {
        self.state.as_ref().map(|state| state.id)
    }

    /// Shards touched by the open transaction, ascending.
    pub fn touched_shards(&self) -> Vec<ShardId> {
        self.state
            .as_ref()
            .map(|state| state.touched.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_poisoned(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.pending_rollback)
    }

    /// Opens the virtual transaction or enters one more nesting level.
    pub fn begin(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.nesting_level += 1;
            debug!(
                "event=txn_begin module=txn status=ok group={} txn_id={} nesting_level={}",
                self.group, state.id, state.nesting_level
            );
            return;
        }

        let state = TransactionState::open();
        info!(
            "event=txn_begin module=txn status=ok group={} txn_id={} nesting_level=1",
            self.group, state.id
        );
        self.state = Some(state);
        self.fire(TxnEvent::Begin);
    }

    /// Opens a physical transaction on `shard_id` the first time it is used
    /// inside the open virtual transaction. No-op while idle.
    pub fn touch<P: ShardTransactions + ?Sized>(
        &mut self,
        physical: &mut P,
        shard_id: ShardId,
    ) -> ShardResult<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        if state.touched.contains(&shard_id) {
            return Ok(());
        }

        physical.begin_shard(shard_id)?;
        state.touched.insert(shard_id);
        debug!(
            "event=txn_touch module=txn status=ok group={} txn_id={} shard_id={}",
            self.group, state.id, shard_id
        );
        Ok(())
    }

    /// Closes one nesting level; the outermost close commits every touched
    /// shard, or rolls them back when the transaction is poisoned.
    pub fn commit<P: ShardTransactions + ?Sized>(
        &mut self,
        physical: &mut P,
    ) -> ShardResult<TxnOutcome> {
        let Some(mut state) = self.state.take() else {
            return Err(ShardError::NoTransactionOpen);
        };

        if state.nesting_level > 1 {
            state.nesting_level -= 1;
            self.state = Some(state);
            return Ok(TxnOutcome::Nested);
        }

        if state.pending_rollback {
            warn!(
                "event=txn_commit module=txn status=error group={} txn_id={} error_code=poisoned",
                self.group, state.id
            );
            return self.roll_back_all(physical, state);
        }

        let order = state.close_order();
        for (index, shard_id) in order.iter().enumerate() {
            if let Err(err) = physical.commit_shard(*shard_id) {
                error!(
                    "event=txn_commit module=txn status=error group={} txn_id={} shard_id={} committed={} error={}",
                    self.group, state.id, shard_id, index, err
                );
                for remaining in &order[index..] {
                    if let Err(rollback_err) = physical.rollback_shard(*remaining) {
                        warn!(
                            "event=txn_rollback module=txn status=error group={} txn_id={} shard_id={} error={}",
                            self.group, state.id, remaining, rollback_err
                        );
                    }
                }
                self.fire(TxnEvent::Reset);
                return Err(err);
            }
        }

        info!(
            "event=txn_commit module=txn status=ok group={} txn_id={} shards={}",
            self.group,
            state.id,
            order.len()
        );
        self.fire(TxnEvent::Commit);
        Ok(TxnOutcome::Committed(order))
    }

    /// Rolls back. Nested levels only poison the transaction unless `all`
    /// is set, which unwinds every level immediately.
    pub fn rollback<P: ShardTransactions + ?Sized>(
        &mut self,
        physical: &mut P,
        all: bool,
    ) -> ShardResult<TxnOutcome> {
        let Some(mut state) = self.state.take() else {
            return Err(ShardError::NoTransactionOpen);
        };

        if state.nesting_level > 1 && !all {
            state.nesting_level -= 1;
            state.pending_rollback = true;
            debug!(
                "event=txn_rollback module=txn status=deferred group={} txn_id={} nesting_level={}",
                self.group, state.id, state.nesting_level
            );
            self.state = Some(state);
            return Ok(TxnOutcome::Nested);
        }

        self.roll_back_all(physical, state)
    }

    /// Transaction timestamp formatted `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn timestamp(&self) -> ShardResult<String> {
        Ok(self.started_at()?.format(TIMESTAMP_FORMAT).to_string())
    }

    /// Transaction timestamp in seconds since the Unix epoch.
    pub fn timestamp_unix(&self) -> ShardResult<i64> {
        Ok(self.started_at()?.timestamp())
    }

    /// Transaction timestamp in microseconds since the Unix epoch.
    pub fn timestamp_micros(&self) -> ShardResult<i64> {
        Ok(self.started_at()?.timestamp_micros())
    }

    fn started_at(&self) -> ShardResult<DateTime<Utc>> {
        self.state
            .as_ref()
            .map(|state| state.started_at)
            .ok_or(ShardError::NoTransactionOpen)
    }

    fn roll_back_all<P: ShardTransactions + ?Sized>(
        &mut self,
        physical: &mut P,
        state: TransactionState,
    ) -> ShardResult<TxnOutcome> {
        let order = state.close_order();
        let mut first_error = None;
        for shard_id in &order {
            if let Err(err) = physical.rollback_shard(*shard_id) {
                warn!(
                    "event=txn_rollback module=txn status=error group={} txn_id={} shard_id={} error={}",
                    self.group, state.id, shard_id, err
                );
                first_error.get_or_insert(err);
            }
        }

        self.fire(TxnEvent::Reset);
        if let Some(err) = first_error {
            return Err(err);
        }

        info!(
            "event=txn_rollback module=txn status=ok group={} txn_id={} shards={}",
            self.group,
            state.id,
            order.len()
        );
        Ok(TxnOutcome::RolledBack(order))
    }

    fn fire(&mut self, event: TxnEvent) {
        for (registered, handler) in self.callbacks.iter_mut() {
            if *registered == event {
                handler();
            }
        }
    }
}
