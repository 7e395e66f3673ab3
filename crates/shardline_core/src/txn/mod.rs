//! Virtual cross-shard transactions.
//!
//! # Responsibility
//! - Model nested begin/commit/rollback over lazily opened shard transactions.
//! - Define the seam through which physical per-shard statements are issued.
//!
//! # Invariants
//! - Physical commit/rollback only happens when the outermost level closes.
//! - Touched shards are closed in descending shard id order.

mod coordinator;

pub use coordinator::{TransactionCoordinator, TxnEvent, TxnOutcome};

use crate::error::ShardResult;
use crate::shard::ShardId;

/// Physical transaction control for individual shards.
pub trait ShardTransactions {
    fn begin_shard(&mut self, shard_id: ShardId) -> ShardResult<()>;
    fn commit_shard(&mut self, shard_id: ShardId) -> ShardResult<()>;
    fn rollback_shard(&mut self, shard_id: ShardId) -> ShardResult<()>;
}
