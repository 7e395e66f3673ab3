//! Shard topology model, directory lookups and connection ownership.
//!
//! # Responsibility
//! - Define shard/library identifiers and the shard record shape.
//! - Resolve libraries to shards and shards to connection targets.
//! - Own exactly one live connection per shard for the group lifetime.
//!
//! # Invariants
//! - Shard `0` is the group's master database, never a directory row.
//! - A write never reaches a shard whose effective state is not `Up`.

use std::fmt::{Display, Formatter};

pub mod connection;
pub mod directory;

pub use connection::{ConnectionManager, ShardConnector, SqliteConnector};
pub use directory::ShardDirectory;

/// Physical partition identifier. `ShardId::MASTER` addresses the master database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(pub i64);

impl ShardId {
    pub const MASTER: ShardId = ShardId(0);

    pub fn is_master(self) -> bool {
        self == Self::MASTER
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical partition key: every library lives on exactly one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LibraryId(pub i64);

impl Display for LibraryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operational state of a shard or shard host.
///
/// Ordering is by restrictiveness: `Up < ReadOnly < Down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShardState {
    Up,
    ReadOnly,
    Down,
}

impl ShardState {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::ReadOnly => "readonly",
            Self::Down => "down",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Self::Up),
            "readonly" | "read_only" => Some(Self::ReadOnly),
            "down" => Some(Self::Down),
            _ => None,
        }
    }

    /// Combines shard and host state; the more restrictive one wins.
    pub fn most_restrictive(self, other: ShardState) -> ShardState {
        self.max(other)
    }
}

/// Connection target and state of one shard, as loaded from the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub shard_id: ShardId,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database name on the host; a SQLite file name under the shard data dir.
    pub database: String,
    pub tls: bool,
    /// Effective state (shard row combined with host row).
    pub state: ShardState,
}

impl ShardInfo {
    pub fn is_writable(&self) -> bool {
        self.state == ShardState::Up
    }
}

#[cfg(test)]
mod tests {
    use super::{ShardId, ShardState};

    #[test]
    fn state_parse_accepts_directory_spellings() {
        assert_eq!(ShardState::parse("UP"), Some(ShardState::Up));
        assert_eq!(ShardState::parse(" readonly "), Some(ShardState::ReadOnly));
        assert_eq!(ShardState::parse("down"), Some(ShardState::Down));
        assert_eq!(ShardState::parse("maintenance"), None);
    }

    #[test]
    fn host_state_can_only_restrict_shard_state() {
        assert_eq!(
            ShardState::Up.most_restrictive(ShardState::ReadOnly),
            ShardState::ReadOnly
        );
        assert_eq!(
            ShardState::Down.most_restrictive(ShardState::Up),
            ShardState::Down
        );
        assert_eq!(ShardState::Up.most_restrictive(ShardState::Up), ShardState::Up);
    }

    #[test]
    fn master_is_shard_zero() {
        assert!(ShardId(0).is_master());
        assert!(!ShardId(1).is_master());
    }
}
