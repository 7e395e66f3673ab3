//! Named database groups owned by one process.
//!
//! Each group keeps its own coordinator, directory cache and connections;
//! the registry only routes by name and closes everything on shutdown.

use crate::config::ClusterConfig;
use crate::error::ShardError;
use crate::group::DatabaseGroup;
use log::info;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Group registration and lookup errors.
#[derive(Debug)]
pub enum RegistryError {
    InvalidGroupName(String),
    DuplicateGroup(String),
    GroupNotFound(String),
    Open { group: String, source: ShardError },
    Close { group: String, source: ShardError },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidGroupName(value) => write!(f, "group name is invalid: {value}"),
            Self::DuplicateGroup(value) => write!(f, "group already registered: {value}"),
            Self::GroupNotFound(value) => write!(f, "group not found: {value}"),
            Self::Open { group, source } => write!(f, "failed to open group {group}: {source}"),
            Self::Close { group, source } => {
                write!(f, "failed to roll back group {group} on close: {source}")
            }
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Close { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct DatabaseRegistry {
    groups: BTreeMap<String, DatabaseGroup>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens every group declared in `config`.
    pub fn from_config(config: &ClusterConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (name, group_config) in &config.groups {
            let group = DatabaseGroup::open(name.trim(), group_config).map_err(|source| {
                RegistryError::Open {
                    group: name.clone(),
                    source,
                }
            })?;
            registry.register(group)?;
        }
        info!(
            "event=registry_open module=registry status=ok groups={}",
            registry.len()
        );
        Ok(registry)
    }

    pub fn register(&mut self, group: DatabaseGroup) -> Result<(), RegistryError> {
        let name = group.name().trim().to_string();
        if !is_valid_group_name(&name) {
            return Err(RegistryError::InvalidGroupName(name));
        }
        if self.groups.contains_key(&name) {
            return Err(RegistryError::DuplicateGroup(name));
        }
        self.groups.insert(name, group);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DatabaseGroup> {
        self.groups.get(name.trim())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DatabaseGroup> {
        self.groups.get_mut(name.trim())
    }

    pub fn require_mut(&mut self, name: &str) -> Result<&mut DatabaseGroup, RegistryError> {
        let name = name.trim();
        self.groups
            .get_mut(name)
            .ok_or_else(|| RegistryError::GroupNotFound(name.to_string()))
    }

    /// Sorted group names.
    pub fn names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Closes every group; open transactions are rolled back.
    ///
    /// Every group is closed even when one fails to roll back; the first
    /// failure is returned after all connections are released.
    pub fn close_all(&mut self) -> Result<usize, RegistryError> {
        let mut released = 0;
        let mut first_failure = None;
        for (name, group) in &mut self.groups {
            let report = group.close();
            released += report.released;
            if let Some(source) = report.rollback_error {
                first_failure.get_or_insert(RegistryError::Close {
                    group: name.clone(),
                    source,
                });
            }
        }

        let status = if first_failure.is_some() { "error" } else { "ok" };
        info!(
            "event=registry_close module=registry status={} groups={} released={}",
            status,
            self.groups.len(),
            released
        );
        match first_failure {
            Some(err) => Err(err),
            None => Ok(released),
        }
    }
}

fn is_valid_group_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
