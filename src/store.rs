//! Per-user server configuration stores
//!
//! The session manager asks a [`ServerConfigStore`] for the records a user
//! has registered. Persistence lives behind this trait; two in-process
//! implementations ship here.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::{Config, ServerRecord};
use crate::error::Result;

/// Source of per-user server records
#[async_trait]
pub trait ServerConfigStore: Send + Sync {
    /// Records registered for `user`, in registration order.
    ///
    /// An unknown user yields an empty list.
    async fn load_user_servers(&self, user: &str) -> Result<Vec<ServerRecord>>;
}

/// Read-only store backed by the `users` section of a [`Config`]
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    users: HashMap<String, Vec<ServerRecord>>,
}

impl StaticConfigStore {
    /// Store serving `config.users`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            users: config.users.clone(),
        }
    }
}

#[async_trait]
impl ServerConfigStore for StaticConfigStore {
    async fn load_user_servers(&self, user: &str) -> Result<Vec<ServerRecord>> {
        Ok(self.users.get(user).cloned().unwrap_or_default())
    }
}

/// Mutable store for programmatic registration
///
/// # Examples
///
/// ```
/// use mcplex::config::{ServerConfig, ServerRecord};
/// use mcplex::store::{MemoryConfigStore, ServerConfigStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryConfigStore::new();
/// store
///     .insert("alice", ServerRecord::new("notes", ServerConfig::stdio("notes-mcp", vec![])))
///     .await;
/// let records = store.load_user_servers("alice").await.unwrap();
/// assert_eq!(records[0].id, "notes");
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    users: RwLock<HashMap<String, Vec<ServerRecord>>>,
}

impl MemoryConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `record` for `user`, replacing any record with the same id.
    pub async fn insert(&self, user: &str, record: ServerRecord) {
        let mut users = self.users.write().await;
        let records = users.entry(user.to_string()).or_default();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Remove a record; returns whether one was removed.
    pub async fn remove(&self, user: &str, id: &str) -> bool {
        let mut users = self.users.write().await;
        let Some(records) = users.get_mut(user) else {
            return false;
        };
        let before = records.len();
        records.retain(|r| r.id != id);
        before != records.len()
    }
}

#[async_trait]
impl ServerConfigStore for MemoryConfigStore {
    async fn load_user_servers(&self, user: &str) -> Result<Vec<ServerRecord>> {
        Ok(self.users.read().await.get(user).cloned().unwrap_or_default())
    }
}
