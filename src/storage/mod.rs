//! Durable-store boundary.
//!
//! The core only requires that its state survives restarts: the snapshot is
//! loaded once at bootstrap and flushed after every successful mutation. The
//! JSON file store is the default implementation; tests use the in-memory one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::ActivityLogEntry;
use crate::fields::CustomFieldDefinition;
use crate::notify::NotificationItem;
use crate::records::types::{
    CustomerBody, DealBody, LeadBody, ProductBody, Stored, TaskBody,
};

/// Everything the core owns, in one serializable unit. The user directory is
/// deliberately absent: identity comes from an external store.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DomainSnapshot {
    #[serde(default)]
    pub leads: Vec<Stored<LeadBody>>,
    #[serde(default)]
    pub customers: Vec<Stored<CustomerBody>>,
    #[serde(default)]
    pub deals: Vec<Stored<DealBody>>,
    #[serde(default)]
    pub tasks: Vec<Stored<TaskBody>>,
    #[serde(default)]
    pub products: Vec<Stored<ProductBody>>,
    #[serde(default)]
    pub definitions: Vec<CustomFieldDefinition>,
    #[serde(default)]
    pub activity: Vec<ActivityLogEntry>,
    #[serde(default)]
    pub inboxes: HashMap<Uuid, Vec<NotificationItem>>,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `None` on first run (nothing persisted yet).
    async fn load(&self) -> anyhow::Result<Option<DomainSnapshot>>;
    async fn flush(&self, snapshot: &DomainSnapshot) -> anyhow::Result<()>;
}

/// Snapshot persistence as one pretty-printed JSON file, written to a
/// temporary sibling and renamed so a crash mid-write cannot truncate the
/// previous snapshot.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> anyhow::Result<Option<DomainSnapshot>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let snapshot = serde_json::from_str(&raw)
                    .with_context(|| format!("corrupt snapshot at {}", self.path.display()))?;
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    async fn flush(&self, snapshot: &DomainSnapshot) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        log::debug!("flushed snapshot to {}", self.path.display());
        Ok(())
    }
}

/// Keeps the last flushed snapshot in memory; for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    last: RwLock<Option<String>>,
}

impl MemoryStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> anyhow::Result<Option<DomainSnapshot>> {
        match self.last.read().await.as_deref() {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn flush(&self, snapshot: &DomainSnapshot) -> anyhow::Result<()> {
        *self.last.write().await = Some(serde_json::to_string(snapshot)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> DomainSnapshot {
        DomainSnapshot {
            leads: vec![Stored {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                created_by: None,
                is_deleted: false,
                deleted_at: None,
                attachments: vec![],
                custom_fields: Default::default(),
                body: LeadBody {
                    name: "Acme".into(),
                    company: None,
                    email: None,
                    phone: None,
                    source: None,
                    status: Default::default(),
                    assigned_to: None,
                    notes: String::new(),
                },
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn json_file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        assert!(store.load().await.unwrap().is_none());

        let snapshot = sample();
        store.flush(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.leads, snapshot.leads);
        assert!(loaded.deals.is_empty());
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryStore::default();
        store.flush(&sample()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.leads.len(), 1);
    }
}
