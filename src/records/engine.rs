//! Generic in-memory record table with the soft-delete state machine.
//!
//! `Active --soft_delete--> Trashed --restore--> Active`;
//! `Trashed --remove--> Gone` (terminal). The orchestration around these
//! primitives (permissions, audit, notifications) lives in the service.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{RecordBody, Stored};

pub struct RecordSet<B: RecordBody> {
    items: Arc<RwLock<HashMap<Uuid, Stored<B>>>>,
}

impl<B: RecordBody> Clone for RecordSet<B> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<B: RecordBody> Default for RecordSet<B> {
    fn default() -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<B: RecordBody> RecordSet<B> {
    pub fn new(records: Vec<Stored<B>>) -> Self {
        Self {
            items: Arc::new(RwLock::new(
                records.into_iter().map(|r| (r.id, r)).collect(),
            )),
        }
    }

    /// Fetch an active record; trashed records are invisible here.
    pub async fn get(&self, id: Uuid) -> Option<Stored<B>> {
        self.items
            .read()
            .await
            .get(&id)
            .filter(|r| !r.is_deleted)
            .cloned()
    }

    /// Fetch regardless of trash state (for restore/purge and ownership
    /// checks).
    pub async fn get_any(&self, id: Uuid) -> Option<Stored<B>> {
        self.items.read().await.get(&id).cloned()
    }

    /// Active records, newest first.
    pub async fn list(&self) -> Vec<Stored<B>> {
        let mut out: Vec<Stored<B>> = self
            .items
            .read()
            .await
            .values()
            .filter(|r| !r.is_deleted)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Trashed records, newest deletion first.
    pub async fn trashed(&self) -> Vec<Stored<B>> {
        let mut out: Vec<Stored<B>> = self
            .items
            .read()
            .await
            .values()
            .filter(|r| r.is_deleted)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        out
    }

    /// Insert or replace by id.
    pub async fn put(&self, record: Stored<B>) {
        self.items.write().await.insert(record.id, record);
    }

    /// Mark trashed. Returns the updated record, or `None` when absent or
    /// already trashed (a silent no-op at the caller).
    pub async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> Option<Stored<B>> {
        let mut items = self.items.write().await;
        let record = items.get_mut(&id).filter(|r| !r.is_deleted)?;
        record.is_deleted = true;
        record.deleted_at = Some(now);
        Some(record.clone())
    }

    /// Clear the trash marker. `None` when absent or not trashed.
    pub async fn restore(&self, id: Uuid) -> Option<Stored<B>> {
        let mut items = self.items.write().await;
        let record = items.get_mut(&id).filter(|r| r.is_deleted)?;
        record.is_deleted = false;
        record.deleted_at = None;
        Some(record.clone())
    }

    /// Drop the record entirely. Terminal; the id is never reused.
    pub async fn remove(&self, id: Uuid) -> Option<Stored<B>> {
        self.items.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<Stored<B>> {
        self.items.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::types::LeadBody;
    use std::collections::BTreeMap;

    fn lead(name: &str) -> Stored<LeadBody> {
        Stored {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            created_by: None,
            is_deleted: false,
            deleted_at: None,
            attachments: vec![],
            custom_fields: BTreeMap::new(),
            body: LeadBody {
                name: name.into(),
                company: None,
                email: None,
                phone: None,
                source: None,
                status: Default::default(),
                assigned_to: None,
                notes: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn deleted_flag_and_timestamp_move_together() {
        let set = RecordSet::default();
        let record = lead("Acme");
        let id = record.id;
        set.put(record).await;

        let trashed = set.soft_delete(id, Utc::now()).await.unwrap();
        assert!(trashed.is_deleted && trashed.deleted_at.is_some());

        let restored = set.restore(id).await.unwrap();
        assert!(!restored.is_deleted && restored.deleted_at.is_none());
    }

    #[tokio::test]
    async fn trashed_records_are_invisible_to_get_and_list() {
        let set = RecordSet::default();
        let record = lead("Acme");
        let id = record.id;
        set.put(record).await;
        set.soft_delete(id, Utc::now()).await;

        assert!(set.get(id).await.is_none());
        assert!(set.list().await.is_empty());
        assert!(set.get_any(id).await.is_some());
        assert_eq!(set.trashed().await.len(), 1);
    }

    #[tokio::test]
    async fn double_soft_delete_and_stray_restore_are_noops() {
        let set = RecordSet::default();
        let record = lead("Acme");
        let id = record.id;
        set.put(record).await;

        assert!(set.restore(id).await.is_none());
        assert!(set.soft_delete(id, Utc::now()).await.is_some());
        assert!(set.soft_delete(id, Utc::now()).await.is_none());
        assert!(set.soft_delete(Uuid::new_v4(), Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn removed_records_are_gone_for_good() {
        let set = RecordSet::default();
        let record = lead("Acme");
        let id = record.id;
        set.put(record).await;
        set.soft_delete(id, Utc::now()).await;

        assert!(set.remove(id).await.is_some());
        assert!(set.get_any(id).await.is_none());
        assert!(set.restore(id).await.is_none());
        assert_eq!(set.len().await, 0);
    }
}
