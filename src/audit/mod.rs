//! Append-only activity log.
//!
//! Entries are immutable once recorded and survive the records they describe;
//! a purged record keeps its history keyed by the former id. Queries return
//! fresh newest-first snapshots, never a live view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::security::Actor;
use crate::shared::models::EntityKind;

/// Closed enumeration of everything the log can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Created,
    FieldUpdated,
    StatusChanged,
    StageChanged,
    NoteAdded,
    NoteUpdated,
    FileAttached,
    FileRemoved,
    FileTooLarge,
    SoftDeleted,
    Restored,
    PermanentlyDeleted,
    CustomFieldUpdated,
    RoleChanged,
    ProfileUpdated,
    Login,
    Logout,
    SystemSettingsUpdated,
    TaskCreated,
    TaskUpdated,
    TaskStatusChanged,
    ProductActivated,
    ProductDeactivated,
    DefinitionCreated,
    DefinitionUpdated,
    DefinitionDeleted,
}

/// Structured payload attached to some entry kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityDetails {
    ValueChange {
        field: String,
        old: Option<String>,
        new: Option<String>,
    },
    File {
        filename: String,
        mime_type: String,
        size: u64,
    },
    LinkedTask {
        task_id: Uuid,
        title: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub entity_id: Uuid,
    pub entity_type: EntityKind,
    pub actor_id: Option<Uuid>,
    pub actor_name: String,
    pub activity_type: ActivityType,
    pub description: String,
    pub details: Option<ActivityDetails>,
}

impl ActivityLogEntry {
    pub fn new(
        entity_id: Uuid,
        entity_type: EntityKind,
        actor: &Actor,
        activity_type: ActivityType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            entity_id,
            entity_type,
            actor_id: Some(actor.id),
            actor_name: actor.name.clone(),
            activity_type,
            description: description.into(),
            details: None,
        }
    }

    /// Entry caused by the system itself rather than an authenticated user.
    pub fn system(
        entity_id: Uuid,
        entity_type: EntityKind,
        activity_type: ActivityType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            entity_id,
            entity_type,
            actor_id: None,
            actor_name: "System".to_string(),
            activity_type,
            description: description.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: ActivityDetails) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub entity_types: Option<Vec<EntityKind>>,
    pub activity_types: Option<Vec<ActivityType>>,
    pub actor_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl ActivityFilter {
    fn matches(&self, entry: &ActivityLogEntry) -> bool {
        if let Some(types) = &self.entity_types {
            if !types.contains(&entry.entity_type) {
                return false;
            }
        }

        if let Some(types) = &self.activity_types {
            if !types.contains(&entry.activity_type) {
                return false;
            }
        }

        if let Some(actor_id) = self.actor_id {
            if entry.actor_id != Some(actor_id) {
                return false;
            }
        }

        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }

        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }

        true
    }
}

#[derive(Clone, Default)]
pub struct ActivityLog {
    entries: Arc<RwLock<Vec<ActivityLogEntry>>>,
}

impl ActivityLog {
    pub fn new(entries: Vec<ActivityLogEntry>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Append one entry. The typed entry cannot be malformed, so this never
    /// fails; the returned id is the entry's own.
    pub async fn record(&self, entry: ActivityLogEntry) -> Uuid {
        let id = entry.id;
        log::debug!(
            "activity: {:?} on {:?} {} by {}",
            entry.activity_type,
            entry.entity_type,
            entry.entity_id,
            entry.actor_name
        );
        self.entries.write().await.push(entry);
        id
    }

    /// Newest-first history of one entity.
    pub async fn for_entity(&self, entity_id: Uuid, entity_type: EntityKind) -> Vec<ActivityLogEntry> {
        let mut out: Vec<ActivityLogEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.entity_id == entity_id && e.entity_type == entity_type)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    /// Newest-first global view, filterable for the audit screen.
    pub async fn query(&self, filter: &ActivityFilter) -> Vec<ActivityLogEntry> {
        let mut out: Vec<ActivityLogEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<ActivityLogEntry> {
        self.entries.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Role;
    use chrono::Duration;

    fn actor() -> Actor {
        Actor::new(Uuid::new_v4(), "Dana Fields", Role::Admin)
    }

    #[tokio::test]
    async fn for_entity_returns_newest_first() {
        let log = ActivityLog::default();
        let entity = Uuid::new_v4();
        let a = actor();

        let mut first = ActivityLogEntry::new(entity, EntityKind::Lead, &a, ActivityType::Created, "created");
        first.timestamp = Utc::now() - Duration::seconds(10);
        let second =
            ActivityLogEntry::new(entity, EntityKind::Lead, &a, ActivityType::StatusChanged, "status");

        log.record(first).await;
        log.record(second).await;
        log.record(ActivityLogEntry::new(
            Uuid::new_v4(),
            EntityKind::Lead,
            &a,
            ActivityType::Created,
            "other entity",
        ))
        .await;

        let history = log.for_entity(entity, EntityKind::Lead).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].activity_type, ActivityType::StatusChanged);
        assert_eq!(history[1].activity_type, ActivityType::Created);
    }

    #[tokio::test]
    async fn query_filters_by_activity_and_entity_type() {
        let log = ActivityLog::default();
        let a = actor();
        log.record(ActivityLogEntry::new(
            Uuid::new_v4(),
            EntityKind::Deal,
            &a,
            ActivityType::StageChanged,
            "stage",
        ))
        .await;
        log.record(ActivityLogEntry::new(
            Uuid::new_v4(),
            EntityKind::Task,
            &a,
            ActivityType::Created,
            "created",
        ))
        .await;

        let filter = ActivityFilter {
            entity_types: Some(vec![EntityKind::Deal]),
            activity_types: Some(vec![ActivityType::StageChanged]),
            ..Default::default()
        };
        let hits = log.query(&filter).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_type, EntityKind::Deal);
    }

    #[tokio::test]
    async fn repeated_queries_return_fresh_snapshots() {
        let log = ActivityLog::default();
        let entity = Uuid::new_v4();
        let a = actor();

        log.record(ActivityLogEntry::new(entity, EntityKind::Lead, &a, ActivityType::Created, "c")).await;
        let before = log.for_entity(entity, EntityKind::Lead).await;
        log.record(ActivityLogEntry::new(entity, EntityKind::Lead, &a, ActivityType::SoftDeleted, "d")).await;
        let after = log.for_entity(entity, EntityKind::Lead).await;

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
    }
}
