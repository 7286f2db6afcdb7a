//! Per-user notification inboxes, mention parsing and task reminders.
//!
//! Delivery is pull-based: this service only stores items, the consuming
//! layer fetches them. Duplicate suppression and unresolved mention tokens
//! are silent no-ops, never errors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::directory::UserDirectory;
use crate::security::Actor;

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9][A-Za-z0-9._-]*)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Info,
    Success,
    Mention,
    LeadAssigned,
    LeadUpdated,
    DealAssigned,
    DealUpdated,
    TaskAssigned,
    TaskUpdated,
    Reminder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: Uuid,
    pub name: String,
}

impl From<&Actor> for ActorRef {
    fn from(actor: &Actor) -> Self {
        Self {
            id: actor.id,
            name: actor.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub link: Option<String>,
    pub actor: Option<ActorRef>,
}

#[derive(Clone)]
pub struct Notifier {
    inboxes: Arc<RwLock<HashMap<Uuid, Vec<NotificationItem>>>>,
    directory: UserDirectory,
    dedup_window: Duration,
    reminder_window: Duration,
}

impl Notifier {
    pub fn new(directory: UserDirectory, dedup_secs: i64, reminder_secs: i64) -> Self {
        Self {
            inboxes: Arc::new(RwLock::new(HashMap::new())),
            directory,
            dedup_window: Duration::seconds(dedup_secs),
            reminder_window: Duration::seconds(reminder_secs),
        }
    }

    pub async fn restore_inboxes(&self, inboxes: HashMap<Uuid, Vec<NotificationItem>>) {
        *self.inboxes.write().await = inboxes;
    }

    /// Store one notification for `user_id`, unless an identical one landed
    /// inside the dedup window. Reminders dedup on (type, link) over the
    /// longer reminder window; everything else on the full
    /// (type, title, message, link, actor) tuple over the short window.
    /// Returns the new item's id, or `None` when suppressed.
    pub async fn notify(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        link: Option<String>,
        actor: Option<ActorRef>,
    ) -> Option<Uuid> {
        let title = title.into();
        let message = message.into();
        let now = Utc::now();

        let mut inboxes = self.inboxes.write().await;
        let inbox = inboxes.entry(user_id).or_default();

        let duplicate = inbox.iter().any(|item| {
            if item.notification_type != notification_type {
                return false;
            }
            if notification_type == NotificationType::Reminder {
                item.link == link && now - item.timestamp < self.reminder_window
            } else {
                item.title == title
                    && item.message == message
                    && item.link == link
                    && item.actor.as_ref().map(|a| a.id) == actor.as_ref().map(|a| a.id)
                    && now - item.timestamp < self.dedup_window
            }
        });
        if duplicate {
            log::debug!("notification for {user_id} suppressed as duplicate: {title}");
            return None;
        }

        let item = NotificationItem {
            id: Uuid::new_v4(),
            user_id,
            timestamp: now,
            notification_type,
            title,
            message,
            is_read: false,
            link,
            actor,
        };
        let id = item.id;
        inbox.push(item);
        Some(id)
    }

    /// Scan free text for `@token` mentions and notify every resolved
    /// directory user other than the actor, once each. Unresolved tokens are
    /// ignored. Returns how many mentions were delivered.
    pub async fn scan_mentions(
        &self,
        text: &str,
        actor: &Actor,
        link: &str,
        source_label: &str,
    ) -> usize {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut delivered = 0;

        for caps in MENTION_RE.captures_iter(text) {
            // The token class admits ./-/_ for email local parts, which also
            // swallows sentence punctuation ("ping @alice."). Try the raw
            // token first, then retry with trailing punctuation stripped.
            let token = &caps[1];
            let mut user = self.directory.resolve_mention(token).await;
            if user.is_none() {
                let trimmed = token.trim_end_matches(['.', '-', '_']);
                if trimmed != token {
                    user = self.directory.resolve_mention(trimmed).await;
                }
            }
            let Some(user) = user else {
                continue;
            };
            if user.id == actor.id || !seen.insert(user.id) {
                continue;
            }
            if self
                .notify(
                    user.id,
                    NotificationType::Mention,
                    "You were mentioned",
                    format!("{} mentioned you in {source_label}", actor.name),
                    Some(link.to_string()),
                    Some(ActorRef::from(actor)),
                )
                .await
                .is_some()
            {
                delivered += 1;
            }
        }

        delivered
    }

    /// Reminder for a task due today or tomorrow (day granularity). The
    /// status gate (not Completed/Cancelled) is the caller's job; this only
    /// handles date proximity, assignee resolution and dedup.
    pub async fn task_due_reminder(
        &self,
        assignee_name: &str,
        task_title: &str,
        due_date: NaiveDate,
        link: String,
    ) -> bool {
        let today = Utc::now().date_naive();
        let tomorrow = today + Duration::days(1);
        if due_date != today && due_date != tomorrow {
            return false;
        }

        let Some(assignee) = self.directory.find_by_name(assignee_name).await else {
            return false;
        };

        let when = if due_date == today { "today" } else { "tomorrow" };
        self.notify(
            assignee.id,
            NotificationType::Reminder,
            "Task due soon",
            format!("\"{task_title}\" is due {when}"),
            Some(link),
            None,
        )
        .await
        .is_some()
    }

    /// All notifications for a user, newest first.
    pub async fn inbox(&self, user_id: Uuid) -> Vec<NotificationItem> {
        let mut items = self
            .inboxes
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items
    }

    pub async fn unread_count(&self, user_id: Uuid) -> usize {
        self.inboxes
            .read()
            .await
            .get(&user_id)
            .map(|items| items.iter().filter(|i| !i.is_read).count())
            .unwrap_or(0)
    }

    pub async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> bool {
        let mut inboxes = self.inboxes.write().await;
        let Some(inbox) = inboxes.get_mut(&user_id) else {
            return false;
        };
        match inbox.iter_mut().find(|i| i.id == notification_id) {
            Some(item) => {
                item.is_read = true;
                true
            }
            None => false,
        }
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> usize {
        let mut inboxes = self.inboxes.write().await;
        let Some(inbox) = inboxes.get_mut(&user_id) else {
            return 0;
        };
        let mut flipped = 0;
        for item in inbox.iter_mut().filter(|i| !i.is_read) {
            item.is_read = true;
            flipped += 1;
        }
        flipped
    }

    pub async fn snapshot(&self) -> HashMap<Uuid, Vec<NotificationItem>> {
        self.inboxes.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryUser;
    use crate::security::Role;

    fn setup() -> (Notifier, DirectoryUser, DirectoryUser) {
        let alice = DirectoryUser::new("Alice Sales", "alice@example.com", Role::SalesRep);
        let bob = DirectoryUser::new("Bob Mgr", "bob@example.com", Role::Manager);
        let directory = UserDirectory::new(vec![alice.clone(), bob.clone()]);
        (Notifier::new(directory, 5, 3600), alice, bob)
    }

    #[tokio::test]
    async fn identical_notification_within_window_is_suppressed() {
        let (notifier, alice, _) = setup();

        let first = notifier
            .notify(alice.id, NotificationType::Info, "Hi", "Body", None, None)
            .await;
        let second = notifier
            .notify(alice.id, NotificationType::Info, "Hi", "Body", None, None)
            .await;

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(notifier.inbox(alice.id).await.len(), 1);
    }

    #[tokio::test]
    async fn different_message_is_not_suppressed() {
        let (notifier, alice, _) = setup();

        notifier
            .notify(alice.id, NotificationType::Info, "Hi", "Body", None, None)
            .await;
        let second = notifier
            .notify(alice.id, NotificationType::Info, "Hi", "Other body", None, None)
            .await;

        assert!(second.is_some());
        assert_eq!(notifier.unread_count(alice.id).await, 2);
    }

    #[tokio::test]
    async fn reminders_dedup_on_link_alone() {
        let (notifier, alice, _) = setup();

        let first = notifier
            .notify(
                alice.id,
                NotificationType::Reminder,
                "Task due soon",
                "\"Call\" is due today",
                Some("/tasks/1".into()),
                None,
            )
            .await;
        // Different wording, same link: still the same reminder.
        let second = notifier
            .notify(
                alice.id,
                NotificationType::Reminder,
                "Task due soon",
                "\"Call\" is due tomorrow",
                Some("/tasks/1".into()),
                None,
            )
            .await;

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn mentions_resolve_and_skip_the_actor() {
        let (notifier, alice, bob) = setup();
        let actor = Actor::new(bob.id, bob.name.clone(), Role::Manager);

        let delivered = notifier
            .scan_mentions("Please review, @alice and @bob and @nobody", &actor, "/leads/1", "Lead \"Acme\"")
            .await;

        assert_eq!(delivered, 1);
        let inbox = notifier.inbox(alice.id).await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].notification_type, NotificationType::Mention);
        assert_eq!(inbox[0].actor.as_ref().unwrap().id, bob.id);
        assert!(notifier.inbox(bob.id).await.is_empty());
    }

    #[tokio::test]
    async fn trailing_sentence_punctuation_still_resolves() {
        let (notifier, alice, bob) = setup();
        let actor = Actor::new(bob.id, bob.name.clone(), Role::Manager);

        let delivered = notifier
            .scan_mentions("thanks @alice.", &actor, "/leads/1", "Lead \"Acme\"")
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(notifier.inbox(alice.id).await.len(), 1);

        // Dots inside the token still resolve email local parts.
        let dotted = DirectoryUser::new("Robert M", "robert.m@example.com", Role::SalesRep);
        let directory = UserDirectory::new(vec![dotted.clone(), bob.clone()]);
        let notifier = Notifier::new(directory, 5, 3600);
        let delivered = notifier
            .scan_mentions("cc @robert.m please", &actor, "/leads/1", "Lead")
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(notifier.inbox(dotted.id).await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_tokens_mention_once() {
        let (notifier, alice, bob) = setup();
        let actor = Actor::new(bob.id, bob.name.clone(), Role::Manager);

        let delivered = notifier
            .scan_mentions("@alice @alice @Alice", &actor, "/leads/1", "Lead")
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(notifier.inbox(alice.id).await.len(), 1);
    }

    #[tokio::test]
    async fn reminder_only_fires_for_today_or_tomorrow() {
        let (notifier, alice, _) = setup();
        let today = Utc::now().date_naive();

        assert!(
            notifier
                .task_due_reminder(&alice.name, "Call back", today, "/tasks/1".into())
                .await
        );
        assert!(
            !notifier
                .task_due_reminder(&alice.name, "Next week", today + Duration::days(5), "/tasks/2".into())
                .await
        );
        // Unknown assignee: silent no-op.
        assert!(
            !notifier
                .task_due_reminder("Ghost", "Orphan", today, "/tasks/3".into())
                .await
        );
    }

    #[tokio::test]
    async fn mark_read_and_mark_all_read() {
        let (notifier, alice, _) = setup();

        let id = notifier
            .notify(alice.id, NotificationType::Info, "One", "a", None, None)
            .await
            .unwrap();
        notifier
            .notify(alice.id, NotificationType::Success, "Two", "b", None, None)
            .await
            .unwrap();

        assert_eq!(notifier.unread_count(alice.id).await, 2);
        assert!(notifier.mark_read(alice.id, id).await);
        assert_eq!(notifier.unread_count(alice.id).await, 1);
        assert_eq!(notifier.mark_all_read(alice.id).await, 1);
        assert_eq!(notifier.unread_count(alice.id).await, 0);
    }
}
