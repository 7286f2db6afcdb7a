use std::sync::Arc;

use crate::audit::ActivityLog;
use crate::config::CoreConfig;
use crate::directory::{DirectoryUser, UserDirectory};
use crate::fields::FieldSchema;
use crate::notify::Notifier;
use crate::records::DomainService;
use crate::security::Actor;
use crate::storage::StateStore;

/// Identity attached to every mutating call. Operations that run
/// without a signed-in user (background jobs) pass no context and
/// are treated as system activity.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub actor: Actor,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor }
    }
}

/// Shared handles for the whole application. Every field is cheap to
/// clone; the underlying data lives behind `Arc`s shared with the
/// domain service.
#[derive(Clone)]
pub struct AppState {
    pub config: CoreConfig,
    pub directory: UserDirectory,
    pub schema: FieldSchema,
    pub audit: ActivityLog,
    pub notifier: Notifier,
    pub domain: DomainService,
}

impl AppState {
    /// Loads the persisted snapshot (if any) and wires up all
    /// services around it.
    pub async fn bootstrap(
        config: CoreConfig,
        users: Vec<DirectoryUser>,
        store: Arc<dyn StateStore>,
    ) -> anyhow::Result<Self> {
        let snapshot = store.load().await?.unwrap_or_default();
        log::info!(
            "Bootstrapping state: {} activity entries, {} field definitions",
            snapshot.activity.len(),
            snapshot.definitions.len()
        );

        let directory = UserDirectory::new(users);
        let schema = FieldSchema::new(snapshot.definitions.clone());
        let audit = ActivityLog::new(snapshot.activity.clone());
        let notifier = Notifier::new(
            directory.clone(),
            config.notification_dedup_secs,
            config.reminder_dedup_secs,
        );
        notifier.restore_inboxes(snapshot.inboxes.clone()).await;

        let domain = DomainService::new(
            &config,
            snapshot,
            schema.clone(),
            audit.clone(),
            notifier.clone(),
            directory.clone(),
            store,
        );

        Ok(Self {
            config,
            directory,
            schema,
            audit,
            notifier,
            domain,
        })
    }
}
