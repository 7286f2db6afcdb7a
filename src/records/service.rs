//! Lifecycle orchestration: every mutation runs permission check, validation,
//! commit, audit append and notification evaluation in that order, then
//! flushes the snapshot. Failures before the commit leave no partial effect.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;
use uuid::Uuid;

use crate::audit::{ActivityDetails, ActivityLog, ActivityLogEntry, ActivityType};
use crate::config::CoreConfig;
use crate::directory::UserDirectory;
use crate::fields::{CustomFieldDefinition, CustomValue, FieldSchema};
use crate::notify::{ActorRef, Notifier};
use crate::security::{can_perform, can_purge, Action, Actor};
use crate::shared::errors::{CoreError, CoreResult, FieldError};
use crate::shared::models::EntityKind;
use crate::shared::state::RequestContext;
use crate::storage::{DomainSnapshot, StateStore};

use super::engine::RecordSet;
use super::types::{
    Attachment, CustomerBody, DealBody, FileUpload, LeadBody, ProductBody, RecordBody,
    SavePayload, Stored, TaskBody,
};

/// Result of a create/update. Oversized uploads do not fail the operation;
/// they are reported here alongside the committed record.
#[derive(Debug, Clone)]
pub struct SaveOutcome<B> {
    pub record: Stored<B>,
    pub rejected_files: Vec<RejectedFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedFile {
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BulkToggleReport {
    pub applied: usize,
    pub blocked: Vec<BlockedProduct>,
    /// Ids that did not name an active product; the rest of the batch still
    /// ran.
    pub skipped: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct BlockedProduct {
    pub id: Uuid,
    pub name: String,
    pub blocking_deals: Vec<String>,
}

/// Maps each record body type to its table on the service, so the generic
/// lifecycle operations can be written once.
pub trait KindStore<B: RecordBody> {
    fn records(&self) -> &RecordSet<B>;
}

macro_rules! kind_store {
    ($body:ty, $field:ident) => {
        impl KindStore<$body> for DomainService {
            fn records(&self) -> &RecordSet<$body> {
                &self.$field
            }
        }
    };
}

#[derive(Clone)]
pub struct DomainService {
    leads: RecordSet<LeadBody>,
    customers: RecordSet<CustomerBody>,
    deals: RecordSet<DealBody>,
    tasks: RecordSet<TaskBody>,
    products: RecordSet<ProductBody>,
    schema: FieldSchema,
    audit: ActivityLog,
    notifier: Notifier,
    directory: UserDirectory,
    store: Arc<dyn StateStore>,
    max_attachment_bytes: u64,
}

kind_store!(LeadBody, leads);
kind_store!(CustomerBody, customers);
kind_store!(DealBody, deals);
kind_store!(TaskBody, tasks);
kind_store!(ProductBody, products);

fn permission_denied(kind: EntityKind, what: &str) -> CoreError {
    CoreError::PermissionDenied(format!("not allowed to {what} {}", kind.label()))
}

fn not_found(kind: EntityKind, id: Uuid) -> CoreError {
    CoreError::NotFound(format!("{} {id}", kind.label()))
}

fn record_link(kind: EntityKind, id: Uuid) -> String {
    let segment = match kind {
        EntityKind::Lead => "leads",
        EntityKind::Customer => "customers",
        EntityKind::Deal => "deals",
        EntityKind::Task => "tasks",
        EntityKind::Product => "products",
        _ => "records",
    };
    format!("/{segment}/{id}")
}

impl DomainService {
    pub fn new(
        config: &CoreConfig,
        snapshot: DomainSnapshot,
        schema: FieldSchema,
        audit: ActivityLog,
        notifier: Notifier,
        directory: UserDirectory,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            leads: RecordSet::new(snapshot.leads),
            customers: RecordSet::new(snapshot.customers),
            deals: RecordSet::new(snapshot.deals),
            tasks: RecordSet::new(snapshot.tasks),
            products: RecordSet::new(snapshot.products),
            schema,
            audit,
            notifier,
            directory,
            store,
            max_attachment_bytes: config.max_attachment_bytes,
        }
    }

    fn table<B: RecordBody>(&self) -> &RecordSet<B>
    where
        Self: KindStore<B>,
    {
        <Self as KindStore<B>>::records(self)
    }

    // -- reads --------------------------------------------------------------

    pub async fn get<B: RecordBody>(&self, ctx: &RequestContext, id: Uuid) -> CoreResult<Stored<B>>
    where
        Self: KindStore<B>,
    {
        if !can_perform(Some(&ctx.actor), Action::Read, B::KIND, None) {
            return Err(permission_denied(B::KIND, "read"));
        }
        self.table::<B>()
            .get(id)
            .await
            .ok_or_else(|| not_found(B::KIND, id))
    }

    pub async fn list<B: RecordBody>(&self, ctx: &RequestContext) -> CoreResult<Vec<Stored<B>>>
    where
        Self: KindStore<B>,
    {
        if !can_perform(Some(&ctx.actor), Action::Read, B::KIND, None) {
            return Err(permission_denied(B::KIND, "read"));
        }
        Ok(self.table::<B>().list().await)
    }

    pub async fn trash<B: RecordBody>(&self, ctx: &RequestContext) -> CoreResult<Vec<Stored<B>>>
    where
        Self: KindStore<B>,
    {
        if !can_perform(Some(&ctx.actor), Action::Read, B::KIND, None) {
            return Err(permission_denied(B::KIND, "read"));
        }
        Ok(self.table::<B>().trashed().await)
    }

    // -- create -------------------------------------------------------------

    pub async fn create_lead(
        &self,
        ctx: &RequestContext,
        payload: SavePayload<LeadBody>,
    ) -> CoreResult<SaveOutcome<LeadBody>> {
        self.create_record(ctx, payload).await
    }

    pub async fn create_customer(
        &self,
        ctx: &RequestContext,
        payload: SavePayload<CustomerBody>,
    ) -> CoreResult<SaveOutcome<CustomerBody>> {
        self.create_record(ctx, payload).await
    }

    /// Deals with line items get their value and currency derived from the
    /// catalog, overriding whatever the payload carried.
    pub async fn create_deal(
        &self,
        ctx: &RequestContext,
        mut payload: SavePayload<DealBody>,
    ) -> CoreResult<SaveOutcome<DealBody>> {
        self.price_deal(&mut payload.body).await?;
        self.create_record(ctx, payload).await
    }

    pub async fn create_task(
        &self,
        ctx: &RequestContext,
        payload: SavePayload<TaskBody>,
    ) -> CoreResult<SaveOutcome<TaskBody>> {
        self.create_record(ctx, payload).await
    }

    pub async fn create_product(
        &self,
        ctx: &RequestContext,
        payload: SavePayload<ProductBody>,
    ) -> CoreResult<SaveOutcome<ProductBody>> {
        self.create_record(ctx, payload).await
    }

    async fn create_record<B: RecordBody>(
        &self,
        ctx: &RequestContext,
        payload: SavePayload<B>,
    ) -> CoreResult<SaveOutcome<B>>
    where
        Self: KindStore<B>,
    {
        let actor = &ctx.actor;
        if !can_perform(Some(actor), Action::Create, B::KIND, None) {
            return Err(permission_denied(B::KIND, "create"));
        }
        self.validate_payload(&payload, &BTreeMap::new()).await?;

        let now = Utc::now();
        let mut record = Stored {
            id: Uuid::new_v4(),
            created_at: now,
            created_by: B::TRACKS_CREATOR.then_some(actor.id),
            is_deleted: false,
            deleted_at: None,
            attachments: Vec::new(),
            custom_fields: payload.custom_fields,
            body: payload.body,
        };

        let mut entries = Vec::new();
        let mut rejected = Vec::new();
        for upload in payload.uploads {
            // At create only rejections are logged; the accepted files are
            // covered by the "created" entry.
            self.ingest_upload(
                &mut record, upload, actor, now, false, &mut entries, &mut rejected,
            );
        }

        let name = record.body.display_name();
        self.table::<B>().put(record.clone()).await;

        self.audit
            .record(ActivityLogEntry::new(
                record.id,
                B::KIND,
                actor,
                ActivityType::Created,
                format!("{} \"{name}\" created", B::KIND.label()),
            ))
            .await;
        for entry in entries {
            self.audit.record(entry).await;
        }
        self.mirror_linked(&record, actor, ActivityType::TaskCreated, format!("Task \"{name}\" created"))
            .await;

        self.notify_assignment(None, &record, actor).await;
        let notes = record.body.notes().to_string();
        if !notes.is_empty() {
            self.notifier
                .scan_mentions(
                    &notes,
                    actor,
                    &record_link(B::KIND, record.id),
                    &format!("{} \"{name}\"", B::KIND.label()),
                )
                .await;
        }

        self.flush().await?;
        info!("{} \"{name}\" created by {}", B::KIND.label(), actor.name);
        Ok(SaveOutcome {
            record,
            rejected_files: rejected,
        })
    }

    // -- update -------------------------------------------------------------

    pub async fn update_lead(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        payload: SavePayload<LeadBody>,
    ) -> CoreResult<SaveOutcome<LeadBody>> {
        self.update_record(ctx, id, payload).await
    }

    pub async fn update_customer(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        payload: SavePayload<CustomerBody>,
    ) -> CoreResult<SaveOutcome<CustomerBody>> {
        self.update_record(ctx, id, payload).await
    }

    pub async fn update_deal(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        mut payload: SavePayload<DealBody>,
    ) -> CoreResult<SaveOutcome<DealBody>> {
        self.price_deal(&mut payload.body).await?;
        self.update_record(ctx, id, payload).await
    }

    pub async fn update_task(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        payload: SavePayload<TaskBody>,
    ) -> CoreResult<SaveOutcome<TaskBody>> {
        self.update_record(ctx, id, payload).await
    }

    pub async fn update_product(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        payload: SavePayload<ProductBody>,
    ) -> CoreResult<SaveOutcome<ProductBody>> {
        self.update_record(ctx, id, payload).await
    }

    async fn update_record<B: RecordBody>(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        mut payload: SavePayload<B>,
    ) -> CoreResult<SaveOutcome<B>>
    where
        Self: KindStore<B>,
    {
        let actor = &ctx.actor;
        // Trashed records reject updates the same way absent ones do.
        let current = self.table::<B>()
            .get(id)
            .await
            .ok_or_else(|| not_found(B::KIND, id))?;
        // Ownership is checked against the stored owner, not the requested
        // one.
        if !can_perform(Some(actor), Action::Update, B::KIND, Some(&current.ownership())) {
            return Err(permission_denied(B::KIND, "update"));
        }
        payload.body.carry_immutable(&current.body);
        self.validate_payload(&payload, &current.custom_fields).await?;

        let now = Utc::now();
        let mut record = Stored {
            id,
            created_at: current.created_at,
            created_by: current.created_by,
            is_deleted: false,
            deleted_at: None,
            attachments: current.attachments.clone(),
            custom_fields: payload.custom_fields,
            body: payload.body,
        };

        let mut entries = Vec::new();
        let mut rejected = Vec::new();
        self.reconcile_attachments(
            &mut record,
            &payload.removed_attachment_ids,
            payload.uploads,
            actor,
            now,
            &mut entries,
            &mut rejected,
        );
        entries.extend(self.diff_entries(&current, &record, actor).await);

        let stage_changed = current.body.stage() != record.body.stage();
        let owner_changed = current.body.owner() != record.body.owner();
        let notes_changed = current.body.notes() != record.body.notes();
        let any_change = !entries.is_empty();

        self.table::<B>().put(record.clone()).await;
        for entry in entries {
            self.audit.record(entry).await;
        }
        if any_change {
            let (activity, verb) = if stage_changed {
                (ActivityType::TaskStatusChanged, "status changed")
            } else {
                (ActivityType::TaskUpdated, "updated")
            };
            self.mirror_linked(
                &record,
                actor,
                activity,
                format!("Task \"{}\" {verb}", record.body.display_name()),
            )
            .await;
        }

        if owner_changed {
            self.notify_assignment(current.body.owner(), &record, actor).await;
        } else if stage_changed {
            self.notify_stage_change(&record, actor).await;
        }
        if notes_changed {
            let name = record.body.display_name();
            self.notifier
                .scan_mentions(
                    record.body.notes(),
                    actor,
                    &record_link(B::KIND, id),
                    &format!("{} \"{name}\"", B::KIND.label()),
                )
                .await;
        }

        self.flush().await?;
        Ok(SaveOutcome {
            record,
            rejected_files: rejected,
        })
    }

    // -- soft delete / restore / purge --------------------------------------

    /// Move a record to the trash. Silent no-op (`Ok(None)`) when the record
    /// is absent or already trashed.
    pub async fn soft_delete<B: RecordBody>(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> CoreResult<Option<Stored<B>>>
    where
        Self: KindStore<B>,
    {
        let Some(current) = self.table::<B>().get(id).await else {
            return Ok(None);
        };
        if !can_perform(Some(&ctx.actor), Action::Delete, B::KIND, Some(&current.ownership())) {
            return Err(permission_denied(B::KIND, "delete"));
        }
        let Some(record) = self.table::<B>().soft_delete(id, Utc::now()).await else {
            return Ok(None);
        };
        self.audit
            .record(ActivityLogEntry::new(
                id,
                B::KIND,
                &ctx.actor,
                ActivityType::SoftDeleted,
                format!("{} \"{}\" moved to trash", B::KIND.label(), record.body.display_name()),
            ))
            .await;
        self.flush().await?;
        Ok(Some(record))
    }

    /// Bring a trashed record back. Deliberately ungated: restore is treated
    /// as a low-risk reversal. No-op when the record is not trashed.
    pub async fn restore<B: RecordBody>(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> CoreResult<Option<Stored<B>>>
    where
        Self: KindStore<B>,
    {
        let Some(record) = self.table::<B>().restore(id).await else {
            return Ok(None);
        };
        self.audit
            .record(ActivityLogEntry::new(
                id,
                B::KIND,
                &ctx.actor,
                ActivityType::Restored,
                format!("{} \"{}\" restored from trash", B::KIND.label(), record.body.display_name()),
            ))
            .await;
        self.flush().await?;
        Ok(Some(record))
    }

    /// Irreversibly remove a trashed record. Admin only; the audit entry
    /// outlives the record, keyed by its former id.
    pub async fn purge<B: RecordBody>(&self, ctx: &RequestContext, id: Uuid) -> CoreResult<()>
    where
        Self: KindStore<B>,
    {
        if !can_purge(Some(&ctx.actor)) {
            return Err(permission_denied(B::KIND, "permanently delete"));
        }
        let current = self.table::<B>()
            .get_any(id)
            .await
            .ok_or_else(|| not_found(B::KIND, id))?;
        if !current.is_deleted {
            return Err(CoreError::NotFound(format!(
                "{} {id} is not in the trash",
                B::KIND.label()
            )));
        }
        self.table::<B>().remove(id).await;
        self.audit
            .record(ActivityLogEntry::new(
                id,
                B::KIND,
                &ctx.actor,
                ActivityType::PermanentlyDeleted,
                format!(
                    "{} \"{}\" permanently deleted",
                    B::KIND.label(),
                    current.body.display_name()
                ),
            ))
            .await;
        self.flush().await?;
        info!("{} {id} purged by {}", B::KIND.label(), ctx.actor.name);
        Ok(())
    }

    // -- attachments --------------------------------------------------------

    /// Restore a soft-deleted attachment on a record (the record itself may
    /// be active or trashed). No-op when the attachment is not trashed.
    pub async fn restore_attachment<B: RecordBody>(
        &self,
        ctx: &RequestContext,
        record_id: Uuid,
        attachment_id: Uuid,
    ) -> CoreResult<Option<Attachment>>
    where
        Self: KindStore<B>,
    {
        let Some(mut record) = self.table::<B>().get_any(record_id).await else {
            return Ok(None);
        };
        let Some(attachment) = record
            .attachments
            .iter_mut()
            .find(|a| a.id == attachment_id && a.is_deleted)
        else {
            return Ok(None);
        };
        attachment.is_deleted = false;
        attachment.deleted_at = None;
        let restored = attachment.clone();
        self.table::<B>().put(record).await;
        self.audit
            .record(
                ActivityLogEntry::new(
                    record_id,
                    B::KIND,
                    &ctx.actor,
                    ActivityType::Restored,
                    format!("File \"{}\" restored", restored.filename),
                )
                .with_details(file_details(&restored)),
            )
            .await;
        self.flush().await?;
        Ok(Some(restored))
    }

    /// Permanently remove a soft-deleted attachment, independently of the
    /// parent's state. Admin only, like record purge.
    pub async fn purge_attachment<B: RecordBody>(
        &self,
        ctx: &RequestContext,
        record_id: Uuid,
        attachment_id: Uuid,
    ) -> CoreResult<()>
    where
        Self: KindStore<B>,
    {
        if !can_purge(Some(&ctx.actor)) {
            return Err(permission_denied(B::KIND, "permanently delete files on"));
        }
        let mut record = self.table::<B>()
            .get_any(record_id)
            .await
            .ok_or_else(|| not_found(B::KIND, record_id))?;
        let idx = record
            .attachments
            .iter()
            .position(|a| a.id == attachment_id && a.is_deleted)
            .ok_or_else(|| {
                CoreError::NotFound(format!("attachment {attachment_id} is not in the trash"))
            })?;
        let removed = record.attachments.remove(idx);
        self.table::<B>().put(record).await;
        self.audit
            .record(
                ActivityLogEntry::new(
                    record_id,
                    B::KIND,
                    &ctx.actor,
                    ActivityType::PermanentlyDeleted,
                    format!("File \"{}\" permanently deleted", removed.filename),
                )
                .with_details(file_details(&removed)),
            )
            .await;
        self.flush().await?;
        Ok(())
    }

    // -- products -----------------------------------------------------------

    /// Toggle product availability. Deactivation is refused while any open
    /// deal references the product; the error carries the blocking deal
    /// names and nothing is changed or logged.
    pub async fn set_product_active(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        active: bool,
    ) -> CoreResult<Stored<ProductBody>> {
        if !can_perform(Some(&ctx.actor), Action::Update, EntityKind::Product, None) {
            return Err(permission_denied(EntityKind::Product, "update"));
        }
        let mut record = self
            .products
            .get(id)
            .await
            .ok_or_else(|| not_found(EntityKind::Product, id))?;
        if record.body.is_active == active {
            return Ok(record);
        }
        if !active {
            let blocking = self.deactivation_blockers(id).await;
            if !blocking.is_empty() {
                return Err(CoreError::BusinessRuleBlocked { blocking });
            }
        }

        record.body.is_active = active;
        self.products.put(record.clone()).await;

        let (activity, verb) = if active {
            (ActivityType::ProductActivated, "activated")
        } else {
            (ActivityType::ProductDeactivated, "deactivated")
        };
        self.audit
            .record(ActivityLogEntry::new(
                id,
                EntityKind::Product,
                &ctx.actor,
                activity,
                format!("Product \"{}\" {verb}", record.body.name),
            ))
            .await;
        self.flush().await?;
        Ok(record)
    }

    /// Bulk toggle: the open-deal rule is applied to each product on its own;
    /// blocked and missing products are reported, the rest still proceed.
    pub async fn set_products_active(
        &self,
        ctx: &RequestContext,
        ids: &[Uuid],
        active: bool,
    ) -> CoreResult<BulkToggleReport> {
        let mut report = BulkToggleReport::default();
        for &id in ids {
            match self.set_product_active(ctx, id, active).await {
                Ok(_) => report.applied += 1,
                Err(CoreError::NotFound(_)) => report.skipped.push(id),
                Err(CoreError::BusinessRuleBlocked { blocking }) => {
                    let name = self
                        .products
                        .get(id)
                        .await
                        .map(|p| p.body.name)
                        .unwrap_or_default();
                    report.blocked.push(BlockedProduct {
                        id,
                        name,
                        blocking_deals: blocking,
                    });
                }
                Err(other) => return Err(other),
            }
        }
        Ok(report)
    }

    async fn deactivation_blockers(&self, product_id: Uuid) -> Vec<String> {
        self.deals
            .list()
            .await
            .into_iter()
            .filter(|d| !d.body.stage.is_closed())
            .filter(|d| d.body.line_items.iter().any(|l| l.product_id == product_id))
            .map(|d| d.body.name)
            .collect()
    }

    /// Stamp catalog data onto the line items and derive value/currency.
    /// Without line items the manually supplied figures stand.
    async fn price_deal(&self, body: &mut DealBody) -> CoreResult<()> {
        if body.line_items.is_empty() {
            return Ok(());
        }
        for line in &mut body.line_items {
            let product = self.products.get(line.product_id).await.ok_or_else(|| {
                CoreError::Validation(vec![FieldError::new(
                    "line_items",
                    format!("unknown product {}", line.product_id),
                )])
            })?;
            line.product_name = product.body.name.clone();
            line.unit_price = product.body.price;
            line.currency = product.body.currency.clone();
        }
        body.value = body.line_items.iter().map(|l| l.total()).sum();
        body.currency = body.line_items[0].currency.clone();
        Ok(())
    }

    // -- task reminders -----------------------------------------------------

    /// Evaluate the due-soon rule over all open tasks. Safe to call on every
    /// session tick; the reminder dedup window absorbs repeats.
    pub async fn run_task_reminders(&self) -> usize {
        let mut delivered = 0;
        for task in self.tasks.list().await {
            if task.body.status.is_terminal() {
                continue;
            }
            let (Some(due), Some(assignee)) = (task.body.due_date, task.body.assigned_to.as_deref())
            else {
                continue;
            };
            if self
                .notifier
                .task_due_reminder(assignee, &task.body.title, due, record_link(EntityKind::Task, task.id))
                .await
            {
                delivered += 1;
            }
        }
        delivered
    }

    // -- custom field definitions --------------------------------------------

    pub async fn create_field_definition(
        &self,
        ctx: &RequestContext,
        definition: CustomFieldDefinition,
    ) -> CoreResult<CustomFieldDefinition> {
        if !can_perform(Some(&ctx.actor), Action::Create, EntityKind::CustomFieldDefinition, None) {
            return Err(permission_denied(EntityKind::CustomFieldDefinition, "create"));
        }
        self.schema
            .insert(definition.clone())
            .await
            .map_err(|e| CoreError::Validation(vec![e]))?;
        self.audit
            .record(ActivityLogEntry::new(
                definition.id,
                EntityKind::CustomFieldDefinition,
                &ctx.actor,
                ActivityType::DefinitionCreated,
                format!(
                    "Custom field \"{}\" defined for {}",
                    definition.label,
                    definition.kind.label()
                ),
            ))
            .await;
        self.flush().await?;
        Ok(definition)
    }

    pub async fn update_field_definition(
        &self,
        ctx: &RequestContext,
        definition: CustomFieldDefinition,
    ) -> CoreResult<CustomFieldDefinition> {
        if !can_perform(Some(&ctx.actor), Action::Update, EntityKind::CustomFieldDefinition, None) {
            return Err(permission_denied(EntityKind::CustomFieldDefinition, "update"));
        }
        let id = definition.id;
        self.schema
            .update(definition.clone())
            .await
            .ok_or_else(|| not_found(EntityKind::CustomFieldDefinition, id))?;
        self.audit
            .record(ActivityLogEntry::new(
                id,
                EntityKind::CustomFieldDefinition,
                &ctx.actor,
                ActivityType::DefinitionUpdated,
                format!("Custom field \"{}\" updated", definition.label),
            ))
            .await;
        self.flush().await?;
        Ok(definition)
    }

    /// Remove a definition. Values already stored under its name stay on the
    /// records as orphaned data; nothing is stripped retroactively.
    pub async fn delete_field_definition(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        id: Uuid,
    ) -> CoreResult<()> {
        if !can_perform(Some(&ctx.actor), Action::Delete, EntityKind::CustomFieldDefinition, None) {
            return Err(permission_denied(EntityKind::CustomFieldDefinition, "delete"));
        }
        let removed = self
            .schema
            .remove(kind, id)
            .await
            .ok_or_else(|| not_found(EntityKind::CustomFieldDefinition, id))?;
        self.audit
            .record(ActivityLogEntry::new(
                id,
                EntityKind::CustomFieldDefinition,
                &ctx.actor,
                ActivityType::DefinitionDeleted,
                format!(
                    "Custom field \"{}\" deleted; stored values remain orphaned",
                    removed.label
                ),
            ))
            .await;
        self.flush().await?;
        Ok(())
    }

    // -- internals ----------------------------------------------------------

    /// `stored` carries the custom fields already on the record so orphaned
    /// values pass the undefined-name check; empty at create.
    async fn validate_payload<B: RecordBody>(
        &self,
        payload: &SavePayload<B>,
        stored: &BTreeMap<String, CustomValue>,
    ) -> CoreResult<()> {
        let mut errors = payload.body.validate();
        errors.extend(
            self.schema
                .validate(B::KIND, &payload.custom_fields, stored)
                .await,
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(errors))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn ingest_upload<B: RecordBody>(
        &self,
        record: &mut Stored<B>,
        upload: FileUpload,
        actor: &Actor,
        now: DateTime<Utc>,
        log_attach: bool,
        entries: &mut Vec<ActivityLogEntry>,
        rejected: &mut Vec<RejectedFile>,
    ) {
        if upload.size > self.max_attachment_bytes {
            entries.push(
                ActivityLogEntry::new(
                    record.id,
                    B::KIND,
                    actor,
                    ActivityType::FileTooLarge,
                    format!(
                        "File \"{}\" rejected: {} bytes exceeds the {} byte limit",
                        upload.filename, upload.size, self.max_attachment_bytes
                    ),
                )
                .with_details(ActivityDetails::File {
                    filename: upload.filename.clone(),
                    mime_type: upload.mime_type,
                    size: upload.size,
                }),
            );
            rejected.push(RejectedFile {
                filename: upload.filename,
                size: upload.size,
            });
            return;
        }

        let attachment = Attachment {
            id: Uuid::new_v4(),
            filename: upload.filename,
            mime_type: upload.mime_type,
            size: upload.size,
            url: upload.url,
            uploaded_by: actor.name.clone(),
            uploaded_at: now,
            is_deleted: false,
            deleted_at: None,
        };
        if log_attach {
            entries.push(
                ActivityLogEntry::new(
                    record.id,
                    B::KIND,
                    actor,
                    ActivityType::FileAttached,
                    format!("File \"{}\" attached", attachment.filename),
                )
                .with_details(file_details(&attachment)),
            );
        }
        record.attachments.push(attachment);
    }

    #[allow(clippy::too_many_arguments)]
    fn reconcile_attachments<B: RecordBody>(
        &self,
        record: &mut Stored<B>,
        removed_ids: &[Uuid],
        uploads: Vec<FileUpload>,
        actor: &Actor,
        now: DateTime<Utc>,
        entries: &mut Vec<ActivityLogEntry>,
        rejected: &mut Vec<RejectedFile>,
    ) {
        for &removed in removed_ids {
            if let Some(attachment) = record
                .attachments
                .iter_mut()
                .find(|a| a.id == removed && !a.is_deleted)
            {
                attachment.is_deleted = true;
                attachment.deleted_at = Some(now);
                entries.push(
                    ActivityLogEntry::new(
                        record.id,
                        B::KIND,
                        actor,
                        ActivityType::FileRemoved,
                        format!("File \"{}\" removed", attachment.filename),
                    )
                    .with_details(file_details(attachment)),
                );
            }
        }
        for upload in uploads {
            self.ingest_upload(record, upload, actor, now, true, entries, rejected);
        }
    }

    /// One entry per changed tracked field; equal values write nothing.
    async fn diff_entries<B: RecordBody>(
        &self,
        old: &Stored<B>,
        new: &Stored<B>,
        actor: &Actor,
    ) -> Vec<ActivityLogEntry> {
        let mut entries = Vec::new();

        let (old_stage, new_stage) = (old.body.stage(), new.body.stage());
        if old_stage != new_stage {
            let field = new.body.stage_field();
            let from = old_stage.clone().unwrap_or_default();
            let to = new_stage.clone().unwrap_or_default();
            entries.push(
                ActivityLogEntry::new(
                    new.id,
                    B::KIND,
                    actor,
                    new.body.stage_activity(),
                    format!("{field} changed from {from} to {to}"),
                )
                .with_details(ActivityDetails::ValueChange {
                    field: field.to_string(),
                    old: old_stage,
                    new: new_stage,
                }),
            );
        }

        let (old_money, new_money) = (old.body.money(), new.body.money());
        if old_money != new_money {
            let show = |m: &Option<(f64, String)>| {
                m.as_ref().map(|(v, c)| format!("{v} {c}"))
            };
            let (from, to) = (show(&old_money), show(&new_money));
            entries.push(
                ActivityLogEntry::new(
                    new.id,
                    B::KIND,
                    actor,
                    ActivityType::FieldUpdated,
                    format!(
                        "value changed from {} to {}",
                        from.clone().unwrap_or_default(),
                        to.clone().unwrap_or_default()
                    ),
                )
                .with_details(ActivityDetails::ValueChange {
                    field: "value".to_string(),
                    old: from,
                    new: to,
                }),
            );
        }

        // Notes: any difference counts, including set-to-empty.
        if old.body.notes() != new.body.notes() {
            let (activity, description) = if old.body.notes().is_empty() {
                (ActivityType::NoteAdded, "Note added")
            } else {
                (ActivityType::NoteUpdated, "Notes updated")
            };
            entries.push(
                ActivityLogEntry::new(new.id, B::KIND, actor, activity, description).with_details(
                    ActivityDetails::ValueChange {
                        field: "notes".to_string(),
                        old: Some(old.body.notes().to_string()),
                        new: Some(new.body.notes().to_string()),
                    },
                ),
            );
        }

        // Custom fields: labels resolve against the schema now, so renaming a
        // definition later leaves this history untouched.
        let mut names: Vec<&String> = old.custom_fields.keys().chain(new.custom_fields.keys()).collect();
        names.sort();
        names.dedup();
        for name in names {
            let old_value = old.custom_fields.get(name);
            let new_value = new.custom_fields.get(name);
            if old_value == new_value {
                continue;
            }
            let label = self.schema.label_for(B::KIND, name).await;
            entries.push(
                ActivityLogEntry::new(
                    new.id,
                    B::KIND,
                    actor,
                    ActivityType::CustomFieldUpdated,
                    format!("{label} changed"),
                )
                .with_details(ActivityDetails::ValueChange {
                    field: name.clone(),
                    old: old_value.map(|v| v.display()),
                    new: new_value.map(|v| v.display()),
                }),
            );
        }

        entries
    }

    /// Tasks linked to another record mirror their activity into that
    /// record's history.
    async fn mirror_linked<B: RecordBody>(
        &self,
        record: &Stored<B>,
        actor: &Actor,
        activity: ActivityType,
        description: String,
    ) {
        if let Some(link) = record.body.link() {
            self.audit
                .record(
                    ActivityLogEntry::new(link.id, link.kind, actor, activity, description)
                        .with_details(ActivityDetails::LinkedTask {
                            task_id: record.id,
                            title: record.body.display_name(),
                        }),
                )
                .await;
        }
    }

    /// Assignment notification: the new owner hears about it unless they are
    /// the actor or unknown to the directory.
    async fn notify_assignment<B: RecordBody>(
        &self,
        previous_owner: Option<String>,
        record: &Stored<B>,
        actor: &Actor,
    ) {
        let Some(notification_type) = B::assigned_notification() else {
            return;
        };
        let Some(owner) = record.body.owner() else {
            return;
        };
        if previous_owner.as_deref() == Some(owner.as_str()) {
            return;
        }
        let Some(user) = self.directory.find_by_name(&owner).await else {
            return;
        };
        if user.id == actor.id {
            return;
        }
        let name = record.body.display_name();
        self.notifier
            .notify(
                user.id,
                notification_type,
                format!("{} assigned to you", B::KIND.label()),
                format!("{} assigned {} \"{name}\" to you", actor.name, B::KIND.label()),
                Some(record_link(B::KIND, record.id)),
                Some(ActorRef::from(actor)),
            )
            .await;
    }

    /// Stage/status-change notification to the current owner.
    async fn notify_stage_change<B: RecordBody>(&self, record: &Stored<B>, actor: &Actor) {
        let Some(notification_type) = B::updated_notification() else {
            return;
        };
        let Some(owner) = record.body.owner() else {
            return;
        };
        let Some(user) = self.directory.find_by_name(&owner).await else {
            return;
        };
        if user.id == actor.id {
            return;
        }
        let name = record.body.display_name();
        let stage = record.body.stage().unwrap_or_default();
        self.notifier
            .notify(
                user.id,
                notification_type,
                format!("{} updated", B::KIND.label()),
                format!("{} \"{name}\" moved to {stage}", B::KIND.label()),
                Some(record_link(B::KIND, record.id)),
                Some(ActorRef::from(actor)),
            )
            .await;
    }

    async fn flush(&self) -> CoreResult<()> {
        let snapshot = DomainSnapshot {
            leads: self.leads.snapshot().await,
            customers: self.customers.snapshot().await,
            deals: self.deals.snapshot().await,
            tasks: self.tasks.snapshot().await,
            products: self.products.snapshot().await,
            definitions: self.schema.all().await,
            activity: self.audit.snapshot().await,
            inboxes: self.notifier.snapshot().await,
        };
        self.store.flush(&snapshot).await?;
        Ok(())
    }
}

fn file_details(attachment: &Attachment) -> ActivityDetails {
    ActivityDetails::File {
        filename: attachment.filename.clone(),
        mime_type: attachment.mime_type.clone(),
        size: attachment.size,
    }
}
