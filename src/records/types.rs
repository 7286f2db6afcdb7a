//! Record bodies for the five managed kinds, the stored envelope shared by
//! all of them, and the per-kind descriptor trait the generic engine runs on.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::ActivityType;
use crate::fields::CustomValue;
use crate::notify::NotificationType;
use crate::security::OwnershipView;
use crate::shared::errors::FieldError;
use crate::shared::models::EntityKind;

/// File metadata owned by a record. Attachments soft-delete independently of
/// their parent and may be purged while the parent is still trashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub url: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A pending upload; bytes are already validated and stored by the caller,
/// the core only sees metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUpload {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub url: String,
}

/// Common envelope around every record body. `id`, `created_at` and
/// `created_by` never change after creation; `is_deleted` is true iff
/// `deleted_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<B> {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
    pub custom_fields: BTreeMap<String, CustomValue>,
    pub body: B,
}

impl<B: RecordBody> Stored<B> {
    pub fn ownership(&self) -> OwnershipView {
        OwnershipView {
            owner_name: self.body.owner(),
            created_by: self.created_by,
        }
    }
}

/// Everything a caller supplies to create or update one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavePayload<B> {
    pub body: B,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, CustomValue>,
    #[serde(default)]
    pub uploads: Vec<FileUpload>,
    #[serde(default)]
    pub removed_attachment_ids: Vec<Uuid>,
}

impl<B> SavePayload<B> {
    pub fn new(body: B) -> Self {
        Self {
            body,
            custom_fields: BTreeMap::new(),
            uploads: Vec::new(),
            removed_attachment_ids: Vec::new(),
        }
    }
}

/// Per-kind descriptor the generic lifecycle engine is parameterized by:
/// owner-field accessor, tracked stage, notes, money, validation, and the
/// audit/notification vocabulary for the kind.
pub trait RecordBody:
    Clone + std::fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    const KIND: EntityKind;
    /// Only tasks stamp `created_by`; it feeds the creator permission rule.
    const TRACKS_CREATOR: bool = false;

    fn display_name(&self) -> String;

    /// Kind-specific owner field, used for permissions and notifications.
    fn owner(&self) -> Option<String> {
        None
    }

    /// Tracked status/stage rendered for diffing, if the kind has one.
    fn stage(&self) -> Option<String> {
        None
    }

    fn stage_field(&self) -> &'static str {
        "status"
    }

    fn stage_activity(&self) -> ActivityType {
        ActivityType::StatusChanged
    }

    fn notes(&self) -> &str {
        ""
    }

    /// Tracked monetary (value, currency), if the kind carries one.
    fn money(&self) -> Option<(f64, String)> {
        None
    }

    /// Back-reference to another record whose audit history should mirror
    /// this record's activity (tasks linked to a lead/deal/customer).
    fn link(&self) -> Option<TaskLink> {
        None
    }

    /// Required-field and format checks on the business fields.
    fn validate(&self) -> Vec<FieldError>;

    /// Fields the lifecycle engine refuses to change through a plain update;
    /// the body copies them back from the stored version before commit.
    /// Product uses this to force `is_active` through its guarded toggle.
    fn carry_immutable(&mut self, _stored: &Self) {}

    fn assigned_notification() -> Option<NotificationType> {
        None
    }

    fn updated_notification() -> Option<NotificationType> {
        None
    }
}

// ---------------------------------------------------------------------------
// Lead

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    Unqualified,
    Converted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadBody {
    pub name: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub status: LeadStatus,
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub notes: String,
}

impl RecordBody for LeadBody {
    const KIND: EntityKind = EntityKind::Lead;

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn owner(&self) -> Option<String> {
        self.assigned_to.clone()
    }

    fn stage(&self) -> Option<String> {
        Some(format!("{:?}", self.status))
    }

    fn notes(&self) -> &str {
        &self.notes
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "name is required"));
        }
        errors
    }

    fn assigned_notification() -> Option<NotificationType> {
        Some(NotificationType::LeadAssigned)
    }

    fn updated_notification() -> Option<NotificationType> {
        Some(NotificationType::LeadUpdated)
    }
}

// ---------------------------------------------------------------------------
// Customer

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerBody {
    pub name: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub account_manager: Option<String>,
    #[serde(default)]
    pub status: CustomerStatus,
    #[serde(default)]
    pub notes: String,
}

impl RecordBody for CustomerBody {
    const KIND: EntityKind = EntityKind::Customer;

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn owner(&self) -> Option<String> {
        self.account_manager.clone()
    }

    fn stage(&self) -> Option<String> {
        Some(format!("{:?}", self.status))
    }

    fn notes(&self) -> &str {
        &self.notes
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "name is required"));
        }
        errors
    }
}

// ---------------------------------------------------------------------------
// Deal

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStage {
    #[default]
    Qualification,
    Proposal,
    Negotiation,
    ClosedWon,
    ClosedLost,
}

impl DealStage {
    pub fn is_closed(&self) -> bool {
        matches!(self, DealStage::ClosedWon | DealStage::ClosedLost)
    }
}

/// One catalog line on a deal. Quantity and product come from the caller;
/// name, unit price and currency are stamped from the Product catalog at
/// save time, so later price changes do not rewrite existing deals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealLineItem {
    pub product_id: Uuid,
    #[serde(default)]
    pub product_name: String,
    pub quantity: u32,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub currency: String,
}

impl DealLineItem {
    pub fn total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealBody {
    pub name: String,
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub stage: DealStage,
    #[serde(default)]
    pub value: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub expected_close_date: Option<NaiveDate>,
    pub owner: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub line_items: Vec<DealLineItem>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl RecordBody for DealBody {
    const KIND: EntityKind = EntityKind::Deal;

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn owner(&self) -> Option<String> {
        self.owner.clone()
    }

    fn stage(&self) -> Option<String> {
        Some(format!("{:?}", self.stage))
    }

    fn stage_field(&self) -> &'static str {
        "stage"
    }

    fn stage_activity(&self) -> ActivityType {
        ActivityType::StageChanged
    }

    fn notes(&self) -> &str {
        &self.notes
    }

    fn money(&self) -> Option<(f64, String)> {
        Some((self.value, self.currency.clone()))
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "name is required"));
        }
        if self.value < 0.0 {
            errors.push(FieldError::new("value", "value must not be negative"));
        }
        errors
    }

    fn assigned_notification() -> Option<NotificationType> {
        Some(NotificationType::DealAssigned)
    }

    fn updated_notification() -> Option<NotificationType> {
        Some(NotificationType::DealUpdated)
    }
}

// ---------------------------------------------------------------------------
// Task

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Optional back-reference to the record a task was created from; its audit
/// history then mirrors task activity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskLink {
    pub kind: EntityKind,
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBody {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub due_date: Option<NaiveDate>,
    pub assigned_to: Option<String>,
    pub linked_to: Option<TaskLink>,
    #[serde(default)]
    pub notes: String,
}

impl RecordBody for TaskBody {
    const KIND: EntityKind = EntityKind::Task;
    const TRACKS_CREATOR: bool = true;

    fn display_name(&self) -> String {
        self.title.clone()
    }

    fn owner(&self) -> Option<String> {
        self.assigned_to.clone()
    }

    fn stage(&self) -> Option<String> {
        Some(format!("{:?}", self.status))
    }

    fn notes(&self) -> &str {
        &self.notes
    }

    fn link(&self) -> Option<TaskLink> {
        self.linked_to
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.title.trim().is_empty() {
            errors.push(FieldError::new("title", "title is required"));
        }
        errors
    }

    fn assigned_notification() -> Option<NotificationType> {
        Some(NotificationType::TaskAssigned)
    }

    fn updated_notification() -> Option<NotificationType> {
        Some(NotificationType::TaskUpdated)
    }
}

// ---------------------------------------------------------------------------
// Product

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductBody {
    pub name: String,
    pub sku: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub notes: String,
}

fn default_true() -> bool {
    true
}

impl RecordBody for ProductBody {
    const KIND: EntityKind = EntityKind::Product;

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn notes(&self) -> &str {
        &self.notes
    }

    fn money(&self) -> Option<(f64, String)> {
        Some((self.price, self.currency.clone()))
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "name is required"));
        }
        if self.price < 0.0 {
            errors.push(FieldError::new("price", "price must not be negative"));
        }
        errors
    }

    fn carry_immutable(&mut self, stored: &Self) {
        // Activation only moves through the guarded toggle, never a plain
        // update.
        self.is_active = stored.is_active;
    }
}
