use serde::{Deserialize, Serialize};

/// Every entity an activity-log entry or permission check can refer to.
/// `Lead`..`Product` are the managed record kinds; the rest exist only as
/// audit/permission subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Lead,
    Customer,
    Deal,
    Task,
    Product,
    User,
    System,
    CustomFieldDefinition,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Lead => "Lead",
            EntityKind::Customer => "Customer",
            EntityKind::Deal => "Deal",
            EntityKind::Task => "Task",
            EntityKind::Product => "Product",
            EntityKind::User => "User",
            EntityKind::System => "System",
            EntityKind::CustomFieldDefinition => "Custom field definition",
        }
    }
}
