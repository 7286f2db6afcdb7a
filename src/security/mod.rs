//! Role/ownership permission matrix.
//!
//! `can_perform` is a pure function; it never touches service state, so every
//! mutation path can consult it before locking anything.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::models::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    SalesRep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

/// The authenticated caller of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            name: name.into(),
            role,
        }
    }
}

/// Ownership data a permission check needs from the stored record.
///
/// `owner_name` carries the kind-specific owner field (assigned-to, account
/// manager, deal owner) and is compared by display name. Two users sharing a
/// display name would be conflated here; some call sites intentionally store a
/// free-text owner that never resolves to a directory user, so the comparison
/// is kept as-is rather than moved to ids.
#[derive(Debug, Clone, Default)]
pub struct OwnershipView {
    pub owner_name: Option<String>,
    pub created_by: Option<Uuid>,
}

/// Decide whether `actor` may apply `action` to an entity of `kind`.
///
/// `target` is required only for ownership-scoped decisions (sales rep
/// update/delete); passing `None` there denies.
pub fn can_perform(
    actor: Option<&Actor>,
    action: Action,
    kind: EntityKind,
    target: Option<&OwnershipView>,
) -> bool {
    let Some(actor) = actor else {
        return false;
    };

    match actor.role {
        Role::Admin => true,
        Role::Manager => !matches!(kind, EntityKind::User | EntityKind::System),
        Role::SalesRep => match kind {
            EntityKind::Lead | EntityKind::Customer | EntityKind::Deal | EntityKind::Task => {
                match action {
                    Action::Create | Action::Read => true,
                    Action::Update | Action::Delete => {
                        let Some(target) = target else {
                            return false;
                        };
                        let owns = target.owner_name.as_deref() == Some(actor.name.as_str());
                        // Task creators keep control of their own tasks,
                        // checked by id.
                        let created_it = kind == EntityKind::Task
                            && target.created_by == Some(actor.id);
                        owns || created_it
                    }
                }
            }
            EntityKind::Product => action == Action::Read,
            _ => false,
        },
    }
}

/// Purge is gated above the regular matrix: only admins may irreversibly
/// remove anything.
pub fn can_purge(actor: Option<&Actor>) -> bool {
    matches!(actor, Some(a) if a.role == Role::Admin)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> Actor {
        Actor::new(Uuid::new_v4(), "Dana Fields", role)
    }

    #[test]
    fn no_actor_denies_everything() {
        assert!(!can_perform(None, Action::Read, EntityKind::Lead, None));
        assert!(!can_perform(None, Action::Create, EntityKind::System, None));
    }

    #[test]
    fn admin_allows_everything() {
        let a = actor(Role::Admin);
        for kind in [
            EntityKind::Lead,
            EntityKind::Product,
            EntityKind::User,
            EntityKind::System,
            EntityKind::CustomFieldDefinition,
        ] {
            for action in [Action::Create, Action::Read, Action::Update, Action::Delete] {
                assert!(can_perform(Some(&a), action, kind, None));
            }
        }
        assert!(can_purge(Some(&a)));
    }

    #[test]
    fn manager_denied_on_user_and_system_only() {
        let m = actor(Role::Manager);
        for kind in [
            EntityKind::Lead,
            EntityKind::Customer,
            EntityKind::Deal,
            EntityKind::Task,
            EntityKind::Product,
            EntityKind::CustomFieldDefinition,
        ] {
            assert!(can_perform(Some(&m), Action::Delete, kind, None));
        }
        assert!(!can_perform(Some(&m), Action::Read, EntityKind::User, None));
        assert!(!can_perform(Some(&m), Action::Update, EntityKind::System, None));
        assert!(!can_purge(Some(&m)));
    }

    #[test]
    fn sales_rep_update_requires_ownership() {
        let rep = actor(Role::SalesRep);
        let owned = OwnershipView {
            owner_name: Some("Dana Fields".into()),
            created_by: None,
        };
        let foreign = OwnershipView {
            owner_name: Some("Someone Else".into()),
            created_by: None,
        };

        assert!(can_perform(Some(&rep), Action::Create, EntityKind::Lead, None));
        assert!(can_perform(Some(&rep), Action::Update, EntityKind::Lead, Some(&owned)));
        assert!(!can_perform(Some(&rep), Action::Update, EntityKind::Lead, Some(&foreign)));
        assert!(!can_perform(Some(&rep), Action::Update, EntityKind::Lead, None));
        assert!(!can_perform(Some(&rep), Action::Delete, EntityKind::Deal, Some(&foreign)));
    }

    #[test]
    fn sales_rep_task_creator_checked_by_id() {
        let rep = actor(Role::SalesRep);
        let created = OwnershipView {
            owner_name: Some("Someone Else".into()),
            created_by: Some(rep.id),
        };
        assert!(can_perform(Some(&rep), Action::Update, EntityKind::Task, Some(&created)));
        // The creator rule is task-only; a lead created by the rep but owned
        // by someone else stays off limits.
        assert!(!can_perform(Some(&rep), Action::Update, EntityKind::Lead, Some(&created)));
    }

    #[test]
    fn sales_rep_product_is_read_only() {
        let rep = actor(Role::SalesRep);
        assert!(can_perform(Some(&rep), Action::Read, EntityKind::Product, None));
        assert!(!can_perform(Some(&rep), Action::Create, EntityKind::Product, None));
        assert!(!can_perform(Some(&rep), Action::Update, EntityKind::Product, None));
        assert!(!can_perform(Some(&rep), Action::Update, EntityKind::User, None));
        assert!(!can_perform(Some(&rep), Action::Read, EntityKind::System, None));
    }
}
