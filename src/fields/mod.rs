//! Custom field definitions and value validation.
//!
//! Definitions are managed by privileged actors through the domain service;
//! this store only holds them and validates incoming values against them.
//! Deleting a definition leaves stored values in place on existing records
//! ("orphaned"); `orphaned_names` surfaces them explicitly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::shared::errors::FieldError;
use crate::shared::models::EntityKind;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://\S+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomFieldType {
    Text,
    MultilineText,
    Number,
    Date,
    Email,
    Url,
    Select,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldDefinition {
    pub id: Uuid,
    pub kind: EntityKind,
    /// Programmatic name, unique within `kind`.
    pub name: String,
    /// Display label, resolved at audit-write time.
    pub label: String,
    pub field_type: CustomFieldType,
    pub is_required: bool,
    /// Allowed options, meaningful for `Select` only.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Tagged value for one custom field, validated against its definition at the
/// save boundary rather than carried as opaque JSON through the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CustomValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Bool(bool),
    Select(String),
}

impl CustomValue {
    pub fn display(&self) -> String {
        match self {
            CustomValue::Text(s) | CustomValue::Select(s) => s.clone(),
            CustomValue::Number(n) => n.to_string(),
            CustomValue::Date(d) => d.to_string(),
            CustomValue::Bool(b) => b.to_string(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, CustomValue::Text(s) | CustomValue::Select(s) if s.trim().is_empty())
    }
}

#[derive(Clone, Default)]
pub struct FieldSchema {
    definitions: Arc<RwLock<HashMap<EntityKind, Vec<CustomFieldDefinition>>>>,
}

impl FieldSchema {
    pub fn new(definitions: Vec<CustomFieldDefinition>) -> Self {
        let mut by_kind: HashMap<EntityKind, Vec<CustomFieldDefinition>> = HashMap::new();
        for def in definitions {
            by_kind.entry(def.kind).or_default().push(def);
        }
        Self {
            definitions: Arc::new(RwLock::new(by_kind)),
        }
    }

    pub async fn definitions_for(&self, kind: EntityKind) -> Vec<CustomFieldDefinition> {
        self.definitions
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn all(&self) -> Vec<CustomFieldDefinition> {
        self.definitions
            .read()
            .await
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// Display label for a field name, falling back to the programmatic name
    /// when the definition is gone (orphaned value).
    pub async fn label_for(&self, kind: EntityKind, name: &str) -> String {
        self.definitions
            .read()
            .await
            .get(&kind)
            .and_then(|defs| defs.iter().find(|d| d.name == name))
            .map(|d| d.label.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// Insert a definition; the name must be unused within its kind.
    pub async fn insert(&self, def: CustomFieldDefinition) -> Result<(), FieldError> {
        let mut defs = self.definitions.write().await;
        let list = defs.entry(def.kind).or_default();
        if list.iter().any(|d| d.name == def.name) {
            return Err(FieldError::new(
                def.name.clone(),
                "a field with this name already exists for this record kind",
            ));
        }
        list.push(def);
        Ok(())
    }

    /// Replace an existing definition in place, matched by id. The kind and
    /// name stay fixed; label, type, requiredness and options may change.
    pub async fn update(&self, def: CustomFieldDefinition) -> Option<CustomFieldDefinition> {
        let mut defs = self.definitions.write().await;
        let list = defs.get_mut(&def.kind)?;
        let slot = list.iter_mut().find(|d| d.id == def.id)?;
        let previous = slot.clone();
        slot.label = def.label;
        slot.field_type = def.field_type;
        slot.is_required = def.is_required;
        slot.options = def.options;
        Some(previous)
    }

    pub async fn remove(&self, kind: EntityKind, id: Uuid) -> Option<CustomFieldDefinition> {
        let mut defs = self.definitions.write().await;
        let list = defs.get_mut(&kind)?;
        let idx = list.iter().position(|d| d.id == id)?;
        Some(list.remove(idx))
    }

    /// Validate a custom-field map against the definitions for `kind`.
    /// Returns one error per offending field; empty means valid.
    ///
    /// `stored` holds the custom fields already on the record (empty at
    /// create). Names present there are exempt from the undefined-name
    /// check, so a record carrying orphaned values still round-trips
    /// through update without the caller stripping them.
    pub async fn validate(
        &self,
        kind: EntityKind,
        values: &BTreeMap<String, CustomValue>,
        stored: &BTreeMap<String, CustomValue>,
    ) -> Vec<FieldError> {
        let defs = self.definitions_for(kind).await;
        let mut errors = Vec::new();

        for def in &defs {
            match values.get(&def.name) {
                None => {
                    if def.is_required {
                        errors.push(FieldError::new(&def.name, format!("{} is required", def.label)));
                    }
                }
                Some(value) => {
                    if def.is_required && value.is_blank() {
                        errors.push(FieldError::new(&def.name, format!("{} is required", def.label)));
                        continue;
                    }
                    if let Some(reason) = type_error(def, value) {
                        errors.push(FieldError::new(&def.name, reason));
                    }
                }
            }
        }

        for name in values.keys() {
            if defs.iter().any(|d| &d.name == name) || stored.contains_key(name) {
                continue;
            }
            errors.push(FieldError::new(
                name,
                format!("no custom field named {name} is defined for {}", kind.label()),
            ));
        }

        errors
    }

    /// Names on a record that no longer have a definition backing them.
    pub async fn orphaned_names(
        &self,
        kind: EntityKind,
        values: &BTreeMap<String, CustomValue>,
    ) -> Vec<String> {
        let defs = self.definitions_for(kind).await;
        values
            .keys()
            .filter(|name| !defs.iter().any(|d| d.name == **name))
            .cloned()
            .collect()
    }
}

fn type_error(def: &CustomFieldDefinition, value: &CustomValue) -> Option<String> {
    match (def.field_type, value) {
        (CustomFieldType::Text | CustomFieldType::MultilineText, CustomValue::Text(_)) => None,
        (CustomFieldType::Number, CustomValue::Number(n)) => {
            if n.is_finite() {
                None
            } else {
                Some(format!("{} must be a finite number", def.label))
            }
        }
        (CustomFieldType::Date, CustomValue::Date(_)) => None,
        (CustomFieldType::Email, CustomValue::Text(s)) => {
            if EMAIL_RE.is_match(s) {
                None
            } else {
                Some(format!("{} must be a valid email address", def.label))
            }
        }
        (CustomFieldType::Url, CustomValue::Text(s)) => {
            if URL_RE.is_match(s) {
                None
            } else {
                Some(format!("{} must be an http(s) URL", def.label))
            }
        }
        (CustomFieldType::Select, CustomValue::Select(s) | CustomValue::Text(s)) => {
            if def.options.iter().any(|o| o == s) {
                None
            } else {
                Some(format!(
                    "{} must be one of: {}",
                    def.label,
                    def.options.join(", ")
                ))
            }
        }
        (CustomFieldType::Boolean, CustomValue::Bool(_)) => None,
        _ => Some(format!(
            "{} has the wrong value type for a {:?} field",
            def.label, def.field_type
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, label: &str, field_type: CustomFieldType, required: bool) -> CustomFieldDefinition {
        CustomFieldDefinition {
            id: Uuid::new_v4(),
            kind: EntityKind::Lead,
            name: name.into(),
            label: label.into(),
            field_type,
            is_required: required,
            options: vec![],
        }
    }

    #[tokio::test]
    async fn required_field_must_be_present_and_non_blank() {
        let schema = FieldSchema::new(vec![def("region", "Region", CustomFieldType::Text, true)]);

        let errors = schema.validate(EntityKind::Lead, &BTreeMap::new(), &BTreeMap::new()).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "region");

        let mut values = BTreeMap::new();
        values.insert("region".into(), CustomValue::Text("  ".into()));
        assert_eq!(schema.validate(EntityKind::Lead, &values, &BTreeMap::new()).await.len(), 1);

        values.insert("region".into(), CustomValue::Text("EMEA".into()));
        assert!(schema.validate(EntityKind::Lead, &values, &BTreeMap::new()).await.is_empty());
    }

    #[tokio::test]
    async fn email_and_url_formats_are_checked() {
        let schema = FieldSchema::new(vec![
            def("contact", "Contact", CustomFieldType::Email, false),
            def("site", "Site", CustomFieldType::Url, false),
        ]);

        let mut values = BTreeMap::new();
        values.insert("contact".into(), CustomValue::Text("not-an-email".into()));
        values.insert("site".into(), CustomValue::Text("ftp://x".into()));
        assert_eq!(schema.validate(EntityKind::Lead, &values, &BTreeMap::new()).await.len(), 2);

        values.insert("contact".into(), CustomValue::Text("a@b.co".into()));
        values.insert("site".into(), CustomValue::Text("https://b.co".into()));
        assert!(schema.validate(EntityKind::Lead, &values, &BTreeMap::new()).await.is_empty());
    }

    #[tokio::test]
    async fn select_must_match_an_option() {
        let mut d = def("tier", "Tier", CustomFieldType::Select, false);
        d.options = vec!["gold".into(), "silver".into()];
        let schema = FieldSchema::new(vec![d]);

        let mut values = BTreeMap::new();
        values.insert("tier".into(), CustomValue::Select("bronze".into()));
        assert_eq!(schema.validate(EntityKind::Lead, &values, &BTreeMap::new()).await.len(), 1);

        values.insert("tier".into(), CustomValue::Select("gold".into()));
        assert!(schema.validate(EntityKind::Lead, &values, &BTreeMap::new()).await.is_empty());
    }

    #[tokio::test]
    async fn undefined_names_are_rejected_but_reported_as_orphans() {
        let schema = FieldSchema::new(vec![]);
        let mut values = BTreeMap::new();
        values.insert("ghost".into(), CustomValue::Bool(true));

        assert_eq!(schema.validate(EntityKind::Lead, &values, &BTreeMap::new()).await.len(), 1);
        assert_eq!(
            schema.orphaned_names(EntityKind::Lead, &values).await,
            vec!["ghost".to_string()]
        );
    }

    #[tokio::test]
    async fn names_already_stored_on_the_record_stay_valid_without_a_definition() {
        let schema = FieldSchema::new(vec![]);
        let mut stored = BTreeMap::new();
        stored.insert("region".into(), CustomValue::Text("EMEA".into()));

        // Round-tripping the record's own orphaned value is fine.
        assert!(schema.validate(EntityKind::Lead, &stored, &stored).await.is_empty());

        // A brand-new undefined name is still rejected.
        let mut values = stored.clone();
        values.insert("ghost".into(), CustomValue::Bool(true));
        let errors = schema.validate(EntityKind::Lead, &values, &stored).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "ghost");
    }

    #[tokio::test]
    async fn duplicate_names_within_a_kind_are_refused() {
        let schema = FieldSchema::new(vec![def("region", "Region", CustomFieldType::Text, false)]);
        let dup = def("region", "Region again", CustomFieldType::Text, false);
        assert!(schema.insert(dup).await.is_err());
    }

    #[tokio::test]
    async fn label_falls_back_to_name_when_definition_is_gone() {
        let schema = FieldSchema::new(vec![]);
        assert_eq!(schema.label_for(EntityKind::Lead, "legacy").await, "legacy");
    }
}
