//! Field definitions and the per-scene metadata model.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Renders a JSON scalar the way the automation platform compares values:
/// strings as-is, numbers and booleans in their JSON form, null as empty.
pub fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_to_string(&value))
}

pub(crate) fn lenient_vec<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One allowed value of an enumerated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    /// The value a record must carry, compared case-sensitively.
    #[serde(deserialize_with = "lenient_string")]
    pub value: String,

    /// Human label.
    #[serde(default, deserialize_with = "lenient_string")]
    pub label: String,
}

impl EnumValue {
    /// Creates an enum entry.
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// "When this field equals `enum_value`" rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumDependency {
    /// Triggering value of the owning field.
    #[serde(deserialize_with = "lenient_string")]
    pub enum_value: String,

    /// Fields that become visible. Informational only.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub show_fields: Vec<String>,

    /// Fields that must be empty.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub hide_fields: Vec<String>,

    /// Fields that must be non-empty.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub required_fields: Vec<String>,
}

/// What a field dependency does to its owning field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyAction {
    /// The owning field is shown (and enforced when required).
    #[default]
    Show,
    /// The owning field is hidden.
    Hide,
    /// Any action this crate does not interpret.
    #[serde(other)]
    Other,
}

impl fmt::Display for DependencyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Show => write!(f, "show"),
            Self::Hide => write!(f, "hide"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// "When `trigger_field` equals `trigger_value`" rule on the owning field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDependency {
    /// The field whose value triggers the rule.
    pub trigger_field: String,

    /// The value that triggers it.
    #[serde(default, deserialize_with = "lenient_string")]
    pub trigger_value: String,

    /// What happens to the owning field.
    #[serde(default)]
    pub action: DependencyAction,
}

/// One entry in a scene's schema.
///
/// Deserializes from the platform's shape (`row`, `rowName`, `enums`,
/// `enumDependencies`, `dependencies`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Stable key, unique within a scene.
    #[serde(alias = "row")]
    pub field_id: String,

    /// Human label; falls back to `field_id` when absent.
    #[serde(default, alias = "rowName")]
    pub display_name: String,

    /// Widget type hint (`text` when absent).
    #[serde(default, alias = "type")]
    pub field_type: Option<String>,

    /// Static requirement flag.
    #[serde(default)]
    pub required: bool,

    /// Allowed values, in display order.
    #[serde(default, alias = "enums", deserialize_with = "lenient_vec")]
    pub enum_values: Vec<EnumValue>,

    /// Rules triggered by this field's own value.
    #[serde(default, alias = "enumDependencies", deserialize_with = "lenient_vec")]
    pub enum_dependencies: Vec<EnumDependency>,

    /// Rules that make this field conditional on another field.
    #[serde(default, alias = "dependencies", deserialize_with = "lenient_vec")]
    pub field_dependencies: Vec<FieldDependency>,

    /// Free-text help.
    #[serde(default)]
    pub description: String,
}

impl FieldDefinition {
    /// Creates an optional text field.
    pub fn new(field_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    /// Marks the field statically required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Adds an allowed value.
    pub fn with_enum(mut self, value: impl Into<String>, label: impl Into<String>) -> Self {
        self.enum_values.push(EnumValue::new(value, label));
        self
    }

    /// Adds an enum-triggered dependency.
    pub fn with_enum_dependency(mut self, dependency: EnumDependency) -> Self {
        self.enum_dependencies.push(dependency);
        self
    }

    /// Adds a field-triggered dependency.
    pub fn with_field_dependency(mut self, dependency: FieldDependency) -> Self {
        self.field_dependencies.push(dependency);
        self
    }

    /// The label to show a human.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.field_id
        } else {
            &self.display_name
        }
    }

    /// Returns true if `value` is one of the allowed enum values.
    ///
    /// Fields without enum values accept everything.
    pub fn accepts(&self, value: &str) -> bool {
        self.enum_values.is_empty() || self.enum_values.iter().any(|e| e.value == value)
    }
}

/// A flattened linkage rule, used to describe a scene's constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkageRule {
    /// From a field's `enum_dependencies`.
    EnumTriggered {
        /// Owning field.
        field_id: String,
        /// Owning field label.
        display_name: String,
        /// Triggering value.
        when_value: String,
        /// Fields shown.
        show_fields: Vec<String>,
        /// Fields that must be empty.
        hide_fields: Vec<String>,
        /// Fields that must be filled.
        required_fields: Vec<String>,
    },
    /// From a field's `field_dependencies`.
    FieldTriggered {
        /// Owning field.
        field_id: String,
        /// Owning field label.
        display_name: String,
        /// Triggering field.
        trigger_field: String,
        /// Triggering value.
        trigger_value: String,
        /// Effect on the owning field.
        action: DependencyAction,
    },
}

impl LinkageRule {
    /// The field the rule is declared on.
    pub fn field_id(&self) -> &str {
        match self {
            Self::EnumTriggered { field_id, .. } | Self::FieldTriggered { field_id, .. } => {
                field_id
            }
        }
    }
}

impl fmt::Display for LinkageRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnumTriggered {
                display_name,
                when_value,
                hide_fields,
                required_fields,
                ..
            } => {
                write!(f, "when {display_name} = {when_value}")?;
                if !required_fields.is_empty() {
                    write!(f, ", required: {}", required_fields.join(", "))?;
                }
                if !hide_fields.is_empty() {
                    write!(f, ", must be empty: {}", hide_fields.join(", "))?;
                }
                Ok(())
            }
            Self::FieldTriggered {
                display_name,
                trigger_field,
                trigger_value,
                action,
                ..
            } => write!(
                f,
                "when {trigger_field} = {trigger_value}, {action} {display_name}"
            ),
        }
    }
}

/// One scene's schema.
///
/// An empty model is the degraded form used when the metadata source
/// failed; validation against it always passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadataModel {
    /// The scene this schema belongs to.
    #[serde(default)]
    pub scene_id: String,

    /// Field definitions, in platform order.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub fields: Vec<FieldDefinition>,
}

impl FieldMetadataModel {
    /// Creates a model from field definitions.
    pub fn new(scene_id: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            scene_id: scene_id.into(),
            fields,
        }
    }

    /// The degraded model for a scene whose schema is unavailable.
    pub fn empty(scene_id: impl Into<String>) -> Self {
        Self::new(scene_id, Vec::new())
    }

    /// Returns true when no field definitions are known.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Looks up a field by id.
    pub fn find_field(&self, field_id: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }

    /// Allowed values of a field; empty for unknown or free-text fields.
    pub fn enum_values(&self, field_id: &str) -> &[EnumValue] {
        self.find_field(field_id)
            .map(|f| f.enum_values.as_slice())
            .unwrap_or(&[])
    }

    /// Every field's dependencies flattened into one list, in field order.
    pub fn linkage_rules(&self) -> Vec<LinkageRule> {
        let mut rules = Vec::new();
        for field in &self.fields {
            for dep in &field.enum_dependencies {
                rules.push(LinkageRule::EnumTriggered {
                    field_id: field.field_id.clone(),
                    display_name: field.label().to_string(),
                    when_value: dep.enum_value.clone(),
                    show_fields: dep.show_fields.clone(),
                    hide_fields: dep.hide_fields.clone(),
                    required_fields: dep.required_fields.clone(),
                });
            }
            for dep in &field.field_dependencies {
                rules.push(LinkageRule::FieldTriggered {
                    field_id: field.field_id.clone(),
                    display_name: field.label().to_string(),
                    trigger_field: dep.trigger_field.clone(),
                    trigger_value: dep.trigger_value.clone(),
                    action: dep.action,
                });
            }
        }
        rules
    }

    /// Whether `field_id` must be filled given the other values in `context`:
    /// either statically required, or named in the `required_fields` of an
    /// enum dependency whose trigger value is currently selected.
    pub fn is_field_required(&self, field_id: &str, context: &BTreeMap<String, String>) -> bool {
        let Some(field) = self.find_field(field_id) else {
            return false;
        };
        if field.required {
            return true;
        }
        self.fields.iter().any(|other| {
            let Some(current) = context.get(&other.field_id).filter(|v| !v.is_empty()) else {
                return false;
            };
            other
                .enum_dependencies
                .iter()
                .filter(|dep| &dep.enum_value == current)
                .any(|dep| dep.required_fields.iter().any(|r| r == field_id))
        })
    }

    /// Returns a copy in which fields with unmet dependency triggers have
    /// their enum values cleared. Used to keep generation prompts small.
    ///
    /// An empty context returns the model unchanged.
    pub fn filter_enums_by_context(&self, context: &BTreeMap<String, String>) -> Self {
        let mut filtered = self.clone();
        if context.is_empty() {
            return filtered;
        }
        for field in &mut filtered.fields {
            if field.field_dependencies.is_empty() {
                continue;
            }
            let applicable = field
                .field_dependencies
                .iter()
                .any(|dep| context.get(&dep.trigger_field) == Some(&dep.trigger_value));
            if !applicable {
                field.enum_values.clear();
            }
        }
        filtered
    }
}
