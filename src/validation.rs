//! Constraint validation of generated records.
//!
//! [`Validator`] checks [`GeneratedRecord`]s against a
//! [`FieldMetadataModel`]. It is pure: no I/O, inputs are only read.
//! Per record the checks run in a fixed order:
//!
//! 1. enum values
//! 2. enum-triggered linkage (required / must-be-empty fields)
//! 3. field-triggered linkage (`show` dependencies on required fields)
//! 4. static required fields
//! 5. unknown fields (warnings only)
//!
//! A record is valid iff checks 1-4 produced no errors.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metadata::{DependencyAction, EnumValue, FieldDefinition, FieldDependency, FieldMetadataModel};
use crate::GeneratedRecord;

/// Default number of example values quoted in an enum suggestion.
pub const DEFAULT_SUGGESTION_LIMIT: usize = 5;

/// What kind of constraint a record broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// Value is not one of the field's enum values.
    EnumInvalid,
    /// A linkage rule requires this field and it is empty.
    LinkageRequired,
    /// A linkage rule hides this field and it has a value.
    LinkageHide,
    /// A statically required field is empty.
    Required,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EnumInvalid => "enum_invalid",
            Self::LinkageRequired => "linkage_required",
            Self::LinkageHide => "linkage_hide",
            Self::Required => "required",
        };
        f.write_str(s)
    }
}

/// One broken constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// The offending field.
    pub field_id: String,
    /// Its label.
    pub display_name: String,
    /// The constraint broken.
    pub kind: ValidationErrorKind,
    /// Human-readable explanation.
    pub message: String,
    /// The value found, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// What to do about it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Every allowed value, for `enum_invalid`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_values: Vec<String>,
    /// Number of allowed values, for `enum_invalid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_value_count: Option<usize>,
    /// The field that triggered a linkage error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_field: Option<String>,
    /// The value that triggered it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_value: Option<String>,
}

impl ValidationError {
    fn new(field: FieldRef<'_>, kind: ValidationErrorKind, message: String) -> Self {
        Self {
            field_id: field.id.to_string(),
            display_name: field.label.to_string(),
            kind,
            message,
            value: None,
            suggestion: None,
            valid_values: Vec::new(),
            valid_value_count: None,
            trigger_field: None,
            trigger_value: None,
        }
    }

    fn triggered_by(mut self, field: &str, value: &str) -> Self {
        self.trigger_field = Some(field.to_string());
        self.trigger_value = Some(value.to_string());
        self
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Non-blocking finding kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationWarningKind {
    /// The record sets a field the schema does not define.
    UnknownField,
    /// The record has no values at all.
    EmptyRecord,
}

/// A finding that never affects validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    /// The field concerned, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    /// What was noticed.
    pub kind: ValidationWarningKind,
    /// Human-readable explanation.
    pub message: String,
}

/// Validation outcome for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordValidation {
    /// Position in the validated batch.
    pub index: usize,
    /// The record's description, for display.
    pub case_description: String,
    /// True iff `errors` is empty.
    pub is_valid: bool,
    /// Errors in check order.
    pub errors: Vec<ValidationError>,
    /// Warnings in check order.
    pub warnings: Vec<ValidationWarning>,
}

/// Validation outcome for a batch of records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Records checked.
    pub total: usize,
    /// Records without errors.
    pub valid_count: usize,
    /// Records with errors.
    pub invalid_count: usize,
    /// Sum of all records' errors.
    pub total_errors: usize,
    /// False when the schema was unavailable and nothing was checked.
    pub metadata_available: bool,
    /// Per-record results in input order.
    pub results: Vec<RecordValidation>,
}

impl ValidationReport {
    fn from_results(results: Vec<RecordValidation>, metadata_available: bool) -> Self {
        let valid_count = results.iter().filter(|r| r.is_valid).count();
        Self {
            total: results.len(),
            valid_count,
            invalid_count: results.len() - valid_count,
            total_errors: results.iter().map(|r| r.errors.len()).sum(),
            metadata_available,
            results,
        }
    }

    /// The report for records that could not be checked because the scene
    /// schema is unavailable. Every record counts as valid.
    pub fn skipped(records: &[GeneratedRecord]) -> Self {
        let results = records
            .iter()
            .enumerate()
            .map(|(index, record)| RecordValidation {
                index,
                case_description: describe(index, record),
                is_valid: true,
                errors: Vec::new(),
                warnings: Vec::new(),
            })
            .collect();
        Self::from_results(results, false)
    }

    /// True when every record is valid.
    pub fn all_valid(&self) -> bool {
        self.invalid_count == 0
    }

    /// Every error across all records, in record order.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationError> {
        self.results.iter().flat_map(|r| r.errors.iter())
    }
}

/// Everything a reviewer or prompt needs to fill one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSuggestion {
    /// The field.
    pub field_id: String,
    /// Its label.
    pub display_name: String,
    /// Widget type hint.
    pub field_type: String,
    /// Static requirement flag.
    pub required: bool,
    /// Allowed values.
    pub enum_values: Vec<EnumValue>,
    /// Conditions that govern the field.
    pub field_dependencies: Vec<FieldDependency>,
    /// Free-text help.
    pub description: String,
}

#[derive(Clone, Copy)]
struct FieldRef<'a> {
    id: &'a str,
    label: &'a str,
}

/// Checks records against one scene's schema.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    model: &'a FieldMetadataModel,
    suggestion_limit: usize,
}

impl<'a> Validator<'a> {
    /// Creates a validator over `model`.
    pub fn new(model: &'a FieldMetadataModel) -> Self {
        Self {
            model,
            suggestion_limit: DEFAULT_SUGGESTION_LIMIT,
        }
    }

    /// Sets how many example values an `enum_invalid` suggestion quotes.
    pub fn with_suggestion_limit(mut self, limit: usize) -> Self {
        self.suggestion_limit = limit;
        self
    }

    /// Validates a batch. Records are independent and keep their order.
    pub fn validate_all(&self, records: &[GeneratedRecord]) -> ValidationReport {
        let results = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let mut result = self.validate(record);
                result.index = index;
                result.case_description = describe(index, record);
                result
            })
            .collect();
        ValidationReport::from_results(results, !self.model.is_empty())
    }

    /// Validates a single record.
    pub fn validate(&self, record: &GeneratedRecord) -> RecordValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if record.values.is_empty() {
            warnings.push(ValidationWarning {
                field_id: None,
                kind: ValidationWarningKind::EmptyRecord,
                message: "record has no field values".to_string(),
            });
        }

        self.check_enums(record, &mut errors);
        self.check_enum_linkage(record, &mut errors);
        self.check_field_linkage(record, &mut errors);
        self.check_required(record, &mut errors);
        self.check_unknown(record, &mut warnings);

        RecordValidation {
            index: 0,
            case_description: record.case_description.clone(),
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Describes how to fill `field_id`, or `None` for an unknown field.
    pub fn field_suggestions(&self, field_id: &str) -> Option<FieldSuggestion> {
        let field = self.model.find_field(field_id)?;
        Some(FieldSuggestion {
            field_id: field.field_id.clone(),
            display_name: field.label().to_string(),
            field_type: field.field_type.clone().unwrap_or_else(|| "text".to_string()),
            required: field.required,
            enum_values: field.enum_values.clone(),
            field_dependencies: field.field_dependencies.clone(),
            description: field.description.clone(),
        })
    }

    fn field_ref<'b>(&'b self, field_id: &'b str) -> FieldRef<'b> {
        let label = self
            .model
            .find_field(field_id)
            .map(FieldDefinition::label)
            .unwrap_or(field_id);
        FieldRef {
            id: field_id,
            label,
        }
    }

    fn check_enums(&self, record: &GeneratedRecord, errors: &mut Vec<ValidationError>) {
        for (field_id, value) in &record.values {
            if value.is_empty() {
                continue;
            }
            let Some(field) = self.model.find_field(field_id) else {
                continue;
            };
            if field.accepts(value) {
                continue;
            }

            let valid: Vec<String> = field.enum_values.iter().map(|e| e.value.clone()).collect();
            let examples = valid
                .iter()
                .take(self.suggestion_limit)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            let suggestion = if valid.len() > self.suggestion_limit {
                format!("choose one of: {examples}... ({} options)", valid.len())
            } else {
                format!("choose one of: {examples}")
            };

            let mut error = ValidationError::new(
                self.field_ref(field_id),
                ValidationErrorKind::EnumInvalid,
                format!("value '{value}' is not an allowed value"),
            )
            .suggest(suggestion);
            error.value = Some(value.clone());
            error.valid_value_count = Some(valid.len());
            error.valid_values = valid;
            errors.push(error);
        }
    }

    fn check_enum_linkage(&self, record: &GeneratedRecord, errors: &mut Vec<ValidationError>) {
        for field in &self.model.fields {
            let Some(current) = record.value(&field.field_id) else {
                continue;
            };
            for dep in field
                .enum_dependencies
                .iter()
                .filter(|dep| dep.enum_value == current)
            {
                for required in &dep.required_fields {
                    if record.value(required).is_none() {
                        errors.push(
                            ValidationError::new(
                                self.field_ref(required),
                                ValidationErrorKind::LinkageRequired,
                                format!("required when {} = {current}", field.label()),
                            )
                            .suggest("fill in a valid value")
                            .triggered_by(&field.field_id, current),
                        );
                    }
                }
                for hidden in &dep.hide_fields {
                    if let Some(value) = record.value(hidden) {
                        let mut error = ValidationError::new(
                            self.field_ref(hidden),
                            ValidationErrorKind::LinkageHide,
                            format!("must be empty when {} = {current}", field.label()),
                        )
                        .suggest("clear this field")
                        .triggered_by(&field.field_id, current);
                        error.value = Some(value.to_string());
                        errors.push(error);
                    }
                }
            }
        }
    }

    fn check_field_linkage(&self, record: &GeneratedRecord, errors: &mut Vec<ValidationError>) {
        for field in &self.model.fields {
            if !field.required || record.value(&field.field_id).is_some() {
                continue;
            }
            for dep in &field.field_dependencies {
                if dep.action != DependencyAction::Show {
                    continue;
                }
                if record.values.get(&dep.trigger_field) != Some(&dep.trigger_value) {
                    continue;
                }
                errors.push(
                    ValidationError::new(
                        self.field_ref(&field.field_id),
                        ValidationErrorKind::LinkageRequired,
                        format!(
                            "required when {} = {}",
                            self.field_ref(&dep.trigger_field).label,
                            dep.trigger_value
                        ),
                    )
                    .suggest("fill in a valid value")
                    .triggered_by(&dep.trigger_field, &dep.trigger_value),
                );
            }
        }
    }

    fn check_required(&self, record: &GeneratedRecord, errors: &mut Vec<ValidationError>) {
        for field in self.model.fields.iter().filter(|f| f.required) {
            if record.value(&field.field_id).is_none() {
                errors.push(
                    ValidationError::new(
                        self.field_ref(&field.field_id),
                        ValidationErrorKind::Required,
                        "required field is empty".to_string(),
                    )
                    .suggest("fill in a valid value"),
                );
            }
        }
    }

    fn check_unknown(&self, record: &GeneratedRecord, warnings: &mut Vec<ValidationWarning>) {
        for field_id in record.values.keys() {
            if self.model.find_field(field_id).is_none() {
                warnings.push(ValidationWarning {
                    field_id: Some(field_id.clone()),
                    kind: ValidationWarningKind::UnknownField,
                    message: format!("field '{field_id}' is not defined for this scene"),
                });
            }
        }
    }
}

fn describe(index: usize, record: &GeneratedRecord) -> String {
    if record.case_description.is_empty() {
        format!("record {}", index + 1)
    } else {
        record.case_description.clone()
    }
}
