//! Prompts sent to the text-completion collaborator.

use serde_json::json;
use std::fmt::Write as _;

use crate::collaborators::{Candidate, Circulation, HeaderField, Scenario, Subject};
use crate::extract::truncate_chars;
use crate::metadata::{FieldMetadataModel, LinkageRule};
use crate::{EngineConfig, GeneratedRecord};

pub(crate) fn scenario_prompt(
    subject: &Subject,
    scenarios: &[Scenario],
    config: &EngineConfig,
) -> String {
    let listed: Vec<_> = scenarios
        .iter()
        .map(|s| {
            json!({
                "code": s.code,
                "name": s.name,
                "description": truncate_chars(&s.description, config.candidate_description_limit),
                "business_line": s.business_line,
                "channel": s.channel,
                "module": s.module,
            })
        })
        .collect();

    format!(
        "You are a test automation expert. Pick the scenario that best fits this test case.\n\n\
         Test case:\n\
         Title: {}\n\
         Description: {}\n\
         Business line: {}\n\n\
         Scenarios:\n{}\n\n\
         Reply with the scenario code only.",
        truncate_chars(&subject.title, config.subject_text_limit),
        truncate_chars(&subject.description, config.subject_text_limit),
        subject.business_line,
        serde_json::Value::Array(listed),
    )
}

pub(crate) fn template_prompt(
    subject: &Subject,
    candidates: &[Candidate],
    config: &EngineConfig,
) -> String {
    let listed: Vec<_> = candidates
        .iter()
        .enumerate()
        .map(|(index, c)| {
            json!({
                "index": index,
                "id": c.id,
                "name": c.name,
                "description": truncate_chars(&c.description, config.candidate_description_limit),
            })
        })
        .collect();

    format!(
        "You are a test automation expert. Pick the template that best fits this test case.\n\n\
         Test case:\n\
         Title: {}\n\
         Description: {}\n\n\
         Templates:\n{}\n\n\
         Reply with the template id only.",
        truncate_chars(&subject.title, config.subject_text_limit),
        truncate_chars(&subject.description, config.subject_text_limit),
        serde_json::Value::Array(listed),
    )
}

/// Inputs to the data-generation prompt.
pub(crate) struct GenerationPrompt<'a> {
    pub subject: &'a Subject,
    pub header_fields: &'a [HeaderField],
    pub metadata: Option<&'a FieldMetadataModel>,
    pub linkage_rules: &'a [LinkageRule],
    pub circulation: &'a [Circulation],
    pub example: Option<&'a GeneratedRecord>,
    pub feedback: Option<&'a str>,
    pub attempt: u32,
}

impl GenerationPrompt<'_> {
    pub(crate) fn render(&self, config: &EngineConfig) -> String {
        let mut out = String::from(
            "You are a test automation expert. Generate test data rows for the test case below.\n\n",
        );

        let s = self.subject;
        let _ = writeln!(out, "Test case:");
        let _ = writeln!(out, "Title: {}", truncate_chars(&s.title, config.subject_text_limit));
        let _ = writeln!(
            out,
            "Description: {}",
            truncate_chars(&s.description, config.subject_text_limit)
        );
        for (label, value) in [
            ("Preconditions", &s.preconditions),
            ("Steps", &s.test_steps),
            ("Expected result", &s.expected_result),
        ] {
            if !value.is_empty() {
                let _ = writeln!(out, "{label}: {}", truncate_chars(value, config.subject_text_limit));
            }
        }

        // Enum lists of fields whose triggers the example row does not meet
        // are dropped.
        let filtered = match (self.metadata, self.example) {
            (Some(model), Some(example)) => Some(model.filter_enums_by_context(&example.values)),
            _ => None,
        };
        let metadata = filtered.as_ref().or(self.metadata);

        let _ = writeln!(out, "\nFields:");
        for header in self.header_fields {
            let field = metadata.and_then(|m| m.find_field(&header.field_id));
            let label = if header.display_name.is_empty() {
                &header.field_id
            } else {
                &header.display_name
            };
            let _ = write!(out, "- {} ({})", header.field_id, label);
            if let Some(field) = field {
                if field.required {
                    let _ = write!(out, " [required]");
                }
                if !field.enum_values.is_empty() {
                    let values: Vec<String> = field
                        .enum_values
                        .iter()
                        .map(|e| format!("{}={}", e.value, e.label))
                        .collect();
                    let _ = write!(out, " one of: {}", values.join(", "));
                }
            }
            out.push('\n');
        }

        if !self.linkage_rules.is_empty() {
            let _ = writeln!(out, "\nLinkage rules:");
            for rule in self.linkage_rules {
                let _ = writeln!(out, "- {rule}");
            }
        }

        if !self.circulation.is_empty() {
            let groups: Vec<String> = self.circulation.iter().map(Circulation::tag).collect();
            let _ = writeln!(out, "\nVariable groups: {}", groups.join(", "));
        }

        if let Some(example) = self.example {
            if let Ok(example) = serde_json::to_string(example) {
                let _ = writeln!(out, "\nExample row:\n{example}");
            }
        }

        if let Some(feedback) = self.feedback.filter(|f| !f.trim().is_empty()) {
            let _ = writeln!(
                out,
                "\nA reviewer rejected the previous attempt ({}): {feedback}",
                self.attempt
            );
        }

        out.push_str(
            "\nReply with a JSON array. Each element has \"case_description\", \
             \"values\" (field id to string value), \"expected_outcome\" and \
             \"should_execute\". Use only the allowed values for enumerated fields.",
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DependencyAction, FieldDefinition, FieldDependency};

    fn subject() -> Subject {
        Subject {
            title: "Monthly premium payment".to_string(),
            description: "Pay the premium monthly".to_string(),
            ..Subject::default()
        }
    }

    #[test]
    fn test_scenario_prompt_lists_codes() {
        let prompt = scenario_prompt(
            &subject(),
            &[Scenario::new("S01", "Payments"), Scenario::new("S02", "Claims")],
            &EngineConfig::default(),
        );
        assert!(prompt.contains("Monthly premium payment"));
        assert!(prompt.contains("\"S01\""));
        assert!(prompt.contains("\"S02\""));
    }

    #[test]
    fn test_template_prompt_truncates_descriptions() {
        let mut candidate = Candidate::new("7", "tpl");
        candidate.description = "x".repeat(300);
        let config = EngineConfig {
            candidate_description_limit: 10,
            ..EngineConfig::default()
        };
        let prompt = template_prompt(&subject(), &[candidate], &config);
        assert!(prompt.contains(&format!("{}...", "x".repeat(10))));
        assert!(!prompt.contains(&"x".repeat(11)));
    }

    #[test]
    fn test_generation_prompt_includes_constraints_and_feedback() {
        let model = FieldMetadataModel::new(
            "s",
            vec![FieldDefinition::new("plan", "Plan")
                .required()
                .with_enum("A", "Basic")],
        );
        let headers = vec![HeaderField::new("plan", "Plan")];
        let rules = model.linkage_rules();
        let subject = subject();
        let prompt = GenerationPrompt {
            subject: &subject,
            header_fields: &headers,
            metadata: Some(&model),
            linkage_rules: &rules,
            circulation: &[],
            example: None,
            feedback: Some("use plan A"),
            attempt: 1,
        }
        .render(&EngineConfig::default());

        assert!(prompt.contains("- plan (Plan) [required] one of: A=Basic"));
        assert!(prompt.contains("use plan A"));
        assert!(prompt.contains("JSON array"));
    }

    #[test]
    fn test_generation_prompt_drops_enums_with_unmet_triggers() {
        let model = FieldMetadataModel::new(
            "s",
            vec![
                FieldDefinition::new("payType", "Payment type")
                    .with_enum("1", "Annual")
                    .with_enum("2", "Monthly"),
                FieldDefinition::new("installments", "Installments")
                    .with_enum("12", "Twelve")
                    .with_field_dependency(FieldDependency {
                        trigger_field: "payType".to_string(),
                        trigger_value: "2".to_string(),
                        action: DependencyAction::Show,
                    }),
            ],
        );
        let headers = vec![
            HeaderField::new("payType", "Payment type"),
            HeaderField::new("installments", "Installments"),
        ];
        let subject = subject();
        let render = |example: &GeneratedRecord| {
            GenerationPrompt {
                subject: &subject,
                header_fields: &headers,
                metadata: Some(&model),
                linkage_rules: &[],
                circulation: &[],
                example: Some(example),
                feedback: None,
                attempt: 0,
            }
            .render(&EngineConfig::default())
        };

        let annual = render(&GeneratedRecord::new("row").with_value("payType", "1"));
        assert!(annual.contains("- payType (Payment type) one of: 1=Annual, 2=Monthly"));
        assert!(!annual.contains("12=Twelve"));

        let monthly = render(&GeneratedRecord::new("row").with_value("payType", "2"));
        assert!(monthly.contains("- installments (Installments) one of: 12=Twelve"));
    }
}
