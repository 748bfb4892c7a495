//! The ten default steps.
//!
//! [`default_steps`] returns them in execution order. Each can be replaced
//! individually through [`PipelineBuilder::step`](crate::PipelineBuilder::step).

mod artifact;
mod generate;
mod prompt;
mod review;
mod subject;
mod template;

pub use artifact::CreateArtifact;
pub use generate::GenerateData;
pub use review::{HumanReview, ValidateData};
pub use subject::{LoadDestinationConfig, LoadSubject, MatchTargetContext};
pub use template::{FetchCandidateTemplates, FetchTemplateDetail, SelectTemplate};

use std::sync::Arc;

use crate::extract::{extract_json_object, strip_code_fences};
use crate::Step;

/// The default implementation of every step, in execution order.
pub fn default_steps() -> Vec<Arc<dyn Step>> {
    vec![
        Arc::new(LoadSubject),
        Arc::new(MatchTargetContext),
        Arc::new(LoadDestinationConfig),
        Arc::new(FetchCandidateTemplates),
        Arc::new(SelectTemplate),
        Arc::new(FetchTemplateDetail),
        Arc::new(GenerateData),
        Arc::new(ValidateData),
        Arc::new(HumanReview),
        Arc::new(CreateArtifact),
    ]
}

/// Finds the item a completion reply names.
///
/// Accepts a bare key, a quoted key, a JSON object carrying the key under
/// `id`/`code`, or prose mentioning exactly one key.
pub(crate) fn match_reply<'a, T>(
    reply: &str,
    items: &'a [T],
    key: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    let body = strip_code_fences(reply);
    let bare = body.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`');
    if let Some(item) = items.iter().find(|item| key(*item) == bare) {
        return Some(item);
    }

    if let Ok(object) = extract_json_object::<serde_json::Value>(body) {
        for field in ["id", "code", "usercaseId", "scenario_code"] {
            if let Some(value) = object.get(field) {
                let wanted = crate::metadata::value_to_string(value);
                if let Some(item) = items.iter().find(|item| key(*item) == wanted) {
                    return Some(item);
                }
            }
        }
    }

    let mut mentioned = items
        .iter()
        .filter(|item| !key(*item).is_empty() && body.contains(key(*item)));
    match (mentioned.next(), mentioned.next()) {
        (Some(item), None) => Some(item),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes() -> Vec<String> {
        vec!["S01".to_string(), "S02".to_string(), "S10".to_string()]
    }

    #[test]
    fn test_default_steps_in_order() {
        let names: Vec<_> = default_steps().iter().map(|s| s.name()).collect();
        assert_eq!(names, crate::StepName::ALL.to_vec());
    }

    #[test]
    fn test_match_bare_and_quoted() {
        let items = codes();
        assert_eq!(match_reply("S02", &items, |s| s.as_str()).unwrap(), "S02");
        assert_eq!(match_reply(" \"S10\"\n", &items, |s| s.as_str()).unwrap(), "S10");
    }

    #[test]
    fn test_match_json_object() {
        let items = codes();
        let reply = "```json\n{\"code\": \"S01\"}\n```";
        assert_eq!(match_reply(reply, &items, |s| s.as_str()).unwrap(), "S01");
    }

    #[test]
    fn test_match_prose() {
        let items = codes();
        let reply = "The best match is S02 because it covers payments.";
        assert_eq!(match_reply(reply, &items, |s| s.as_str()).unwrap(), "S02");
    }

    #[test]
    fn test_ambiguous_or_unknown_reply() {
        let items = codes();
        assert!(match_reply("S01 or S02", &items, |s| s.as_str()).is_none());
        assert!(match_reply("no idea", &items, |s| s.as_str()).is_none());
    }
}
