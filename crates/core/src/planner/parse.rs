//! Tolerant parsing of the planner collaborator's twofold response.
//!
//! The expected payload is `{"next_tasks": [...], "blocked_tasks": [...]}`,
//! but collaborators wrap it in markdown fences or surrounding prose often
//! enough that parsing must degrade instead of fail: an unparseable response
//! becomes a single next step with no blocked items.

use serde::Deserialize;

use crate::types::BlockedItem;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPlan {
    pub next_steps: Vec<String>,
    pub blocked: Vec<BlockedItem>,
}

#[derive(Deserialize)]
struct TwofoldPayload {
    #[serde(default)]
    next_tasks: Vec<serde_json::Value>,
    #[serde(default)]
    blocked_tasks: Vec<serde_json::Value>,
}

/// Extract the JSON object from a raw response: fenced block first, then the
/// outermost brace span.
fn extract_json(text: &str) -> Option<&str> {
    if let Some(fence) = text.find("```") {
        let after = &text[fence + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse `next_tasks` and `blocked_tasks` from a collaborator response.
pub fn parse_twofold(raw: &str) -> ParsedPlan {
    let degraded = || {
        let trimmed = raw.trim();
        ParsedPlan {
            next_steps: if trimmed.is_empty() { vec![] } else { vec![trimmed.to_owned()] },
            blocked: vec![],
        }
    };

    let Some(json) = extract_json(raw) else {
        return degraded();
    };
    let Ok(payload) = serde_json::from_str::<TwofoldPayload>(json) else {
        return degraded();
    };

    let next_steps = payload
        .next_tasks
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => {
                let s = s.trim().to_owned();
                (!s.is_empty()).then_some(s)
            }
            _ => None,
        })
        .collect();

    let blocked = payload
        .blocked_tasks
        .into_iter()
        .filter_map(|v| {
            let obj = v.as_object()?;
            Some(BlockedItem {
                task: obj.get("task").and_then(|t| t.as_str()).unwrap_or_default().to_owned(),
                reason: obj.get("reason").and_then(|r| r.as_str()).unwrap_or_default().to_owned(),
            })
        })
        .collect();

    ParsedPlan { next_steps, blocked }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let raw = r#"{"next_tasks": ["do A", "do B"], "blocked_tasks": [{"task": "do C", "reason": "no tool"}]}"#;
        let plan = parse_twofold(raw);
        assert_eq!(plan.next_steps, vec!["do A".to_string(), "do B".to_string()]);
        assert_eq!(plan.blocked.len(), 1);
        assert_eq!(plan.blocked[0].reason, "no tool");
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "Here is the plan:\n```json\n{\"next_tasks\": [\"do A\"], \"blocked_tasks\": []}\n```\nDone.";
        let plan = parse_twofold(raw);
        assert_eq!(plan.next_steps, vec!["do A".to_string()]);
        assert!(plan.blocked.is_empty());
    }

    #[test]
    fn parses_json_with_surrounding_prose() {
        let raw = "Sure! {\"next_tasks\": [\"do A\"], \"blocked_tasks\": []} hope that helps";
        let plan = parse_twofold(raw);
        assert_eq!(plan.next_steps, vec!["do A".to_string()]);
    }

    #[test]
    fn degrades_to_single_step_on_garbage() {
        let plan = parse_twofold("just go do the thing");
        assert_eq!(plan.next_steps, vec!["just go do the thing".to_string()]);
        assert!(plan.blocked.is_empty());
    }

    #[test]
    fn degrades_to_empty_on_blank_response() {
        let plan = parse_twofold("   \n ");
        assert!(plan.next_steps.is_empty());
        assert!(plan.blocked.is_empty());
    }

    #[test]
    fn skips_empty_and_non_string_steps() {
        let raw = r#"{"next_tasks": ["do A", "", 42, "  "], "blocked_tasks": ["not an object"]}"#;
        let plan = parse_twofold(raw);
        assert_eq!(plan.next_steps, vec!["do A".to_string()]);
        assert!(plan.blocked.is_empty());
    }

    #[test]
    fn blocked_fields_default_to_empty() {
        let raw = r#"{"next_tasks": [], "blocked_tasks": [{"task": "x"}]}"#;
        let plan = parse_twofold(raw);
        assert_eq!(plan.blocked[0].task, "x");
        assert_eq!(plan.blocked[0].reason, "");
    }
}
