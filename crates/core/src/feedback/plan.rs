//! Parsing for the feedback collaborator's outputs: the per-batch failure
//! classification plan and the proposal-mode instruction lines. Both degrade
//! to empty on parse failure — a feedback cycle never raises over bad JSON.

use serde::Deserialize;

/// How a failure should be addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackAction {
    /// A practical tool/skill can be added so this succeeds next time.
    BuildTool,
    /// Needs a human (credentials, approvals, unclear requirements).
    HumanTodo,
}

impl FeedbackAction {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "build_tool" => Some(Self::BuildTool),
            "human_todo" => Some(Self::HumanTodo),
            _ => None,
        }
    }
}

/// One classified failure from the plan.
#[derive(Debug, Clone)]
pub struct FeedbackItem {
    pub action: FeedbackAction,
    pub step_preview: String,
    pub error_preview: String,
    pub tool_name: String,
    pub tool_description: String,
    pub tool_constraint: String,
    pub human_task: String,
    pub human_reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackPlan {
    pub summary: String,
    pub items: Vec<FeedbackItem>,
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(default)]
    action: String,
    #[serde(default)]
    step_preview: String,
    #[serde(default)]
    error_preview: String,
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    tool_description: String,
    #[serde(default)]
    tool_constraint: String,
    #[serde(default)]
    human_task: String,
    #[serde(default)]
    human_reason: String,
}

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

/// Parse the classification plan. Items with an unknown action are dropped.
pub fn parse_plan(raw: &str) -> FeedbackPlan {
    let Some(json) = extract_json(raw) else {
        tracing::warn!("feedback plan JSON missing, returning empty plan");
        return FeedbackPlan::default();
    };
    let Ok(parsed) = serde_json::from_str::<RawPlan>(json) else {
        tracing::warn!("feedback plan JSON parse failed, returning empty plan");
        return FeedbackPlan::default();
    };

    let items = parsed
        .items
        .into_iter()
        .filter_map(|raw| {
            let action = FeedbackAction::parse(&raw.action)?;
            Some(FeedbackItem {
                action,
                step_preview: raw.step_preview,
                error_preview: raw.error_preview,
                tool_name: raw.tool_name,
                tool_description: raw.tool_description,
                tool_constraint: raw.tool_constraint,
                human_task: raw.human_task,
                human_reason: raw.human_reason,
            })
        })
        .collect();

    FeedbackPlan { summary: parsed.summary, items }
}

/// Parse capability-proposal output into instruction lines.
///
/// The expected shape is one instruction per line, each prefixed
/// "Do this first:" / "Do this next:". Unprefixed non-empty lines are taken
/// as-is so a sloppy collaborator still yields proposals; the result is
/// capped at 5.
pub fn parse_instruction_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let stripped = line
                .strip_prefix("Do this first:")
                .or_else(|| line.strip_prefix("Do this next:"))
                .unwrap_or(line)
                .trim();
            (!stripped.is_empty()).then(|| stripped.to_owned())
        })
        .take(5)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_plan() {
        let raw = r#"{
            "summary": "Two steps failed for lack of tooling.",
            "items": [
                {"action": "build_tool", "step_preview": "scrape listings", "error_preview": "no scraper",
                 "tool_name": "list-scraper", "tool_description": "Scrapes list pages.", "tool_constraint": "Public pages only."},
                {"action": "human_todo", "step_preview": "send from corp account", "error_preview": "no credentials",
                 "human_task": "Provision SMTP credentials", "human_reason": "Secrets need a human."},
                {"action": "shrug", "step_preview": "x", "error_preview": "y"}
            ]
        }"#;
        let plan = parse_plan(raw);
        assert_eq!(plan.items.len(), 2);
        assert_eq!(plan.items[0].action, FeedbackAction::BuildTool);
        assert_eq!(plan.items[0].tool_name, "list-scraper");
        assert_eq!(plan.items[1].action, FeedbackAction::HumanTodo);
        assert!(plan.summary.contains("failed"));
    }

    #[test]
    fn fenced_plan_parses() {
        let raw = "```json\n{\"summary\": \"s\", \"items\": []}\n```";
        let plan = parse_plan(raw);
        assert_eq!(plan.summary, "s");
    }

    #[test]
    fn garbage_degrades_to_empty_plan() {
        let plan = parse_plan("I could not produce JSON, sorry");
        assert!(plan.summary.is_empty());
        assert!(plan.items.is_empty());
    }

    #[test]
    fn instruction_lines_strip_prefixes_and_cap() {
        let raw = "Do this first: Build a scraper tool\nDo this next: Add an email sender\n\nDo this next: a\nDo this next: b\nDo this next: c\nDo this next: d";
        let lines = parse_instruction_lines(raw);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Build a scraper tool");
        assert_eq!(lines[1], "Add an email sender");
    }

    #[test]
    fn unprefixed_lines_survive() {
        let lines = parse_instruction_lines("Build the thing\n");
        assert_eq!(lines, vec!["Build the thing".to_string()]);
    }
}
