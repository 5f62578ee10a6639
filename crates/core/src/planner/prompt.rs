//! Prompt construction for the planner collaborator.

use convoy_llm::provider::ChatMessage;

use crate::types::Tool;

const PLAN_SYSTEM_TEMPLATE: &str = r#"You are an implementation planner. Given a single task and the available downstream agents/tools, output two lists in JSON:

1) next_tasks: 3-8 concrete, ordered implementation steps that the available agents CAN execute (use only the tools listed below).
2) blocked_tasks: any steps that CANNOT be carried out with current tools; for each give "task" (short description) and "reason" (why it cannot be done).

Available tools (only propose next_tasks that these can carry out):
{tools_context}

Output only a JSON object with this exact shape (no markdown, no code fence):
{"next_tasks": ["step 1", "step 2", ...], "blocked_tasks": [{"task": "short desc", "reason": "why blocked"}, ...]}
- If all steps are doable, blocked_tasks can be [].
- If nothing is doable with current tools, next_tasks can be [] and blocked_tasks must explain why."#;

/// Format the tool list as prompt context.
pub fn format_tools_for_prompt(tools: &[Tool]) -> String {
    if tools.is_empty() {
        return "No specific tools are configured; propose steps that could be executed by generic agents (browser, email, social, etc.).".to_owned();
    }
    let mut lines =
        vec!["Available downstream agents/tools (only propose steps that these can carry out):".to_owned()];
    for t in tools {
        lines.push(format!("- {}: {} Constraints: {}", t.name, t.description, t.constraints));
    }
    lines.join("\n")
}

/// Build the system + user messages for one planning call.
pub fn plan_messages(task: &str, topic: &str, tools: &[Tool]) -> Vec<ChatMessage> {
    let system = PLAN_SYSTEM_TEMPLATE.replace("{tools_context}", &format_tools_for_prompt(tools));
    let user = format!(
        "Task:\n{task}\n\nTopic: {topic}\n\nOutput JSON with next_tasks (steps the executor can run) and blocked_tasks (steps it cannot run yet)."
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tool_list_gets_generic_fallback() {
        let ctx = format_tools_for_prompt(&[]);
        assert!(ctx.contains("No specific tools"));
    }

    #[test]
    fn tools_render_one_line_each() {
        let tools = vec![
            Tool {
                name: "browser".into(),
                description: "Drives a browser.".into(),
                constraints: "No logins.".into(),
            },
            Tool {
                name: "email".into(),
                description: "Sends email.".into(),
                constraints: String::new(),
            },
        ];
        let ctx = format_tools_for_prompt(&tools);
        assert!(ctx.contains("- browser: Drives a browser. Constraints: No logins."));
        assert!(ctx.lines().count() >= 3);
    }

    #[test]
    fn plan_messages_carry_task_and_tools() {
        let msgs = plan_messages("Build X", "demo", &[]);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.contains("blocked_tasks"));
        assert!(msgs[1].content.contains("Build X"));
        assert!(msgs[1].content.contains("Topic: demo"));
    }
}
