//! Heuristic worked/failed classification of runner output.
//!
//! The runner collaborator returns free text with no structured success
//! contract, so this is best-effort pattern matching: an explicit runner
//! error prefix, authentication-failure phrases, or generic error tokens mark
//! a step as failed. Anything else counts as worked. Deliberately small —
//! backends that can report `{ok, detail}` should do that instead of growing
//! this list.

/// Prefix runners use for their own error reports.
pub const RUNNER_ERROR_PREFIX: &str = "Runner:";

/// True if the result text looks like success.
pub fn result_worked(result: &str) -> bool {
    let r = result.trim();
    if r.is_empty() {
        return false;
    }
    if r.starts_with(RUNNER_ERROR_PREFIX) {
        return false;
    }
    let lower = r.to_lowercase();
    if lower.contains("invalid api key") || lower.contains("please run /login") {
        return false;
    }
    if lower.contains("error:") || lower.contains("failed:") {
        return false;
    }
    true
}

/// Truncate to `max_chars`, appending an ellipsis when shortened.
pub fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_owned();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_output_is_worked() {
        assert!(result_worked("Opened the page and extracted 12 leads."));
    }

    #[test]
    fn empty_output_is_failed() {
        assert!(!result_worked(""));
        assert!(!result_worked("   \n"));
    }

    #[test]
    fn runner_prefix_is_failed() {
        assert!(!result_worked("Runner: command exited with status 1"));
    }

    #[test]
    fn auth_failures_are_failed() {
        assert!(!result_worked("Invalid API key provided"));
        assert!(!result_worked("please run /login to authenticate"));
    }

    #[test]
    fn generic_error_tokens_are_failed() {
        assert!(!result_worked("error: connection refused"));
        assert!(!result_worked("Step failed: missing selector"));
    }

    #[test]
    fn error_word_without_colon_is_worked() {
        // Only the token forms count; prose mentioning errors does not.
        assert!(result_worked("Checked the error budget dashboard, all green."));
    }

    #[test]
    fn truncate_bounds_length() {
        assert_eq!(truncate("short", 10), "short");
        let long = "x".repeat(20);
        let t = truncate(&long, 10);
        assert_eq!(t, format!("{}...", "x".repeat(10)));
    }
}
