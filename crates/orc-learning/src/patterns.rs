use orc_types::FailurePattern;

/// Extract coarse [`FailurePattern`]s from a failed task's combined
/// output and review feedback, for the learning store to aggregate
/// across attempts. Keyword-based rather than the full regex table
/// `orc-classify` uses: this only needs a rough bucket for trend
/// analysis, not an actionable suggestion.
#[must_use]
pub fn extract_failure_patterns(output: &str, review_feedback: Option<&str>) -> Vec<FailurePattern> {
    let haystack = match review_feedback {
        Some(feedback) => format!("{output}\n{feedback}"),
        None => output.to_string(),
    };
    let haystack = haystack.to_lowercase();

    let mut patterns = Vec::new();

    if haystack.contains("timed out") || haystack.contains("timeout") || haystack.contains("deadline exceeded") {
        patterns.push(FailurePattern::Timeout);
    }
    if haystack.contains("permission denied") || haystack.contains("access denied") {
        patterns.push(FailurePattern::PermissionError);
    }
    if haystack.contains("cannot find")
        || haystack.contains("no such file")
        || haystack.contains("module not found")
        || haystack.contains("unresolved import")
    {
        patterns.push(FailurePattern::DependencyMissing);
    }
    if haystack.contains("test result: failed") || haystack.contains("assertion failed") || haystack.contains("test failed")
    {
        patterns.push(FailurePattern::TestFailure);
    }
    if haystack.contains("error[e") || haystack.contains("compile error") || haystack.contains("syntax error") {
        patterns.push(FailurePattern::CompilationError);
    }

    if patterns.is_empty() {
        patterns.push(FailurePattern::RuntimeError);
    }

    patterns
}
