use once_cell::sync::Lazy;
use orc_types::{ErrorCategory, ErrorPattern};
use regex::Regex;

/// One entry in the classifier's closed regex table.
#[derive(Clone)]
pub struct ClassRule {
    /// Compiled pattern matched against raw task output.
    pub regex: Regex,
    /// The `ErrorPattern` to report on a match.
    pub pattern: ErrorPattern,
}

fn rule(expr: &str, category: ErrorCategory, suggestion: &str, agent_can_fix: bool, human: bool) -> ClassRule {
    ClassRule {
        regex: Regex::new(&format!("(?i){expr}")).expect("built-in classifier pattern must compile"),
        pattern: ErrorPattern {
            category,
            suggestion: suggestion.to_string(),
            agent_can_fix,
            requires_human_intervention: human,
        },
    }
}

/// The classifier's built-in rule table, evaluated in declaration
/// order; the first matching rule wins. This is the closed set of
/// patterns this classifier recognizes — not meant to be extended ad
/// hoc, only replaced wholesale via [`ErrorClassifier::with_rules`].
///
/// [`ErrorClassifier::with_rules`]: crate::ErrorClassifier::with_rules
pub static DEFAULT_RULES: Lazy<Vec<ClassRule>> = Lazy::new(|| {
    vec![
        // Environment-level: the agent cannot fix these by editing code.
        rule(
            "multiple devices matched",
            ErrorCategory::EnvLevel,
            "Disambiguate the target device before retrying",
            false,
            true,
        ),
        rule(
            "command not found",
            ErrorCategory::EnvLevel,
            "Install or put the missing command on PATH in this environment",
            false,
            true,
        ),
        rule(
            "permission denied",
            ErrorCategory::EnvLevel,
            "Check file/directory permissions and process user",
            false,
            true,
        ),
        rule(
            "no space left on device",
            ErrorCategory::EnvLevel,
            "Free up disk space on the runner",
            false,
            true,
        ),
        // Plan-level: the task's own configuration is unrunnable as stated.
        rule(
            "no test bundles available",
            ErrorCategory::PlanLevel,
            "Build the test target before running it",
            false,
            true,
        ),
        rule(
            r"tests in the target .* can't be run",
            ErrorCategory::PlanLevel,
            "Check the test target's configuration in the plan",
            false,
            true,
        ),
        rule(
            r"no such file or directory.*test",
            ErrorCategory::PlanLevel,
            "Verify the referenced test path exists",
            false,
            true,
        ),
        rule(
            r"scheme .* does not exist",
            ErrorCategory::PlanLevel,
            "Fix the scheme name declared in the plan",
            false,
            true,
        ),
        rule(
            "could not find test host",
            ErrorCategory::PlanLevel,
            "Fix the test host configuration in the plan",
            false,
            true,
        ),
        // Code-level: the agent can fix these by editing code.
        rule(
            "undefined: |not defined|cannot find symbol",
            ErrorCategory::CodeLevel,
            "Fix the missing reference and retry",
            true,
            false,
        ),
        rule(
            r"syntax.?error|unexpected token",
            ErrorCategory::CodeLevel,
            "Fix the reported syntax error",
            true,
            false,
        ),
        rule(
            "type mismatch|cannot convert",
            ErrorCategory::CodeLevel,
            "Fix the reported type mismatch",
            true,
            false,
        ),
        rule(
            r"FAIL.*test.*failed",
            ErrorCategory::CodeLevel,
            "Inspect the failing test output and adjust the implementation",
            true,
            false,
        ),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_table_compiles_and_is_non_empty() {
        assert!(!DEFAULT_RULES.is_empty());
    }

    #[test]
    fn permission_denied_rule_matches_case_insensitively() {
        let matched = DEFAULT_RULES
            .iter()
            .find(|r| r.regex.is_match("Permission DENIED"))
            .expect("a rule should match");
        assert_eq!(matched.pattern.category, ErrorCategory::EnvLevel);
        assert!(!matched.pattern.agent_can_fix);
    }

    #[test]
    fn code_level_patterns_are_agent_fixable() {
        let matched = DEFAULT_RULES
            .iter()
            .find(|r| r.regex.is_match("undefined: foo"))
            .expect("a rule should match");
        assert_eq!(matched.pattern.category, ErrorCategory::CodeLevel);
        assert!(matched.pattern.agent_can_fix);
    }

    #[test]
    fn plan_level_scheme_pattern_matches() {
        let matched = DEFAULT_RULES
            .iter()
            .find(|r| r.regex.is_match("scheme \"App\" does not exist"))
            .expect("a rule should match");
        assert_eq!(matched.pattern.category, ErrorCategory::PlanLevel);
        assert!(!matched.pattern.agent_can_fix);
    }
}
