//! Error-pattern classifier.
//!
//! Classifies a task's raw failure output against a closed table of
//! regex rules, first match wins. When no rule matches and a semantic
//! fallback invoker is configured, the output is handed to it; a
//! fallback invoker failure, or a result below the confidence floor,
//! is swallowed and classification silently returns `None` rather than
//! surfacing a secondary error, matching this component's
//! "classification never blocks execution" contract.

/// Semantic fallback results below this confidence are discarded
/// rather than reported — an unconfident guess is worse than no
/// classification at all.
const SEMANTIC_CONFIDENCE_FLOOR: f64 = 0.85;

mod patterns;
mod semantic;

pub use patterns::{ClassRule, DEFAULT_RULES};
pub use semantic::{SemanticClassification, SemanticError, SemanticInvoker};

use chrono::Utc;
use orc_types::{DetectedError, DetectionMethod, ErrorPattern};
use tracing::{debug, warn};

/// Classifies raw task output into an [`ErrorPattern`] category.
pub struct ErrorClassifier {
    rules: Vec<ClassRule>,
    semantic: Option<Box<dyn SemanticInvoker>>,
}

impl ErrorClassifier {
    /// Build a classifier with the default regex table and no semantic
    /// fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
            semantic: None,
        }
    }

    /// Attach a semantic fallback invoker, used only when no regex rule
    /// matches.
    #[must_use]
    pub fn with_semantic_fallback(mut self, invoker: Box<dyn SemanticInvoker>) -> Self {
        self.semantic = Some(invoker);
        self
    }

    /// Replace the regex table entirely (for tests or custom
    /// deployments that extend the defaults).
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<ClassRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Classify raw task output, trying the regex table first and the
    /// semantic fallback (if configured) only on a total miss.
    pub async fn classify(&self, raw_output: &str) -> Option<DetectedError> {
        for rule in &self.rules {
            if rule.regex.is_match(raw_output) {
                debug!(pattern = %rule.regex.as_str(), "error classified by regex");
                return Some(DetectedError {
                    pattern: rule.pattern.clone(),
                    method: DetectionMethod::Regex,
                    confidence: 1.0,
                    timestamp: Utc::now(),
                    raw_output: raw_output.to_string(),
                });
            }
        }

        let invoker = self.semantic.as_ref()?;
        match invoker.classify(raw_output).await {
            Ok(classification) if classification.confidence >= SEMANTIC_CONFIDENCE_FLOOR => Some(DetectedError {
                pattern: classification.pattern,
                method: DetectionMethod::Semantic,
                confidence: classification.confidence,
                timestamp: Utc::now(),
                raw_output: raw_output.to_string(),
            }),
            Ok(classification) => {
                debug!(
                    confidence = classification.confidence,
                    floor = SEMANTIC_CONFIDENCE_FLOOR,
                    "semantic classification below confidence floor; returning no match"
                );
                None
            }
            Err(error) => {
                warn!(%error, "semantic classification fallback failed; returning no match");
                None
            }
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
