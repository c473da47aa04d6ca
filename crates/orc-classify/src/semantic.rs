use async_trait::async_trait;
use orc_types::ErrorPattern;
use thiserror::Error;

/// Result of a semantic classification pass.
#[derive(Debug, Clone)]
pub struct SemanticClassification {
    /// Classified pattern.
    pub pattern: ErrorPattern,
    /// Classifier confidence in `[0.0, 1.0]`.
    pub confidence: f64,
}

/// Error returned by a [`SemanticInvoker`]. The transport and timeout
/// policy for the underlying call are left to the implementation; the
/// only contract the classifier relies on is that a failure here never
/// propagates past [`crate::ErrorClassifier::classify`].
#[derive(Debug, Error)]
#[error("semantic classification failed: {0}")]
pub struct SemanticError(pub String);

/// External collaborator that classifies raw output the regex table
/// could not match.
#[async_trait]
pub trait SemanticInvoker: Send + Sync {
    /// Classify `raw_output`, returning `Err` if the underlying call
    /// fails for any reason.
    async fn classify(&self, raw_output: &str) -> Result<SemanticClassification, SemanticError>;
}
