use thiserror::Error;

use crate::section::Section;

#[derive(Debug, Error)]
pub enum EkwError {
    #[error("malformed identifier '{0}': expected CODE/NUMBER/DIGIT")]
    MalformedIdentifier(String),

    #[error("anti-automation challenge did not clear within {0}s")]
    ChallengeTimeout(u64),

    #[error("record {0} not found")]
    RecordNotFound(String),

    #[error("export of section {section} failed: {reason}")]
    SectionExportFailure { section: Section, reason: String },

    #[error("incomplete section set: expected {expected} documents, got {got}")]
    IncompleteSectionSet { expected: usize, got: usize },

    #[error("input file {path} has no '{column}' column")]
    MissingColumn { column: String, path: String },

    #[error("navigation failed: {0}")]
    TransientNavigationFailure(String),

    #[error("cannot read input file: {0}")]
    Input(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EkwError {
    /// Errors that might go away on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EkwError::ChallengeTimeout(_) | EkwError::TransientNavigationFailure(_)
        )
    }

    /// Errors that mean a batch input cannot be interpreted at all.
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, EkwError::MissingColumn { .. } | EkwError::Input(_))
    }

    /// Wrap a browser-library error with the step it happened in.
    pub fn navigation(step: &str, err: impl std::fmt::Display) -> Self {
        EkwError::TransientNavigationFailure(format!("{}: {}", step, err))
    }
}

impl From<csv::Error> for EkwError {
    fn from(e: csv::Error) -> Self {
        EkwError::Input(e.to_string())
    }
}

// ── Tests ──
