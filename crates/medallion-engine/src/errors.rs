//! Pipeline error model.

use medallion_state::StateError;
use medallion_types::{RawId, SourceLabel};

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Errors that abort a stage invocation.
///
/// Shape problems (bad header, wrong column count) and coercion fallbacks
/// are not errors: they are logged and recorded in the ledger instead.
/// Every variant here is fatal for the current invocation only; chunks
/// committed before the failure stay valid and the stage can be re-run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Persistence failure from the layer store.
    #[error(transparent)]
    State(#[from] StateError),

    /// A source could not be opened or its framing could not be decoded.
    #[error("source '{label}': {message}")]
    Source { label: String, message: String },

    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The aggregate watermark moved between reading a chunk and committing it.
    #[error("aggregate watermark moved past {expected}; another aggregator committed first")]
    WatermarkConflict { expected: RawId },
}

impl PipelineError {
    pub(crate) fn unreadable(label: &SourceLabel, message: impl std::fmt::Display) -> Self {
        Self::Source {
            label: label.to_string(),
            message: message.to_string(),
        }
    }

    /// Returns `true` for persistence-class failures (store errors and lost
    /// watermark races).
    #[must_use]
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::State(_) | Self::WatermarkConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_conflict_is_persistence_class() {
        let err = PipelineError::WatermarkConflict {
            expected: RawId::new(5),
        };
        assert!(err.is_persistence());
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn state_errors_convert_and_keep_message() {
        let err: PipelineError = StateError::LockPoisoned.into();
        assert!(err.is_persistence());
        assert_eq!(err.to_string(), "layer store lock poisoned");
    }

    #[test]
    fn source_errors_name_the_source() {
        let err = PipelineError::unreadable(&SourceLabel::new("a.csv"), "truncated quote");
        assert!(!err.is_persistence());
        assert_eq!(err.to_string(), "source 'a.csv': truncated quote");
    }
}
