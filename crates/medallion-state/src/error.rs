//! Layer store error types.

/// Errors produced by [`LayerStore`](crate::LayerStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying storage engine failure, tagged with the operation.
    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("layer store lock poisoned")]
    LockPoisoned,

    /// A persisted value could not be decoded into its model type.
    #[error("corrupt value in {column}: '{value}'")]
    Corrupt { column: &'static str, value: String },
}

impl StateError {
    /// Wrap a backend error without operation context.
    pub fn backend<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            context: "layer store".to_string(),
            source: Box::new(source),
        }
    }

    /// Wrap a backend error, naming the operation that failed.
    pub fn backend_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn corrupt(column: &'static str, value: impl Into<String>) -> Self {
        Self::Corrupt {
            column,
            value: value.into(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
