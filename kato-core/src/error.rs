use std::collections::BTreeMap;

/// Result type alias for pattern engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the pattern engine
///
/// Every variant carries enough structure to produce a stable error
/// code and a context map for the caller; internal stack traces are
/// never embedded in messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        context: BTreeMap<String, String>,
    },

    #[error("Too few symbols in working memory: {count} (minimum 2)")]
    TooFewSymbols { count: usize },

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("Session expired: {session_id}")]
    SessionExpired { session_id: String },

    #[error("Deadline exceeded during {operation}")]
    DeadlineExceeded { operation: &'static str },

    #[error("Pattern corpus unavailable: {message}")]
    CorpusUnavailable { message: String },

    #[error("Vector backend error (retriable: {retriable}): {message}")]
    VectorBackend { retriable: bool, message: String },

    #[error("Computation error in {metric}: {message}")]
    Computation {
        metric: &'static str,
        message: String,
    },

    #[error("Session write contention exceeded retry budget: {session_id}")]
    Conflict { session_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convenience constructor for shape/validation failures without context
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Validation failure with a context map
    pub fn invalid_input_with(
        message: impl Into<String>,
        context: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Error::InvalidInput {
            message: message.into(),
            context: context.into_iter().collect(),
        }
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput { .. } => "invalid_input",
            Error::TooFewSymbols { .. } => "too_few_symbols",
            Error::NotFound { .. } => "not_found",
            Error::SessionExpired { .. } => "session_expired",
            Error::DeadlineExceeded { .. } => "deadline_exceeded",
            Error::CorpusUnavailable { .. } => "corpus_unavailable",
            Error::VectorBackend { .. } => "vector_backend",
            Error::Computation { .. } => "computation_error",
            Error::Conflict { .. } => "conflict",
            Error::Serialization(_) => "serialization",
            Error::Storage(_) => "storage",
            Error::Io(_) => "io",
        }
    }

    /// Context map attached to this error
    pub fn context(&self) -> BTreeMap<String, String> {
        let mut ctx = BTreeMap::new();
        match self {
            Error::InvalidInput { context, .. } => return context.clone(),
            Error::TooFewSymbols { count } => {
                ctx.insert("count".to_string(), count.to_string());
                ctx.insert("minimum".to_string(), "2".to_string());
            }
            Error::NotFound { kind, key } => {
                ctx.insert("kind".to_string(), (*kind).to_string());
                ctx.insert("key".to_string(), key.clone());
            }
            Error::SessionExpired { session_id } | Error::Conflict { session_id } => {
                ctx.insert("session_id".to_string(), session_id.clone());
            }
            Error::DeadlineExceeded { operation } => {
                ctx.insert("operation".to_string(), (*operation).to_string());
            }
            Error::VectorBackend { retriable, .. } => {
                ctx.insert("retriable".to_string(), retriable.to_string());
            }
            Error::Computation { metric, .. } => {
                ctx.insert("metric".to_string(), (*metric).to_string());
            }
            Error::CorpusUnavailable { .. }
            | Error::Serialization(_)
            | Error::Storage(_)
            | Error::Io(_) => {}
        }
        ctx
    }

    /// Check if this error is recoverable (can retry with backoff)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::InvalidInput { .. } => false,
            Error::TooFewSymbols { .. } => false,
            Error::NotFound { .. } => false,
            Error::SessionExpired { .. } => false,
            Error::DeadlineExceeded { .. } => false,
            Error::CorpusUnavailable { .. } => true,
            Error::VectorBackend { retriable, .. } => *retriable,
            Error::Computation { .. } => false,
            Error::Conflict { .. } => true,
            Error::Serialization(_) => false,
            Error::Storage(_) => true,
            Error::Io(_) => true,
        }
    }
}
