//! The closed error taxonomy of §7, realized with `thiserror` — the
//! teacher declares `thiserror` in `Cargo.toml` but never calls it,
//! rolling its own `AppError` enum by hand instead. This crate puts the
//! dependency to the use its presence implies.

use aws_sdk_dynamodb::error::SdkError;

/// Errors surfaced by the `Transport` collaborator (§6), wrapped by
/// [`DynaQueryError::Transport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{operation} failed: {message}")]
    Service { operation: &'static str, message: String },
    #[error("{operation} timed out or was canceled")]
    Canceled { operation: &'static str },
    #[error("condition failed for {operation}")]
    ConditionFailed { operation: &'static str },
}

impl TransportError {
    pub fn from_sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> Self
    where
        E: std::fmt::Debug + aws_sdk_dynamodb::error::ProvideErrorMetadata,
        R: std::fmt::Debug,
    {
        tracing::error!("aws dynamodb sdk error during {operation}: {err:?}");
        if err.code() == Some("ConditionalCheckFailedException") {
            return TransportError::ConditionFailed { operation };
        }
        let message = err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{err:?}"));
        TransportError::Service { operation, message }
    }
}

/// The closed error taxonomy of §7. Every variant carries an operation
/// context so propagation never loses it.
#[derive(Debug, thiserror::Error)]
pub enum DynaQueryError {
    /// Invalid annotations on a user type; fatal at first descriptor build.
    #[error("metadata error for {entity}: {message}")]
    Metadata { entity: &'static str, message: String },

    /// Unrecognized method name, unknown property, or unsupported keyword.
    #[error("could not parse method name {method_name:?}: {message}")]
    Parse { method_name: String, message: String },

    /// Operator disallowed for the inferred plan (CONTAINS on a key,
    /// IgnoreCase, OR, two sort clauses, criteria spanning two GSIs, ...).
    #[error("unsupported operator for {operation}: {message}")]
    UnsupportedOperator { operation: &'static str, message: String },

    /// Multiple exact-match indexes; the caller must narrow the query.
    #[error("ambiguous index for entity {entity}: candidates {candidates:?}")]
    AmbiguousIndex {
        entity: &'static str,
        candidates: Vec<String>,
    },

    /// The chosen plan requires a Scan but the `scanEnabled` permission is false.
    #[error("scan required but not permitted for {operation}")]
    ScanNotPermitted { operation: &'static str },

    /// A condition failed on a version-annotated write.
    #[error("optimistic lock failed on {entity} ({key})")]
    OptimisticLockFailure { entity: &'static str, key: String },

    /// Batch-write retries exhausted.
    #[error("batch write failed after {attempts} attempts")]
    BatchWriteFailed {
        attempts: u32,
        cause: Option<String>,
    },

    /// An unrecognized backend error, wrapped from the transport.
    #[error("transport error during {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: TransportError,
    },
}
