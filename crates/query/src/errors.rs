use thiserror::Error;

/// Query-scoped failures. Block-scoped problems never show up here; they
/// are absorbed by the executor and the affected region keeps its default
/// fill.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("query aborted")]
    Aborted,

    #[error("internal error: {0}")]
    Internal(String),
}
