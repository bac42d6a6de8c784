use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    /// Record linkage does not match the chain invariants, or a record was
    /// read that is not in use.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// Caller violated the mutation API (mutate-after-delete, double delete,
    /// missing property key). The transaction stays alive and must be rolled
    /// back by the caller.
    #[error("illegal state: {0}")]
    State(String),
    /// Prepare/commit/rollback lifecycle violation. Fatal for the transaction.
    #[error("transaction lifecycle: {0}")]
    Tx(String),
    /// Failure from an underlying store or the label-scan writer. Fatal for
    /// the transaction; the engine must go through recovery.
    #[error("underlying storage: {0}")]
    Storage(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
