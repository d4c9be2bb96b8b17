use std::path::PathBuf;

use thiserror::Error;

use crate::model::NumericIdentity;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Numeric identity space exhausted")]
    AllocationExhausted,

    #[error("Cluster-wide allocation unavailable: {0}")]
    ScopeUnavailable(String),

    #[error("Unknown identity: {0}")]
    NotFound(NumericIdentity),

    #[error("No identity checkpoint at {0}")]
    CheckpointUnavailable(PathBuf),

    #[error("Identity checkpoint unreadable: {0}")]
    CheckpointCorrupt(String),

    #[error("Local node address not yet known")]
    NodeIdentityUnresolvable,

    #[error("Identity allocator is shut down")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
