//! Error types for mkvs_db

use thiserror::Error;

/// Module name under which the numbered node database errors are registered.
pub const MODULE_NAME: &str = "storage/mkvs/db";

/// Result type alias for mkvs_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mkvs_db operations
///
/// Variants with a registry code (see [`Error::code`]) are part of the node database
/// contract and callers are expected to branch on them.
#[derive(Error, Debug)]
pub enum Error {
    #[error("mkvs: node not found in node db")]
    NodeNotFound,

    #[error("mkvs: write log not found in node db")]
    WriteLogNotFound,

    #[error("mkvs: version is not yet finalized")]
    NotFinalized,

    #[error("mkvs: version has already been finalized")]
    AlreadyFinalized,

    #[error("mkvs: version not found")]
    VersionNotFound,

    #[error("mkvs: previous version mismatch")]
    PreviousVersionMismatch,

    #[error("mkvs: version went backwards")]
    VersionWentBackwards,

    #[error("mkvs: root not found")]
    RootNotFound,

    #[error("mkvs: root must follow old root")]
    RootMustFollowOld,

    #[error("mkvs: bad namespace")]
    BadNamespace,

    #[error("mkvs: version is not the earliest version")]
    NotEarliest,

    #[error("mkvs: read-only database")]
    ReadOnly,

    #[error("mkvs: multipart already in progress")]
    MultipartInProgress,

    #[error("mkvs: operation called with different version than current multipart version")]
    InvalidMultipartVersion,

    #[error("mkvs: database upgrade in progress")]
    UpgradeInProgress,

    #[error("mkvs: cannot prune latest version")]
    CannotPruneLatestVersion,

    #[error("mkvs: malformed node")]
    MalformedNode,

    #[error("mkvs: malformed key")]
    MalformedKey,

    /// The caller broke an invariant that must hold before the call (e.g. extracting a
    /// dirty pointer). The current operation is aborted.
    #[error("mkvs: contract violation: {0}")]
    ContractViolation(&'static str),

    #[error("mkvs: operation cancelled")]
    Cancelled,

    #[error("mkvs: too many pending versions (max {max})")]
    PendingVersionsExceeded { max: u64 },

    #[error("mkvs: invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Format version mismatch: expected {expected}, found {found}")]
    FormatVersionMismatch { expected: u32, found: u32 },
}

impl Error {
    /// Stable registry code of this error within [`MODULE_NAME`], if it has one.
    pub fn code(&self) -> Option<u32> {
        let code = match self {
            Error::NodeNotFound => 1,
            Error::WriteLogNotFound => 2,
            Error::NotFinalized => 3,
            Error::AlreadyFinalized => 4,
            Error::VersionNotFound => 5,
            Error::PreviousVersionMismatch => 6,
            Error::VersionWentBackwards => 7,
            Error::RootNotFound => 8,
            Error::RootMustFollowOld => 9,
            Error::BadNamespace => 10,
            Error::NotEarliest => 11,
            Error::ReadOnly => 12,
            Error::MultipartInProgress => 13,
            Error::InvalidMultipartVersion => 14,
            Error::UpgradeInProgress => 15,
            Error::CannotPruneLatestVersion => 16,
            _ => return None,
        };
        Some(code)
    }

    /// Whether this error signals a broken caller invariant rather than a runtime condition.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::ContractViolation(_))
    }

    /// Whether this error belongs to the not-found family (node, write log, version, root).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NodeNotFound
                | Error::WriteLogNotFound
                | Error::VersionNotFound
                | Error::RootNotFound
        )
    }
}
