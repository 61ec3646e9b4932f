use thiserror::Error;

/// Failure kinds surfaced by every vault operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed, empty or zero-valued input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced id or name does not exist.
    #[error("non-existent resource: {0}")]
    NonExistentResource(String),

    /// A name that must be unique is already taken.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// Metadata and the storage medium disagree, or a container cannot be opened.
    #[error("storage corrupted: {0}")]
    StorageCorrupted(String),

    /// The caller's view of a file's versions is stale.
    #[error("version conflict: claimed version {claimed} but last version is {actual}")]
    VersionConflict {
        /// Version the caller believed to be current.
        claimed: u32,
        /// Authoritative last version.
        actual: u32,
    },

    /// A version number outside `0..=last`.
    #[error("illegal version {requested}: last version is {last}")]
    IllegalVersion {
        /// Requested version.
        requested: u32,
        /// Authoritative last version.
        last: u32,
    },

    /// A structurally disallowed action.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The full-text index failed.
    #[error("index error: {0}")]
    Index(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn missing(what: &str, id: u64) -> Self {
        Error::NonExistentResource(format!("{what} {id}"))
    }

    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        Error::StorageCorrupted(msg.into())
    }

    /// True for failures the caller can fix by correcting input or refreshing state.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_)
                | Error::NonExistentResource(_)
                | Error::DuplicateName(_)
                | Error::VersionConflict { .. }
                | Error::IllegalVersion { .. }
                | Error::IllegalOperation(_)
        )
    }
}

/// Rejects the reserved id 0.
pub(crate) fn check_id(id: u64, what: &str) -> Result<()> {
    if id == 0 {
        return Err(Error::invalid(format!("{what} id must be non-zero")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds() {
        assert!(Error::VersionConflict { claimed: 0, actual: 1 }.is_recoverable());
        assert!(Error::invalid("x").is_recoverable());
        assert!(!Error::corrupted("gone").is_recoverable());
        assert!(!Error::Index("boom".into()).is_recoverable());
    }

    #[test]
    fn zero_id_rejected() {
        assert!(matches!(check_id(0, "file"), Err(Error::InvalidArgument(_))));
        assert!(check_id(7, "file").is_ok());
    }

    #[test]
    fn messages_name_versions() {
        let err = Error::VersionConflict { claimed: 0, actual: 2 };
        assert_eq!(
            err.to_string(),
            "version conflict: claimed version 0 but last version is 2"
        );
    }
}
