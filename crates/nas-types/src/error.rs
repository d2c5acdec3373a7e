use thiserror::Error;

/// Errors produced by type construction and argument validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    /// Empty or otherwise unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No replica with this id or name is registered.
    #[error("unknown replica: {0}")]
    UnknownReplica(String),

    /// Two replicas share an id or a name.
    #[error("duplicate replica registration: {0}")]
    DuplicateReplica(String),

    /// Not a non-negative integer.
    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    /// A line without exactly one `##` separator or with an empty part.
    #[error("malformed checksum line: {0}")]
    InvalidChecksumLine(String),

    /// Not one of the admin-data store state names.
    #[error("unknown store state: {0}")]
    UnknownStoreState(String),
}

/// Reject an empty (or whitespace-only) string argument.
pub fn require_non_empty(value: &str, name: &str) -> Result<(), TypeError> {
    if value.trim().is_empty() {
        return Err(TypeError::InvalidArgument(format!(
            "{name} must not be empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_argument_rejected() {
        let err = require_non_empty("  ", "filename").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidArgument("filename must not be empty".into())
        );
        assert!(require_non_empty("a.arc", "filename").is_ok());
    }
}
