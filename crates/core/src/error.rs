// crates/core/src/error.rs
use thiserror::Error;

/// A job id that failed the UUID format gate.
///
/// Carries the rejected input so callers can log it; it is never echoed back
/// to remote clients verbatim by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job id: {input:?}")]
pub struct InvalidJobId {
    pub input: String,
}

impl InvalidJobId {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Failure reported by an item work function.
///
/// Recorded as an error `ItemResult`; it never aborts sibling items.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WorkError {
    message: String,
}

impl WorkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for WorkError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for WorkError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for WorkError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Unknown status or outcome string read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_job_id_display() {
        let err = InvalidJobId::new("not-a-uuid");
        assert_eq!(err.to_string(), "invalid job id: \"not-a-uuid\"");
    }

    #[test]
    fn test_work_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: WorkError = io.into();
        assert_eq!(err.message(), "no such file");
    }
}
