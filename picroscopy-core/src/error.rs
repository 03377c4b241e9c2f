use thiserror::Error;

use crate::status::{ErrorKind, Status};

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A firmware command (or a local check that shares its taxonomy) failed.
    #[error("{context}: {message}")]
    Status {
        kind: ErrorKind,
        context: String,
        message: String,
    },

    /// A value outside the setting's domain, rejected before any firmware call.
    #[error("Invalid {setting} value: {reason}")]
    Validation {
        setting: &'static str,
        reason: String,
    },

    /// An invalid sequence of operations (double enable, capture after close, ...).
    #[error("{message}")]
    Runtime { kind: ErrorKind, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn from_status(status: Status, context: &str) -> Self {
        Self::Status {
            kind: status.kind(),
            context: context.to_string(),
            message: status.message().to_string(),
        }
    }

    pub fn status(kind: ErrorKind, context: &str, message: impl Into<String>) -> Self {
        Self::Status {
            kind,
            context: context.to_string(),
            message: message.into(),
        }
    }

    pub fn validation(setting: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            setting,
            reason: reason.into(),
        }
    }

    pub fn runtime(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Runtime {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Status { kind, .. } | Self::Runtime { kind, .. } => *kind,
            Self::Validation { .. } => ErrorKind::InvalidArgument,
            Self::Io(_) => ErrorKind::IoError,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, Self::Runtime { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_invalid_argument() {
        let err = PipelineError::validation("sharpness", "150 (valid range -100..100)");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Invalid sharpness value: 150 (valid range -100..100)"
        );
    }

    #[test]
    fn runtime_keeps_its_kind() {
        let err = PipelineError::runtime(ErrorKind::AlreadyConnected, "Preview is already running");
        assert!(err.is_runtime());
        assert_eq!(err.kind(), ErrorKind::AlreadyConnected);
    }
}
