//! Firmware status codes and their mapping onto [`ErrorKind`].

use std::fmt;

use crate::error::{PipelineError, Result};

/// Raw status returned by every firmware command.
///
/// The numbering follows the firmware headers; anything the firmware
/// invents later is still representable and maps to [`ErrorKind::Unknown`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub u32);

impl Status {
    pub const SUCCESS: Self = Self(0);
    pub const ENOMEM: Self = Self(1);
    pub const ENOSPC: Self = Self(2);
    pub const EINVAL: Self = Self(3);
    pub const ENOSYS: Self = Self(4);
    pub const ENOENT: Self = Self(5);
    pub const ENXIO: Self = Self(6);
    pub const EIO: Self = Self(7);
    pub const ESPIPE: Self = Self(8);
    pub const ECORRUPT: Self = Self(9);
    pub const ENOTREADY: Self = Self(10);
    pub const ECONFIG: Self = Self(11);
    pub const EISCONN: Self = Self(12);
    pub const ENOTCONN: Self = Self(13);
    pub const EAGAIN: Self = Self(14);
    pub const EFAULT: Self = Self(15);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn kind(self) -> ErrorKind {
        match self {
            Self::ENOMEM => ErrorKind::OutOfMemory,
            Self::ENOSPC => ErrorKind::OutOfResources,
            Self::EINVAL => ErrorKind::InvalidArgument,
            Self::ENOSYS => ErrorKind::NotImplemented,
            Self::ENOENT | Self::ENXIO => ErrorKind::NotFound,
            Self::EIO | Self::ESPIPE | Self::ECORRUPT => ErrorKind::IoError,
            Self::ENOTREADY => ErrorKind::NotReady,
            Self::ECONFIG => ErrorKind::NotConfigured,
            Self::EISCONN => ErrorKind::AlreadyConnected,
            Self::ENOTCONN => ErrorKind::NotConnected,
            Self::EAGAIN => ErrorKind::TemporarilyUnavailable,
            Self::EFAULT => ErrorKind::BadAddress,
            _ => ErrorKind::Unknown,
        }
    }

    /// The firmware's own description of the status.
    pub fn message(self) -> &'static str {
        match self {
            Self::SUCCESS => "Success",
            Self::ENOMEM => "Out of memory",
            Self::ENOSPC => "Out of resources (other than memory)",
            Self::EINVAL => "Argument is invalid",
            Self::ENOSYS => "Function not implemented",
            Self::ENOENT => "No such file or directory",
            Self::ENXIO => "No such device or address",
            Self::EIO => "I/O error",
            Self::ESPIPE => "Illegal seek",
            Self::ECORRUPT => "Data is corrupt",
            Self::ENOTREADY => "Component is not ready",
            Self::ECONFIG => "Component is not configured",
            Self::EISCONN => "Port is already connected",
            Self::ENOTCONN => "Port is disconnected",
            Self::EAGAIN => "Resource temporarily unavailable; try again later",
            Self::EFAULT => "Bad address",
            _ => "Unknown status error",
        }
    }

    /// Fails with a [`PipelineError::Status`] unless the status is
    /// [`Status::SUCCESS`]. `context` names the operation that produced it.
    pub fn check(self, context: &str) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(PipelineError::from_status(self, context))
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({}: {})", self.0, self.message())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for Status {}

/// Domain error taxonomy shared by firmware failures and local checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    OutOfMemory,
    OutOfResources,
    InvalidArgument,
    NotImplemented,
    NotFound,
    IoError,
    NotReady,
    NotConfigured,
    AlreadyConnected,
    NotConnected,
    TemporarilyUnavailable,
    BadAddress,
    Unknown,
}

/// Raw result of a firmware command.
pub type FwResult<T> = std::result::Result<T, Status>;

/// Attaches an operation description to a raw firmware result.
pub trait StatusExt<T> {
    fn context(self, context: &str) -> Result<T>;
}

impl<T> StatusExt<T> for FwResult<T> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|status| PipelineError::from_status(status, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_passes_check() {
        assert!(Status::SUCCESS.check("enable port").is_ok());
    }

    #[test]
    fn failure_carries_kind_and_context() {
        let err = Status::EISCONN.check("connect preview").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyConnected);
        assert_eq!(err.to_string(), "connect preview: Port is already connected");
    }

    #[test]
    fn posix_aliases_collapse() {
        assert_eq!(Status::ENXIO.kind(), ErrorKind::NotFound);
        assert_eq!(Status::ESPIPE.kind(), ErrorKind::IoError);
        assert_eq!(Status::ECORRUPT.kind(), ErrorKind::IoError);
    }

    #[test]
    fn unmapped_codes_are_unknown() {
        let status = Status(0x4000);
        assert_eq!(status.kind(), ErrorKind::Unknown);
        assert_eq!(status.message(), "Unknown status error");
    }

    #[test]
    fn raw_results_gain_context() {
        let raw: FwResult<u32> = Err(Status::ENOMEM);
        let err = raw.context("create pool").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    }
}
