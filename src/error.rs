//! Error types for probe operations.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`ProbeError`].
///
/// Callers branch on this instead of matching message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input rejected before any socket was touched.
    Validation,
    /// Socket or resource creation failed (commonly missing privileges).
    Setup,
    /// Send or non-timeout receive failure.
    Io,
    /// Budget exhausted without a reply, or connect did not finish in time.
    Timeout,
    /// The probe is not available on this platform.
    Unsupported,
    /// The caller cancelled the probe.
    Cancelled,
    /// Unexpected internal failure.
    Internal,
}

/// Main error type for probe operations.
#[derive(Error, Debug)]
pub enum ProbeError {
    // Validation errors
    #[error("invalid target {input:?}: expected an IP literal")]
    InvalidTarget { input: String },

    #[error("invalid port {input:?}")]
    InvalidPort { input: String },

    #[error("invalid timeout {0:?}: must be positive")]
    InvalidTimeout(Duration),

    // Socket errors
    #[error("{op}: {source}")]
    Setup {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{op}: timed out after {elapsed:?}")]
    Timeout { op: &'static str, elapsed: Duration },

    #[error("{op}: not supported on this platform")]
    Unsupported { op: &'static str },

    #[error("{op}: cancelled")]
    Cancelled { op: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProbeError {
    pub(crate) fn setup(op: &'static str, source: io::Error) -> Self {
        Self::Setup { op, source }
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }

    /// Returns the class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTarget { .. } | Self::InvalidPort { .. } | Self::InvalidTimeout(_) => {
                ErrorKind::Validation
            }
            Self::Setup { .. } => ErrorKind::Setup,
            Self::Io { .. } => ErrorKind::Io,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if another echo attempt may follow this error.
    ///
    /// Only timeouts qualify. Setup and I/O failures abort the probe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Name of the operation that failed, when the error carries one.
    pub fn op(&self) -> Option<&'static str> {
        match self {
            Self::Setup { op, .. }
            | Self::Io { op, .. }
            | Self::Timeout { op, .. }
            | Self::Unsupported { op }
            | Self::Cancelled { op } => Some(op),
            _ => None,
        }
    }
}

/// Returns true if `err` means a socket deadline elapsed.
pub(crate) fn is_deadline_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Result type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ProbeError::InvalidTarget {
                input: "example.com".into()
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ProbeError::InvalidTimeout(Duration::ZERO).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ProbeError::setup("listen", io::Error::from(io::ErrorKind::PermissionDenied)).kind(),
            ErrorKind::Setup
        );
        assert_eq!(
            ProbeError::io("dial", io::Error::from(io::ErrorKind::ConnectionRefused)).kind(),
            ErrorKind::Io
        );
        assert_eq!(
            ProbeError::Unsupported { op: "icmp echo" }.kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(
            ProbeError::Timeout {
                op: "read icmp message",
                elapsed: Duration::from_millis(1000)
            }
            .is_retryable()
        );
        assert!(!ProbeError::io("read icmp message", io::Error::other("boom")).is_retryable());
        assert!(!ProbeError::Cancelled { op: "icmp echo" }.is_retryable());
        assert!(!ProbeError::Internal("test".into()).is_retryable());
    }

    #[test]
    fn test_error_carries_operation() {
        let err = ProbeError::io("write icmp message", io::Error::other("no route"));
        assert_eq!(err.op(), Some("write icmp message"));
        assert_eq!(err.to_string(), "write icmp message: no route");
        assert_eq!(ProbeError::Internal("x".into()).op(), None);
    }

    #[test]
    fn test_deadline_errors() {
        assert!(is_deadline_error(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_deadline_error(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_deadline_error(&io::Error::from(
            io::ErrorKind::ConnectionRefused
        )));
    }
}
