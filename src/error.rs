//! Error types for relaypick.

use thiserror::Error;

/// Exit codes for the pick subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Normal exit
    Success = 0,
    /// No relay candidates supplied
    NoCandidates = 10,
    /// Every candidate probe failed
    AllUnavailable = 11,
    /// Pick deadline elapsed before any candidate succeeded
    DeadlineExceeded = 12,
    /// Pick cancelled by the caller
    Cancelled = 13,
    /// TLS configuration or verification failed
    TlsFailed = 14,
    /// Configuration or IO error
    ConfigFailed = 15,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Failure cause recorded for a single candidate probe.
///
/// A successful probe never appears here; once a probe succeeds the pick
/// is decided and no aggregate is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("cancelled")]
    Cancelled,
}

/// Aggregate of every candidate's failure cause, ordered by candidate
/// input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateError {
    failures: Vec<(String, ProbeFailure)>,
}

impl AggregateError {
    /// Creates an aggregate from `(address, cause)` pairs in candidate
    /// input order.
    pub fn new(failures: Vec<(String, ProbeFailure)>) -> Self {
        Self { failures }
    }

    /// Returns the per-candidate failures in candidate input order.
    pub fn failures(&self) -> &[(String, ProbeFailure)] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (address, cause)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", address, cause)?;
        }
        Ok(())
    }
}

/// Main error type for relaypick.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no relay candidates supplied")]
    NoCandidates,

    #[error("all relay candidates unavailable: {0}")]
    AllUnavailable(AggregateError),

    #[error("pick deadline exceeded")]
    DeadlineExceeded,

    #[error("pick cancelled")]
    Cancelled,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::NoCandidates => ExitCode::NoCandidates,
            Error::AllUnavailable(_) => ExitCode::AllUnavailable,
            Error::DeadlineExceeded => ExitCode::DeadlineExceeded,
            Error::Cancelled => ExitCode::Cancelled,
            Error::Tls(_) => ExitCode::TlsFailed,
            Error::Config(_) => ExitCode::ConfigFailed,
            Error::Io(_) => ExitCode::ConfigFailed,
        }
    }
}

/// Result type alias for relaypick operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_display_preserves_candidate_order() {
        let agg = AggregateError::new(vec![
            (
                "rel://a.example".to_string(),
                ProbeFailure::Unreachable("dial failed".to_string()),
            ),
            (
                "rel://b.example".to_string(),
                ProbeFailure::Unauthorized("token rejected".to_string()),
            ),
        ]);
        assert_eq!(
            agg.to_string(),
            "rel://a.example: unreachable: dial failed; rel://b.example: unauthorized: token rejected"
        );
    }

    #[test]
    fn all_unavailable_exit_code() {
        let err = Error::AllUnavailable(AggregateError::new(vec![(
            "rel://a.example".to_string(),
            ProbeFailure::Cancelled,
        )]));
        assert_eq!(err.exit_code(), ExitCode::AllUnavailable);
    }

    #[test]
    fn cancellation_exit_codes_are_distinct() {
        assert_ne!(
            Error::Cancelled.exit_code(),
            Error::DeadlineExceeded.exit_code()
        );
    }

    #[test]
    fn no_candidates_display_names_cause() {
        assert!(Error::NoCandidates
            .to_string()
            .contains("no relay candidates"));
    }
}
