//! Error types for the speed test engine.
//!
//! [`SpeedTestError`] is returned to callers for anything that stops a run
//! before it starts (bad configuration, unreadable proxy list). Failures of
//! individual probes are [`ProbeError`]s and are recorded inside samples
//! instead of being propagated.

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Process exit codes of the command line tool.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    /// An HTTP client or another local resource could not be set up.
    pub const RESOURCE_ERROR: i32 = 2;
    /// Bad arguments, patterns that do not compile, unusable proxy list.
    pub const CONFIG_ERROR: i32 = 3;
    /// The test ran but failed a threshold or did not finish in time.
    pub const PARTIAL_FAILURE: i32 = 4;
    /// Stopped by the user.
    pub const CANCELLED: i32 = 5;
    pub const INTERNAL_ERROR: i32 = 99;
}

/// What stopped a run from starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A configuration value is out of range or malformed.
    Config,
    /// A filter or block expression does not compile.
    InvalidPattern,
    /// No proxy endpoint survived selection and direct fallback is off.
    NoProxyAvailable,
    /// The proxy list could not be read or downloaded.
    Io,
    /// An HTTP client could not be built.
    Resource,
    /// A background task died.
    Internal,
}

impl ErrorKind {
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Config
            | ErrorKind::InvalidPattern
            | ErrorKind::NoProxyAvailable
            | ErrorKind::Io => exit_codes::CONFIG_ERROR,
            ErrorKind::Resource => exit_codes::RESOURCE_ERROR,
            ErrorKind::Internal => exit_codes::INTERNAL_ERROR,
        }
    }

    /// Short label used as the prefix of the error display.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Config => "Invalid configuration",
            ErrorKind::InvalidPattern => "Invalid pattern",
            ErrorKind::NoProxyAvailable => "No proxy available",
            ErrorKind::Io => "Cannot load proxy list",
            ErrorKind::Resource => "Resource unavailable",
            ErrorKind::Internal => "Internal error",
        }
    }

    /// Whether this kind belongs to the configuration family, which is
    /// always reported before any probe runs.
    pub fn is_configuration(&self) -> bool {
        self.exit_code() == exit_codes::CONFIG_ERROR
    }
}

/// An error that keeps a run from producing a result.
///
/// Carries a message for the user, an optional hint on how to fix it and
/// the underlying error when there is one.
#[derive(Debug)]
pub struct SpeedTestError {
    pub kind: ErrorKind,
    pub message: String,
    pub suggestion: Option<String>,
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl SpeedTestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), suggestion: None, source: None }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// A filter or block expression that does not compile.
    pub fn invalid_pattern(
        field: &str,
        pattern: &str,
        source: regex::Error,
    ) -> Self {
        Self::new(
            ErrorKind::InvalidPattern,
            format!("{} pattern {:?} does not compile", field, pattern),
        )
        .with_suggestion("Check the regular expression syntax.")
        .with_source(source)
    }

    /// Selection admitted nothing out of `candidates`.
    pub fn no_proxy_available(candidates: usize) -> Self {
        Self::new(
            ErrorKind::NoProxyAvailable,
            format!("none of the {} candidate proxies was admitted", candidates),
        )
        .with_suggestion("Relax the filter pattern or the block pattern.")
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, message).with_source(source)
    }
}

impl fmt::Display for SpeedTestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl Error for SpeedTestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<url::ParseError> for SpeedTestError {
    fn from(error: url::ParseError) -> Self {
        Self::config(format!("invalid URL: {}", error)).with_source(error)
    }
}

impl From<serde_json::Error> for SpeedTestError {
    fn from(error: serde_json::Error) -> Self {
        Self::config(format!("malformed JSON: {}", error)).with_source(error)
    }
}

/// Result type used across the engine.
pub type Result<T> = std::result::Result<T, SpeedTestError>;

/// Failure of a single probe.
///
/// These never abort a run; the orchestrator and the monitor turn them into
/// failed samples.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    /// The probe did not finish within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The target (or the proxy in front of it) could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// A transfer ended before the requested number of bytes moved.
    #[error("short transfer: {received} of {expected} bytes")]
    ShortTransfer {
        /// Bytes that were requested.
        expected: u64,
        /// Bytes that actually moved.
        received: u64,
    },
    /// The server answered with an error status.
    #[error("server returned status {0}")]
    Status(u16),
    /// The network resource for the probe could not be set up.
    #[error("resource unavailable: {0}")]
    Resource(String),
    /// The probe was cancelled by its run.
    #[error("cancelled")]
    Cancelled,
}

impl ProbeError {
    /// Stable machine-readable code used in serialized samples.
    pub fn code(&self) -> &'static str {
        match self {
            ProbeError::Timeout(_) => "timeout",
            ProbeError::Unreachable(_) => "unreachable",
            ProbeError::ShortTransfer { .. } => "short_transfer",
            ProbeError::Status(_) => "status",
            ProbeError::Resource(_) => "resource",
            ProbeError::Cancelled => "cancelled",
        }
    }

    /// Map a reqwest failure onto the probe taxonomy.
    pub fn from_reqwest(error: &reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            ProbeError::Timeout(timeout)
        } else if error.is_builder() {
            ProbeError::Resource(error.to_string())
        } else if let Some(status) = error.status() {
            ProbeError::Status(status.as_u16())
        } else {
            ProbeError::Unreachable(flatten_error(error))
        }
    }
}

/// Join an error and its sources into a single line.
fn flatten_error(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Render an error for the terminal: the error, then each cause, then the
/// suggestion.
pub fn format_error_for_display(error: &SpeedTestError) -> String {
    let mut output = format!("Error: {}", error);

    let mut cause = error.source();
    while let Some(inner) = cause {
        output.push_str(&format!("\n  caused by: {}", inner));
        cause = inner.source();
    }

    if let Some(ref suggestion) = error.suggestion {
        output.push_str(&format!("\n\n{}", suggestion));
    }

    output
}
