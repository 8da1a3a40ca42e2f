//! Error types for the scanjob library.
//!
//! Every failure the install and execution layers can produce is a
//! `ScanJobError` variant. Build-time errors are returned to the caller as-is;
//! per-scan failures are folded into the scan outcome instead.

use thiserror::Error;

/// The main error type for scanner installation and execution.
///
/// Variants carry owned messages so a failed installation can be cached and
/// handed to every later caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanJobError {
    /// Bad paths or settings the caller can fix.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// User-supplied install settings (such as a download URL) are invalid.
    #[error("invalid scanner install configuration: {message}")]
    DetectConfiguration {
        /// Description of what is wrong with the supplied value.
        message: String,
    },

    /// The server rejected the supplied credentials.
    #[error("authentication to '{endpoint}' failed: {reason}")]
    Authentication {
        /// Server or URL that rejected the credentials.
        endpoint: String,
        /// Reason reported by the transport.
        reason: String,
    },

    /// The transport failed; usually transient.
    #[error("network error talking to '{endpoint}': {message}")]
    Network {
        /// Server or URL being contacted.
        endpoint: String,
        /// Error message describing the failure.
        message: String,
    },

    /// Extraction or verification of the scanner failed.
    #[error("scanner installation failed: {reason}")]
    Install {
        /// Description of the failure.
        reason: String,
    },

    /// Credential material could not be decoded.
    #[error("credential material could not be decoded: {reason}")]
    Encryption {
        /// Description of the decoding failure.
        reason: String,
    },

    /// The scanner process could not be launched or supervised.
    #[error("failed to execute scanner: {reason}")]
    Execution {
        /// Description of the failure.
        reason: String,
    },
}

/// Coarse classification of a [`ScanJobError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`ScanJobError::Configuration`].
    Configuration,
    /// See [`ScanJobError::DetectConfiguration`].
    DetectConfiguration,
    /// See [`ScanJobError::Authentication`].
    Authentication,
    /// See [`ScanJobError::Network`].
    Network,
    /// See [`ScanJobError::Install`].
    Install,
    /// See [`ScanJobError::Encryption`].
    Encryption,
    /// See [`ScanJobError::Execution`].
    Execution,
}

impl ErrorKind {
    /// Short name used in logs and audit events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::DetectConfiguration => "detect_configuration",
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::Install => "install",
            Self::Encryption => "encryption",
            Self::Execution => "execution",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ScanJobError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::DetectConfiguration { .. } => ErrorKind::DetectConfiguration,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Network { .. } => ErrorKind::Network,
            Self::Install { .. } => ErrorKind::Install,
            Self::Encryption { .. } => ErrorKind::Encryption,
            Self::Execution { .. } => ErrorKind::Execution,
        }
    }

    /// Returns `true` if retrying the same operation might succeed.
    ///
    /// Only transport failures qualify. Whether to retry is left to the
    /// caller; nothing in this crate retries on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Returns `true` if the caller can fix this error by changing settings.
    pub fn is_user_fixable(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::DetectConfiguration { .. }
                | Self::Authentication { .. }
                | Self::Encryption { .. }
        )
    }

    /// Returns the endpoint if this error is associated with one.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Authentication { endpoint, .. } | Self::Network { endpoint, .. } => {
                Some(endpoint)
            }
            _ => None,
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a `DetectConfiguration` error.
    pub fn detect_configuration(message: impl Into<String>) -> Self {
        Self::DetectConfiguration {
            message: message.into(),
        }
    }

    /// Creates an `Authentication` error.
    pub fn authentication(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Authentication {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Network` error.
    pub fn network(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an `Install` error.
    pub fn install(reason: impl Into<String>) -> Self {
        Self::Install {
            reason: reason.into(),
        }
    }

    /// Creates an `Encryption` error.
    pub fn encryption(reason: impl Into<String>) -> Self {
        Self::Encryption {
            reason: reason.into(),
        }
    }

    /// Creates an `Execution` error.
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for scanjob operations.
pub type ScanJobResult<T> = Result<T, ScanJobError>;
