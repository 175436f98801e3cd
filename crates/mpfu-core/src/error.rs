//! Upload error type shared by every adapter and the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised upload error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadError {
    pub kind: UploadErrorKind,
    pub message: String,
    /// Rendered descriptor of the destination the error belongs to, if any.
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UploadErrorKind {
    /// A destination line does not match the expected field layout.
    MalformedDescriptor,
    /// Base directory or file pattern cannot be resolved.
    InvalidLocalPath,
    /// Credentials rejected, or every authentication method failed.
    Authentication,
    /// Host unreachable, DNS failure, handshake failure or connect timeout.
    Connect,
    /// Server-side rejection (permission denied, missing bucket, missing share).
    Protocol,
    /// No ambient object-storage credentials could be found.
    CredentialResolution,
    /// Local I/O or stream failure while a file was in flight.
    Transfer,
    /// Configuration file missing or invalid.
    Config,
}

impl UploadErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MalformedDescriptor => "MalformedDescriptor",
            Self::InvalidLocalPath => "InvalidLocalPath",
            Self::Authentication => "AuthenticationError",
            Self::Connect => "ConnectError",
            Self::Protocol => "ProtocolError",
            Self::CredentialResolution => "CredentialResolutionError",
            Self::Transfer => "TransferError",
            Self::Config => "ConfigError",
        }
    }
}

impl fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

// ── Construction helpers ─────────────────────────────────────────────

impl UploadError {
    pub fn new(kind: UploadErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            destination: None,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(UploadErrorKind::MalformedDescriptor, msg)
    }

    pub fn invalid_local_path(msg: impl Into<String>) -> Self {
        Self::new(UploadErrorKind::InvalidLocalPath, msg)
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::new(UploadErrorKind::Authentication, msg)
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::new(UploadErrorKind::Connect, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(UploadErrorKind::Protocol, msg)
    }

    pub fn credential_resolution(msg: impl Into<String>) -> Self {
        Self::new(UploadErrorKind::CredentialResolution, msg)
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::new(UploadErrorKind::Transfer, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(UploadErrorKind::Config, msg)
    }

    pub fn is_authentication(&self) -> bool {
        self.kind == UploadErrorKind::Authentication
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Some(dest) => write!(f, "[{}] {}: {}", self.kind, dest, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset => Self::connect(e.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::protocol(e.to_string()),
            _ => Self::transfer(e.to_string()),
        }
    }
}
