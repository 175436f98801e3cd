//! Protocol adapter seam.
//!
//! Each protocol implements [`ProtocolAdapter`] (how to open a session) and
//! [`TransferSession`] (how to push one file through it). The orchestrator
//! selects the adapter with an exhaustive match over [`Protocol`] through an
//! [`AdapterRegistry`].

use crate::descriptor::{DestinationDescriptor, Protocol};
use crate::error::{UploadError, UploadResult};
use crate::progress::FileProgress;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

/// Credential handed to [`ProtocolAdapter::connect`]. Each protocol keeps its
/// native credential shape.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Key material available locally (agent, identity files).
    KeyBased,
    Password(String),
    /// Ambient environment credentials (object storage).
    Ambient,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyBased => f.write_str("KeyBased"),
            Self::Password(_) => f.write_str("Password(***)"),
            Self::Ambient => f.write_str("Ambient"),
        }
    }
}

/// How an adapter expects to be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Key material first, then a single password attempt.
    KeyThenPassword,
    /// Password only (FTP, SMB).
    Password,
    /// Environment-derived credentials.
    Ambient,
}

impl AuthMode {
    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Sftp | Protocol::Scp => Self::KeyThenPassword,
            Protocol::Ftp | Protocol::Smb => Self::Password,
            Protocol::ObjectStorage => Self::Ambient,
        }
    }
}

#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn auth_mode(&self) -> AuthMode {
        AuthMode::for_protocol(self.protocol())
    }

    /// Open a live session for one destination. Authentication rejections
    /// must come back as `Authentication` errors so the resolver can fall
    /// back to a password.
    async fn connect(
        &self,
        descriptor: &DestinationDescriptor,
        credential: &Credential,
    ) -> UploadResult<Box<dyn TransferSession>>;
}

/// One live connection scoped to one destination.
#[async_trait]
pub trait TransferSession: Send {
    /// Remote location shown in "Sending ..." lines.
    fn location(&self) -> String;

    /// Upload `local` as `remote_name` inside the destination directory and
    /// return the number of bytes sent.
    async fn transfer_one(
        &mut self,
        local: &Path,
        remote_name: &str,
        progress: &mut FileProgress<'_>,
    ) -> UploadResult<u64>;

    /// Create a remote directory. `Ok(false)` when it already exists.
    async fn make_dir(&mut self, remote_path: &str) -> UploadResult<bool> {
        Err(UploadError::protocol(format!(
            "cannot create '{}': directory creation is not supported by this protocol",
            remote_path
        )))
    }

    /// Upload `local` to an explicit remote path (directory mode).
    async fn transfer_to(
        &mut self,
        local: &Path,
        remote_path: &str,
        progress: &mut FileProgress<'_>,
    ) -> UploadResult<u64> {
        let _ = (local, progress);
        Err(UploadError::protocol(format!(
            "cannot write '{}': explicit remote paths are not supported by this protocol",
            remote_path
        )))
    }

    async fn close(self: Box<Self>) -> UploadResult<()>;
}

/// Lookup from protocol to adapter.
pub trait AdapterRegistry: Send + Sync {
    fn adapter(&self, protocol: Protocol) -> &dyn ProtocolAdapter;
}
