//! FTP implementation of the core adapter traits.

use crate::ftp::session::FtpSession;
use async_trait::async_trait;
use mpfu_core::config::FtpSettings;
use mpfu_core::{
    Credential, DestinationDescriptor, FileProgress, Protocol, ProtocolAdapter, TransferSession,
    UploadError, UploadResult,
};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct FtpAdapter {
    settings: FtpSettings,
    chunk_size: usize,
}

impl FtpAdapter {
    pub fn new(settings: FtpSettings, chunk_size: usize) -> Self {
        Self {
            settings,
            chunk_size,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for FtpAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    async fn connect(
        &self,
        descriptor: &DestinationDescriptor,
        credential: &Credential,
    ) -> UploadResult<Box<dyn TransferSession>> {
        let password = match credential {
            Credential::Password(p) => p.as_str(),
            other => {
                return Err(UploadError::authentication(format!(
                    "FTP needs a password credential, got {:?}",
                    other
                )))
            }
        };
        let session = FtpSession::connect(
            &descriptor.host,
            &descriptor.user,
            password,
            &descriptor.remote_path,
            &self.settings,
            self.chunk_size.max(1),
        )
        .await?;
        Ok(Box::new(FtpTransfer { session }))
    }
}

struct FtpTransfer {
    session: FtpSession,
}

#[async_trait]
impl TransferSession for FtpTransfer {
    fn location(&self) -> String {
        self.session.location()
    }

    async fn transfer_one(
        &mut self,
        local: &Path,
        remote_name: &str,
        progress: &mut FileProgress<'_>,
    ) -> UploadResult<u64> {
        Ok(self.session.store(local, remote_name, progress).await?)
    }

    async fn close(self: Box<Self>) -> UploadResult<()> {
        Ok(self.session.quit().await?)
    }
}
