//! SMB implementation of the core adapter traits.

use crate::client::SmbClient;
use crate::unc::{Account, SharePath};
use async_trait::async_trait;
use log::info;
use mpfu_core::config::SmbSettings;
use mpfu_core::{
    Credential, DestinationDescriptor, FileProgress, Protocol, ProtocolAdapter, TransferSession,
    UploadError, UploadResult,
};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct SmbAdapter {
    settings: SmbSettings,
}

impl SmbAdapter {
    pub fn new(settings: SmbSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ProtocolAdapter for SmbAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Smb
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
                    "SMB needs a password credential, got {:?}",
                    other
                )))
            }
        };
        let share = SharePath::parse(&descriptor.remote_path)?;
        let client = SmbClient::new(
            &descriptor.host,
            share,
            Account::parse(&descriptor.user),
            password,
            self.settings.clone(),
        );
        client.probe().await?;
        info!("SMB share {} reachable", client.share().unc(client.host()));
        Ok(Box::new(SmbTransfer { client }))
    }
}

struct SmbTransfer {
    client: SmbClient,
}

#[async_trait]
impl TransferSession for SmbTransfer {
    fn location(&self) -> String {
        self.client.share().unc(self.client.host())
    }

    async fn transfer_one(
        &mut self,
        local: &Path,
        remote_name: &str,
        progress: &mut FileProgress<'_>,
    ) -> UploadResult<u64> {
        let size = tokio::fs::metadata(local)
            .await
            .map_err(|e| UploadError::transfer(format!("Cannot stat {}: {}", local.display(), e)))?
            .len();
        let local_arg = local
            .to_str()
            .ok_or_else(|| UploadError::invalid_local_path(format!("{} is not valid UTF-8", local.display())))?;

        // smbclient reports no intermediate progress.
        self.client.put(local_arg, remote_name).await?;
        progress.update(size);
        progress.finish();
        Ok(size)
    }

    async fn close(self: Box<Self>) -> UploadResult<()> {
        Ok(())
    }
}
