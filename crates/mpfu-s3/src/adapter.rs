//! Object-storage implementation of the core adapter traits.

use crate::client::S3Client;
use crate::credentials::{resolve_endpoint, resolve_region, AwsCredentials};
use async_trait::async_trait;
use log::info;
use mpfu_core::config::S3Settings;
use mpfu_core::{
    Credential, DestinationDescriptor, FileProgress, Protocol, ProtocolAdapter, TransferSession,
    UploadError, UploadResult,
};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct S3Adapter {
    settings: S3Settings,
    chunk_size: usize,
}

impl S3Adapter {
    pub fn new(settings: S3Settings, chunk_size: usize) -> Self {
        Self {
            settings,
            chunk_size,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for S3Adapter {
    fn protocol(&self) -> Protocol {
        Protocol::ObjectStorage
    }

    async fn connect(
        &self,
        descriptor: &DestinationDescriptor,
        _credential: &Credential,
    ) -> UploadResult<Box<dyn TransferSession>> {
        let bucket = descriptor
            .bucket()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| UploadError::protocol("No bucket named for object storage destination"))?
            .to_string();

        let credentials = AwsCredentials::from_environment()?;
        let region = resolve_region(&self.settings, |k| std::env::var(k).ok());
        let endpoint = resolve_endpoint(&self.settings, &region);
        let client = S3Client::new(&credentials, &region, &endpoint, self.settings.clone(), self.chunk_size)?;

        client.check_bucket(&bucket).await?;
        info!("Bucket {} reachable at {} ({})", bucket, endpoint, region);
        Ok(Box::new(S3Transfer { client, bucket }))
    }
}

struct S3Transfer {
    client: S3Client,
    bucket: String,
}

#[async_trait]
impl TransferSession for S3Transfer {
    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    async fn transfer_one(
        &mut self,
        local: &Path,
        remote_name: &str,
        progress: &mut FileProgress<'_>,
    ) -> UploadResult<u64> {
        self.client.put_object(&self.bucket, remote_name, local, progress).await
    }

    async fn close(self: Box<Self>) -> UploadResult<()> {
        Ok(())
    }
}
