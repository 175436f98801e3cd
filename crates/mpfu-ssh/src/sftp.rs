//! SFTP adapter: one authenticated session and one SFTP channel per
//! destination, reused for every file in the batch.

use crate::connect::{open_session_async, remote_error};
use crate::worker::{copy_chunks, run_blocking, ChunkSender};
use async_trait::async_trait;
use log::{debug, info};
use mpfu_core::config::SshSettings;
use mpfu_core::{
    Credential, DestinationDescriptor, FileProgress, Protocol, ProtocolAdapter, TransferSession,
    UploadError, UploadResult,
};
use ssh2::{OpenFlags, OpenType, Session, Sftp};
use std::fs::File;
use std::path::{Path, PathBuf};

const FILE_MODE: i32 = 0o644;
const DIR_MODE: i32 = 0o755;

#[derive(Debug, Clone, Default)]
pub struct SftpAdapter {
    settings: SshSettings,
    chunk_size: usize,
}

impl SftpAdapter {
    pub fn new(settings: SshSettings, chunk_size: usize) -> Self {
        Self {
            settings,
            chunk_size,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for SftpAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    async fn connect(
        &self,
        descriptor: &DestinationDescriptor,
        credential: &Credential,
    ) -> UploadResult<Box<dyn TransferSession>> {
        let session =
            open_session_async(&descriptor.host, &descriptor.user, credential, &self.settings).await?;

        let mut slot = Some(session);
        let sftp = run_blocking(&mut slot, None, |session: &mut Session, _| {
            session
                .sftp()
                .map_err(|e| remote_error("Failed to open SFTP channel", e))
        })
        .await?;

        debug!("SFTP channel open on {}", descriptor.host);
        Ok(Box::new(SftpTransfer {
            handle: slot.map(|session| SftpHandle { session, sftp }),
            descriptor: descriptor.clone(),
            chunk_size: self.chunk_size.max(1),
        }))
    }
}

struct SftpHandle {
    session: Session,
    sftp: Sftp,
}

impl SftpHandle {
    fn put(&self, local: &Path, remote: &str, chunk_size: usize, tx: &ChunkSender) -> UploadResult<u64> {
        let mut source = File::open(local).map_err(|e| {
            UploadError::transfer(format!("Cannot open {}: {}", local.display(), e))
        })?;
        let mut target = self
            .sftp
            .open_mode(
                Path::new(remote),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                FILE_MODE,
                OpenType::File,
            )
            .map_err(|e| remote_error(&format!("Cannot create remote file {}", remote), e))?;

        copy_chunks(&mut source, &mut target, chunk_size, tx)
            .map_err(|e| UploadError::transfer(format!("Write to {} failed: {}", remote, e)))
    }

    fn mkdir(&self, remote: &str) -> UploadResult<bool> {
        match self.sftp.mkdir(Path::new(remote), DIR_MODE) {
            Ok(()) => Ok(true),
            Err(e) => match self.sftp.stat(Path::new(remote)) {
                Ok(stat) if stat.is_dir() => Ok(false),
                _ => Err(remote_error(&format!("Cannot create directory {}", remote), e)),
            },
        }
    }
}

struct SftpTransfer {
    handle: Option<SftpHandle>,
    descriptor: DestinationDescriptor,
    chunk_size: usize,
}

#[async_trait]
impl TransferSession for SftpTransfer {
    fn location(&self) -> String {
        format!("{}:{}", self.descriptor.host, self.descriptor.remote_path)
    }

    async fn transfer_one(
        &mut self,
        local: &Path,
        remote_name: &str,
        progress: &mut FileProgress<'_>,
    ) -> UploadResult<u64> {
        let remote = self.descriptor.remote_file_path(remote_name);
        self.transfer_to(local, &remote, progress).await
    }

    async fn make_dir(&mut self, remote_path: &str) -> UploadResult<bool> {
        let remote = remote_path.to_string();
        let created = run_blocking(&mut self.handle, None, move |h: &mut SftpHandle, _| h.mkdir(&remote)).await?;
        if created {
            info!("Created remote directory {}", remote_path);
        }
        Ok(created)
    }

    async fn transfer_to(
        &mut self,
        local: &Path,
        remote_path: &str,
        progress: &mut FileProgress<'_>,
    ) -> UploadResult<u64> {
        let local: PathBuf = local.to_path_buf();
        let remote = remote_path.to_string();
        let chunk_size = self.chunk_size;
        debug!("SFTP put {} -> {}", local.display(), remote);
        let sent = run_blocking(&mut self.handle, Some(progress), move |h: &mut SftpHandle, tx| {
            h.put(&local, &remote, chunk_size, tx)
        })
        .await?;
        progress.finish();
        Ok(sent)
    }

    async fn close(mut self: Box<Self>) -> UploadResult<()> {
        let Some(SftpHandle { session, sftp }) = self.handle.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            drop(sftp);
            session
                .disconnect(None, "upload complete", None)
                .map_err(|e| remote_error("SFTP disconnect failed", e))
        })
        .await
        .map_err(|e| UploadError::transfer(format!("SFTP close task failed: {}", e)))?
    }
}
