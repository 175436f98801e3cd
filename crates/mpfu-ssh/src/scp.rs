//! SCP adapter: one authenticated session per destination, one `scp` channel
//! per file.

use crate::connect::{open_session_async, remote_error};
use crate::worker::{copy_chunks, run_blocking, ChunkSender};
use async_trait::async_trait;
use log::debug;
use mpfu_core::config::SshSettings;
use mpfu_core::{
    Credential, DestinationDescriptor, FileProgress, Protocol, ProtocolAdapter, TransferSession,
    UploadError, UploadResult,
};
use ssh2::Session;
use std::fs::File;
use std::path::{Path, PathBuf};

const FILE_MODE: i32 = 0o644;

#[derive(Debug, Clone, Default)]
pub struct ScpAdapter {
    settings: SshSettings,
    chunk_size: usize,
}

impl ScpAdapter {
    pub fn new(settings: SshSettings, chunk_size: usize) -> Self {
        Self {
            settings,
            chunk_size,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for ScpAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Scp
    }

    async fn connect(
        &self,
        descriptor: &DestinationDescriptor,
        credential: &Credential,
    ) -> UploadResult<Box<dyn TransferSession>> {
        let session =
            open_session_async(&descriptor.host, &descriptor.user, credential, &self.settings).await?;
        Ok(Box::new(ScpTransfer {
            session: Some(session),
            descriptor: descriptor.clone(),
            chunk_size: self.chunk_size.max(1),
        }))
    }
}

fn scp_put(
    session: &Session,
    local: &Path,
    remote: &str,
    chunk_size: usize,
    tx: &ChunkSender,
) -> UploadResult<u64> {
    let mut source = File::open(local)
        .map_err(|e| UploadError::transfer(format!("Cannot open {}: {}", local.display(), e)))?;
    let size = source
        .metadata()
        .map_err(|e| UploadError::transfer(format!("Cannot stat {}: {}", local.display(), e)))?
        .len();

    let mut channel = session
        .scp_send(Path::new(remote), FILE_MODE, size, None)
        .map_err(|e| remote_error(&format!("SCP send to {} refused", remote), e))?;

    let sent = copy_chunks(&mut source, &mut channel, chunk_size, tx)
        .map_err(|e| UploadError::transfer(format!("SCP write to {} failed: {}", remote, e)))?;

    channel
        .send_eof()
        .and_then(|_| channel.wait_eof())
        .and_then(|_| channel.close())
        .and_then(|_| channel.wait_close())
        .map_err(|e| remote_error("SCP channel shutdown failed", e))?;

    match channel.exit_status() {
        Ok(0) | Err(_) => Ok(sent),
        Ok(code) => Err(UploadError::protocol(format!(
            "Remote scp exited with status {} for {}",
            code, remote
        ))),
    }
}

struct ScpTransfer {
    session: Option<Session>,
    descriptor: DestinationDescriptor,
    chunk_size: usize,
}

#[async_trait]
impl TransferSession for ScpTransfer {
    fn location(&self) -> String {
        format!("{}:{}", self.descriptor.host, self.descriptor.remote_path)
    }

    async fn transfer_one(
        &mut self,
        local: &Path,
        remote_name: &str,
        progress: &mut FileProgress<'_>,
    ) -> UploadResult<u64> {
        let local: PathBuf = local.to_path_buf();
        let remote = self.descriptor.remote_file_path(remote_name);
        let chunk_size = self.chunk_size;
        debug!("SCP put {} -> {}", local.display(), remote);
        let sent = run_blocking(&mut self.session, Some(progress), move |session: &mut Session, tx| {
            scp_put(session, &local, &remote, chunk_size, tx)
        })
        .await?;
        progress.finish();
        Ok(sent)
    }

    async fn close(mut self: Box<Self>) -> UploadResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            session
                .disconnect(None, "upload complete", None)
                .map_err(|e| remote_error("SCP disconnect failed", e))
        })
        .await
        .map_err(|e| UploadError::transfer(format!("SCP close task failed: {}", e)))?
    }
}
