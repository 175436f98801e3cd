//! Remote command execution: one `exec` channel per command on an
//! authenticated session.

use crate::connect::{open_session_async, remote_error};
use crate::worker::run_blocking;
use async_trait::async_trait;
use log::debug;
use mpfu_core::config::SshSettings;
use mpfu_core::{
    CommandOutput, Credential, DestinationDescriptor, ShellAdapter, ShellSession, UploadError,
    UploadResult,
};
use ssh2::Session;
use std::io::Read;

#[derive(Debug, Clone, Default)]
pub struct SshShell {
    settings: SshSettings,
}

impl SshShell {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ShellAdapter for SshShell {
    async fn connect(
        &self,
        descriptor: &DestinationDescriptor,
        credential: &Credential,
    ) -> UploadResult<Box<dyn ShellSession>> {
        let session =
            open_session_async(&descriptor.host, &descriptor.user, credential, &self.settings).await?;
        Ok(Box::new(SshShellSession {
            session: Some(session),
            host: descriptor.host.clone(),
        }))
    }
}

/// Run `command` and wait for the channel to close. Stdout is read to the
/// end before stderr.
pub fn exec_command(session: &Session, command: &str) -> UploadResult<CommandOutput> {
    let mut channel = session
        .channel_session()
        .map_err(|e| remote_error("Failed to open SSH channel", e))?;
    channel
        .exec(command)
        .map_err(|e| remote_error("Failed to execute command", e))?;

    let mut stdout = Vec::new();
    channel
        .read_to_end(&mut stdout)
        .map_err(|e| UploadError::transfer(format!("Failed to read command output: {}", e)))?;
    let mut stderr = Vec::new();
    channel
        .stderr()
        .read_to_end(&mut stderr)
        .map_err(|e| UploadError::transfer(format!("Failed to read command errors: {}", e)))?;

    channel
        .wait_close()
        .map_err(|e| remote_error("Failed to close channel", e))?;
    let exit_status = channel
        .exit_status()
        .map_err(|e| remote_error("Failed to get exit status", e))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status,
    })
}

struct SshShellSession {
    session: Option<Session>,
    host: String,
}

#[async_trait]
impl ShellSession for SshShellSession {
    async fn exec(&mut self, command: &str) -> UploadResult<CommandOutput> {
        debug!("SSH exec on {}: {}", self.host, command);
        let command = command.to_string();
        run_blocking(&mut self.session, None, move |session: &mut Session, _tx| {
            exec_command(session, &command)
        })
        .await
    }

    async fn close(mut self: Box<Self>) -> UploadResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            session
                .disconnect(None, "command complete", None)
                .map_err(|e| remote_error("SSH disconnect failed", e))
        })
        .await
        .map_err(|e| UploadError::transfer(format!("SSH close task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpfu_core::UploadErrorKind;

    #[tokio::test]
    async fn exec_on_closed_session_is_connect_error() {
        let mut shell = SshShellSession {
            session: None,
            host: "web1".into(),
        };
        let err = shell.exec("uptime").await.unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::Connect);
        assert!(Box::new(shell).close().await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_host_is_connect_error() {
        let shell = SshShell::new(SshSettings {
            port: 1,
            connect_timeout_sec: 1,
            ..Default::default()
        });
        let target = DestinationDescriptor::from_login(1, "ops@127.0.0.1").unwrap();
        let err = shell.connect(&target, &Credential::KeyBased).await.err().unwrap();
        assert_eq!(err.kind, UploadErrorKind::Connect);
    }
}
