//! Thin async wrapper around the `smbclient` binary.
//!
//! The password travels in the `PASSWD` environment variable of the child,
//! never on its command line or in logs.

use crate::unc::{Account, SharePath};
use log::debug;
use mpfu_core::config::SmbSettings;
use mpfu_core::{UploadError, UploadResult};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Status codes meaning the credentials were refused.
const AUTH_STATUSES: [&str; 5] = [
    "NT_STATUS_LOGON_FAILURE",
    "NT_STATUS_WRONG_PASSWORD",
    "NT_STATUS_ACCOUNT_DISABLED",
    "NT_STATUS_ACCOUNT_LOCKED_OUT",
    "NT_STATUS_PASSWORD_EXPIRED",
];

/// Status codes meaning the server could not be reached.
const CONNECT_STATUSES: [&str; 5] = [
    "NT_STATUS_CONNECTION_REFUSED",
    "NT_STATUS_HOST_UNREACHABLE",
    "NT_STATUS_NETWORK_UNREACHABLE",
    "NT_STATUS_IO_TIMEOUT",
    "NT_STATUS_CONNECTION_RESET",
];

#[derive(Debug, Clone)]
pub struct SmbClient {
    host: String,
    share: SharePath,
    account: Account,
    password: String,
    settings: SmbSettings,
}

impl SmbClient {
    pub fn new(host: &str, share: SharePath, account: Account, password: &str, settings: SmbSettings) -> Self {
        Self {
            host: host.to_string(),
            share,
            account,
            password: password.to_string(),
            settings,
        }
    }

    pub fn share(&self) -> &SharePath {
        &self.share
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_sec.max(1))
    }

    /// Log in and change into the destination directory without writing
    /// anything. Bounded by the configured timeout as a whole.
    pub async fn probe(&self) -> UploadResult<()> {
        let script = if self.share.directory.is_empty() {
            "ls".to_string()
        } else {
            format!("cd {}", crate::unc::quote_arg(&self.share.directory)?)
        };
        self.run(&script, Some(self.operation_timeout())).await.map(|_| ())
    }

    /// Upload one local file under `remote_name` in the destination directory.
    ///
    /// No wall-clock limit: a stalled server is caught by smbclient's own
    /// per-request timeout (`-t`), a slow but live upload runs to the end.
    pub async fn put(&self, local: &str, remote_name: &str) -> UploadResult<()> {
        let script = format!(
            "{}put {} {}",
            self.cd_prefix()?,
            crate::unc::quote_arg(local)?,
            crate::unc::quote_arg(remote_name)?
        );
        self.run(&script, None).await.map(|_| ())
    }

    fn cd_prefix(&self) -> UploadResult<String> {
        if self.share.directory.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!("cd {}; ", crate::unc::quote_arg(&self.share.directory)?))
        }
    }

    pub(crate) fn args(&self, script: &str) -> Vec<String> {
        let mut args = vec![
            self.share.service(&self.host),
            "-p".to_string(),
            self.settings.port.to_string(),
            "-t".to_string(),
            self.operation_timeout().as_secs().to_string(),
            "-U".to_string(),
            self.account.user.clone(),
        ];
        if let Some(ref domain) = self.account.domain {
            args.push("-W".into());
            args.push(domain.clone());
        }
        if self.password.is_empty() {
            args.push("-N".into());
        }
        args.push("-c".into());
        args.push(script.to_string());
        args
    }

    async fn run(&self, script: &str, deadline: Option<Duration>) -> UploadResult<String> {
        debug!("smbclient {} -c {}", self.share.service(&self.host), script);

        let mut cmd = Command::new(&self.settings.smbclient_path);
        cmd.args(self.args(script))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.password.is_empty() {
            cmd.env("PASSWD", &self.password);
        }

        let finished = match deadline {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(finished) => finished,
                Err(_) => {
                    return Err(UploadError::connect(format!(
                        "smbclient timed out after {}s talking to {}",
                        limit.as_secs(),
                        self.host
                    )))
                }
            },
            None => cmd.output().await,
        };
        let output = match finished {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UploadError::connect(format!(
                    "smbclient not found at '{}'",
                    self.settings.smbclient_path
                )))
            }
            Err(e) => return Err(UploadError::connect(format!("Failed to execute smbclient: {}", e))),
            Ok(output) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let combined = format!("{}\n{}", stdout, stderr);

        // smbclient can exit 0 after a failed `cd` or `put`.
        if let Some(err) = classify(&combined) {
            debug!("smbclient failed: {}", combined.trim());
            return Err(err);
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let msg = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(UploadError::protocol(format!(
                "smbclient exited with code {}: {}",
                code,
                msg.trim()
            )));
        }
        Ok(stdout)
    }
}

/// Map an `NT_STATUS_*` code found in smbclient output to an error kind.
pub fn classify(output: &str) -> Option<UploadError> {
    let status = output
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .find(|word| word.starts_with("NT_STATUS_") && *word != "NT_STATUS_OK")?;

    let line = output
        .lines()
        .find(|l| l.contains(status))
        .unwrap_or(status)
        .trim()
        .to_string();

    if AUTH_STATUSES.contains(&status) {
        Some(UploadError::authentication(line))
    } else if CONNECT_STATUSES.contains(&status) || line.starts_with("Connection to") {
        Some(UploadError::connect(line))
    } else {
        Some(UploadError::protocol(line))
    }
}
