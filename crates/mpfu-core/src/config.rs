//! Engine configuration.
//!
//! Loaded from JSON (`--config <path>`, else `<config dir>/mpfu/config.json`
//! when it exists). Every field has a default so a partial file is fine.

use crate::error::{UploadError, UploadResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// Read/write chunk size for streamed uploads.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub ftp: FtpSettings,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub smb: SmbSettings,
    #[serde(default)]
    pub s3: S3Settings,
}

fn default_chunk_size() -> usize {
    64 * 1024
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            ftp: FtpSettings::default(),
            ssh: SshSettings::default(),
            smb: SmbSettings::default(),
            s3: S3Settings::default(),
        }
    }
}

impl TransferConfig {
    /// Default location: `<config dir>/mpfu/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("mpfu").join("config.json"))
    }

    /// Load `path`, or the default location if it exists, or defaults.
    pub fn load(path: Option<&Path>) -> UploadResult<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => match Self::default_path() {
                Some(p) if p.is_file() => Self::from_file(&p),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> UploadResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            UploadError::config(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        let cfg: Self = serde_json::from_str(&raw).map_err(|e| {
            UploadError::config(format!("invalid config '{}': {}", path.display(), e))
        })?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }
}

/// FTP over explicit TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpSettings {
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(default = "default_ftp_connect_timeout")]
    pub connect_timeout_sec: u64,
    #[serde(default = "default_ftp_data_timeout")]
    pub data_timeout_sec: u64,
    /// Encrypt the data channel too (`PROT P`). Off by default: control
    /// channel encrypted, file data in the clear.
    #[serde(default)]
    pub protect_data: bool,
    /// Accept self-signed / untrusted server certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_ftp_port() -> u16 {
    21
}
fn default_ftp_connect_timeout() -> u64 {
    15
}
fn default_ftp_data_timeout() -> u64 {
    30
}

impl Default for FtpSettings {
    fn default() -> Self {
        Self {
            port: default_ftp_port(),
            connect_timeout_sec: default_ftp_connect_timeout(),
            data_timeout_sec: default_ftp_data_timeout(),
            protect_data: false,
            accept_invalid_certs: false,
        }
    }
}

/// SFTP and SCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshSettings {
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_ssh_connect_timeout")]
    pub connect_timeout_sec: u64,
    /// Try identities held by a running ssh-agent.
    #[serde(default = "default_true")]
    pub use_agent: bool,
    /// Extra private keys tried before the `~/.ssh/id_*` defaults.
    #[serde(default)]
    pub identity_files: Vec<PathBuf>,
    /// Override for `~/.ssh/known_hosts`.
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}
fn default_ssh_connect_timeout() -> u64 {
    8
}
fn default_true() -> bool {
    true
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            connect_timeout_sec: default_ssh_connect_timeout(),
            use_agent: true,
            identity_files: Vec::new(),
            known_hosts: None,
        }
    }
}

/// SMB/CIFS through `smbclient`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmbSettings {
    #[serde(default = "default_smb_port")]
    pub port: u16,
    /// Whole-run limit for the login check, per-request limit (`-t`) for uploads.
    #[serde(default = "default_smb_timeout")]
    pub timeout_sec: u64,
    #[serde(default = "default_smbclient")]
    pub smbclient_path: String,
}

fn default_smb_port() -> u16 {
    445
}
fn default_smb_timeout() -> u64 {
    15
}
fn default_smbclient() -> String {
    "smbclient".into()
}

impl Default for SmbSettings {
    fn default() -> Self {
        Self {
            port: default_smb_port(),
            timeout_sec: default_smb_timeout(),
            smbclient_path: default_smbclient(),
        }
    }
}

/// S3-compatible object storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Settings {
    /// Region; falls back to `AWS_REGION` / `AWS_DEFAULT_REGION`, then `us-east-1`.
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint (MinIO, Ceph, ...). Path-style addressing is used.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Deadline for the bucket check. Uploads are only bounded at connect.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_sec: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    20_000
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            request_timeout_sec: default_request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_conventions() {
        let cfg = TransferConfig::default();
        assert_eq!(cfg.chunk_size, 65_536);
        assert_eq!(cfg.ftp.port, 21);
        assert!(!cfg.ftp.protect_data);
        assert_eq!(cfg.ssh.connect_timeout_sec, 8);
        assert_eq!(cfg.smb.port, 445);
        assert_eq!(cfg.smb.timeout_sec, 15);
        assert_eq!(cfg.s3.max_attempts, 3);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: TransferConfig =
            serde_json::from_str(r#"{"ftp":{"protectData":true},"s3":{"region":"eu-west-1"}}"#).unwrap();
        assert!(cfg.ftp.protect_data);
        assert_eq!(cfg.ftp.port, 21);
        assert_eq!(cfg.s3.region.as_deref(), Some("eu-west-1"));
        assert_eq!(cfg.ssh.port, 22);
    }

    #[test]
    fn load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"chunkSize": 8192, "ssh": {"useAgent": false}}"#).unwrap();
        let cfg = TransferConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.chunk_size, 8192);
        assert!(!cfg.ssh.use_agent);
    }

    #[test]
    fn bad_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = TransferConfig::load(Some(&path)).unwrap_err();
        assert_eq!(err.kind, crate::error::UploadErrorKind::Config);
    }
}
