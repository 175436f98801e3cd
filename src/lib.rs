//! # mpfu
//!
//! Multi-protocol file upload. This crate wires the protocol adapters into
//! one [`AdapterRegistry`], next to the SSH shell used for remote commands,
//! and provides the terminal front end used by the `mpfu` binary.

pub mod terminal;

use mpfu_core::{AdapterRegistry, Protocol, ProtocolAdapter, ShellAdapter, TransferConfig};
use mpfu_ftp::FtpAdapter;
use mpfu_s3::S3Adapter;
use mpfu_smb::SmbAdapter;
use mpfu_ssh::{ScpAdapter, SftpAdapter, SshShell};

pub use mpfu_core as core;

/// One adapter per protocol, built from the transfer configuration.
#[derive(Debug, Clone, Default)]
pub struct Adapters {
    ftp: FtpAdapter,
    sftp: SftpAdapter,
    scp: ScpAdapter,
    smb: SmbAdapter,
    s3: S3Adapter,
    shell: SshShell,
}

impl Adapters {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            ftp: FtpAdapter::new(config.ftp.clone(), config.chunk_size),
            sftp: SftpAdapter::new(config.ssh.clone(), config.chunk_size),
            scp: ScpAdapter::new(config.ssh.clone(), config.chunk_size),
            smb: SmbAdapter::new(config.smb.clone()),
            s3: S3Adapter::new(config.s3.clone(), config.chunk_size),
            shell: SshShell::new(config.ssh.clone()),
        }
    }

    /// Remote command runner for `mpfu ssh`.
    pub fn shell(&self) -> &dyn ShellAdapter {
        &self.shell
    }
}

impl AdapterRegistry for Adapters {
    fn adapter(&self, protocol: Protocol) -> &dyn ProtocolAdapter {
        match protocol {
            Protocol::Ftp => &self.ftp,
            Protocol::Sftp => &self.sftp,
            Protocol::Scp => &self.scp,
            Protocol::Smb => &self.smb,
            Protocol::ObjectStorage => &self.s3,
        }
    }
}
