//! SFTP and SCP adapters built on libssh2, plus remote command execution.
//!
//! All share the blocking session setup in [`connect`]: agent and key files
//! first, a password only when the resolver asks for one.

pub mod connect;
pub mod scp;
pub mod sftp;
pub mod shell;
mod worker;

pub use scp::ScpAdapter;
pub use sftp::SftpAdapter;
pub use shell::SshShell;
