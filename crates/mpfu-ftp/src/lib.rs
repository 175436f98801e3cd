//! # mpfu-ftp
//!
//! FTP destination adapter:
//!   • explicit FTPS (`AUTH TLS`) on the control channel via rustls
//!   • `USER` / `PASS` login, optional `CWD`, `PWD` for display
//!   • EPSV with PASV fallback for data connections
//!   • binary `STOR` with chunked writes and progress
//!   • clear data channel by default, `PROT P` on request

pub mod ftp;

pub use ftp::adapter::FtpAdapter;
