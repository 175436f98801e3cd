//! SMB/CIFS uploads through the `smbclient` binary.
//!
//! The first segment of the destination's remote path names the share, the
//! rest is the directory inside it. `DOMAIN\user` accounts are split into
//! `-W DOMAIN -U user`.

pub mod adapter;
pub mod client;
pub mod unc;

pub use adapter::SmbAdapter;
