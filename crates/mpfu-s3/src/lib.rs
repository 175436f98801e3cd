//! S3-compatible object storage adapter.
//!
//! Requests are signed with SigV4 and addressed path-style
//! (`{endpoint}/{bucket}/{key}`), so custom endpoints such as MinIO work the
//! same as AWS. Credentials come from the environment, never from the
//! destination list.

pub mod adapter;
pub mod client;
pub mod credentials;
pub mod error;
pub mod signing;

pub use adapter::S3Adapter;
pub use error::S3Error;
