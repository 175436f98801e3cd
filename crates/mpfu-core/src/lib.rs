//! # mpfu-core
//!
//! Protocol-independent half of the multi-protocol uploader:
//!   • destination descriptor grammar and batch parsing
//!   • local file-set resolution (glob, directories excluded)
//!   • per-file progress accounting and rendering
//!   • key-then-password authentication state machine
//!   • the adapter traits every protocol crate implements
//!   • sequential fan-out with per-destination failure isolation
//!   • remote command fan-out over the same server lists

pub mod adapter;
pub mod auth;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod fileset;
pub mod orchestrator;
pub mod progress;

pub use adapter::{AdapterRegistry, AuthMode, Credential, ProtocolAdapter, TransferSession};
pub use auth::{
    ask_remote_paths, AuthMethod, AuthResolver, AuthState, Authenticated, CredentialPrompt, NoPrompt,
};
pub use command::{
    CommandFanOut, CommandOutput, CommandReport, CommandResult, ShellAdapter, ShellSession,
};
pub use config::TransferConfig;
pub use descriptor::{DestinationDescriptor, MalformedDescriptor, Protocol, ServerList};
pub use error::{UploadError, UploadErrorKind, UploadResult};
pub use fileset::{DirectoryTree, FileSet};
pub use orchestrator::{RunReport, TransferOrchestrator, TransferResult};
pub use progress::{FileProgress, ProgressSink, ProgressTracker, RenderedLine, SilentProgress};
