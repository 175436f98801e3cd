//! Multi-destination fan-out.
//!
//! Destinations are processed one after another. For each one the
//! orchestrator resolves authentication, opens a session, sends every file of
//! the shared [`FileSet`] in order, closes the session and records a
//! [`TransferResult`]. A failure ends only the destination it belongs to.

use crate::adapter::{AdapterRegistry, TransferSession};
use crate::auth::{AuthResolver, CredentialPrompt};
use crate::descriptor::{DestinationDescriptor, MalformedDescriptor, Protocol, ServerList};
use crate::error::{UploadError, UploadErrorKind};
use crate::fileset::{remote_name, DirectoryTree, FileSet};
use crate::progress::{FileProgress, ProgressSink};
use log::{error, info, warn};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

/// Outcome for one destination.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub descriptor: DestinationDescriptor,
    pub files_attempted: usize,
    pub files_succeeded: usize,
    pub directories_created: usize,
    pub bytes_transferred: u64,
    pub elapsed_ms: u64,
    pub auth_method: Option<String>,
    pub failure: Option<UploadErrorKind>,
    pub message: Option<String>,
}

impl TransferResult {
    fn new(descriptor: &DestinationDescriptor, files_attempted: usize) -> Self {
        Self {
            descriptor: descriptor.clone(),
            files_attempted,
            files_succeeded: 0,
            directories_created: 0,
            bytes_transferred: 0,
            elapsed_ms: 0,
            auth_method: None,
            failure: None,
            message: None,
        }
    }

    fn fail(&mut self, err: &UploadError) {
        self.failure = Some(err.kind);
        self.message = Some(err.message.clone());
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Every result of a run, plus the descriptor entries that never made it
/// into the fan-out.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub results: Vec<TransferResult>,
    pub rejected: Vec<MalformedDescriptor>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.rejected.is_empty() && self.results.iter().all(TransferResult::succeeded)
    }

    /// One line per destination plus the rejected entries.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for r in &self.results {
            match (&r.failure, &r.message) {
                (None, _) => out.push_str(&format!(
                    "OK    {} ({}/{} files, {} bytes)\n",
                    r.descriptor, r.files_succeeded, r.files_attempted, r.bytes_transferred
                )),
                (Some(kind), msg) => out.push_str(&format!(
                    "FAIL  {} [{}] {} ({}/{} files sent)\n",
                    r.descriptor,
                    kind,
                    msg.as_deref().unwrap_or(""),
                    r.files_succeeded,
                    r.files_attempted
                )),
            }
        }
        for m in &self.rejected {
            out.push_str(&format!("SKIP  [{}] {}\n", UploadErrorKind::MalformedDescriptor, m));
        }
        out.push_str(&format!(
            "{} destination(s) succeeded, {} failed, {} rejected",
            self.succeeded(),
            self.failed(),
            self.rejected.len()
        ));
        out
    }
}

pub struct TransferOrchestrator<'a> {
    registry: &'a dyn AdapterRegistry,
    prompt: &'a dyn CredentialPrompt,
    sink: &'a dyn ProgressSink,
}

impl<'a> TransferOrchestrator<'a> {
    pub fn new(
        registry: &'a dyn AdapterRegistry,
        prompt: &'a dyn CredentialPrompt,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            registry,
            prompt,
            sink,
        }
    }

    /// Send `files` to every destination of `list`.
    pub async fn run(&self, list: &ServerList, files: &FileSet) -> RunReport {
        let mut report = RunReport {
            results: Vec::with_capacity(list.destinations.len()),
            rejected: list.rejected.clone(),
        };
        for descriptor in &list.destinations {
            let result = self.send_files(descriptor, files).await;
            report.results.push(result);
        }
        report
    }

    /// Send `files` to one destination.
    pub async fn send_files(
        &self,
        descriptor: &DestinationDescriptor,
        files: &FileSet,
    ) -> TransferResult {
        let started = Instant::now();
        self.sink.destination_started(descriptor);
        let mut result = TransferResult::new(descriptor, files.len());

        if files.is_empty() {
            info!("No files matched; nothing to send to {}", descriptor);
        } else if let Some(mut session) = self.open(descriptor, &mut result).await {
            for local in files {
                if let Err(e) = self
                    .send_one(session.as_mut(), descriptor, local, None, &mut result)
                    .await
                {
                    self.record_failure(descriptor, &mut result, e);
                    break;
                }
            }
            self.close(descriptor, session).await;
        }

        self.finish(started, result)
    }

    /// Mirror a local directory tree under each destination's remote path.
    /// Only SFTP can create remote directories; other destinations are
    /// recorded as protocol failures without connecting.
    pub async fn run_directory(&self, list: &ServerList, tree: &DirectoryTree) -> RunReport {
        let mut report = RunReport {
            results: Vec::with_capacity(list.destinations.len()),
            rejected: list.rejected.clone(),
        };
        for descriptor in &list.destinations {
            let result = self.send_directory(descriptor, tree).await;
            report.results.push(result);
        }
        report
    }

    pub async fn send_directory(
        &self,
        descriptor: &DestinationDescriptor,
        tree: &DirectoryTree,
    ) -> TransferResult {
        let started = Instant::now();
        self.sink.destination_started(descriptor);
        let mut result = TransferResult::new(descriptor, tree.files.len());

        if descriptor.protocol != Protocol::Sftp {
            warn!("Skipping {}: directory upload needs sftp", descriptor);
            let err = UploadError::protocol("directory upload is only supported over sftp");
            result.fail(&err);
            return self.finish(started, result);
        }

        let Some(mut session) = self.open(descriptor, &mut result).await else {
            return self.finish(started, result);
        };

        for dir in &tree.directories {
            let remote = descriptor.remote_file_path(dir);
            match session.make_dir(&remote).await {
                Ok(created) => {
                    if created {
                        result.directories_created += 1;
                    }
                    self.sink.directory_created(&remote, created);
                }
                Err(e) if e.kind == UploadErrorKind::Protocol => {
                    warn!("Can't create dir {}; already exists or bad permissions: {}", remote, e.message);
                    self.sink.directory_created(&remote, false);
                }
                Err(e) => {
                    self.record_failure(descriptor, &mut result, e);
                    self.close(descriptor, session).await;
                    return self.finish(started, result);
                }
            }
        }

        for (local, relative) in &tree.files {
            let remote = descriptor.remote_file_path(relative);
            if let Err(e) = self
                .send_one(session.as_mut(), descriptor, local, Some(&remote), &mut result)
                .await
            {
                self.record_failure(descriptor, &mut result, e);
                break;
            }
        }

        self.close(descriptor, session).await;
        info!(
            "Finished transferring {} directories and {} files to {}",
            result.directories_created, result.files_succeeded, descriptor
        );
        self.finish(started, result)
    }

    async fn open(
        &self,
        descriptor: &DestinationDescriptor,
        result: &mut TransferResult,
    ) -> Option<Box<dyn TransferSession>> {
        let adapter = self.registry.adapter(descriptor.protocol);
        match AuthResolver::new(self.prompt).open(adapter, descriptor).await {
            Ok(auth) => {
                result.auth_method = Some(auth.method.label().to_string());
                Some(auth.session)
            }
            Err(e) => {
                self.record_failure(descriptor, result, e);
                None
            }
        }
    }

    async fn send_one(
        &self,
        session: &mut dyn TransferSession,
        descriptor: &DestinationDescriptor,
        local: &Path,
        remote_path: Option<&str>,
        result: &mut TransferResult,
    ) -> Result<(), UploadError> {
        let size = std::fs::metadata(local)
            .map_err(|e| UploadError::transfer(format!("cannot stat '{}': {}", local.display(), e)))?
            .len();
        let name = remote_name(local)?;
        let location = match remote_path {
            Some(p) => p.to_string(),
            None => session.location(),
        };
        self.sink.file_started(local, &location, descriptor);

        let mut progress = FileProgress::new(self.sink, size);
        let sent = match remote_path {
            Some(p) => session.transfer_to(local, p, &mut progress).await?,
            None => session.transfer_one(local, &name, &mut progress).await?,
        };
        progress.finish();

        result.files_succeeded += 1;
        result.bytes_transferred += sent;
        Ok(())
    }

    async fn close(&self, descriptor: &DestinationDescriptor, session: Box<dyn TransferSession>) {
        if let Err(e) = session.close().await {
            warn!("Closing session to {} failed: {}", descriptor, e);
        }
    }

    fn record_failure(
        &self,
        descriptor: &DestinationDescriptor,
        result: &mut TransferResult,
        err: UploadError,
    ) {
        let err = err.with_destination(descriptor.display_name());
        error!("{}", err);
        result.fail(&err);
    }

    fn finish(&self, started: Instant, mut result: TransferResult) -> TransferResult {
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        self.sink.destination_finished(&result);
        result
    }
}
