//! Remote command fan-out.
//!
//! Runs one shell command on the host of every destination in a server list,
//! one host after another. Object-storage entries have no host and are
//! skipped. Authentication goes through the same key-then-password resolver
//! as uploads, and a failure on one host never stops the next.

use crate::adapter::Credential;
use crate::auth::{AuthResolver, CredentialPrompt};
use crate::descriptor::{DestinationDescriptor, MalformedDescriptor, Protocol, ServerList};
use crate::error::{UploadError, UploadErrorKind, UploadResult};
use crate::progress::ProgressSink;
use async_trait::async_trait;
use log::{error, info, warn};
use serde::Serialize;
use std::time::Instant;

/// What a finished remote command left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

/// Opens a command-capable session on a destination's host.
#[async_trait]
pub trait ShellAdapter: Send + Sync {
    /// Authentication rejections must come back as `Authentication` errors
    /// so the resolver can fall back to a password.
    async fn connect(
        &self,
        descriptor: &DestinationDescriptor,
        credential: &Credential,
    ) -> UploadResult<Box<dyn ShellSession>>;
}

#[async_trait]
pub trait ShellSession: Send {
    /// Run `command` to completion and collect its output.
    async fn exec(&mut self, command: &str) -> UploadResult<CommandOutput>;

    async fn close(self: Box<Self>) -> UploadResult<()>;
}

/// Outcome for one host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub descriptor: DestinationDescriptor,
    pub auth_method: Option<String>,
    pub output: Option<CommandOutput>,
    pub elapsed_ms: u64,
    pub failure: Option<UploadErrorKind>,
    pub message: Option<String>,
}

impl CommandResult {
    pub fn new(descriptor: &DestinationDescriptor) -> Self {
        Self {
            descriptor: descriptor.clone(),
            auth_method: None,
            output: None,
            elapsed_ms: 0,
            failure: None,
            message: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// `user@host`, the way the host is addressed on the command line.
    pub fn target(&self) -> String {
        login_name(&self.descriptor)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReport {
    pub results: Vec<CommandResult>,
    /// Entries with no shell to run on (object storage).
    pub skipped: Vec<DestinationDescriptor>,
    pub rejected: Vec<MalformedDescriptor>,
}

impl CommandReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.rejected.is_empty() && self.results.iter().all(CommandResult::succeeded)
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        for r in &self.results {
            match (&r.failure, &r.message) {
                (None, _) => out.push_str(&format!("OK    {} (exit 0)\n", r.target())),
                (Some(kind), msg) => out.push_str(&format!(
                    "FAIL  {} [{}] {}\n",
                    r.target(),
                    kind,
                    msg.as_deref().unwrap_or("")
                )),
            }
        }
        for d in &self.skipped {
            out.push_str(&format!("SKIP  {} (no remote shell)\n", d));
        }
        for m in &self.rejected {
            out.push_str(&format!("SKIP  [{}] {}\n", UploadErrorKind::MalformedDescriptor, m));
        }
        out.push_str(&format!(
            "{} host(s) succeeded, {} failed, {} skipped, {} rejected",
            self.succeeded(),
            self.failed(),
            self.skipped.len(),
            self.rejected.len()
        ));
        out
    }
}

pub struct CommandFanOut<'a> {
    shell: &'a dyn ShellAdapter,
    prompt: &'a dyn CredentialPrompt,
    sink: &'a dyn ProgressSink,
}

impl<'a> CommandFanOut<'a> {
    pub fn new(
        shell: &'a dyn ShellAdapter,
        prompt: &'a dyn CredentialPrompt,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            shell,
            prompt,
            sink,
        }
    }

    /// Run `command` on the host of every destination of `list`.
    pub async fn run(&self, list: &ServerList, command: &str) -> CommandReport {
        let mut report = CommandReport {
            rejected: list.rejected.clone(),
            ..Default::default()
        };
        for descriptor in &list.destinations {
            if descriptor.protocol == Protocol::ObjectStorage {
                info!("Skipping {}: object storage has no remote shell", descriptor);
                report.skipped.push(descriptor.clone());
                continue;
            }
            report.results.push(self.run_one(descriptor, command).await);
        }
        report
    }

    pub async fn run_one(&self, descriptor: &DestinationDescriptor, command: &str) -> CommandResult {
        let started = Instant::now();
        self.sink.destination_started(descriptor);
        let mut result = CommandResult::new(descriptor);

        match AuthResolver::new(self.prompt).open_shell(self.shell, descriptor).await {
            Ok(auth) => {
                result.auth_method = Some(auth.method.label().to_string());
                let mut session = auth.session;
                match session.exec(command).await {
                    Ok(output) => {
                        if output.exit_status != 0 {
                            let err = UploadError::protocol(format!(
                                "command exited with status {}",
                                output.exit_status
                            ));
                            record_failure(descriptor, &mut result, err);
                        }
                        result.output = Some(output);
                    }
                    Err(e) => record_failure(descriptor, &mut result, e),
                }
                if let Err(e) = session.close().await {
                    warn!("Closing shell on {} failed: {}", login_name(descriptor), e);
                }
            }
            Err(e) => record_failure(descriptor, &mut result, e),
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        self.sink.command_finished(&result);
        result
    }
}

fn record_failure(descriptor: &DestinationDescriptor, result: &mut CommandResult, err: UploadError) {
    let err = err.with_destination(login_name(descriptor));
    error!("{}", err);
    result.failure = Some(err.kind);
    result.message = Some(err.message);
}

fn login_name(descriptor: &DestinationDescriptor) -> String {
    if descriptor.user.is_empty() {
        descriptor.host.clone()
    } else {
        format!("{}@{}", descriptor.user, descriptor.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoPrompt;
    use crate::progress::SilentProgress;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        attempts: Mutex<Vec<(String, Credential)>>,
        ran: Mutex<Vec<String>>,
        closes: Mutex<usize>,
    }

    /// Hosts named `down` are unreachable, `keyless` only take the password
    /// `pw`, `broken` run commands with exit status 2.
    struct MockShell {
        log: Arc<Log>,
    }

    struct MockShellSession {
        host: String,
        log: Arc<Log>,
    }

    #[async_trait]
    impl ShellAdapter for MockShell {
        async fn connect(
            &self,
            descriptor: &DestinationDescriptor,
            credential: &Credential,
        ) -> UploadResult<Box<dyn ShellSession>> {
            self.log
                .attempts
                .lock()
                .unwrap()
                .push((descriptor.host.clone(), credential.clone()));
            match (descriptor.host.as_str(), credential) {
                ("down", _) => Err(UploadError::connect("connection timed out")),
                ("keyless", Credential::KeyBased) => Err(UploadError::authentication("no key")),
                ("keyless", Credential::Password(p)) if p != "pw" => {
                    Err(UploadError::authentication("bad password"))
                }
                _ => Ok(Box::new(MockShellSession {
                    host: descriptor.host.clone(),
                    log: self.log.clone(),
                })),
            }
        }
    }

    #[async_trait]
    impl ShellSession for MockShellSession {
        async fn exec(&mut self, command: &str) -> UploadResult<CommandOutput> {
            self.log.ran.lock().unwrap().push(format!("{}: {}", self.host, command));
            let exit_status = if self.host == "broken" { 2 } else { 0 };
            Ok(CommandOutput {
                stdout: format!("{} up 3 days\n", self.host),
                stderr: String::new(),
                exit_status,
            })
        }

        async fn close(self: Box<Self>) -> UploadResult<()> {
            *self.log.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn shell() -> MockShell {
        MockShell {
            log: Arc::new(Log::default()),
        }
    }

    #[tokio::test]
    async fn every_host_runs_despite_failures() {
        let mock = shell();
        let list = ServerList::from_inline(
            "sftp:one:/p/:u,ftp:down:/p/:u:pw,s3:bucket,smb:broken:/share/:u:pw,scp:four:/p/:u",
        );
        let report = CommandFanOut::new(&mock, &NoPrompt, &SilentProgress)
            .run(&list, "uptime")
            .await;

        assert_eq!(report.results.len(), 4);
        assert!(report.results[0].succeeded());
        assert_eq!(report.results[1].failure, Some(UploadErrorKind::Connect));
        assert_eq!(report.results[2].failure, Some(UploadErrorKind::Protocol));
        assert_eq!(report.results[2].output.as_ref().unwrap().exit_status, 2);
        assert!(report.results[3].succeeded());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            *mock.log.ran.lock().unwrap(),
            vec!["one: uptime", "broken: uptime", "four: uptime"]
        );
        assert_eq!(*mock.log.closes.lock().unwrap(), 3);
        assert!(!report.all_succeeded());
        assert!(report.summary().contains("SKIP  s3:bucket (no remote shell)"));
    }

    #[tokio::test]
    async fn key_rejection_falls_back_to_descriptor_password() {
        let mock = shell();
        let list = ServerList::from_inline("ftp:keyless:/p/:ops:pw");
        let report = CommandFanOut::new(&mock, &NoPrompt, &SilentProgress)
            .run(&list, "df -h")
            .await;

        let r = &report.results[0];
        assert!(r.succeeded());
        assert_eq!(r.auth_method.as_deref(), Some("password"));
        assert_eq!(r.target(), "ops@keyless");
        assert_eq!(r.output.as_ref().unwrap().stdout, "keyless up 3 days\n");
        let attempts = mock.log.attempts.lock().unwrap();
        assert_eq!(attempts[0].1, Credential::KeyBased);
        assert_eq!(attempts[1].1, Credential::Password("pw".into()));
    }

    #[tokio::test]
    async fn missing_password_fails_only_that_host() {
        let mock = shell();
        let list = ServerList::from_inline("sftp:keyless:/p/:ops,sftp:two:/p/:ops");
        let report = CommandFanOut::new(&mock, &NoPrompt, &SilentProgress)
            .run(&list, "id")
            .await;

        assert_eq!(report.results[0].failure, Some(UploadErrorKind::Authentication));
        assert!(report.results[0].output.is_none());
        assert!(report.results[1].succeeded());
        assert_eq!(*mock.log.closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn login_targets_run_without_descriptors() {
        let mock = shell();
        let list = ServerList::from_shell_targets("root@one,sftp:two:/p/:ops");
        assert!(list.rejected.is_empty());
        let report = CommandFanOut::new(&mock, &NoPrompt, &SilentProgress)
            .run(&list, "hostname")
            .await;
        assert_eq!(report.results[0].target(), "root@one");
        assert_eq!(report.results[1].target(), "ops@two");
        assert_eq!(report.succeeded(), 2);
    }
}
