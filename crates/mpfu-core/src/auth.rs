//! Credential resolution.
//!
//! ```text
//!   Start ──key ok──────────────▶ Authenticated
//!     │
//!     └─auth failure / no key──▶ NeedPassword ──password ok──▶ Authenticated
//!                                     │
//!                                     └──failure──▶ Fatal
//! ```
//!
//! Only SSH-family adapters go through the key step. FTP and SMB connect once
//! with the descriptor's password, object storage with ambient credentials.
//! A failed key attempt never hands a half-open session forward: the adapter
//! tears it down before returning the error.

use crate::adapter::{AuthMode, Credential, ProtocolAdapter, TransferSession};
use crate::command::{ShellAdapter, ShellSession};
use crate::descriptor::{DestinationDescriptor, Protocol, ServerList};
use crate::error::{UploadError, UploadResult};
use log::{debug, info, warn};
use std::future::Future;

/// Hooks the front end fulfils so the engine never touches the terminal.
pub trait CredentialPrompt: Send + Sync {
    /// Password for `descriptor` after key authentication failed. `None`
    /// aborts the destination.
    fn need_credential(&self, descriptor: &DestinationDescriptor) -> Option<String>;

    /// Remote directory for `descriptor` when the caller did not give one.
    fn need_remote_path(&self, _descriptor: &DestinationDescriptor) -> Option<String> {
        None
    }
}

/// Prompt that never supplies anything (non-interactive runs).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl CredentialPrompt for NoPrompt {
    fn need_credential(&self, _descriptor: &DestinationDescriptor) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Key,
    Password,
    Ambient,
}

/// Resolver states. `Authenticated` and `Fatal` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Start,
    NeedPassword,
    Authenticated(AuthMethod),
    Fatal,
}

/// Session that made it through the resolver.
pub struct Authenticated<S> {
    pub session: S,
    pub method: AuthMethod,
    /// States visited, in order.
    pub path: Vec<AuthState>,
}

pub type AuthenticatedSession = Authenticated<Box<dyn TransferSession>>;

impl AuthMethod {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Password => "password",
            Self::Ambient => "ambient",
        }
    }
}

pub struct AuthResolver<'a> {
    prompt: &'a dyn CredentialPrompt,
}

impl<'a> AuthResolver<'a> {
    pub fn new(prompt: &'a dyn CredentialPrompt) -> Self {
        Self { prompt }
    }

    /// Drive the state machine for one upload destination.
    pub async fn open(
        &self,
        adapter: &dyn ProtocolAdapter,
        descriptor: &DestinationDescriptor,
    ) -> UploadResult<AuthenticatedSession> {
        self.resolve(adapter.auth_mode(), descriptor, move |credential: Credential| async move {
            adapter.connect(descriptor, &credential).await
        })
        .await
    }

    /// Drive the state machine for a remote shell on `descriptor`'s host.
    /// Shells always try key material first.
    pub async fn open_shell(
        &self,
        adapter: &dyn ShellAdapter,
        descriptor: &DestinationDescriptor,
    ) -> UploadResult<Authenticated<Box<dyn ShellSession>>> {
        self.resolve(AuthMode::KeyThenPassword, descriptor, move |credential: Credential| async move {
            adapter.connect(descriptor, &credential).await
        })
        .await
    }

    async fn resolve<S, F, Fut>(
        &self,
        mode: AuthMode,
        descriptor: &DestinationDescriptor,
        connect: F,
    ) -> UploadResult<Authenticated<S>>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = UploadResult<S>>,
    {
        let mut path = vec![AuthState::Start];

        let (credential, method) = match mode {
            AuthMode::Ambient => (Credential::Ambient, AuthMethod::Ambient),
            AuthMode::Password => (
                Credential::Password(self.password_for(descriptor).unwrap_or_default()),
                AuthMethod::Password,
            ),
            AuthMode::KeyThenPassword => (Credential::KeyBased, AuthMethod::Key),
        };

        let key_error = match connect(credential).await {
            Ok(session) => {
                path.push(AuthState::Authenticated(method));
                return Ok(Authenticated {
                    session,
                    method,
                    path,
                });
            }
            Err(e) if e.is_authentication() && method == AuthMethod::Key => e,
            Err(e) => return Err(e),
        };

        info!(
            "Key authentication to {} failed ({}); falling back to password",
            descriptor, key_error.message
        );
        path.push(AuthState::NeedPassword);

        let Some(password) = self.password_for(descriptor) else {
            path.push(AuthState::Fatal);
            warn!("No password supplied for {}", descriptor);
            return Err(UploadError::authentication(format!(
                "no usable key and no password supplied for {}@{}",
                descriptor.user, descriptor.host
            )));
        };

        match connect(Credential::Password(password)).await {
            Ok(session) => {
                path.push(AuthState::Authenticated(AuthMethod::Password));
                debug!("Password authentication to {} succeeded", descriptor);
                Ok(Authenticated {
                    session,
                    method: AuthMethod::Password,
                    path,
                })
            }
            Err(e) if e.is_authentication() => {
                path.push(AuthState::Fatal);
                Err(UploadError::authentication(format!(
                    "key and password authentication both rejected for {}@{}: {}",
                    descriptor.user, descriptor.host, e.message
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Descriptor secret first, then the prompt hook.
    fn password_for(&self, descriptor: &DestinationDescriptor) -> Option<String> {
        descriptor
            .secret
            .clone()
            .or_else(|| self.prompt.need_credential(descriptor))
    }
}

/// Let the prompt override each destination's remote directory. Object
/// storage destinations have no directory and are left alone.
pub fn ask_remote_paths(list: &mut ServerList, prompt: &dyn CredentialPrompt) {
    for descriptor in list.destinations.iter_mut() {
        if descriptor.protocol == Protocol::ObjectStorage {
            continue;
        }
        if let Some(path) = prompt.need_remote_path(descriptor).filter(|p| !p.trim().is_empty()) {
            debug!("Remote path for {} set to {}", descriptor, path.trim());
            descriptor.remote_path = path.trim().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::FileProgress;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    struct Dummy;

    #[async_trait]
    impl TransferSession for Dummy {
        fn location(&self) -> String {
            "dummy".into()
        }
        async fn transfer_one(
            &mut self,
            _local: &Path,
            _remote_name: &str,
            _progress: &mut FileProgress<'_>,
        ) -> UploadResult<u64> {
            Ok(0)
        }
        async fn close(self: Box<Self>) -> UploadResult<()> {
            Ok(())
        }
    }

    /// Accepts keys when `key_ok`, otherwise only `good_password`.
    struct Scripted {
        protocol: Protocol,
        key_ok: bool,
        good_password: &'static str,
        seen: Mutex<Vec<Credential>>,
    }

    impl Scripted {
        fn ssh(key_ok: bool) -> Self {
            Self {
                protocol: Protocol::Sftp,
                key_ok,
                good_password: "secret",
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProtocolAdapter for Scripted {
        fn protocol(&self) -> Protocol {
            self.protocol
        }
        async fn connect(
            &self,
            _descriptor: &DestinationDescriptor,
            credential: &Credential,
        ) -> UploadResult<Box<dyn TransferSession>> {
            self.seen.lock().unwrap().push(credential.clone());
            let ok = match credential {
                Credential::KeyBased => self.key_ok,
                Credential::Password(p) => p == self.good_password,
                Credential::Ambient => true,
            };
            if ok {
                Ok(Box::new(Dummy))
            } else {
                Err(UploadError::authentication("rejected"))
            }
        }
    }

    struct FixedPrompt(Option<&'static str>, Mutex<usize>);

    impl CredentialPrompt for FixedPrompt {
        fn need_credential(&self, _d: &DestinationDescriptor) -> Option<String> {
            *self.1.lock().unwrap() += 1;
            self.0.map(String::from)
        }
    }

    fn sftp(secret: Option<&str>) -> DestinationDescriptor {
        let mut d = DestinationDescriptor::parse(1, "sftp:10.0.0.5:/inbox/:alice").unwrap();
        d.secret = secret.map(String::from);
        d
    }

    #[tokio::test]
    async fn key_success_skips_password() {
        let adapter = Scripted::ssh(true);
        let prompt = FixedPrompt(Some("secret"), Mutex::new(0));
        let out = AuthResolver::new(&prompt).open(&adapter, &sftp(None)).await.unwrap();
        assert_eq!(out.method, AuthMethod::Key);
        assert_eq!(out.path, vec![AuthState::Start, AuthState::Authenticated(AuthMethod::Key)]);
        assert_eq!(*prompt.1.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_prompted_password() {
        let adapter = Scripted::ssh(false);
        let prompt = FixedPrompt(Some("secret"), Mutex::new(0));
        let out = AuthResolver::new(&prompt).open(&adapter, &sftp(None)).await.unwrap();
        assert_eq!(out.method, AuthMethod::Password);
        assert_eq!(
            out.path,
            vec![
                AuthState::Start,
                AuthState::NeedPassword,
                AuthState::Authenticated(AuthMethod::Password)
            ]
        );
        assert_eq!(*prompt.1.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn descriptor_secret_used_before_prompt() {
        let adapter = Scripted::ssh(false);
        let prompt = FixedPrompt(None, Mutex::new(0));
        let out = AuthResolver::new(&prompt)
            .open(&adapter, &sftp(Some("secret")))
            .await
            .unwrap();
        assert_eq!(out.method, AuthMethod::Password);
        assert_eq!(*prompt.1.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn wrong_password_is_fatal_after_one_attempt() {
        let adapter = Scripted::ssh(false);
        let prompt = FixedPrompt(Some("wrong"), Mutex::new(0));
        let err = AuthResolver::new(&prompt)
            .open(&adapter, &sftp(None))
            .await
            .err()
            .unwrap();
        assert!(err.is_authentication());
        assert_eq!(adapter.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn declined_prompt_is_fatal() {
        let adapter = Scripted::ssh(false);
        let err = AuthResolver::new(&NoPrompt)
            .open(&adapter, &sftp(None))
            .await
            .err()
            .unwrap();
        assert!(err.is_authentication());
        assert_eq!(adapter.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn connect_error_is_not_retried() {
        struct Unreachable;
        #[async_trait]
        impl ProtocolAdapter for Unreachable {
            fn protocol(&self) -> Protocol {
                Protocol::Scp
            }
            async fn connect(
                &self,
                _d: &DestinationDescriptor,
                _c: &Credential,
            ) -> UploadResult<Box<dyn TransferSession>> {
                Err(UploadError::connect("timed out"))
            }
        }
        let prompt = FixedPrompt(Some("secret"), Mutex::new(0));
        let err = AuthResolver::new(&prompt)
            .open(&Unreachable, &sftp(None))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, crate::error::UploadErrorKind::Connect);
        assert_eq!(*prompt.1.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn password_protocols_connect_once() {
        let adapter = Scripted {
            protocol: Protocol::Ftp,
            key_ok: false,
            good_password: "pw",
            seen: Mutex::new(Vec::new()),
        };
        let mut d = DestinationDescriptor::parse(1, "ftp:h:/up/:bob:pw").unwrap();
        let out = AuthResolver::new(&NoPrompt).open(&adapter, &d).await.unwrap();
        assert_eq!(out.method, AuthMethod::Password);

        d.secret = Some("bad".into());
        assert!(AuthResolver::new(&NoPrompt).open(&adapter, &d).await.is_err());
        assert_eq!(adapter.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn remote_path_hook_overrides_directories() {
        struct PathPrompt;
        impl CredentialPrompt for PathPrompt {
            fn need_credential(&self, _d: &DestinationDescriptor) -> Option<String> {
                None
            }
            fn need_remote_path(&self, d: &DestinationDescriptor) -> Option<String> {
                (d.protocol == Protocol::Sftp).then(|| " /srv/drop/ ".to_string())
            }
        }

        let mut list = ServerList::from_inline("sftp:h:/inbox/:u,ftp:h:/up/:u:p,s3:bucket");
        ask_remote_paths(&mut list, &PathPrompt);
        assert_eq!(list.destinations[0].remote_path, "/srv/drop/");
        assert_eq!(list.destinations[1].remote_path, "/up/");
        assert_eq!(list.destinations[2].remote_path, "bucket");
    }
}
