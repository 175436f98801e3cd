//! Blocking libssh2 session setup shared by SFTP and SCP.
//!
//! Runs inside `spawn_blocking`. Failures are mapped onto upload error
//! kinds so the resolver can tell an authentication rejection (fall back to
//! a password) from an unreachable host (give up).

use log::{debug, info, warn};
use mpfu_core::config::SshSettings;
use mpfu_core::{Credential, UploadError, UploadResult};
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default identity files tried after the agent, in order.
const DEFAULT_KEYS: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

/// Connect, handshake, vet the host key and authenticate with `credential`.
pub fn open_session(
    host: &str,
    user: &str,
    credential: &Credential,
    settings: &SshSettings,
) -> UploadResult<Session> {
    let connect_timeout = Duration::from_secs(settings.connect_timeout_sec);
    let addr = (host, settings.port)
        .to_socket_addrs()
        .map_err(|e| UploadError::connect(format!("Cannot resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| UploadError::connect(format!("No address for {}", host)))?;

    debug!("SSH connecting to {}", addr);
    let tcp = TcpStream::connect_timeout(&addr, connect_timeout)
        .map_err(|e| UploadError::connect(format!("TCP connection to {} failed: {}", addr, e)))?;

    let mut session =
        Session::new().map_err(|e| UploadError::connect(format!("Failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(connect_timeout.as_millis() as u32);
    session
        .handshake()
        .map_err(|e| UploadError::connect(format!("SSH handshake with {} failed: {}", host, e)))?;

    verify_host_key(&session, host, settings)?;

    let method = match credential {
        Credential::KeyBased => authenticate_with_keys(&session, user, settings)?,
        Credential::Password(password) => authenticate_with_password(&session, user, password)?,
        Credential::Ambient => {
            return Err(UploadError::authentication(
                "SSH destinations need key or password credentials",
            ))
        }
    };

    // No timeout once the transfer phase starts.
    session.set_timeout(0);
    info!("SSH session to {}@{} authenticated via {}", user, host, method);
    Ok(session)
}

/// [`open_session`] on the blocking pool.
pub async fn open_session_async(
    host: &str,
    user: &str,
    credential: &Credential,
    settings: &SshSettings,
) -> UploadResult<Session> {
    let (host, user, credential, settings) = (
        host.to_string(),
        user.to_string(),
        credential.clone(),
        settings.clone(),
    );
    tokio::task::spawn_blocking(move || open_session(&host, &user, &credential, &settings))
        .await
        .map_err(|e| UploadError::connect(format!("SSH connect task failed: {}", e)))?
}

/// Look the server key up in known_hosts. Unknown keys are accepted with a
/// warning; a key that contradicts a recorded one is refused.
fn verify_host_key(session: &Session, host: &str, settings: &SshSettings) -> UploadResult<()> {
    let (key, _) = session
        .host_key()
        .ok_or_else(|| UploadError::connect(format!("{} presented no host key", host)))?;

    let path = settings
        .known_hosts
        .clone()
        .or_else(|| dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")));

    let mut known = session
        .known_hosts()
        .map_err(|e| UploadError::connect(format!("known_hosts init failed: {}", e)))?;
    if let Some(ref p) = path {
        if p.is_file() {
            if let Err(e) = known.read_file(p, KnownHostFileKind::OpenSSH) {
                warn!("Could not read {}: {}", p.display(), e);
            }
        }
    }

    match known.check_port(host, settings.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => {
            warn!("Unknown host key for {}; accepting", host);
            Ok(())
        }
        CheckResult::Mismatch => Err(UploadError::connect(format!(
            "Host key for {} does not match known_hosts; refusing to connect",
            host
        ))),
        CheckResult::Failure => {
            warn!("Host key check for {} failed; continuing", host);
            Ok(())
        }
    }
}

/// Agent identities, configured identity files, then the `~/.ssh` defaults.
fn authenticate_with_keys(session: &Session, user: &str, settings: &SshSettings) -> UploadResult<String> {
    if settings.use_agent {
        if session.userauth_agent(user).is_ok() && session.authenticated() {
            return Ok("agent".into());
        }
        debug!("SSH agent auth failed for {}", user);
    }

    let candidates = key_candidates(settings, dirs::home_dir().as_deref());
    if candidates.is_empty() && !settings.use_agent {
        return Err(UploadError::authentication("No usable SSH key found"));
    }

    for key_path in &candidates {
        if session.userauth_pubkey_file(user, None, key_path, None).is_ok() && session.authenticated() {
            return Ok(format!("publickey({})", key_path.display()));
        }
        debug!("SSH key {} rejected for {}", key_path.display(), user);
    }

    Err(UploadError::authentication(format!(
        "No SSH key accepted for user '{}' ({} key file(s) tried)",
        user,
        candidates.len()
    )))
}

/// Existing key files to try, configured ones first.
fn key_candidates(settings: &SshSettings, home: Option<&Path>) -> Vec<PathBuf> {
    let defaults = home
        .map(|h| h.join(".ssh"))
        .into_iter()
        .flat_map(|dir| DEFAULT_KEYS.iter().map(move |name| dir.join(name)));
    settings
        .identity_files
        .iter()
        .cloned()
        .chain(defaults)
        .filter(|p| p.is_file())
        .collect()
}

/// Password, then keyboard-interactive answering every prompt with it.
fn authenticate_with_password(session: &Session, user: &str, password: &str) -> UploadResult<String> {
    if session.userauth_password(user, password).is_ok() && session.authenticated() {
        return Ok("password".into());
    }

    struct PasswordPrompt<'a> {
        password: &'a str,
    }

    impl ssh2::KeyboardInteractivePrompt for PasswordPrompt<'_> {
        fn prompt(
            &mut self,
            _username: &str,
            _instructions: &str,
            prompts: &[ssh2::Prompt],
        ) -> Vec<String> {
            prompts.iter().map(|_| self.password.to_string()).collect()
        }
    }

    let mut prompt = PasswordPrompt { password };
    if session.userauth_keyboard_interactive(user, &mut prompt).is_ok() && session.authenticated() {
        return Ok("keyboard-interactive".into());
    }

    Err(UploadError::authentication(format!(
        "Password authentication rejected for user '{}'",
        user
    )))
}

/// libssh2 `LIBSSH2_ERROR_SOCKET_DISCONNECT`.
pub const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
/// libssh2 `LIBSSH2_ERROR_SOCKET_RECV`.
pub const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

/// Map an ssh2 error raised after authentication. Socket-level failures
/// mean the connection is gone; anything else is the server refusing.
pub fn remote_error(context: &str, e: ssh2::Error) -> UploadError {
    match e.code() {
        ssh2::ErrorCode::Session(LIBSSH2_ERROR_SOCKET_DISCONNECT)
        | ssh2::ErrorCode::Session(LIBSSH2_ERROR_SOCKET_RECV) => {
            UploadError::connect(format!("{}: {}", context, e))
        }
        _ => UploadError::protocol(format!("{}: {}", context, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpfu_core::UploadErrorKind;

    #[test]
    fn socket_errors_map_to_connect() {
        let gone = ssh2::Error::new(
            ssh2::ErrorCode::Session(LIBSSH2_ERROR_SOCKET_DISCONNECT),
            "socket disconnected",
        );
        assert_eq!(remote_error("put", gone).kind, UploadErrorKind::Connect);
        let recv = ssh2::Error::new(ssh2::ErrorCode::Session(LIBSSH2_ERROR_SOCKET_RECV), "recv failed");
        assert_eq!(remote_error("put", recv).kind, UploadErrorKind::Connect);
        let denied = ssh2::Error::new(ssh2::ErrorCode::SFTP(3), "permission denied");
        assert_eq!(remote_error("put", denied).kind, UploadErrorKind::Protocol);
    }

    #[test]
    fn key_candidates_only_existing_files() {
        let home = tempfile::tempdir().unwrap();
        let ssh = home.path().join(".ssh");
        std::fs::create_dir(&ssh).unwrap();
        std::fs::write(ssh.join("id_rsa"), b"key").unwrap();

        let extra = home.path().join("deploy_key");
        std::fs::write(&extra, b"key").unwrap();
        let settings = SshSettings {
            identity_files: vec![extra.clone(), home.path().join("missing")],
            ..Default::default()
        };

        let keys = key_candidates(&settings, Some(home.path()));
        assert_eq!(keys, vec![extra, ssh.join("id_rsa")]);
    }

    #[test]
    fn unresolvable_host_is_connect_error() {
        let err = open_session(
            "host.invalid",
            "alice",
            &Credential::KeyBased,
            &SshSettings::default(),
        )
        .err()
        .expect("resolution should fail");
        assert_eq!(err.kind, mpfu_core::UploadErrorKind::Connect);
    }

    #[test]
    fn refused_port_is_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let settings = SshSettings {
            port,
            connect_timeout_sec: 1,
            ..Default::default()
        };
        let err = open_session("127.0.0.1", "alice", &Credential::KeyBased, &settings)
            .err()
            .expect("connect should fail");
        assert_eq!(err.kind, mpfu_core::UploadErrorKind::Connect);
    }
}
