//! One live FTP control connection.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{parse_pwd, FtpCodec};
use crate::ftp::tls;
use crate::ftp::transfer::{self, DataChannel};
use log::{debug, info, warn};
use mpfu_core::config::FtpSettings;
use mpfu_core::FileProgress;
use std::net::IpAddr;
use std::path::Path;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_rustls::TlsConnector;

pub struct FtpSession {
    codec: FtpCodec,
    host: String,
    peer: IpAddr,
    connector: Option<TlsConnector>,
    protect_data: bool,
    data_timeout: Duration,
    chunk_size: usize,
    /// Working directory reported by `PWD`, if the server told us.
    pub pwd: Option<String>,
}

impl FtpSession {
    /// Connect, upgrade the control channel with `AUTH TLS`, log in and
    /// change into `remote_dir`.
    pub async fn connect(
        host: &str,
        user: &str,
        password: &str,
        remote_dir: &str,
        settings: &FtpSettings,
        chunk_size: usize,
    ) -> FtpResult<Self> {
        let addr = format!("{}:{}", host, settings.port);
        let tcp = timeout(
            Duration::from_secs(settings.connect_timeout_sec),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| FtpError::timeout(format!("Connect to {} timed out", addr)))?
        .map_err(|e| FtpError::connection_failed(format!("Connect to {}: {}", addr, e)))?;
        let peer = tcp.peer_addr()?.ip();

        let mut codec = FtpCodec::from_tcp(tcp);
        let banner = codec.read_response().await?;
        if !banner.is_completion() {
            return Err(FtpError::from_reply(banner.code, &banner.text()));
        }
        debug!("FTP banner from {}: {}", host, banner.text());

        let resp = codec.execute("AUTH TLS").await?;
        if resp.code != 234 {
            return Err(FtpError::tls_failed(format!("AUTH TLS rejected: {}", resp.text())).with_code(resp.code));
        }
        let connector = tls::build_tls_connector(settings.accept_invalid_certs)?;
        let codec = tls::upgrade_to_tls(codec, &connector, host).await?;

        let mut session = Self::from_codec(codec, host, peer, settings, chunk_size);
        session.connector = Some(connector);
        session.login(user, password).await?;
        if settings.protect_data {
            session.codec.expect_ok("PBSZ 0").await?;
            session.codec.expect_ok("PROT P").await?;
        }
        session.codec.expect_ok("TYPE I").await?;
        session.enter_directory(remote_dir).await;

        info!(
            "FTP session to {} ready in {}",
            host,
            session.pwd.as_deref().unwrap_or("[default]")
        );
        Ok(session)
    }

    /// Wrap an already-greeted control connection.
    pub fn from_codec(
        codec: FtpCodec,
        host: &str,
        peer: IpAddr,
        settings: &FtpSettings,
        chunk_size: usize,
    ) -> Self {
        Self {
            codec,
            host: host.to_string(),
            peer,
            connector: None,
            protect_data: settings.protect_data,
            data_timeout: Duration::from_secs(settings.data_timeout_sec),
            chunk_size,
            pwd: None,
        }
    }

    /// `USER`, then `PASS` when the server asks for it (331).
    pub async fn login(&mut self, user: &str, password: &str) -> FtpResult<()> {
        let resp = self.codec.execute(&format!("USER {}", user)).await?;
        match resp.code {
            230 => Ok(()),
            331 | 332 => {
                let pass = self.codec.execute(&format!("PASS {}", password)).await?;
                if pass.is_completion() {
                    Ok(())
                } else {
                    Err(FtpError::auth_failed(format!("Login failed: {}", pass.text())).with_code(pass.code))
                }
            }
            code => Err(FtpError::auth_failed(format!("USER rejected: {}", resp.text())).with_code(code)),
        }
    }

    /// `CWD` then `PWD`. Neither failure is fatal; they only change what is
    /// displayed as the upload location.
    pub async fn enter_directory(&mut self, remote_dir: &str) {
        if !remote_dir.is_empty() {
            match self.codec.expect_ok(&format!("CWD {}", remote_dir)).await {
                Ok(_) => {}
                Err(e) => warn!("CWD {} on {} failed: {}", remote_dir, self.host, e),
            }
        }
        self.pwd = match self.codec.expect_ok("PWD").await {
            Ok(resp) => parse_pwd(&resp.text()).ok(),
            Err(e) => {
                warn!("PWD on {} failed: {}", self.host, e);
                None
            }
        };
    }

    pub fn location(&self) -> String {
        format!("{}:{}", self.host, self.pwd.as_deref().unwrap_or("[default]"))
    }

    pub async fn store(
        &mut self,
        local: &Path,
        remote_name: &str,
        progress: &mut FileProgress<'_>,
    ) -> FtpResult<u64> {
        let protect = if self.protect_data {
            self.connector.as_ref()
        } else {
            None
        };
        let channel = DataChannel {
            peer: self.peer,
            host: &self.host,
            timeout: self.data_timeout,
            protect,
        };
        transfer::store(&mut self.codec, &channel, local, remote_name, self.chunk_size, progress).await
    }

    pub async fn quit(mut self) -> FtpResult<()> {
        let _ = self.codec.execute("QUIT").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpfu_core::SilentProgress;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Minimal plain-text FTP server: scripted login, EPSV + STOR into memory.
    async fn fake_server(password: &'static str) -> (std::net::SocketAddr, JoinHandle<(Vec<String>, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let (rd, mut wr) = sock.into_split();
            let mut rd = BufReader::new(rd);
            let mut commands = Vec::new();
            let mut stored = Vec::new();
            let mut data_listener: Option<TcpListener> = None;
            wr.write_all(b"220 fake ready\r\n").await.unwrap();
            loop {
                let mut line = String::new();
                if rd.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let cmd = line.trim_end().to_string();
                commands.push(cmd.clone());
                let reply: String = if cmd.starts_with("USER") {
                    "331 Password required\r\n".into()
                } else if let Some(pw) = cmd.strip_prefix("PASS ") {
                    if pw == password {
                        "230 Logged in\r\n".into()
                    } else {
                        "530 Login incorrect\r\n".into()
                    }
                } else if cmd.starts_with("CWD /missing") {
                    "550 No such directory\r\n".into()
                } else if cmd.starts_with("CWD") {
                    "250 OK\r\n".into()
                } else if cmd == "PWD" {
                    "257 \"/upload\" is current directory\r\n".into()
                } else if cmd == "EPSV" {
                    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
                    let port = l.local_addr().unwrap().port();
                    data_listener = Some(l);
                    format!("229 Entering Extended Passive Mode (|||{}|)\r\n", port)
                } else if cmd.starts_with("STOR") {
                    wr.write_all(b"150 Ok to send data\r\n").await.unwrap();
                    let l = data_listener.take().unwrap();
                    let (mut data, _) = l.accept().await.unwrap();
                    data.read_to_end(&mut stored).await.unwrap();
                    "226 Transfer complete\r\n".into()
                } else if cmd == "QUIT" {
                    wr.write_all(b"221 Bye\r\n").await.unwrap();
                    break;
                } else {
                    "200 OK\r\n".into()
                };
                wr.write_all(reply.as_bytes()).await.unwrap();
            }
            (commands, stored)
        });
        (addr, handle)
    }

    async fn plain_session(addr: std::net::SocketAddr) -> FtpSession {
        let tcp = TcpStream::connect(addr).await.unwrap();
        let peer = tcp.peer_addr().unwrap().ip();
        let mut codec = FtpCodec::from_tcp(tcp);
        codec.read_response().await.unwrap();
        FtpSession::from_codec(codec, "127.0.0.1", peer, &FtpSettings::default(), 4)
    }

    #[tokio::test]
    async fn login_and_store_file() {
        let (addr, server) = fake_server("pw").await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("report.csv");
        std::fs::write(&local, b"a,b,c\n1,2,3\n").unwrap();

        let mut session = plain_session(addr).await;
        session.login("alice", "pw").await.unwrap();
        session.enter_directory("/upload/").await;
        assert_eq!(session.location(), "127.0.0.1:/upload");

        let sink = SilentProgress;
        let mut progress = FileProgress::new(&sink, 12);
        let sent = session.store(&local, "report.csv", &mut progress).await.unwrap();
        assert_eq!(sent, 12);
        assert_eq!(progress.transferred_bytes(), 12);
        session.quit().await.unwrap();

        let (commands, stored) = server.await.unwrap();
        assert_eq!(stored, b"a,b,c\n1,2,3\n");
        assert!(commands.contains(&"STOR report.csv".to_string()));
        assert!(commands.contains(&"PASS pw".to_string()));
    }

    #[tokio::test]
    async fn wrong_password_is_auth_failure() {
        let (addr, _server) = fake_server("pw").await;
        let mut session = plain_session(addr).await;
        let err = session.login("alice", "nope").await.unwrap_err();
        assert_eq!(err.kind, crate::ftp::error::FtpErrorKind::AuthFailed);
        assert_eq!(err.code, Some(530));
    }

    #[tokio::test]
    async fn failed_cwd_is_not_fatal() {
        let (addr, _server) = fake_server("pw").await;
        let mut session = plain_session(addr).await;
        session.login("alice", "pw").await.unwrap();
        session.enter_directory("/missing/").await;
        assert_eq!(session.pwd.as_deref(), Some("/upload"));
    }
}
