//! Data connections and `STOR` streaming.
//!
//! Passive modes only: EPSV first (RFC 2428), PASV when the server refuses
//! it. The host advertised in a PASV reply is ignored in favour of the
//! control connection's peer, which keeps NATed servers working.

use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use mpfu_core::FileProgress;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// A plain or TLS-wrapped data connection.
pub enum DataStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl DataStream {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.write_all(buf).await,
            Self::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn finish(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => {
                s.flush().await?;
                s.shutdown().await
            }
            Self::Tls(s) => {
                s.flush().await?;
                s.shutdown().await
            }
        }
    }
}

/// Everything needed to open a data connection.
pub struct DataChannel<'a> {
    pub peer: IpAddr,
    pub host: &'a str,
    pub timeout: Duration,
    /// Present when the data channel must be TLS-wrapped.
    pub protect: Option<&'a TlsConnector>,
}

/// Open a passive connection, trying EPSV before PASV.
pub async fn open_passive(codec: &mut FtpCodec, channel: &DataChannel<'_>) -> FtpResult<TcpStream> {
    let resp = codec.execute("EPSV").await?;
    let addr = if resp.code == 229 {
        SocketAddr::new(channel.peer, parse_epsv_response(&resp.text())?)
    } else {
        log::debug!("EPSV refused ({}), falling back to PASV", resp.code);
        let resp = codec.expect_ok("PASV").await?;
        let advertised = parse_pasv_response(&resp.text())?;
        SocketAddr::new(channel.peer, advertised.port())
    };

    timeout(channel.timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| FtpError::data_channel(format!("Data connect to {} timed out", addr)))?
        .map_err(|e| FtpError::data_channel(format!("Data connect to {}: {}", addr, e)))
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 reply.
pub fn parse_pasv_response(text: &str) -> FtpResult<SocketAddr> {
    let re = Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)")
        .map_err(|e| FtpError::protocol_error(e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV: {}", text)))?;

    let nums = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::protocol_error("PASV number out of range"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok(SocketAddr::new(ip, port))
}

/// Parse the port from `229 Entering Extended Passive Mode (|||port|)`.
pub fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    let re = Regex::new(r"\|\|\|(\d+)\|").map_err(|e| FtpError::protocol_error(e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse EPSV: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error("EPSV port out of range"))
}

/// `STOR remote_name` with the contents of `local`. Returns bytes sent.
pub async fn store(
    codec: &mut FtpCodec,
    channel: &DataChannel<'_>,
    local: &Path,
    remote_name: &str,
    chunk_size: usize,
    progress: &mut FileProgress<'_>,
) -> FtpResult<u64> {
    let mut file = tokio::fs::File::open(local)
        .await
        .map_err(|e| FtpError::io_error(format!("Cannot open '{}': {}", local.display(), e)))?;

    let tcp = open_passive(codec, channel).await?;
    let resp = codec.execute(&format!("STOR {}", remote_name)).await?;
    if !resp.is_preliminary() {
        return Err(FtpError::from_reply(resp.code, &resp.text()));
    }

    let mut data = match channel.protect {
        Some(connector) => {
            DataStream::Tls(Box::new(tls::wrap_data_stream(tcp, connector, channel.host).await?))
        }
        None => DataStream::Plain(tcp),
    };

    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut sent: u64 = 0;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        data.write_all(&buf[..n])
            .await
            .map_err(|e| FtpError::new(FtpErrorKind::TransferFailed, e.to_string()))?;
        sent += n as u64;
        progress.advance(n as u64);
    }
    data.finish().await?;
    drop(data);

    let done = codec.read_response().await?;
    if !done.is_completion() {
        return Err(FtpError::from_reply(done.code, &done.text()));
    }
    log::debug!("STOR {} complete: {} bytes", remote_name, sent);
    Ok(sent)
}
