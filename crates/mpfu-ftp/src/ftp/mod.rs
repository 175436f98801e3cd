// ── mpfu-ftp / ftp module ─────────────────────────────────────────────────────
//
// Layers, bottom up:
//   • error     – reply-code classification and mapping onto upload errors
//   • protocol  – command/response codec over plain or TLS halves
//   • tls       – rustls connector, AUTH TLS upgrade, data-channel wrapping
//   • transfer  – EPSV/PASV data connections and STOR streaming
//   • session   – login sequence and one live control connection
//   • adapter   – ProtocolAdapter / TransferSession glue

pub mod adapter;
pub mod error;
pub mod protocol;
pub mod session;
pub mod tls;
pub mod transfer;
