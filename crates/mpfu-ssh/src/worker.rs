//! Bridge between libssh2's blocking calls and the async session traits.
//!
//! The live handle is parked in an `Option` slot, moved into a blocking task
//! for the duration of one call and put back afterwards. Byte counts flow back
//! over a channel and are fed into the file's progress tracker.

use mpfu_core::progress::chunk_channel;
use mpfu_core::{FileProgress, UploadError, UploadResult};
use std::io::{Read, Write};
use tokio::sync::mpsc::UnboundedSender;

pub type ChunkSender = UnboundedSender<u64>;

pub async fn run_blocking<S, R, F>(
    slot: &mut Option<S>,
    progress: Option<&mut FileProgress<'_>>,
    f: F,
) -> UploadResult<R>
where
    S: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&mut S, &ChunkSender) -> UploadResult<R> + Send + 'static,
{
    let mut handle = slot
        .take()
        .ok_or_else(|| UploadError::connect("SSH session is already closed"))?;
    let (tx, rx) = chunk_channel();

    let task = tokio::task::spawn_blocking(move || {
        let result = f(&mut handle, &tx);
        (handle, result)
    });

    if let Some(progress) = progress {
        progress.drain(rx).await;
    }

    let (handle, result) = task
        .await
        .map_err(|e| UploadError::transfer(format!("SSH worker failed: {}", e)))?;
    *slot = Some(handle);
    result
}

/// Copy `reader` into `writer` in `chunk_size` pieces, reporting each piece.
pub fn copy_chunks(
    reader: &mut impl Read,
    writer: &mut impl Write,
    chunk_size: usize,
    tx: &ChunkSender,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut sent = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        sent += n as u64;
        let _ = tx.send(n as u64);
    }
    writer.flush()?;
    Ok(sent)
}
