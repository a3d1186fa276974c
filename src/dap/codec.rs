//! Content-Length framing for DAP messages.
//!
//! Format: `Content-Length: N\r\n\r\n{json}`. Header lines other than
//! `Content-Length` are accepted and ignored.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CONTENT_LENGTH: &str = "Content-Length:";

/// Largest body accepted from the backend.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Writes one framed message and flushes the writer.
pub async fn write_message<W>(writer: &mut W, message: &serde_json::Value) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = serde_json::to_vec(message)?;
    let header = format!("{} {}\r\n\r\n", CONTENT_LENGTH, body.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Reads one framed message.
///
/// Returns `Ok(None)` on a clean end of stream before any header byte.
/// End of stream in the middle of a message is an `UnexpectedEof` error.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<serde_json::Value>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if saw_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside message header",
                ));
            }
            return Ok(None);
        }
        saw_header = true;

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }

        if let Some(value) = line.strip_prefix(CONTENT_LENGTH) {
            let parsed = value.trim().parse::<usize>().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid Content-Length value {:?}: {}", value.trim(), e),
                )
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header")
    })?;
    if content_length > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Content-Length {} exceeds limit of {} bytes",
                content_length, MAX_MESSAGE_SIZE
            ),
        ));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    serde_json::from_slice(&body).map(Some).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("invalid JSON body: {}", e))
    })
}
