//! Wire framing for byte-stream transports
//!
//! - `ContentLength`: LSP base protocol headers, used over stdio
//! - `Lines`: one JSON document per line, used over IPC control channels

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::BridgeError;
use crate::protocol::message::Message;

const CONTENT_LENGTH: &str = "content-length";

/// Largest body accepted in one frame
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;
const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    ContentLength,
    Lines,
}

/// Reads one message from `input`.
///
/// Returns `Ok(None)` on a clean end of stream. A frame that arrives intact
/// but does not decode yields [`BridgeError::Malformed`] and leaves the
/// stream positioned at the next frame.
pub async fn read_message(
    framing: Framing,
    input: &mut (impl AsyncBufRead + Unpin + Send),
) -> Result<Option<Message>, BridgeError> {
    let body = match framing {
        Framing::ContentLength => read_content_length_frame(input).await?,
        Framing::Lines => read_line_frame(input).await?,
    };

    let Some(body) = body else {
        return Ok(None);
    };

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| BridgeError::Malformed(e.to_string()))
}

pub async fn write_message(
    framing: Framing,
    output: &mut (impl AsyncWrite + Unpin + Send),
    message: &Message,
) -> Result<(), BridgeError> {
    let body = serde_json::to_vec(message)?;

    match framing {
        Framing::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            output.write_all(header.as_bytes()).await?;
            output.write_all(&body).await?;
        }
        Framing::Lines => {
            output.write_all(&body).await?;
            output.write_all(b"\n").await?;
        }
    }

    output.flush().await?;
    Ok(())
}

async fn read_content_length_frame(
    input: &mut (impl AsyncBufRead + Unpin + Send),
) -> Result<Option<Vec<u8>>, BridgeError> {
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let line = match read_bounded_line(input, MAX_HEADER_BYTES).await? {
            Line::Eof if saw_header => return Err(BridgeError::ConnectionClosed),
            Line::Eof => return Ok(None),
            Line::TooLong => {
                debug!("Ignoring oversized header line");
                saw_header = true;
                continue;
            }
            Line::Complete(line) => line,
        };

        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;

        let Some((name, value)) = line.split_once(':') else {
            debug!("Ignoring malformed header line: {:?}", line);
            continue;
        };

        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            content_length = value.trim().parse().ok();
        }
    }

    let Some(length) = content_length else {
        return Err(BridgeError::Malformed(
            "missing Content-Length header".to_string(),
        ));
    };

    if length > MAX_FRAME_BYTES {
        let mut body = (&mut *input).take(length as u64);
        let skipped = tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
        if skipped < length as u64 {
            return Err(BridgeError::ConnectionClosed);
        }
        return Err(BridgeError::Malformed(format!(
            "frame of {} bytes exceeds the {} byte limit",
            length, MAX_FRAME_BYTES
        )));
    }

    let mut body = vec![0; length];
    input.read_exact(&mut body).await?;
    Ok(Some(body))
}

async fn read_line_frame(
    input: &mut (impl AsyncBufRead + Unpin + Send),
) -> Result<Option<Vec<u8>>, BridgeError> {
    loop {
        let line = match read_bounded_line(input, MAX_FRAME_BYTES).await? {
            Line::Eof => return Ok(None),
            Line::TooLong => {
                return Err(BridgeError::Malformed(format!(
                    "line exceeds the {} byte limit",
                    MAX_FRAME_BYTES
                )));
            }
            Line::Complete(line) => line,
        };

        let trimmed = line.trim_ascii();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_vec()));
        }
    }
}

enum Line {
    Eof,
    Complete(Vec<u8>),
    /// The line was longer than the limit; it has been consumed and dropped.
    TooLong,
}

/// Reads raw bytes up to and including `\n`, never buffering more than
/// `limit` bytes of one line.
async fn read_bounded_line(
    input: &mut (impl AsyncBufRead + Unpin + Send),
    limit: usize,
) -> Result<Line, BridgeError> {
    let mut line = Vec::new();
    let read = (&mut *input)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;

    if read == 0 {
        return Ok(Line::Eof);
    }
    if line.ends_with(b"\n") || line.len() <= limit {
        return Ok(Line::Complete(line));
    }

    loop {
        let mut rest = Vec::new();
        let read = (&mut *input)
            .take(limit as u64)
            .read_until(b'\n', &mut rest)
            .await?;
        if read == 0 || rest.ends_with(b"\n") {
            return Ok(Line::TooLong);
        }
    }
}
