//! Unix socket wire protocol.
//!
//! ```text
//! Request:  [4-byte length BE] [MessagePack payload]
//! Response: [4-byte length BE] [MessagePack payload]
//! ```
//!
//! Requests are `{requestId?, cmd, ...}`; responses echo `requestId` and
//! carry one of the untagged `Response` shapes.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::metrics::MetricsSnapshot;
use crate::trapi::Message;

/// Frames above this size are rejected.
pub const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Request {
    Ping,
    /// Answer one query graph.
    Query { message: Message },
    GetStats,
    Shutdown,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Pong {
        pong: bool,
        version: String,
    },
    Query {
        message: Message,
    },
    Stats {
        stats: ServerStats,
    },
    Ok {
        ok: bool,
    },
    Error {
        error: String,
        code: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub type_closures: usize,
    pub signature_closures: usize,
    /// Absent unless the server runs with metrics enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

/// Captures `requestId` alongside the tagged request.
#[derive(Debug, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub request: Request,
}

/// Wraps a response with the echoed `requestId`.
#[derive(Debug, Serialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub response: Response,
}

/// Read one frame. `Ok(None)` on a clean disconnect before the header.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame exceeds u32 length")
    })?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await
}

pub fn decode_request(bytes: &[u8]) -> Result<RequestEnvelope, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}

pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(envelope)
}
