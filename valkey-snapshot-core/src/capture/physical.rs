/*!
Physical capture: raw replication image via a full resynchronization.

The worker connects, optionally authenticates, sends `PSYNC ? -1` and then
records every byte the endpoint sends until the stream has been silent for
the endpoint's inactivity timeout. The bytes are stored exactly as received;
the replication format is never parsed.

```text
Connecting -> Handshaking -> Streaming -> Idle-complete -> Finalized
```
*/

use bytes::BytesMut;
use chrono::Utc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::address::replication_address;
use crate::config::EndpointConfig;
use crate::snapshot::PhysicalArtifact;
use crate::{Result, SnapshotError};

/// Full resynchronization request without replication id or offset
pub const FULL_RESYNC_REQUEST: &[u8] = b"*3\r\n$5\r\nPSYNC\r\n$1\r\n?\r\n$2\r\n-1\r\n";

const READ_CHUNK: usize = 64 * 1024;
const MAX_REPLY_LINE: usize = 4096;

/// Connect to the endpoint and capture its replication image
pub async fn capture(endpoint: &EndpointConfig) -> Result<PhysicalArtifact> {
    let address = replication_address(endpoint)?;
    debug!(endpoint = %endpoint.name, address = %address, "Opening replication connection");

    let stream = tokio::time::timeout(endpoint.connect_timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| {
            SnapshotError::connect(
                &endpoint.name,
                format!("timed out after {:?}", endpoint.connect_timeout),
            )
        })?
        .map_err(|e| SnapshotError::connect(&endpoint.name, e.to_string()))?;

    capture_stream(stream, endpoint).await
}

/// Run the handshake and streaming phases over an open transport.
///
/// The transport is shut down before returning on every path.
pub async fn capture_stream<S>(mut stream: S, endpoint: &EndpointConfig) -> Result<PhysicalArtifact>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let created_at = Utc::now();
    let outcome = replicate(&mut stream, endpoint).await;

    if let Err(e) = stream.shutdown().await {
        debug!(endpoint = %endpoint.name, error = %e, "Replication connection shutdown failed");
    }
    drop(stream);

    let data = outcome?;
    info!(
        endpoint = %endpoint.name,
        bytes = data.len(),
        "Physical capture complete"
    );

    Ok(PhysicalArtifact {
        name: endpoint.name.clone(),
        created_at,
        data: data.freeze(),
    })
}

async fn replicate<S>(stream: &mut S, endpoint: &EndpointConfig) -> Result<BytesMut>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(password) = endpoint.password() {
        authenticate(stream, endpoint, password).await?;
    }

    stream
        .write_all(FULL_RESYNC_REQUEST)
        .await
        .map_err(|e| SnapshotError::connect(&endpoint.name, format!("handshake failed: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| SnapshotError::connect(&endpoint.name, format!("handshake failed: {e}")))?;

    read_until_idle(stream, endpoint.inactivity_timeout).await
}

async fn authenticate<S>(stream: &mut S, endpoint: &EndpointConfig, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let command = format!(
        "*2\r\n$4\r\nAUTH\r\n${}\r\n{}\r\n",
        password.len(),
        password
    );
    stream
        .write_all(command.as_bytes())
        .await
        .map_err(|e| SnapshotError::connect(&endpoint.name, format!("AUTH failed: {e}")))?;

    let reply = read_reply_line(stream, endpoint.inactivity_timeout).await?;
    if reply.starts_with('-') {
        return Err(SnapshotError::connect(
            &endpoint.name,
            format!("authentication rejected: {}", reply.trim_start_matches('-')),
        ));
    }
    Ok(())
}

/// Read one CRLF terminated reply line
async fn read_reply_line<S>(stream: &mut S, timeout: Duration) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    loop {
        let byte = tokio::time::timeout(timeout, stream.read_u8())
            .await
            .map_err(|_| SnapshotError::protocol("no reply to AUTH before inactivity timeout"))??;
        line.push(byte);

        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        if line.len() > MAX_REPLY_LINE {
            return Err(SnapshotError::protocol("AUTH reply exceeds line limit"));
        }
    }
}

/// Accumulate bytes until a read sees nothing for `inactivity`.
///
/// The peer closing the stream is an error: the image would be truncated.
/// A stream that stays silent from the start yields an empty image.
async fn read_until_idle<S>(stream: &mut S, inactivity: Duration) -> Result<BytesMut>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);

    loop {
        buffer.reserve(READ_CHUNK);
        match tokio::time::timeout(inactivity, stream.read_buf(&mut buffer)).await {
            Err(_) => break,
            Ok(Ok(0)) => {
                warn!(bytes = buffer.len(), "Replication stream closed by peer");
                return Err(SnapshotError::protocol(format!(
                    "replication stream closed by peer after {} bytes",
                    buffer.len()
                )));
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(SnapshotError::Io(e)),
        }
    }

    if buffer.is_empty() {
        warn!(?inactivity, "No replication data received before the stream went idle");
    }
    Ok(buffer)
}
