//! Wyoming event framing.
//!
//! ```text
//! {"type": "...", "version": "...", "data_length": D, "payload_length": P}\n
//! <D bytes of JSON object data><P bytes of binary payload>
//! ```
//!
//! Data may also be given inline in the header under `"data"`; a separate
//! data block is merged over it.

use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::ProtocolError;
use super::event::{Event, Header, PROTOCOL_VERSION};

pub const MAX_HEADER_BYTES: usize = 64 * 1024;
pub const MAX_DATA_BYTES: usize = 1024 * 1024;
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Read the next event. `Ok(None)` means the peer closed the connection
/// cleanly between events.
///
/// Blank lines between events are skipped.
pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = (&mut *reader)
            .take(MAX_HEADER_BYTES as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if !line.ends_with(b"\n") {
            return Err(if line.len() > MAX_HEADER_BYTES {
                ProtocolError::HeaderTooLong {
                    limit: MAX_HEADER_BYTES,
                }
            } else {
                ProtocolError::Truncated
            });
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            break;
        }
    }

    let header: Header = serde_json::from_slice(&line)?;
    let event_type = header
        .event_type
        .filter(|t| !t.is_empty())
        .ok_or(ProtocolError::MissingField("type"))?;

    let mut data = header.data.unwrap_or_default();
    let data_length = checked_len("data", header.data_length, MAX_DATA_BYTES)?;
    if data_length > 0 {
        let block = read_block(reader, data_length).await?;
        match serde_json::from_slice::<Value>(&block)? {
            Value::Object(extra) => data.extend(extra),
            _ => return Err(ProtocolError::DataNotObject),
        }
    }

    let payload_length = checked_len("payload", header.payload_length, MAX_PAYLOAD_BYTES)?;
    let payload = if payload_length > 0 {
        read_block(reader, payload_length).await?
    } else {
        Vec::new()
    };

    Ok(Some(Event {
        event_type,
        data,
        payload,
    }))
}

fn checked_len(
    what: &'static str,
    length: Option<u64>,
    limit: usize,
) -> Result<usize, ProtocolError> {
    let length = length.unwrap_or(0);
    usize::try_from(length)
        .ok()
        .filter(|n| *n <= limit)
        .ok_or(ProtocolError::TooLarge {
            what,
            length,
            limit,
        })
}

async fn read_block<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut block = vec![0u8; len];
    match reader.read_exact(&mut block).await {
        Ok(_) => Ok(block),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::Truncated),
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

/// Write one event and flush it.
pub async fn write_event<W>(writer: &mut W, event: &Event) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data = if event.data.is_empty() {
        Vec::new()
    } else {
        serde_json::to_vec(&Value::Object(event.data.clone())).map_err(std::io::Error::other)?
    };

    let mut header = Map::new();
    header.insert("type".into(), Value::from(event.event_type.as_str()));
    header.insert("version".into(), Value::from(PROTOCOL_VERSION));
    if !data.is_empty() {
        header.insert("data_length".into(), Value::from(data.len()));
    }
    if !event.payload.is_empty() {
        header.insert("payload_length".into(), Value::from(event.payload.len()));
    }
    let mut line = serde_json::to_vec(&Value::Object(header)).map_err(std::io::Error::other)?;
    line.push(b'\n');

    writer.write_all(&line).await?;
    writer.write_all(&data).await?;
    writer.write_all(&event.payload).await?;
    writer.flush().await
}
