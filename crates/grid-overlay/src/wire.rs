//! Wire envelope and framing.
//!
//! Gossip and flood traffic share one TCP listener and one UDP socket.
//! Every request is a [`Request`], every answer a [`Response`], each
//! encoded as JSON.
//!
//! Framing:
//! - TCP: `len: u32` big-endian, then `len` bytes of JSON. One request
//!   and at most one response per connection.
//! - UDP: one JSON document per datagram, at most
//!   [`MAX_DATAGRAM_SIZE`] bytes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::flood::FloodMessage;
use crate::gossip::GossipMessage;
use crate::node_info::NodeInfo;
use crate::{Error, Result};

/// Largest UDP payload that fits an IPv4 datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Largest accepted TCP frame.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Inbound traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Request {
    Gossip(GossipMessage),
    Flood(FloodMessage),
}

impl Request {
    /// The node that sent the request.
    pub fn sender(&self) -> &NodeInfo {
        match self {
            Request::Gossip(message) => message.sender(),
            Request::Flood(message) => message.sender(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Gossip(_) => "gossip",
            Request::Flood(_) => "flood",
        }
    }
}

/// Answers to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Response {
    Gossip(GossipMessage),
    FloodAck,
    Error(String),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Gossip(_) => "gossip",
            Response::FloodAck => "flood_ack",
            Response::Error(_) => "error",
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
}

/// Encode `value` for a single datagram.
///
/// # Errors
///
/// Returns [`Error::FrameTooLarge`] if it does not fit.
pub fn encode_datagram<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let bytes = encode(value)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(Error::FrameTooLarge {
            size: bytes.len(),
            limit: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(value)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: body.len(),
            limit: MAX_FRAME_SIZE,
        });
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// # Errors
///
/// Returns [`Error::FrameTooLarge`] before reading the body if the
/// announced length exceeds [`MAX_FRAME_SIZE`].
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::Coordinates;
    use crate::gossip::GossipCacheEntry;
    use uuid::Uuid;

    fn info() -> NodeInfo {
        NodeInfo::new(
            Uuid::new_v4(),
            "a",
            "c",
            Coordinates::origin(),
            "127.0.0.1:5000".parse().unwrap(),
        )
    }

    fn gossip_request(entries: usize) -> Request {
        let entries = (0..entries).map(|_| GossipCacheEntry::new(info())).collect();
        Request::Gossip(GossipMessage::new(info(), info(), entries, true, "cyclon"))
    }

    #[tokio::test]
    async fn frame_survives_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let request = gossip_request(3);

        write_frame(&mut client, &request).await.unwrap();
        let received: Request = read_frame(&mut server).await.unwrap();

        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn oversized_frame_header_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes())
            .await
            .unwrap();

        let result: Result<Request> = read_frame(&mut server).await;
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let result: Result<Request> = decode(b"{not json");
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn datagram_limit_is_enforced() {
        assert!(encode_datagram(&gossip_request(10)).is_ok());
        assert!(matches!(
            encode_datagram(&gossip_request(1_000)),
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn request_reports_sender() {
        let request = gossip_request(0);
        let Request::Gossip(message) = &request else {
            unreachable!()
        };
        assert_eq!(request.sender(), message.sender());
        assert_eq!(request.kind(), "gossip");
    }
}
