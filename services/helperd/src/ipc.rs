//! TOLLGATE Helper Daemon - Wire Framing
//! File Path: services/helperd/src/ipc.rs
//! Responsibility: Length-prefixed bincode framing over any byte stream
//!
//! Frame: 4-byte little-endian length, then a bincode (serde) payload.
//! Payload lengths come from the peer, so decoding never allocates more
//! than one frame's worth of memory.

use std::io::{self, Read, Write};

use bincode::config::Config;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum message size (16 KB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Deserialization error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Message too large: {size} bytes (max {MAX_MESSAGE_SIZE})")]
    MessageTooLarge { size: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message header")]
    InvalidHeader,
}

pub type Result<T> = std::result::Result<T, IpcError>;

/// bincode configuration shared by both ends.
///
/// The limit caps every length prefix inside a payload (strings, vectors),
/// not only the frame header.
fn wire_config() -> impl Config {
    bincode::config::standard().with_limit::<MAX_MESSAGE_SIZE>()
}

/// Write one framed message.
pub fn send<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let data = bincode::serde::encode_to_vec(msg, wire_config())?;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge { size: data.len() });
    }

    // Single write for header + data
    let mut buffer = Vec::with_capacity(4 + data.len());
    buffer.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buffer.extend_from_slice(&data);

    writer.write_all(&buffer)?;
    writer.flush()?;
    Ok(())
}

/// Read one framed message (blocking).
pub fn recv<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut len_bytes = [0u8; 4];
    read_exact(reader, &mut len_bytes)?;

    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge { size: len });
    }

    if len == 0 {
        return Err(IpcError::InvalidHeader);
    }

    let mut data = vec![0u8; len];
    read_exact(reader, &mut data)?;

    let (msg, _) = bincode::serde::decode_from_slice(&data, wire_config())?;
    Ok(msg)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => IpcError::ConnectionClosed,
        _ => IpcError::Io(e),
    })
}
