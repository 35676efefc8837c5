//! Length-prefixed framing for the TCP transport.
//!
//! ```text
//! --------------------------------
//! | len (1, 2 or 4 bytes) | data |
//! --------------------------------
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tollgate_codec::ByteOrder;

use crate::DEFAULT_MAX_MSG_LEN;
use crate::error::{ConnError, NetworkError};

const DEFAULT_LEN_MSG_LEN: usize = 2;
const DEFAULT_MIN_MSG_LEN: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgParser {
    len_msg_len: usize,
    min_msg_len: u32,
    max_msg_len: u32,
    byte_order: ByteOrder,
}

impl Default for MsgParser {
    fn default() -> Self {
        Self {
            len_msg_len: DEFAULT_LEN_MSG_LEN,
            min_msg_len: DEFAULT_MIN_MSG_LEN,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            byte_order: ByteOrder::BigEndian,
        }
    }
}

impl MsgParser {
    /// `max_msg_len` is clamped to what a prefix of `len_msg_len` bytes can
    /// express, and `min_msg_len` to `max_msg_len`.
    pub fn new(
        len_msg_len: usize,
        min_msg_len: u32,
        max_msg_len: u32,
        byte_order: ByteOrder,
    ) -> Result<Self, NetworkError> {
        let limit = match len_msg_len {
            1 => u32::from(u8::MAX),
            2 => u32::from(u16::MAX),
            4 => u32::MAX,
            other => return Err(NetworkError::InvalidLenMsgLen(other)),
        };
        let max_msg_len = max_msg_len.min(limit);
        Ok(Self {
            len_msg_len,
            min_msg_len: min_msg_len.min(max_msg_len),
            max_msg_len,
            byte_order,
        })
    }

    pub fn max_msg_len(&self) -> u32 {
        self.max_msg_len
    }

    /// Read one length-prefixed message.
    pub async fn read<R: AsyncRead + Unpin>(&self, reader: &mut R) -> Result<Vec<u8>, ConnError> {
        let mut head = [0u8; 4];
        reader.read_exact(&mut head[..self.len_msg_len]).await?;
        let len = match self.len_msg_len {
            1 => u32::from(head[0]),
            2 => u32::from(self.byte_order.decode_u16([head[0], head[1]])),
            _ => self.byte_order.decode_u32(head),
        };
        self.check(len as usize)?;

        let mut data = vec![0u8; len as usize];
        reader.read_exact(&mut data).await?;
        Ok(data)
    }

    /// Join `parts` behind a length prefix.
    pub fn encode(&self, parts: &[&[u8]]) -> Result<Vec<u8>, ConnError> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        self.check(len)?;

        let mut out = Vec::with_capacity(self.len_msg_len + len);
        // `check` bounds len by the prefix capacity, so the casts are lossless.
        match self.len_msg_len {
            1 => out.push(len as u8),
            2 => out.extend_from_slice(&self.byte_order.encode_u16(len as u16)),
            _ => out.extend_from_slice(&self.byte_order.encode_u32(len as u32)),
        }
        for part in parts {
            out.extend_from_slice(part);
        }
        Ok(out)
    }

    /// Write one message directly (client side).
    pub async fn write<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        parts: &[&[u8]],
    ) -> Result<(), ConnError> {
        let buf = self.encode(parts)?;
        writer.write_all(&buf).await?;
        Ok(())
    }

    fn check(&self, len: usize) -> Result<(), ConnError> {
        if len > self.max_msg_len as usize {
            return Err(ConnError::MessageTooLong {
                len,
                max: self.max_msg_len as usize,
            });
        }
        if len < self.min_msg_len as usize {
            return Err(ConnError::MessageTooShort {
                len,
                min: self.min_msg_len as usize,
            });
        }
        Ok(())
    }
}
