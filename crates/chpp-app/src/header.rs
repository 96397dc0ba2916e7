use bytes::{BufMut, Bytes, BytesMut};
use chpp_transport::Datagram;
use serde::Serialize;

use crate::error::{AppError, Result};

/// App header: handle (1) + type (1) + transaction (1) + command (2) + error (1).
pub const APP_HEADER_SIZE: usize = 6;

/// Direction and kind of an app message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum MessageType {
    ClientRequest = 0,
    ServerResponse = 1,
    ClientNotification = 2,
    ServerNotification = 3,
}

impl MessageType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ClientRequest),
            1 => Some(Self::ServerResponse),
            2 => Some(Self::ClientNotification),
            3 => Some(Self::ServerNotification),
            _ => None,
        }
    }

    /// Client-originated messages are handled by the service side.
    pub fn is_for_service(self) -> bool {
        matches!(self, Self::ClientRequest | Self::ClientNotification)
    }
}

/// App-level error code carried in every app header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, thiserror::Error)]
#[repr(u8)]
pub enum AppErrorCode {
    #[default]
    #[error("none")]
    None = 0,
    #[error("invalid command")]
    InvalidCommand = 1,
    #[error("invalid argument")]
    InvalidArg = 2,
    #[error("busy")]
    Busy = 3,
    #[error("out of memory")]
    OutOfMemory = 4,
    #[error("unsupported")]
    Unsupported = 5,
    #[error("timeout")]
    Timeout = 6,
    #[error("disabled")]
    Disabled = 7,
    #[error("rate limited")]
    RateLimited = 8,
    #[error("blocked")]
    Blocked = 9,
    #[error("invalid length")]
    InvalidLength = 10,
    #[error("not ready")]
    NotReady = 11,
    #[error("beyond protocol scope")]
    BeyondChpp = 12,
    #[error("unspecified")]
    Unspecified = 255,
}

impl AppErrorCode {
    /// Unknown codes decode as [`AppErrorCode::Unspecified`].
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::InvalidCommand,
            2 => Self::InvalidArg,
            3 => Self::Busy,
            4 => Self::OutOfMemory,
            5 => Self::Unsupported,
            6 => Self::Timeout,
            7 => Self::Disabled,
            8 => Self::RateLimited,
            9 => Self::Blocked,
            10 => Self::InvalidLength,
            11 => Self::NotReady,
            12 => Self::BeyondChpp,
            _ => Self::Unspecified,
        }
    }

    pub fn is_error(self) -> bool {
        self != Self::None
    }
}

/// Decoded app header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppHeader {
    pub handle: u8,
    pub message_type: MessageType,
    pub transaction: u8,
    pub command: u16,
    pub error: AppErrorCode,
}

impl AppHeader {
    pub fn new(handle: u8, message_type: MessageType, transaction: u8, command: u16) -> Self {
        Self {
            handle,
            message_type,
            transaction,
            command,
            error: AppErrorCode::None,
        }
    }

    /// Header for the response to this request: same handle, transaction and command.
    pub fn response(&self) -> Self {
        Self {
            message_type: MessageType::ServerResponse,
            error: AppErrorCode::None,
            ..*self
        }
    }

    pub fn with_error(self, error: AppErrorCode) -> Self {
        Self { error, ..self }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.handle);
        dst.put_u8(self.message_type as u8);
        dst.put_u8(self.transaction);
        dst.put_u16_le(self.command);
        dst.put_u8(self.error as u8);
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < APP_HEADER_SIZE {
            return Err(AppError::Malformed(format!(
                "{} bytes is shorter than the {APP_HEADER_SIZE}-byte app header",
                src.len()
            )));
        }
        let message_type = MessageType::from_wire(src[1])
            .ok_or_else(|| AppError::Malformed(format!("unknown message type {:#04x}", src[1])))?;
        Ok(Self {
            handle: src[0],
            message_type,
            transaction: src[2],
            command: u16::from_le_bytes([src[3], src[4]]),
            error: AppErrorCode::from_wire(src[5]),
        })
    }
}

/// An app message: header plus command-specific body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: AppHeader,
    pub body: Bytes,
}

impl Message {
    pub fn new(header: AppHeader, body: impl Into<Bytes>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }

    /// Split a received datagram into header and body without copying.
    pub fn parse(datagram: Datagram) -> Result<Self> {
        let bytes = datagram.into_bytes();
        let header = AppHeader::decode(&bytes)?;
        Ok(Self {
            header,
            body: bytes.slice(APP_HEADER_SIZE..),
        })
    }

    /// Total datagram length, header included.
    pub fn wire_len(&self) -> usize {
        APP_HEADER_SIZE + self.body.len()
    }

    pub fn into_datagram(self) -> Datagram {
        encode_message(self.header, &self.body)
    }
}

/// Build the datagram for `header` followed by `body`.
pub fn encode_message(header: AppHeader, body: &[u8]) -> Datagram {
    let mut buf = BytesMut::with_capacity(APP_HEADER_SIZE + body.len());
    header.encode(&mut buf);
    buf.put_slice(body);
    Datagram::new(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_bit_exact() {
        let header = AppHeader {
            handle: 0x10,
            message_type: MessageType::ServerResponse,
            transaction: 7,
            command: 0x0201,
            error: AppErrorCode::InvalidLength,
        };
        let datagram = encode_message(header, &[0xEE]);
        assert_eq!(datagram.as_bytes(), &[0x10, 1, 7, 0x01, 0x02, 10, 0xEE]);
    }

    #[test]
    fn parse_splits_header_and_body() {
        let header = AppHeader::new(2, MessageType::ClientRequest, 9, 1);
        let message = Message::parse(encode_message(header, b"body")).unwrap();
        assert_eq!(message.header, header);
        assert_eq!(message.body.as_ref(), b"body");
        assert_eq!(message.wire_len(), APP_HEADER_SIZE + 4);
    }

    #[test]
    fn short_datagram_is_malformed() {
        let err = Message::parse(Datagram::new(vec![1, 0, 0])).unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
    }

    #[test]
    fn unknown_type_is_malformed() {
        let err = AppHeader::decode(&[1, 9, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
    }

    #[test]
    fn unknown_error_code_is_unspecified() {
        let header = AppHeader::decode(&[1, 1, 0, 0, 0, 200]).unwrap();
        assert_eq!(header.error, AppErrorCode::Unspecified);
    }

    #[test]
    fn response_keeps_correlation_fields() {
        let request = AppHeader::new(0x11, MessageType::ClientRequest, 42, 3);
        let response = request.response().with_error(AppErrorCode::Busy);
        assert_eq!(response.handle, 0x11);
        assert_eq!(response.transaction, 42);
        assert_eq!(response.command, 3);
        assert_eq!(response.message_type, MessageType::ServerResponse);
        assert_eq!(response.error, AppErrorCode::Busy);
    }
}
