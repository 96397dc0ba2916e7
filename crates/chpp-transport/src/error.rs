use std::fmt;

use crate::datagram::Datagram;

/// Errors surfaced by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The payload exceeds what the length field can describe.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Rejected transport configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// The retry budget ran out; the link needs a reset handshake.
    #[error("no acknowledgement for seq {seq} after {attempts} transmissions")]
    RetriesExhausted { seq: u8, attempts: u32 },

    /// Link-level error.
    #[error("link error: {0}")]
    Link(#[from] chpp_link::LinkError),

    /// An I/O error occurred on the link.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed before the operation completed.
    #[error("link closed")]
    Closed,
}

/// Malformed packet header. Recoverable: the packet is dropped and NACKed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("header truncated ({0} bytes)")]
    Truncated(usize),

    #[error("unknown flag bits {0:#04x}")]
    UnknownFlags(u8),

    #[error("unknown error code {0:#04x}")]
    UnknownError(u8),

    #[error("reserved header bits set ({0:#06x})")]
    ReservedBits(u16),

    #[error("payload length {length} exceeds mtu {max}")]
    TooLong { length: usize, max: usize },
}

/// Why a datagram was not accepted for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueErrorKind {
    #[error("datagram queue full (capacity {0})")]
    QueueFull(usize),

    #[error("empty datagram")]
    Empty,

    #[error("datagram too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("transport failed; reset required")]
    LinkDown,

    #[error("endpoint shut down")]
    Shutdown,
}

/// Rejected enqueue. Ownership of the datagram goes back to the caller.
#[derive(thiserror::Error)]
#[error("datagram rejected: {kind}")]
pub struct EnqueueError {
    kind: EnqueueErrorKind,
    datagram: Datagram,
}

impl EnqueueError {
    pub fn new(kind: EnqueueErrorKind, datagram: Datagram) -> Self {
        Self { kind, datagram }
    }

    pub fn kind(&self) -> EnqueueErrorKind {
        self.kind
    }

    /// Recover the rejected datagram.
    pub fn into_datagram(self) -> Datagram {
        self.datagram
    }
}

impl fmt::Debug for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueError")
            .field("kind", &self.kind)
            .field("len", &self.datagram.len())
            .finish()
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
