use std::time::Duration;

use chpp_transport::{EnqueueError, EnqueueErrorKind};

use crate::header::AppErrorCode;

/// Errors that can occur in app-layer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// The transport refused the datagram; nothing was sent.
    #[error("enqueue failed: {0}")]
    Enqueue(EnqueueErrorKind),

    /// The peer answered with an error code.
    #[error("peer returned error: {0}")]
    Remote(AppErrorCode),

    /// No response within the wait budget. The request is not retried.
    #[error("no response after {0:?}")]
    Timeout(Duration),

    /// The client has not been bound to a peer service handle.
    #[error("client is not bound to a service handle")]
    NotBound,

    /// A blocking send was attempted from inside a dispatch callback.
    #[error("blocking send from dispatch context would deadlock")]
    WouldDeadlock,

    /// A blocking request with this command is already outstanding.
    #[error("request for command {0:#06x} already pending")]
    RequestPending(u16),

    /// The app was closed; no further traffic is possible.
    #[error("app closed")]
    Closed,

    /// The link was reset while the request was outstanding.
    #[error("link reset while waiting for response")]
    LinkReset,

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// All negotiated handles are in use.
    #[error("registration table full ({0} entries)")]
    RegistrationFull(usize),

    /// Inbound datagram could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl From<EnqueueError> for AppError {
    fn from(err: EnqueueError) -> Self {
        Self::Enqueue(err.kind())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
