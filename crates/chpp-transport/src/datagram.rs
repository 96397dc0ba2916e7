use std::fmt;

use bytes::Bytes;

/// Identifies an enqueued datagram until its last fragment is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatagramId(pub u64);

impl fmt::Display for DatagramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dg-{}", self.0)
    }
}

/// One logical application message, possibly spanning several packets.
///
/// Deliberately not `Clone`: a datagram has exactly one owner at a time, and
/// its memory is released when that owner drops it.
#[derive(Debug, PartialEq, Eq)]
pub struct Datagram {
    payload: Bytes,
}

impl Datagram {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Shared view of the payload, used to slice fragments without copying.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_bytes(self) -> Bytes {
        self.payload
    }
}

impl AsRef<[u8]> for Datagram {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}

impl From<Vec<u8>> for Datagram {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<Bytes> for Datagram {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}
