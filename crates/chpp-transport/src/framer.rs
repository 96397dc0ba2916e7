use std::io::{ErrorKind, Write};

use bytes::{Bytes, BytesMut};

use crate::error::{Result, TransportError};
use crate::packet::{encode_packet, PacketHeader, PACKET_OVERHEAD};

/// One MTU-sized slice of a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub bytes: Bytes,
    /// Offset just past this fragment within the datagram.
    pub end: usize,
    /// More fragments follow.
    pub unfinished: bool,
}

/// Slice the fragment of `payload` that starts at `offset`.
///
/// Slicing shares the datagram's buffer; nothing is copied.
pub fn fragment_at(payload: &Bytes, offset: usize, mtu: usize) -> Fragment {
    let start = offset.min(payload.len());
    let end = start.saturating_add(mtu).min(payload.len());
    Fragment {
        bytes: payload.slice(start..end),
        end,
        unfinished: end < payload.len(),
    }
}

/// Encode one packet into a standalone buffer ready for the link.
pub fn frame_packet(header: PacketHeader, payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(PACKET_OVERHEAD + payload.len());
    encode_packet(header, payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Write a framed packet in full (blocking), then flush.
pub fn write_packet<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match writer.write(&bytes[offset..]) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(TransportError::Io(err)),
        }
    }

    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(TransportError::Io(err)),
        }
    }
}
