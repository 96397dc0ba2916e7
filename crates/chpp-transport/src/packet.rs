use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{PacketError, Result, TransportError};

/// Preamble bytes: "hC" (0x68 0x43).
pub const PREAMBLE: [u8; 2] = [0x68, 0x43];

/// Packet header: flags (1) + error (1) + ack_seq (1) + seq (1) + length (2) + reserved (2).
pub const HEADER_SIZE: usize = 8;

/// CRC-32 footer.
pub const FOOTER_SIZE: usize = 4;

/// Bytes on the wire around every payload.
pub const PACKET_OVERHEAD: usize = PREAMBLE.len() + HEADER_SIZE + FOOTER_SIZE;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// CRC-32/ISO-HDLC (IEEE 802.3). Part of wire-format version 1.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

bitflags! {
    /// Packet flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        /// More fragments of the same datagram follow.
        const UNFINISHED = 0x01;
        /// Sender restarted its sequence numbering.
        const RESET = 0x02;
        /// Sender resynchronized after the peer's RESET.
        const RESET_ACK = 0x04;
    }
}

/// Transport error code carried in the low nibble of the header error byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TransportErrorCode {
    #[default]
    None = 0,
    Checksum = 1,
    OutOfMemory = 2,
    Busy = 3,
    Header = 4,
    Order = 5,
    Timeout = 6,
    MaxRetries = 7,
}

impl TransportErrorCode {
    /// Decode a wire value; the high nibble is reserved and must be clear.
    pub fn from_wire(value: u8) -> Option<Self> {
        let code = match value {
            0 => Self::None,
            1 => Self::Checksum,
            2 => Self::OutOfMemory,
            3 => Self::Busy,
            4 => Self::Header,
            5 => Self::Order,
            6 => Self::Timeout,
            7 => Self::MaxRetries,
            _ => return None,
        };
        Some(code)
    }

    pub fn is_error(self) -> bool {
        self != Self::None
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    pub error: TransportErrorCode,
    /// Next sequence number the sender expects to receive.
    pub ack_seq: u8,
    pub seq: u8,
    /// Payload bytes between header and footer.
    pub length: u16,
}

impl PacketHeader {
    /// Serialize into exactly [`HEADER_SIZE`] bytes.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.flags.bits());
        dst.put_u8(self.error as u8);
        dst.put_u8(self.ack_seq);
        dst.put_u8(self.seq);
        dst.put_u16_le(self.length);
        dst.put_u16_le(0);
    }

    /// Parse a header, rejecting anything a well-behaved peer would not send.
    pub fn decode(src: &[u8], max_payload: usize) -> std::result::Result<Self, PacketError> {
        if src.len() < HEADER_SIZE {
            return Err(PacketError::Truncated(src.len()));
        }

        let flags = PacketFlags::from_bits(src[0]).ok_or(PacketError::UnknownFlags(src[0]))?;
        let error = TransportErrorCode::from_wire(src[1]).ok_or(PacketError::UnknownError(src[1]))?;
        let length = u16::from_le_bytes([src[4], src[5]]);
        let reserved = u16::from_le_bytes([src[6], src[7]]);

        if reserved != 0 {
            return Err(PacketError::ReservedBits(reserved));
        }
        if length as usize > max_payload {
            return Err(PacketError::TooLong {
                length: length as usize,
                max: max_payload,
            });
        }

        Ok(Self {
            flags,
            error,
            ack_seq: src[2],
            seq: src[3],
            length,
        })
    }

    /// True when the packet carries no payload (pure ACK or control).
    pub fn is_ack_only(&self) -> bool {
        self.length == 0
    }
}

/// A validated packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

/// CRC over header and payload as transmitted.
pub fn checksum(header: &[u8], payload: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(header);
    digest.update(payload);
    digest.finalize()
}

/// Encode a packet into the wire format.
///
/// The header's `length` field is taken from `payload`.
///
/// Wire format:
/// ```text
/// ┌──────────┬───────┬───────┬─────────┬─────┬──────────┬──────────┬─────────┬──────────┐
/// │ Preamble │ Flags │ Error │ Ack seq │ Seq │ Length   │ Reserved │ Payload │ CRC-32   │
/// │ 0x68 0x43│ (1B)  │ (1B)  │ (1B)    │ (1B)│ (2B LE)  │ (2B, 0)  │ (Len B) │ (4B LE)  │
/// └──────────┴───────┴───────┴─────────┴─────┴──────────┴──────────┴─────────┴──────────┘
/// ```
pub fn encode_packet(header: PacketHeader, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(TransportError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let header = PacketHeader {
        length: payload.len() as u16,
        ..header
    };

    dst.reserve(PACKET_OVERHEAD + payload.len());
    dst.put_slice(&PREAMBLE);
    let header_start = dst.len();
    header.encode(dst);
    dst.put_slice(payload);
    let crc = checksum(&dst[header_start..header_start + HEADER_SIZE], payload);
    dst.put_u32_le(crc);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_header(seq: u8, ack_seq: u8) -> PacketHeader {
        PacketHeader {
            seq,
            ack_seq,
            ..PacketHeader::default()
        }
    }

    #[test]
    fn crc_matches_published_check_value() {
        assert_eq!(checksum(b"1234", b"56789"), 0xCBF4_3926);
    }

    #[test]
    fn encoded_layout_is_bit_exact() {
        let mut buf = BytesMut::new();
        let header = PacketHeader {
            flags: PacketFlags::UNFINISHED,
            error: TransportErrorCode::Checksum,
            ack_seq: 7,
            seq: 9,
            length: 0,
        };
        encode_packet(header, &[0xAA, 0xBB, 0xCC], &mut buf).unwrap();

        assert_eq!(buf.len(), PACKET_OVERHEAD + 3);
        assert_eq!(&buf[..2], &PREAMBLE);
        assert_eq!(&buf[2..10], &[0x01, 0x01, 7, 9, 3, 0, 0, 0]);
        assert_eq!(&buf[10..13], &[0xAA, 0xBB, 0xCC]);

        let crc = checksum(&buf[2..10], &buf[10..13]);
        assert_eq!(&buf[13..], &crc.to_le_bytes());
    }

    #[test]
    fn header_decode_reads_back_fields() {
        let mut buf = BytesMut::new();
        let header = PacketHeader {
            flags: PacketFlags::RESET,
            length: 513,
            ..data_header(200, 17)
        };
        header.encode(&mut buf);

        let decoded = PacketHeader::decode(&buf, MAX_PAYLOAD).unwrap();
        assert_eq!(decoded, header);
        assert!(!decoded.is_ack_only());
    }

    #[test]
    fn header_rejects_unknown_flags() {
        let raw = [0x80, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            PacketHeader::decode(&raw, MAX_PAYLOAD),
            Err(PacketError::UnknownFlags(0x80))
        );
    }

    #[test]
    fn header_rejects_high_error_nibble() {
        let raw = [0, 0x15, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            PacketHeader::decode(&raw, MAX_PAYLOAD),
            Err(PacketError::UnknownError(0x15))
        );
    }

    #[test]
    fn header_rejects_reserved_bits() {
        let raw = [0, 0, 0, 0, 0, 0, 1, 0];
        assert_eq!(
            PacketHeader::decode(&raw, MAX_PAYLOAD),
            Err(PacketError::ReservedBits(1))
        );
    }

    #[test]
    fn header_rejects_length_over_mtu() {
        let raw = [0, 0, 0, 0, 0x00, 0x01, 0, 0];
        assert_eq!(
            PacketHeader::decode(&raw, 128),
            Err(PacketError::TooLong {
                length: 256,
                max: 128
            })
        );
    }

    #[test]
    fn header_rejects_short_input() {
        assert_eq!(
            PacketHeader::decode(&[0, 0, 0], MAX_PAYLOAD),
            Err(PacketError::Truncated(3))
        );
    }

    #[test]
    fn oversized_payload_is_refused() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let mut buf = BytesMut::new();
        let err = encode_packet(data_header(0, 0), &payload, &mut buf).unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_payload_is_ack_only() {
        let mut buf = BytesMut::new();
        encode_packet(data_header(3, 4), &[], &mut buf).unwrap();
        let decoded = PacketHeader::decode(&buf[2..10], MAX_PAYLOAD).unwrap();
        assert!(decoded.is_ack_only());
        assert_eq!(buf.len(), PACKET_OVERHEAD);
    }
}
