use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::packet::{checksum, Packet, PacketHeader, TransportErrorCode, FOOTER_SIZE, HEADER_SIZE, PREAMBLE};

/// RX parse position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeframeState {
    /// Hunting for the preamble; `matched` preamble bytes seen so far.
    AwaitingPreamble { matched: usize },
    Header,
    Payload,
    Footer,
}

/// Outcome of one packet-sized unit of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeframeEvent {
    /// A packet whose checksum validated.
    Packet(Packet),
    /// Bytes that framed like a packet but failed validation.
    Corrupt(TransportErrorCode),
}

/// Incremental byte-stream to packet parser.
///
/// Input may be split at any byte boundary, including inside the preamble.
/// Sequencing is not its concern; see [`crate::Transport`].
#[derive(Debug)]
pub struct Deframer {
    state: DeframeState,
    max_payload: usize,
    header_raw: [u8; HEADER_SIZE],
    header: PacketHeader,
    collected: usize,
    payload: BytesMut,
    footer: [u8; FOOTER_SIZE],
}

impl Deframer {
    /// Packets announcing more than `max_payload` bytes are rejected at the header.
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: DeframeState::AwaitingPreamble { matched: 0 },
            max_payload,
            header_raw: [0; HEADER_SIZE],
            header: PacketHeader::default(),
            collected: 0,
            payload: BytesMut::new(),
            footer: [0; FOOTER_SIZE],
        }
    }

    pub fn state(&self) -> DeframeState {
        self.state
    }

    /// Drop any partial packet and hunt for a fresh preamble.
    pub fn reset(&mut self) {
        self.state = DeframeState::AwaitingPreamble { matched: 0 };
        self.collected = 0;
        self.payload.clear();
    }

    /// Consume `input`, appending one event per completed packet.
    pub fn feed(&mut self, mut input: &[u8], events: &mut Vec<DeframeEvent>) {
        while !input.is_empty() {
            match self.state {
                DeframeState::AwaitingPreamble { matched } => {
                    let byte = input[0];
                    input = &input[1..];
                    self.state = match_preamble(matched, byte);
                    if self.state == DeframeState::Header {
                        self.collected = 0;
                    }
                }
                DeframeState::Header => {
                    let take = (HEADER_SIZE - self.collected).min(input.len());
                    self.header_raw[self.collected..self.collected + take]
                        .copy_from_slice(&input[..take]);
                    self.collected += take;
                    input = &input[take..];
                    if self.collected == HEADER_SIZE {
                        self.finish_header(events);
                    }
                }
                DeframeState::Payload => {
                    let wanted = self.header.length as usize - self.payload.len();
                    let take = wanted.min(input.len());
                    self.payload.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    if self.payload.len() == self.header.length as usize {
                        self.collected = 0;
                        self.state = DeframeState::Footer;
                    }
                }
                DeframeState::Footer => {
                    let take = (FOOTER_SIZE - self.collected).min(input.len());
                    self.footer[self.collected..self.collected + take]
                        .copy_from_slice(&input[..take]);
                    self.collected += take;
                    input = &input[take..];
                    if self.collected == FOOTER_SIZE {
                        events.push(self.finish_packet());
                    }
                }
            }
        }
    }

    fn finish_header(&mut self, events: &mut Vec<DeframeEvent>) {
        match PacketHeader::decode(&self.header_raw, self.max_payload) {
            Ok(header) => {
                self.header = header;
                self.payload.clear();
                self.payload.reserve(header.length as usize);
                self.collected = 0;
                self.state = if header.is_ack_only() {
                    DeframeState::Footer
                } else {
                    DeframeState::Payload
                };
            }
            Err(err) => {
                debug!(error = %err, "dropping packet with malformed header");
                events.push(DeframeEvent::Corrupt(TransportErrorCode::Header));
                self.reset();
            }
        }
    }

    fn finish_packet(&mut self) -> DeframeEvent {
        let payload: Bytes = self.payload.split().freeze();
        let expected = checksum(&self.header_raw, &payload);
        let received = u32::from_le_bytes(self.footer);
        self.reset();

        if expected != received {
            debug!(
                seq = self.header.seq,
                len = payload.len(),
                expected = format_args!("{expected:#010x}"),
                received = format_args!("{received:#010x}"),
                "checksum mismatch"
            );
            return DeframeEvent::Corrupt(TransportErrorCode::Checksum);
        }

        trace!(
            seq = self.header.seq,
            ack_seq = self.header.ack_seq,
            len = payload.len(),
            "packet deframed"
        );
        DeframeEvent::Packet(Packet {
            header: self.header,
            payload,
        })
    }
}

fn match_preamble(matched: usize, byte: u8) -> DeframeState {
    if byte == PREAMBLE[matched] {
        if matched + 1 == PREAMBLE.len() {
            DeframeState::Header
        } else {
            DeframeState::AwaitingPreamble {
                matched: matched + 1,
            }
        }
    } else if byte == PREAMBLE[0] {
        DeframeState::AwaitingPreamble { matched: 1 }
    } else {
        DeframeState::AwaitingPreamble { matched: 0 }
    }
}
