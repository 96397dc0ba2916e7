//! Reliable datagram transport over an unreliable byte link.
//!
//! Every packet on the wire is framed as:
//! - A 2-byte preamble ("hC") for stream synchronization
//! - An 8-byte header: flags, error nibble, ack sequence, sequence, length
//! - Up to MTU payload bytes
//! - A CRC-32 footer over header and payload
//!
//! Datagrams larger than the MTU are fragmented. One packet is in flight at
//! a time; it is retransmitted until acknowledged or the retry budget runs out.

pub mod config;
pub mod datagram;
pub mod deframer;
pub mod endpoint;
pub mod error;
pub mod framer;
pub mod packet;
pub mod queue;
pub mod transport;

pub use config::{EndpointConfig, TransportConfig, DEFAULT_MTU};
pub use datagram::{Datagram, DatagramId};
pub use deframer::{DeframeEvent, DeframeState, Deframer};
pub use endpoint::{DatagramSender, Endpoint, SharedTransport, TransportHandler};
pub use error::{EnqueueError, EnqueueErrorKind, PacketError, Result, TransportError};
pub use framer::frame_packet;
pub use packet::{
    encode_packet, Packet, PacketFlags, PacketHeader, TransportErrorCode, HEADER_SIZE, MAX_PAYLOAD,
    PACKET_OVERHEAD, PREAMBLE,
};
pub use queue::DatagramQueue;
pub use transport::{LinkState, Transport, TransportEvent, TransportStats};
