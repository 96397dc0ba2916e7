use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::packet::MAX_PAYLOAD;

/// Default payload bytes per packet.
pub const DEFAULT_MTU: usize = 1024;

/// Default number of outbound datagrams that may wait in the queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Default time to wait for an ACK before retransmitting.
pub const DEFAULT_RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Default retransmissions of one packet before the link is declared failed.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Default cap on a reassembled datagram: 64 KiB.
pub const DEFAULT_MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Configuration for one transport instance.
///
/// Both ends of a link must agree on `mtu`; a receiver drops packets longer
/// than its own MTU as malformed.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum payload bytes per packet.
    pub mtu: usize,
    /// Outbound datagram queue capacity.
    pub queue_capacity: usize,
    /// ACK wait before retransmitting the in-flight packet.
    pub retransmit_timeout: Duration,
    /// Retransmissions allowed per packet before the transport fails.
    pub max_retries: u32,
    /// Largest datagram accepted for sending or reassembly.
    pub max_datagram_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retransmit_timeout: DEFAULT_RETRANSMIT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            max_datagram_len: DEFAULT_MAX_DATAGRAM_LEN,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mtu == 0 || self.mtu > MAX_PAYLOAD {
            return Err(TransportError::InvalidConfig(format!(
                "mtu must be within 1..={MAX_PAYLOAD}, got {}",
                self.mtu
            )));
        }
        if self.queue_capacity == 0 {
            return Err(TransportError::InvalidConfig(
                "queue capacity must be non-zero".to_string(),
            ));
        }
        if self.retransmit_timeout.is_zero() {
            return Err(TransportError::InvalidConfig(
                "retransmit timeout must be non-zero".to_string(),
            ));
        }
        if self.max_datagram_len == 0 {
            return Err(TransportError::InvalidConfig(
                "max datagram length must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default poll interval of the RX thread while the link is quiet.
pub const DEFAULT_READ_POLL: Duration = Duration::from_millis(50);

/// Threaded driver settings.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Read timeout used so the RX thread can observe shutdown.
    pub read_poll: Duration,
    /// Start a new reset handshake after the retry budget runs out.
    pub reset_on_fatal: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            read_poll: DEFAULT_READ_POLL,
            reset_on_fatal: true,
        }
    }
}
