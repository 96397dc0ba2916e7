//! Sans-IO transport state machine.
//!
//! [`Transport`] owns both directions of one link: the RX deframer, sequence
//! tracking and reassembly, and the TX queue with its single in-flight packet.
//! Callers push received bytes in with [`Transport::receive`] and pull bytes to
//! send with [`Transport::poll_transmit`]; time is passed in explicitly, so the
//! whole protocol can be driven deterministically.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;
use crate::datagram::{Datagram, DatagramId};
use crate::deframer::{DeframeEvent, Deframer};
use crate::error::{EnqueueError, EnqueueErrorKind, Result, TransportError};
use crate::framer::{fragment_at, frame_packet};
use crate::packet::{Packet, PacketFlags, PacketHeader, TransportErrorCode};
use crate::queue::DatagramQueue;

/// Link synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Our RESET is outstanding; no data flows until the peer's RESET_ACK.
    Resetting,
    Ready,
    /// Retry budget exhausted. Needs [`Transport::reset`] or a peer RESET.
    Failed,
}

/// Upcalls produced by [`Transport::receive`].
#[derive(Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A fully reassembled inbound datagram.
    Datagram(Datagram),
    /// The last fragment of an outbound datagram was acknowledged.
    Sent(DatagramId),
    /// An already synchronized peer restarted its sequence numbering.
    PeerReset,
    /// Our reset handshake completed.
    Synchronized,
}

/// Transport counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub retransmissions: u64,
    pub checksum_errors: u64,
    pub header_errors: u64,
    pub out_of_order: u64,
    pub duplicates: u64,
    pub oversized_datagrams: u64,
    pub resets_sent: u64,
    pub peer_resets: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    /// A data fragment ending at `end` within the head datagram.
    Data { end: usize },
    Reset,
}

/// The single unacknowledged packet.
#[derive(Debug)]
struct PendingPacket {
    kind: PendingKind,
    seq: u8,
    flags: PacketFlags,
    payload: Bytes,
    /// `None` means due immediately (never sent, or NACKed).
    sent_at: Option<Instant>,
    transmissions: u32,
}

impl PendingPacket {
    fn reset() -> Self {
        Self {
            kind: PendingKind::Reset,
            seq: 0,
            flags: PacketFlags::RESET,
            payload: Bytes::new(),
            sent_at: None,
            transmissions: 0,
        }
    }
}

#[derive(Debug, Default)]
struct RxSide {
    expected_seq: u8,
    reassembly: BytesMut,
    /// Dropping the remaining fragments of an oversized datagram.
    discarding: bool,
    ack_owed: bool,
    nack: TransportErrorCode,
    reset_ack_owed: bool,
    /// A peer RESET has been seen since construction.
    peer_synced: bool,
    /// A packet other than RESET or RESET_ACK has arrived since the peer's last RESET.
    peer_active: bool,
}

#[derive(Debug)]
struct TxSide {
    next_seq: u8,
    queue: DatagramQueue,
    pending: Option<PendingPacket>,
    /// Bytes of the head datagram already acknowledged.
    cursor: usize,
    next_id: u64,
}

/// One end of a reliable, sequenced, fragmenting link.
#[derive(Debug)]
pub struct Transport {
    config: TransportConfig,
    state: LinkState,
    deframer: Deframer,
    rx: RxSide,
    tx: TxSide,
    stats: TransportStats,
}

impl Transport {
    /// Create a transport in [`LinkState::Resetting`] with its RESET queued.
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            deframer: Deframer::new(config.mtu),
            tx: TxSide {
                next_seq: 0,
                queue: DatagramQueue::new(config.queue_capacity),
                pending: Some(PendingPacket::reset()),
                cursor: 0,
                next_id: 0,
            },
            rx: RxSide::default(),
            state: LinkState::Resetting,
            stats: TransportStats::default(),
            config,
        })
    }

    /// Restart sequence numbering and re-run the reset handshake.
    ///
    /// Queued datagrams survive; a half-sent head datagram restarts from its
    /// first fragment.
    pub fn reset(&mut self) {
        info!(state = ?self.state, "resetting transport");
        self.state = LinkState::Resetting;
        self.deframer.reset();
        self.rx.expected_seq = 0;
        self.rx.reassembly.clear();
        self.rx.discarding = false;
        self.rx.ack_owed = false;
        self.rx.nack = TransportErrorCode::None;
        self.rx.reset_ack_owed = false;
        self.tx.next_seq = 0;
        self.tx.cursor = 0;
        self.tx.pending = Some(PendingPacket::reset());
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Next sequence number expected from the peer.
    pub fn expected_seq(&self) -> u8 {
        self.rx.expected_seq
    }

    /// Sequence number the next payload packet will carry.
    pub fn next_seq(&self) -> u8 {
        self.tx.next_seq
    }

    /// Outbound datagrams not yet fully acknowledged.
    pub fn pending_datagrams(&self) -> usize {
        self.tx.queue.pending()
    }

    /// Drop every queued datagram that has not started transmission.
    pub fn discard_queued(&mut self) -> usize {
        let head_in_flight = self.tx.cursor > 0
            || matches!(
                self.tx.pending,
                Some(PendingPacket {
                    kind: PendingKind::Data { .. },
                    ..
                })
            );
        let mut dropped = self.tx.queue.drain();
        if head_in_flight && !dropped.is_empty() {
            let head = dropped.remove(0);
            if let Err(rejected) = self.tx.queue.enqueue(head.id, head.datagram) {
                debug!(len = rejected.len(), "in-flight datagram lost while discarding");
            }
        }
        dropped.len()
    }

    /// Queue a datagram for transmission.
    ///
    /// On failure the datagram is handed back inside the error and the queue
    /// is untouched.
    pub fn enqueue(&mut self, datagram: Datagram) -> std::result::Result<DatagramId, EnqueueError> {
        let kind = if self.state == LinkState::Failed {
            Some(EnqueueErrorKind::LinkDown)
        } else if datagram.is_empty() {
            Some(EnqueueErrorKind::Empty)
        } else if datagram.len() > self.config.max_datagram_len {
            Some(EnqueueErrorKind::TooLarge {
                size: datagram.len(),
                max: self.config.max_datagram_len,
            })
        } else if self.tx.queue.is_full() {
            Some(EnqueueErrorKind::QueueFull(self.tx.queue.capacity()))
        } else {
            None
        };
        if let Some(kind) = kind {
            return Err(EnqueueError::new(kind, datagram));
        }

        let id = DatagramId(self.tx.next_id);
        let len = datagram.len();
        self.tx
            .queue
            .enqueue(id, datagram)
            .map_err(|datagram| {
                EnqueueError::new(EnqueueErrorKind::QueueFull(self.tx.queue.capacity()), datagram)
            })?;
        self.tx.next_id = self.tx.next_id.wrapping_add(1);
        trace!(%id, len, pending = self.tx.queue.pending(), "datagram queued");
        Ok(id)
    }

    /// Feed bytes from the link.
    pub fn receive(&mut self, bytes: &[u8]) -> Vec<TransportEvent> {
        let mut deframed = Vec::new();
        self.deframer.feed(bytes, &mut deframed);

        let mut events = Vec::new();
        for event in deframed {
            match event {
                DeframeEvent::Packet(packet) => self.on_packet(packet, &mut events),
                DeframeEvent::Corrupt(code) => self.on_corrupt(code),
            }
        }
        events
    }

    /// Next packet to put on the link, if any is due at `now`.
    ///
    /// Returns [`TransportError::RetriesExhausted`] once when the in-flight
    /// packet runs out of retries; the transport is then [`LinkState::Failed`].
    pub fn poll_transmit(&mut self, now: Instant) -> Result<Option<Bytes>> {
        if self.state == LinkState::Failed {
            return Ok(None);
        }

        if self.rx.reset_ack_owed {
            self.rx.reset_ack_owed = false;
            let header = PacketHeader {
                flags: PacketFlags::RESET_ACK,
                ack_seq: self.rx.expected_seq,
                seq: self.unacked_seq(),
                ..PacketHeader::default()
            };
            debug!(seq = header.seq, ack_seq = header.ack_seq, "sending reset ack");
            return self.emit(header, &[]).map(Some);
        }

        if self.tx.pending.is_none() && self.state == LinkState::Ready {
            self.load_next_fragment();
        }

        if self.pending_due(now) {
            return self.transmit_pending(now).map(Some);
        }

        if self.rx.ack_owed {
            self.rx.ack_owed = false;
            let header = PacketHeader {
                error: std::mem::take(&mut self.rx.nack),
                ack_seq: self.rx.expected_seq,
                seq: self.tx.next_seq,
                ..PacketHeader::default()
            };
            trace!(ack_seq = header.ack_seq, error = ?header.error, "sending ack");
            return self.emit(header, &[]).map(Some);
        }

        Ok(None)
    }

    /// Earliest instant at which [`Transport::poll_transmit`] has work.
    ///
    /// `Some(now)` means work is ready immediately; `None` means idle until
    /// new input arrives.
    pub fn poll_timeout(&self, now: Instant) -> Option<Instant> {
        if self.state == LinkState::Failed {
            return None;
        }
        if self.rx.reset_ack_owed || self.rx.ack_owed {
            return Some(now);
        }
        match &self.tx.pending {
            Some(pending) => Some(match pending.sent_at {
                Some(sent_at) => (sent_at + self.config.retransmit_timeout).max(now),
                None => now,
            }),
            None if self.state == LinkState::Ready && !self.tx.queue.is_empty() => Some(now),
            None => None,
        }
    }

    fn on_corrupt(&mut self, code: TransportErrorCode) {
        match code {
            TransportErrorCode::Checksum => self.stats.checksum_errors += 1,
            _ => self.stats.header_errors += 1,
        }
        if self.state == LinkState::Ready {
            self.rx.nack = code;
            self.rx.ack_owed = true;
        }
    }

    fn on_packet(&mut self, packet: Packet, events: &mut Vec<TransportEvent>) {
        self.stats.packets_received += 1;
        let header = packet.header;

        if header.flags.contains(PacketFlags::RESET) {
            self.on_peer_reset(header, events);
            return;
        }

        if header.flags.contains(PacketFlags::RESET_ACK) {
            if self.state == LinkState::Resetting {
                info!(seq = header.seq, "link synchronized");
                self.state = LinkState::Ready;
                self.rx.expected_seq = header.seq;
                self.rx.ack_owed = true;
                self.tx.pending = None;
                events.push(TransportEvent::Synchronized);
            }
            return;
        }

        self.rx.peer_active = true;

        if self.state != LinkState::Ready {
            trace!(seq = header.seq, state = ?self.state, "ignoring packet before synchronization");
            return;
        }

        self.apply_ack(header, events);

        if !packet.payload.is_empty() {
            self.accept_payload(header, packet.payload, events);
        }
    }

    fn on_peer_reset(&mut self, header: PacketHeader, events: &mut Vec<TransportEvent>) {
        self.stats.peer_resets += 1;

        // Until the peer proves it finished its handshake, another RESET is a
        // retransmission: our RESET_ACK was lost.
        if self.rx.peer_synced && !self.rx.peer_active && self.state != LinkState::Failed {
            debug!(seq = header.seq, "repeated peer reset; acknowledging again");
            self.rx.expected_seq = header.seq;
            self.rx.reset_ack_owed = true;
            return;
        }

        let restarted = self.rx.peer_synced;
        self.rx.peer_synced = true;
        self.rx.peer_active = false;

        self.rx.expected_seq = header.seq;
        self.rx.reassembly.clear();
        self.rx.discarding = false;
        self.rx.nack = TransportErrorCode::None;
        // A synchronized side follows its RESET_ACK with a plain ACK so the peer
        // can tell a restart from a retransmitted RESET.
        self.rx.ack_owed = self.state != LinkState::Resetting;
        self.rx.reset_ack_owed = true;
        self.tx.next_seq = header.ack_seq;

        if matches!(
            self.tx.pending.as_ref().map(|p| p.kind),
            Some(PendingKind::Data { .. })
        ) {
            self.tx.pending = None;
        }
        self.tx.cursor = 0;

        if self.state == LinkState::Failed {
            self.state = LinkState::Ready;
        }

        if restarted {
            warn!(seq = header.seq, ack_seq = header.ack_seq, "peer reset the link");
            events.push(TransportEvent::PeerReset);
        } else {
            debug!(seq = header.seq, ack_seq = header.ack_seq, "peer reset received");
        }
    }

    fn apply_ack(&mut self, header: PacketHeader, events: &mut Vec<TransportEvent>) {
        let Some(pending) = self.tx.pending.as_mut() else {
            return;
        };
        let PendingKind::Data { end } = pending.kind else {
            return;
        };

        if header.ack_seq == pending.seq.wrapping_add(1) {
            trace!(seq = pending.seq, "packet acknowledged");
            self.tx.pending = None;
            self.tx.cursor = end;

            let head_len = self.tx.queue.front().map_or(0, |head| head.datagram.len());
            if end >= head_len {
                if let Some(done) = self.tx.queue.dequeue() {
                    self.stats.datagrams_sent += 1;
                    trace!(id = %done.id, len = done.datagram.len(), "datagram delivered");
                    events.push(TransportEvent::Sent(done.id));
                }
                self.tx.cursor = 0;
            }
        } else if header.error.is_error() && pending.sent_at.is_some() {
            debug!(seq = pending.seq, error = ?header.error, "nack received");
            pending.sent_at = None;
        }
    }

    fn accept_payload(&mut self, header: PacketHeader, payload: Bytes, events: &mut Vec<TransportEvent>) {
        let expected = self.rx.expected_seq;

        if header.seq == expected {
            self.rx.expected_seq = expected.wrapping_add(1);
            self.rx.ack_owed = true;
            self.rx.nack = TransportErrorCode::None;
            self.reassemble(header.flags.contains(PacketFlags::UNFINISHED), payload, events);
        } else if header.seq == expected.wrapping_sub(1) {
            debug!(seq = header.seq, "duplicate packet");
            self.stats.duplicates += 1;
            self.rx.ack_owed = true;
        } else {
            debug!(seq = header.seq, expected, "out-of-order packet");
            self.stats.out_of_order += 1;
            self.rx.nack = TransportErrorCode::Order;
            self.rx.ack_owed = true;
        }
    }

    fn reassemble(&mut self, unfinished: bool, payload: Bytes, events: &mut Vec<TransportEvent>) {
        if self.rx.discarding {
            self.rx.discarding = unfinished;
            return;
        }

        if self.rx.reassembly.len() + payload.len() > self.config.max_datagram_len {
            warn!(
                len = self.rx.reassembly.len() + payload.len(),
                max = self.config.max_datagram_len,
                "discarding oversized datagram"
            );
            self.stats.oversized_datagrams += 1;
            self.rx.reassembly.clear();
            self.rx.discarding = unfinished;
            return;
        }

        if !unfinished && self.rx.reassembly.is_empty() {
            self.deliver(Datagram::new(payload), events);
            return;
        }

        self.rx.reassembly.extend_from_slice(&payload);
        if !unfinished {
            let datagram = Datagram::new(self.rx.reassembly.split().freeze());
            self.deliver(datagram, events);
        }
    }

    fn deliver(&mut self, datagram: Datagram, events: &mut Vec<TransportEvent>) {
        self.stats.datagrams_received += 1;
        trace!(len = datagram.len(), "datagram received");
        events.push(TransportEvent::Datagram(datagram));
    }

    fn load_next_fragment(&mut self) {
        let Some(head) = self.tx.queue.front() else {
            return;
        };
        let fragment = fragment_at(head.datagram.payload(), self.tx.cursor, self.config.mtu);
        let flags = if fragment.unfinished {
            PacketFlags::UNFINISHED
        } else {
            PacketFlags::empty()
        };

        let seq = self.tx.next_seq;
        self.tx.next_seq = seq.wrapping_add(1);
        self.tx.pending = Some(PendingPacket {
            kind: PendingKind::Data { end: fragment.end },
            seq,
            flags,
            payload: fragment.bytes,
            sent_at: None,
            transmissions: 0,
        });
    }

    /// Sequence number of the oldest payload packet the peer has not acknowledged.
    fn unacked_seq(&self) -> u8 {
        match self.tx.pending.as_ref() {
            Some(PendingPacket {
                kind: PendingKind::Data { .. },
                seq,
                ..
            }) => *seq,
            _ => self.tx.next_seq,
        }
    }

    fn pending_due(&self, now: Instant) -> bool {
        match self.tx.pending.as_ref() {
            Some(pending) => match pending.sent_at {
                Some(sent_at) => now >= sent_at + self.config.retransmit_timeout,
                None => true,
            },
            None => false,
        }
    }

    fn transmit_pending(&mut self, now: Instant) -> Result<Bytes> {
        let ack_seq = self.rx.expected_seq;
        let nack = std::mem::take(&mut self.rx.nack);
        let max_retries = self.config.max_retries;

        let Some(pending) = self.tx.pending.as_mut() else {
            return Err(TransportError::Closed);
        };

        if pending.transmissions > max_retries {
            let err = TransportError::RetriesExhausted {
                seq: pending.seq,
                attempts: pending.transmissions,
            };
            self.fail();
            return Err(err);
        }

        if pending.transmissions > 0 {
            self.stats.retransmissions += 1;
            info!(
                seq = pending.seq,
                attempt = pending.transmissions + 1,
                "retransmitting packet"
            );
        } else if pending.kind == PendingKind::Reset {
            self.stats.resets_sent += 1;
        }

        pending.sent_at = Some(now);
        pending.transmissions += 1;
        self.rx.ack_owed = false;

        let header = PacketHeader {
            flags: pending.flags,
            error: nack,
            ack_seq,
            seq: pending.seq,
            ..PacketHeader::default()
        };
        let payload = pending.payload.clone();
        self.emit(header, &payload)
    }

    fn emit(&mut self, header: PacketHeader, payload: &[u8]) -> Result<Bytes> {
        let bytes = frame_packet(header, payload)?;
        self.stats.packets_sent += 1;
        Ok(bytes)
    }

    fn fail(&mut self) {
        let dropped = self.tx.queue.drain();
        warn!(dropped = dropped.len(), "retry budget exhausted; link failed");
        self.state = LinkState::Failed;
        self.tx.pending = None;
        self.tx.cursor = 0;
        self.rx.reassembly.clear();
        self.rx.ack_owed = false;
        self.rx.reset_ack_owed = false;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::packet::{HEADER_SIZE, PREAMBLE};

    fn config(mtu: usize) -> TransportConfig {
        TransportConfig {
            mtu,
            ..TransportConfig::default()
        }
    }

    /// Exchange packets until both sides go quiet; returns (events at a, events at b).
    fn pump(
        a: &mut Transport,
        b: &mut Transport,
        now: Instant,
        chunk: usize,
    ) -> (Vec<TransportEvent>, Vec<TransportEvent>) {
        let mut a_events = Vec::new();
        let mut b_events = Vec::new();
        loop {
            let mut progressed = false;
            while let Some(bytes) = a.poll_transmit(now).unwrap() {
                for piece in bytes.chunks(chunk) {
                    b_events.extend(b.receive(piece));
                }
                progressed = true;
            }
            while let Some(bytes) = b.poll_transmit(now).unwrap() {
                for piece in bytes.chunks(chunk) {
                    a_events.extend(a.receive(piece));
                }
                progressed = true;
            }
            if !progressed {
                return (a_events, b_events);
            }
        }
    }

    fn connected(a_cfg: TransportConfig, b_cfg: TransportConfig, now: Instant) -> (Transport, Transport) {
        let mut a = Transport::new(a_cfg).unwrap();
        let mut b = Transport::new(b_cfg).unwrap();
        let (a_events, b_events) = pump(&mut a, &mut b, now, usize::MAX);
        assert_eq!(a.state(), LinkState::Ready);
        assert_eq!(b.state(), LinkState::Ready);
        assert!(a_events.contains(&TransportEvent::Synchronized));
        assert!(b_events.contains(&TransportEvent::Synchronized));
        assert!(!a_events.contains(&TransportEvent::PeerReset));
        (a, b)
    }

    fn datagrams(events: Vec<TransportEvent>) -> Vec<Vec<u8>> {
        events
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Datagram(datagram) => Some(datagram.as_bytes().to_vec()),
                _ => None,
            })
            .collect()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn rejects_invalid_config() {
        let err = Transport::new(config(0)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidConfig(_)));
    }

    #[test]
    fn first_packet_carries_reset() {
        let mut a = Transport::new(TransportConfig::default()).unwrap();
        assert_eq!(a.state(), LinkState::Resetting);
        let bytes = a.poll_transmit(Instant::now()).unwrap().unwrap();
        assert_eq!(&bytes[..2], &PREAMBLE);
        let header = PacketHeader::decode(&bytes[2..2 + HEADER_SIZE], 1024).unwrap();
        assert_eq!(header.flags, PacketFlags::RESET);
        assert_eq!(header.seq, 0);
        assert!(header.is_ack_only());
    }

    #[test]
    fn reframing_is_independent_of_chunking() {
        let now = Instant::now();
        for mtu in [32usize, 1024] {
            for len in [1, mtu - 1, mtu, mtu + 1, 3 * mtu, 3 * mtu + 7] {
                for chunk in [1usize, 3, 7, usize::MAX] {
                    let (mut a, mut b) = connected(config(mtu), config(mtu), now);
                    let payload = pattern(len);
                    a.enqueue(Datagram::new(payload.clone())).unwrap();

                    let (a_events, b_events) = pump(&mut a, &mut b, now, chunk);
                    let got = datagrams(b_events);
                    assert_eq!(got.len(), 1, "mtu {mtu} len {len} chunk {chunk}");
                    assert_eq!(got[0], payload, "mtu {mtu} len {len} chunk {chunk}");
                    assert!(a_events.contains(&TransportEvent::Sent(DatagramId(0))));
                    assert_eq!(a.pending_datagrams(), 0);
                }
            }
        }
    }

    #[test]
    fn empty_datagram_is_rejected() {
        let mut a = Transport::new(TransportConfig::default()).unwrap();
        let err = a.enqueue(Datagram::new(Vec::new())).unwrap_err();
        assert_eq!(err.kind(), EnqueueErrorKind::Empty);
        assert_eq!(a.pending_datagrams(), 0);
    }

    #[test]
    fn oversized_datagram_is_rejected_at_enqueue() {
        let cfg = TransportConfig {
            max_datagram_len: 8,
            ..TransportConfig::default()
        };
        let mut a = Transport::new(cfg).unwrap();
        let err = a.enqueue(Datagram::new(vec![0u8; 9])).unwrap_err();
        assert_eq!(err.kind(), EnqueueErrorKind::TooLarge { size: 9, max: 8 });
        assert_eq!(err.into_datagram().len(), 9);
    }

    #[test]
    fn corrupting_any_byte_delivers_nothing() {
        let now = Instant::now();
        let (mut sizer, _) = connected(config(64), config(64), now);
        sizer.enqueue(Datagram::new(b"abc".to_vec())).unwrap();
        let packet_len = sizer.poll_transmit(now).unwrap().unwrap().len();

        for index in 0..packet_len {
            let (mut a, mut b) = connected(config(64), config(64), now);
            a.enqueue(Datagram::new(b"abc".to_vec())).unwrap();
            let mut bytes = a.poll_transmit(now).unwrap().unwrap().to_vec();
            bytes[index] ^= 0xFF;

            let before = b.expected_seq();
            let events = b.receive(&bytes);
            assert!(datagrams(events).is_empty(), "byte {index}");
            assert_eq!(b.expected_seq(), before, "byte {index}");
            assert_eq!(b.stats().datagrams_received, 0);
        }
    }

    #[test]
    fn sequence_advances_once_per_payload_packet() {
        let now = Instant::now();
        let (mut a, mut b) = connected(config(64), config(64), now);
        let initial = b.expected_seq();

        for i in 0..300u32 {
            a.enqueue(Datagram::new(i.to_le_bytes().to_vec())).unwrap();
            let (_, events) = pump(&mut a, &mut b, now, usize::MAX);
            assert_eq!(datagrams(events).len(), 1);
        }

        assert_eq!(b.expected_seq(), initial.wrapping_add((300 % 256) as u8));
        assert_eq!(a.next_seq(), b.expected_seq());
        // Pure ACKs flowed from b the whole time without advancing its own sequence.
        assert_eq!(b.next_seq(), 0);
        assert_eq!(a.expected_seq(), 0);
    }

    #[test]
    fn retransmits_identical_packet_on_timeout() {
        let now = Instant::now();
        let (mut a, _b) = connected(config(64), config(64), now);
        a.enqueue(Datagram::new(b"ping".to_vec())).unwrap();

        let first = a.poll_transmit(now).unwrap().unwrap();
        assert!(a.poll_transmit(now).unwrap().is_none());

        let timeout = a.config().retransmit_timeout;
        assert_eq!(a.poll_timeout(now), Some(now + timeout));
        assert!(a
            .poll_transmit(now + timeout - Duration::from_millis(1))
            .unwrap()
            .is_none());

        let second = a.poll_transmit(now + timeout).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(a.stats().retransmissions, 1);
    }

    #[test]
    fn exhausted_retries_fail_the_link_until_reset() {
        let now = Instant::now();
        let cfg = TransportConfig {
            max_retries: 2,
            ..config(64)
        };
        let (mut a, mut b) = connected(cfg.clone(), cfg, now);
        a.enqueue(Datagram::new(b"lost".to_vec())).unwrap();
        a.enqueue(Datagram::new(b"also lost".to_vec())).unwrap();

        let timeout = a.config().retransmit_timeout;
        let mut t = now;
        for _ in 0..3 {
            assert!(a.poll_transmit(t).unwrap().is_some());
            t += timeout;
        }
        let err = a.poll_transmit(t).unwrap_err();
        assert!(matches!(
            err,
            TransportError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(a.state(), LinkState::Failed);
        assert_eq!(a.pending_datagrams(), 0);
        assert!(a.poll_transmit(t).unwrap().is_none());

        let rejected = a.enqueue(Datagram::new(b"x".to_vec())).unwrap_err();
        assert_eq!(rejected.kind(), EnqueueErrorKind::LinkDown);

        a.reset();
        assert_eq!(a.state(), LinkState::Resetting);
        let (_, b_events) = pump(&mut a, &mut b, t, usize::MAX);
        assert!(b_events.contains(&TransportEvent::PeerReset));
        assert_eq!(a.state(), LinkState::Ready);

        a.enqueue(Datagram::new(b"after".to_vec())).unwrap();
        let (_, b_events) = pump(&mut a, &mut b, t, usize::MAX);
        assert_eq!(datagrams(b_events), vec![b"after".to_vec()]);
    }

    #[test]
    fn lost_ack_yields_duplicate_not_second_delivery() {
        let now = Instant::now();
        let (mut a, mut b) = connected(config(64), config(64), now);
        a.enqueue(Datagram::new(b"once".to_vec())).unwrap();

        let packet = a.poll_transmit(now).unwrap().unwrap();
        assert_eq!(datagrams(b.receive(&packet)).len(), 1);
        let _lost_ack = b.poll_transmit(now).unwrap().unwrap();

        let later = now + a.config().retransmit_timeout;
        let retransmit = a.poll_transmit(later).unwrap().unwrap();
        assert!(datagrams(b.receive(&retransmit)).is_empty());
        assert_eq!(b.stats().duplicates, 1);

        let ack = b.poll_transmit(later).unwrap().unwrap();
        assert_eq!(a.receive(&ack), vec![TransportEvent::Sent(DatagramId(0))]);
    }

    #[test]
    fn out_of_order_packet_is_nacked() {
        let now = Instant::now();
        let (_, mut b) = connected(config(64), config(64), now);

        let stray = frame_packet(
            PacketHeader {
                seq: b.expected_seq().wrapping_add(5),
                ..PacketHeader::default()
            },
            b"stray",
        )
        .unwrap();
        assert!(datagrams(b.receive(&stray)).is_empty());
        assert_eq!(b.stats().out_of_order, 1);

        let nack = b.poll_transmit(now).unwrap().unwrap();
        let header = PacketHeader::decode(&nack[2..2 + HEADER_SIZE], 64).unwrap();
        assert_eq!(header.error, TransportErrorCode::Order);
        assert_eq!(header.ack_seq, b.expected_seq());
    }

    #[test]
    fn nack_triggers_immediate_retransmit() {
        let now = Instant::now();
        let (mut a, mut b) = connected(config(64), config(64), now);
        a.enqueue(Datagram::new(b"fragile".to_vec())).unwrap();

        let mut packet = a.poll_transmit(now).unwrap().unwrap().to_vec();
        let last = packet.len() - 1;
        packet[last] ^= 0x55;
        assert!(b.receive(&packet).is_empty());
        assert_eq!(b.stats().checksum_errors, 1);

        let nack = b.poll_transmit(now).unwrap().unwrap();
        assert!(a.receive(&nack).is_empty());

        let retransmit = a.poll_transmit(now).unwrap().unwrap();
        assert_eq!(datagrams(b.receive(&retransmit)), vec![b"fragile".to_vec()]);
    }

    #[test]
    fn peer_reset_resynchronizes_both_sides() {
        let now = Instant::now();
        let (mut a, mut b) = connected(config(16), config(16), now);
        for i in 0..3u8 {
            a.enqueue(Datagram::new(vec![i; 20])).unwrap();
        }
        pump(&mut a, &mut b, now, usize::MAX);
        assert_eq!(a.next_seq(), 6);

        b.reset();
        let (a_events, _) = pump(&mut a, &mut b, now, usize::MAX);
        assert!(a_events.contains(&TransportEvent::PeerReset));
        assert_eq!(a.next_seq(), 0);
        assert_eq!(a.expected_seq(), 0);

        a.enqueue(Datagram::new(b"to b".to_vec())).unwrap();
        b.enqueue(Datagram::new(b"to a".to_vec())).unwrap();
        let (a_events, b_events) = pump(&mut a, &mut b, now, usize::MAX);
        assert_eq!(datagrams(a_events), vec![b"to a".to_vec()]);
        assert_eq!(datagrams(b_events), vec![b"to b".to_vec()]);
    }

    #[test]
    fn lost_reset_ack_does_not_surface_as_peer_reset() {
        let start = Instant::now();
        let mut a = Transport::new(config(64)).unwrap();
        let mut b = Transport::new(config(64)).unwrap();

        let a_reset = a.poll_transmit(start).unwrap().unwrap();
        let b_reset = b.poll_transmit(start).unwrap().unwrap();
        assert!(b.receive(&a_reset).is_empty());
        assert!(a.receive(&b_reset).is_empty());

        let _lost_reset_ack = b.poll_transmit(start).unwrap().unwrap();
        let a_reset_ack = a.poll_transmit(start).unwrap().unwrap();
        assert_eq!(b.receive(&a_reset_ack), vec![TransportEvent::Synchronized]);
        assert_eq!(b.state(), LinkState::Ready);
        assert_eq!(a.state(), LinkState::Resetting);

        b.enqueue(Datagram::new(b"early".to_vec())).unwrap();
        let ignored = b.poll_transmit(start).unwrap().unwrap();
        assert!(a.receive(&ignored).is_empty());

        let later = start + a.config().retransmit_timeout;
        let repeated = a.poll_transmit(later).unwrap().unwrap();
        assert!(b.receive(&repeated).is_empty());
        assert_eq!(b.pending_datagrams(), 1);

        let retry = later + b.config().retransmit_timeout;
        let (a_events, b_events) = pump(&mut a, &mut b, retry, usize::MAX);
        assert_eq!(a.state(), LinkState::Ready);
        assert!(!a_events.contains(&TransportEvent::PeerReset));
        assert!(!b_events.contains(&TransportEvent::PeerReset));
        assert_eq!(datagrams(a_events), vec![b"early".to_vec()]);
        assert!(b_events.contains(&TransportEvent::Sent(DatagramId(0))));
        assert_eq!(b.pending_datagrams(), 0);
    }

    #[test]
    fn idle_peer_restart_after_handshake_is_a_peer_reset() {
        let now = Instant::now();
        let (mut a, _b) = connected(config(64), config(64), now);

        let mut rebooted = Transport::new(config(64)).unwrap();
        let reset = rebooted.poll_transmit(now).unwrap().unwrap();
        assert_eq!(a.receive(&reset), vec![TransportEvent::PeerReset]);

        let (a_events, _) = pump(&mut a, &mut rebooted, now, usize::MAX);
        assert!(!a_events.contains(&TransportEvent::PeerReset));
        assert_eq!(rebooted.state(), LinkState::Ready);
    }

    #[test]
    fn peer_reset_restarts_half_sent_datagram() {
        let now = Instant::now();
        let (mut a, mut b) = connected(config(8), config(8), now);
        let payload = pattern(30);
        a.enqueue(Datagram::new(payload.clone())).unwrap();

        let first = a.poll_transmit(now).unwrap().unwrap();
        assert!(b.receive(&first).is_empty());

        b.reset();
        let (_, b_events) = pump(&mut a, &mut b, now, usize::MAX);
        assert_eq!(datagrams(b_events), vec![payload]);
    }

    #[test]
    fn full_queue_rejects_without_disturbing_contents() {
        let now = Instant::now();
        let cfg = TransportConfig {
            queue_capacity: 2,
            ..config(64)
        };
        let mut a = Transport::new(cfg).unwrap();
        let mut b = Transport::new(config(64)).unwrap();

        assert_eq!(a.enqueue(Datagram::new(b"one".to_vec())).unwrap(), DatagramId(0));
        assert_eq!(a.enqueue(Datagram::new(b"two".to_vec())).unwrap(), DatagramId(1));
        let err = a.enqueue(Datagram::new(b"three".to_vec())).unwrap_err();
        assert_eq!(err.kind(), EnqueueErrorKind::QueueFull(2));
        assert_eq!(err.into_datagram().as_bytes(), b"three");
        assert_eq!(a.pending_datagrams(), 2);

        let (a_events, b_events) = pump(&mut a, &mut b, now, usize::MAX);
        assert_eq!(datagrams(b_events), vec![b"one".to_vec(), b"two".to_vec()]);
        assert!(a_events.contains(&TransportEvent::Sent(DatagramId(1))));
        assert_eq!(a.enqueue(Datagram::new(b"four".to_vec())).unwrap(), DatagramId(2));
    }

    #[test]
    fn oversized_reassembly_is_discarded() {
        let now = Instant::now();
        let sender = TransportConfig {
            mtu: 16,
            ..TransportConfig::default()
        };
        let receiver = TransportConfig {
            mtu: 16,
            max_datagram_len: 40,
            ..TransportConfig::default()
        };
        let (mut a, mut b) = connected(sender, receiver, now);

        a.enqueue(Datagram::new(pattern(100))).unwrap();
        a.enqueue(Datagram::new(b"small".to_vec())).unwrap();
        let (a_events, b_events) = pump(&mut a, &mut b, now, usize::MAX);

        assert_eq!(datagrams(b_events), vec![b"small".to_vec()]);
        assert_eq!(b.stats().oversized_datagrams, 1);
        assert!(a_events.contains(&TransportEvent::Sent(DatagramId(0))));
        assert!(a_events.contains(&TransportEvent::Sent(DatagramId(1))));
    }

    #[test]
    fn poll_timeout_reports_idle_and_immediate_work() {
        let now = Instant::now();
        let (mut a, _b) = connected(config(64), config(64), now);
        assert_eq!(a.poll_timeout(now), None);
        a.enqueue(Datagram::new(b"x".to_vec())).unwrap();
        assert_eq!(a.poll_timeout(now), Some(now));
    }

    #[test]
    fn discard_keeps_only_the_in_flight_head() {
        let now = Instant::now();
        let (mut a, _b) = connected(config(64), config(64), now);
        for body in [&b"head"[..], b"second", b"third"] {
            a.enqueue(Datagram::new(body.to_vec())).unwrap();
        }
        assert!(a.poll_transmit(now).unwrap().is_some());

        assert_eq!(a.discard_queued(), 2);
        assert_eq!(a.pending_datagrams(), 1);

        let (mut idle, _peer) = connected(config(64), config(64), now);
        idle.enqueue(Datagram::new(b"unsent".to_vec())).unwrap();
        assert_eq!(idle.discard_queued(), 1);
        assert_eq!(idle.pending_datagrams(), 0);
    }
}
