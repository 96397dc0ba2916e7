use std::collections::VecDeque;

use crate::datagram::{Datagram, DatagramId};

/// A datagram waiting for (or in the middle of) transmission.
#[derive(Debug)]
pub struct QueuedDatagram {
    pub id: DatagramId,
    pub datagram: Datagram,
}

/// Bounded FIFO of outbound datagrams.
///
/// The head entry is the one being fragmented; it leaves the queue only once
/// its last fragment is acknowledged.
#[derive(Debug)]
pub struct DatagramQueue {
    entries: VecDeque<QueuedDatagram>,
    capacity: usize,
}

impl DatagramQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a datagram. A full queue hands the datagram back untouched.
    pub fn enqueue(&mut self, id: DatagramId, datagram: Datagram) -> Result<(), Datagram> {
        if self.is_full() {
            return Err(datagram);
        }
        self.entries.push_back(QueuedDatagram { id, datagram });
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<QueuedDatagram> {
        self.entries.pop_front()
    }

    pub fn front(&self) -> Option<&QueuedDatagram> {
        self.entries.front()
    }

    /// Number of datagrams not yet fully acknowledged.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, oldest first.
    pub fn drain(&mut self) -> Vec<QueuedDatagram> {
        self.entries.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(byte: u8) -> Datagram {
        Datagram::new(vec![byte; 4])
    }

    #[test]
    fn fifo_order() {
        let mut queue = DatagramQueue::new(4);
        for i in 0..3u8 {
            queue.enqueue(DatagramId(i as u64), datagram(i)).unwrap();
        }

        assert_eq!(queue.pending(), 3);
        assert_eq!(queue.front().map(|q| q.id), Some(DatagramId(0)));
        for i in 0..3u8 {
            let entry = queue.dequeue().unwrap();
            assert_eq!(entry.id, DatagramId(i as u64));
            assert_eq!(entry.datagram.as_bytes(), &[i; 4]);
        }
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn full_queue_returns_datagram_and_keeps_contents() {
        let mut queue = DatagramQueue::new(2);
        queue.enqueue(DatagramId(1), datagram(1)).unwrap();
        queue.enqueue(DatagramId(2), datagram(2)).unwrap();
        assert!(queue.is_full());

        let rejected = queue.enqueue(DatagramId(3), datagram(3)).unwrap_err();
        assert_eq!(rejected.as_bytes(), &[3; 4]);
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.capacity(), 2);

        assert_eq!(queue.dequeue().unwrap().id, DatagramId(1));
        assert_eq!(queue.dequeue().unwrap().id, DatagramId(2));
    }

    #[test]
    fn drain_empties_queue() {
        let mut queue = DatagramQueue::new(3);
        queue.enqueue(DatagramId(7), datagram(7)).unwrap();
        queue.enqueue(DatagramId(8), datagram(8)).unwrap();

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, DatagramId(7));
        assert!(queue.is_empty());
        assert_eq!(queue.pending(), 0);
    }
}
