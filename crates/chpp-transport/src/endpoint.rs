//! Threaded driver: one RX thread and one TX thread around a shared
//! [`Transport`] behind a single coarse lock.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chpp_link::LinkStream;
use tracing::{debug, info, warn};

use crate::config::{EndpointConfig, TransportConfig};
use crate::datagram::{Datagram, DatagramId};
use crate::error::{EnqueueError, EnqueueErrorKind, Result, TransportError};
use crate::framer::write_packet;
use crate::transport::{LinkState, Transport, TransportEvent, TransportStats};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Upper bound on an idle TX wait, so shutdown is observed promptly.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Receiver of transport upcalls. Called from the RX or TX thread with no
/// transport lock held, so implementations may enqueue datagrams.
pub trait TransportHandler: Send + Sync {
    fn on_datagram(&self, datagram: Datagram);

    fn on_datagram_sent(&self, _id: DatagramId) {}

    fn on_peer_reset(&self) {}

    fn on_fatal(&self, _error: &TransportError) {}

    fn on_link_closed(&self) {}
}

/// Outbound half of the transport as seen by upper layers.
pub trait DatagramSender: Send + Sync {
    fn enqueue_datagram(&self, datagram: Datagram) -> std::result::Result<DatagramId, EnqueueError>;
}

/// A [`Transport`] shared between the RX flow, the TX flow and senders.
#[derive(Debug)]
pub struct SharedTransport {
    transport: Mutex<Transport>,
    wake: Condvar,
    closed: AtomicBool,
}

impl SharedTransport {
    pub fn new(config: TransportConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            transport: Mutex::new(Transport::new(config)?),
            wake: Condvar::new(),
            closed: AtomicBool::new(false),
        }))
    }

    /// Re-run the reset handshake.
    pub fn reset(&self) {
        self.lock().reset();
        self.wake.notify_all();
    }

    pub fn state(&self) -> LinkState {
        self.lock().state()
    }

    pub fn stats(&self) -> TransportStats {
        self.lock().stats().clone()
    }

    /// Stop accepting datagrams, drop the unsent ones and wake the TX thread.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let dropped = self.lock().discard_queued();
            if dropped > 0 {
                debug!(dropped, "discarded queued datagrams on close");
            }
        }
        self.wake.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Transport> {
        self.transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DatagramSender for SharedTransport {
    fn enqueue_datagram(&self, datagram: Datagram) -> std::result::Result<DatagramId, EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::new(EnqueueErrorKind::Shutdown, datagram));
        }
        let id = self.lock().enqueue(datagram)?;
        self.wake.notify_all();
        Ok(id)
    }
}

/// Running RX and TX threads for one link.
pub struct Endpoint {
    shared: Arc<SharedTransport>,
    link: LinkStream,
    rx_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
}

impl Endpoint {
    /// Start both flows over `link`.
    pub fn start(
        shared: Arc<SharedTransport>,
        link: LinkStream,
        handler: Arc<dyn TransportHandler>,
        config: EndpointConfig,
    ) -> Result<Self> {
        link.set_read_timeout(Some(config.read_poll))?;
        let reader = link.try_clone()?;
        let writer = link.try_clone()?;

        let rx_thread = {
            let shared = Arc::clone(&shared);
            let handler = Arc::clone(&handler);
            thread::Builder::new()
                .name("chpp-rx".to_string())
                .spawn(move || rx_loop(&shared, reader, handler.as_ref()))?
        };
        let tx_thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("chpp-tx".to_string())
                .spawn(move || tx_loop(&shared, writer, handler.as_ref(), config.reset_on_fatal))?
        };

        info!("endpoint started");
        Ok(Self {
            shared,
            link,
            rx_thread: Some(rx_thread),
            tx_thread: Some(tx_thread),
        })
    }

    pub fn shared(&self) -> &Arc<SharedTransport> {
        &self.shared
    }

    /// Block until the peer closes the link or the endpoint is shut down elsewhere.
    pub fn wait(mut self) {
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
        self.stop();
    }

    /// Close the link and join both threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.close();
        if let Err(err) = self.link.shutdown() {
            debug!(error = %err, "link shutdown failed");
        }
        for handle in [self.rx_thread.take(), self.tx_thread.take()]
            .into_iter()
            .flatten()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("link", &self.link)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

fn rx_loop(shared: &SharedTransport, mut reader: LinkStream, handler: &dyn TransportHandler) {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    while !shared.is_closed() {
        let read = match reader.read(&mut chunk) {
            Ok(0) => {
                info!("link closed by peer");
                break;
            }
            Ok(n) => n,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(err) => {
                if !shared.is_closed() {
                    warn!(error = %err, "link read failed");
                }
                break;
            }
        };

        let events = shared.lock().receive(&chunk[..read]);
        shared.wake.notify_all();

        for event in events {
            match event {
                TransportEvent::Datagram(datagram) => handler.on_datagram(datagram),
                TransportEvent::Sent(id) => handler.on_datagram_sent(id),
                TransportEvent::PeerReset => handler.on_peer_reset(),
                TransportEvent::Synchronized => debug!("transport synchronized"),
            }
        }
    }

    shared.close();
    handler.on_link_closed();
}

fn tx_loop(
    shared: &SharedTransport,
    mut writer: LinkStream,
    handler: &dyn TransportHandler,
    reset_on_fatal: bool,
) {
    let mut transport = shared.lock();
    while !shared.is_closed() {
        let now = Instant::now();
        let polled = transport.poll_transmit(now);
        match polled {
            Ok(Some(bytes)) => {
                drop(transport);
                if let Err(err) = write_packet(&mut writer, &bytes) {
                    if !shared.is_closed() {
                        warn!(error = %err, "link write failed");
                    }
                    shared.close();
                    let _ = writer.shutdown();
                    return;
                }
                transport = shared.lock();
            }
            Ok(None) => {
                let wait = transport
                    .poll_timeout(now)
                    .map_or(IDLE_WAIT, |deadline| {
                        deadline.saturating_duration_since(now).min(IDLE_WAIT)
                    });
                if wait.is_zero() {
                    continue;
                }
                transport = shared
                    .wake
                    .wait_timeout(transport, wait)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0);
            }
            Err(err) => {
                drop(transport);
                warn!(error = %err, "transport failed");
                handler.on_fatal(&err);
                transport = shared.lock();
                if reset_on_fatal {
                    transport.reset();
                }
            }
        }
    }
}
