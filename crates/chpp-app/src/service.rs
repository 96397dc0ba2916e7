//! Client and service capabilities and the contexts handed to them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chpp_transport::{DatagramId, DatagramSender};
use tracing::{debug, trace};

use crate::descriptor::{ClientDescriptor, ServiceDescriptor};
use crate::dispatcher::in_dispatch;
use crate::error::{AppError, Result};
use crate::handle;
use crate::header::{encode_message, AppErrorCode, AppHeader, Message, MessageType};
use crate::tracker::{RequestSlot, RequestState, Response};

/// Server side of a negotiated handle.
///
/// Returning an error code from a request handler makes the dispatcher send
/// an error response carrying that code.
pub trait Service: Send + Sync {
    fn descriptor(&self) -> &ServiceDescriptor;

    fn init(&self, _ctx: &ServiceContext) {}

    fn deinit(&self) {}

    fn dispatch_request(
        &self,
        ctx: &ServiceContext,
        request: &Message,
    ) -> std::result::Result<(), AppErrorCode>;

    fn dispatch_notification(
        &self,
        _ctx: &ServiceContext,
        _notification: &Message,
    ) -> std::result::Result<(), AppErrorCode> {
        Err(AppErrorCode::InvalidCommand)
    }
}

/// Client side of a negotiated handle.
///
/// Responses reach [`Client::dispatch_response`] only after the tracker
/// matched them to an outstanding request.
pub trait Client: Send + Sync {
    fn descriptor(&self) -> &ClientDescriptor;

    fn init(&self, _ctx: &ClientContext) {}

    fn deinit(&self) {}

    fn dispatch_response(
        &self,
        _ctx: &ClientContext,
        _response: &Message,
    ) -> std::result::Result<(), AppErrorCode> {
        Ok(())
    }

    fn dispatch_notification(
        &self,
        _ctx: &ClientContext,
        _notification: &Message,
    ) -> std::result::Result<(), AppErrorCode> {
        Err(AppErrorCode::InvalidCommand)
    }

    /// Discovery matched this client to a peer service.
    fn on_bound(&self, _handle: u8) {}

    /// The link was reset; outstanding requests have been failed.
    fn on_reset(&self) {}
}

/// What a [`Service`] uses to answer its peer.
#[derive(Clone)]
pub struct ServiceContext {
    handle: u8,
    sender: Arc<dyn DatagramSender>,
}

impl ServiceContext {
    pub(crate) fn new(handle: u8, sender: Arc<dyn DatagramSender>) -> Self {
        Self { handle, sender }
    }

    pub fn handle(&self) -> u8 {
        self.handle
    }

    /// Send a successful response to `request`.
    pub fn respond(&self, request: &Message, body: &[u8]) -> Result<DatagramId> {
        let header = request.header.response();
        Ok(self.sender.enqueue_datagram(encode_message(header, body))?)
    }

    /// Send an error response to `request` with no body.
    pub fn respond_error(&self, request: &Message, error: AppErrorCode) -> Result<DatagramId> {
        let header = request.header.response().with_error(error);
        Ok(self.sender.enqueue_datagram(encode_message(header, &[]))?)
    }

    /// Send an unsolicited server notification.
    pub fn notify(&self, command: u16, body: &[u8]) -> Result<DatagramId> {
        let header = AppHeader::new(self.handle, MessageType::ServerNotification, 0, command);
        Ok(self.sender.enqueue_datagram(encode_message(header, body))?)
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Index of a registered client, returned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub usize);

/// Per-client state: the bound handle, request slots and the outbound path.
pub struct ClientContext {
    id: Option<ClientId>,
    /// `handle::NONE` while unbound.
    binding: AtomicU8,
    sender: Arc<dyn DatagramSender>,
    default_timeout: Duration,
    slots: Mutex<HashMap<u16, Arc<RequestSlot>>>,
    closed: AtomicBool,
}

impl ClientContext {
    pub(crate) fn new(
        id: Option<ClientId>,
        handle: u8,
        sender: Arc<dyn DatagramSender>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            id,
            binding: AtomicU8::new(handle),
            sender,
            default_timeout,
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Registration index; `None` for predefined clients.
    pub fn id(&self) -> Option<ClientId> {
        self.id
    }

    /// Peer handle this client talks to, once bound.
    pub fn handle(&self) -> Option<u8> {
        match self.binding.load(Ordering::Acquire) {
            handle::NONE => None,
            handle => Some(handle),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.handle().is_some()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send a request and block until its response, using the default timeout.
    pub fn send_and_wait(&self, command: u16, body: &[u8]) -> Result<Response> {
        self.send_and_wait_timeout(command, body, self.default_timeout)
    }

    /// Send a request and block until its response or `timeout`.
    ///
    /// Fails with [`AppError::WouldDeadlock`] when called from a dispatch
    /// callback, and with [`AppError::Remote`] when the peer answers with an
    /// error code. Timeouts are not retried.
    pub fn send_and_wait_timeout(
        &self,
        command: u16,
        body: &[u8],
        timeout: Duration,
    ) -> Result<Response> {
        if in_dispatch() {
            return Err(AppError::WouldDeadlock);
        }
        let (handle, slot, transaction) = self.reserve_blocking(command)?;

        let header = AppHeader::new(handle, MessageType::ClientRequest, transaction, command);
        trace!(handle, command, transaction, len = body.len(), "sending request");
        if let Err(err) = self.sender.enqueue_datagram(encode_message(header, body)) {
            slot.cancel();
            return Err(err.into());
        }

        let response = slot.wait(timeout)?;
        match response.message.header.error {
            AppErrorCode::None => Ok(response),
            code => Err(AppError::Remote(code)),
        }
    }

    /// Send a request without waiting; the response goes to the client's
    /// `dispatch_response`. Returns the transaction ID.
    pub fn send_or_fail(&self, command: u16, body: &[u8]) -> Result<u8> {
        let handle = self.ready_handle()?;
        let slot = self.slot(command);
        let transaction = slot.prepare();

        let header = AppHeader::new(handle, MessageType::ClientRequest, transaction, command);
        self.sender
            .enqueue_datagram(encode_message(header, body))
            .map_err(|err| {
                slot.cancel();
                AppError::from(err)
            })?;
        Ok(transaction)
    }

    /// Send a client notification. No response is expected.
    pub fn notify(&self, command: u16, body: &[u8]) -> Result<DatagramId> {
        let handle = self.ready_handle()?;
        let header = AppHeader::new(handle, MessageType::ClientNotification, 0, command);
        Ok(self.sender.enqueue_datagram(encode_message(header, body))?)
    }

    /// Tracker state of the latest request for `command`.
    pub fn request_state(&self, command: u16) -> Option<RequestState> {
        self.lock_slots().get(&command).map(|slot| slot.state())
    }

    pub(crate) fn bind(&self, handle: u8) {
        self.binding.store(handle, Ordering::Release);
    }

    pub(crate) fn unbind(&self) {
        self.binding.store(handle::NONE, Ordering::Release);
    }

    /// Match a response against the tracker; returns the slot to complete.
    pub(crate) fn accept_response(&self, header: &AppHeader) -> Option<Arc<RequestSlot>> {
        let slot = self.lock_slots().get(&header.command).cloned();
        match slot {
            Some(slot) if slot.match_response(header) => Some(slot),
            Some(_) => None,
            None => {
                debug!(
                    handle = header.handle,
                    command = header.command,
                    "response for command never requested"
                );
                None
            }
        }
    }

    /// Fail every blocked request with `error`.
    pub(crate) fn release_all(&self, error: &AppError) {
        for slot in self.lock_slots().values() {
            slot.release(error.clone());
        }
    }

    pub(crate) fn close(&self) {
        let slots = self.lock_slots();
        self.closed.store(true, Ordering::Release);
        for slot in slots.values() {
            slot.release(AppError::Closed);
        }
    }

    /// Check readiness and reserve the slot under the slot-table lock, so a
    /// concurrent [`ClientContext::close`] either refuses the request or sees
    /// the reservation and releases it.
    fn reserve_blocking(&self, command: u16) -> Result<(u8, Arc<RequestSlot>, u8)> {
        let mut slots = self.lock_slots();
        let handle = self.ready_handle()?;
        let slot = Arc::clone(slots.entry(command).or_default());
        let transaction = slot.prepare_blocking(command)?;
        Ok((handle, slot, transaction))
    }

    fn ready_handle(&self) -> Result<u8> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::Closed);
        }
        self.handle().ok_or(AppError::NotBound)
    }

    fn slot(&self, command: u16) -> Arc<RequestSlot> {
        Arc::clone(self.lock_slots().entry(command).or_default())
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<u16, Arc<RequestSlot>>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("id", &self.id)
            .field("handle", &self.handle())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use chpp_transport::{Datagram, EnqueueError};

    use super::*;

    const LONG: Duration = Duration::from_secs(30);

    /// Accepts every datagram, optionally closing a context as it does.
    #[derive(Default)]
    struct ClosingSender {
        target: Mutex<Option<Arc<ClientContext>>>,
    }

    impl DatagramSender for ClosingSender {
        fn enqueue_datagram(&self, _datagram: Datagram) -> std::result::Result<DatagramId, EnqueueError> {
            if let Some(ctx) = self.target.lock().unwrap().as_ref() {
                ctx.close();
            }
            Ok(DatagramId(0))
        }
    }

    fn loopback_context(sender: Arc<ClosingSender>) -> Arc<ClientContext> {
        Arc::new(ClientContext::new(None, handle::LOOPBACK, sender, LONG))
    }

    #[test]
    fn close_after_reservation_fails_the_waiter_at_once() {
        let sender = Arc::new(ClosingSender::default());
        let ctx = loopback_context(sender.clone());
        *sender.target.lock().unwrap() = Some(Arc::clone(&ctx));

        let started = Instant::now();
        let err = ctx.send_and_wait_timeout(1, b"x", LONG).unwrap_err();
        assert_eq!(err, AppError::Closed);
        assert!(started.elapsed() < Duration::from_secs(5));
        *sender.target.lock().unwrap() = None;
    }

    #[test]
    fn racing_close_never_leaves_a_waiter_behind() {
        for _ in 0..50 {
            let ctx = loopback_context(Arc::new(ClosingSender::default()));
            let closer = {
                let ctx = Arc::clone(&ctx);
                thread::spawn(move || ctx.close())
            };
            let outcome = ctx.send_and_wait_timeout(1, b"x", Duration::from_secs(2));
            closer.join().unwrap();
            assert_eq!(outcome.unwrap_err(), AppError::Closed);
        }
    }

    #[test]
    fn closed_context_refuses_every_send() {
        let ctx = loopback_context(Arc::new(ClosingSender::default()));
        ctx.close();
        assert_eq!(ctx.send_or_fail(1, &[]), Err(AppError::Closed));
        assert_eq!(ctx.notify(1, &[]).unwrap_err(), AppError::Closed);
        assert_eq!(ctx.send_and_wait(1, &[]).unwrap_err(), AppError::Closed);
    }
}
