//! The app dispatcher: routes reassembled datagrams by handle and message type.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chpp_transport::{Datagram, DatagramId, DatagramSender, TransportError, TransportHandler};
use tracing::{debug, info, trace, warn};

use crate::config::AppConfig;
use crate::descriptor::{DiscoveredService, ServiceDescriptor};
use crate::discovery;
use crate::error::{AppError, Result};
use crate::handle::{self, handle_name};
use crate::header::{AppErrorCode, Message, MessageType, APP_HEADER_SIZE};
use crate::loopback::{self, LoopbackResult};
use crate::service::{Client, ClientContext, ClientId, Service, ServiceContext};
use crate::timesync::{self, TimesyncResult};

thread_local! {
    static IN_DISPATCH: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread runs a dispatch callback.
pub(crate) fn in_dispatch() -> bool {
    IN_DISPATCH.with(Cell::get)
}

struct DispatchScope {
    previous: bool,
}

impl DispatchScope {
    fn enter() -> Self {
        Self {
            previous: IN_DISPATCH.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        IN_DISPATCH.with(|flag| flag.set(self.previous));
    }
}

struct ServiceEntry {
    handle: u8,
    service: Arc<dyn Service>,
    ctx: ServiceContext,
}

struct ClientEntry {
    client: Arc<dyn Client>,
    ctx: Arc<ClientContext>,
}

/// One app-layer instance bound to one transport.
///
/// Registration tables are fixed at construction and read without locking.
pub struct App {
    config: AppConfig,
    sender: Arc<dyn DatagramSender>,
    services: Vec<ServiceEntry>,
    clients: Vec<ClientEntry>,
    loopback: Arc<ClientContext>,
    discovery: Arc<ClientContext>,
    timesync: Arc<ClientContext>,
    discovered: Mutex<Vec<DiscoveredService>>,
    closed: AtomicBool,
}

impl App {
    pub(crate) fn from_registrations(
        config: AppConfig,
        sender: Arc<dyn DatagramSender>,
        services: Vec<Arc<dyn Service>>,
        clients: Vec<Arc<dyn Client>>,
    ) -> Self {
        let predefined = |handle| {
            Arc::new(ClientContext::new(
                None,
                handle,
                Arc::clone(&sender),
                config.response_timeout,
            ))
        };
        let loopback = predefined(handle::LOOPBACK);
        let discovery = predefined(handle::DISCOVERY);
        let timesync = predefined(handle::TIMESYNC);

        let services: Vec<ServiceEntry> = services
            .into_iter()
            .enumerate()
            .filter_map(|(index, service)| {
                let handle = handle::negotiated_handle(index)?;
                Some(ServiceEntry {
                    handle,
                    ctx: ServiceContext::new(handle, Arc::clone(&sender)),
                    service,
                })
            })
            .collect();

        let clients: Vec<ClientEntry> = clients
            .into_iter()
            .enumerate()
            .map(|(index, client)| ClientEntry {
                ctx: Arc::new(ClientContext::new(
                    Some(ClientId(index)),
                    handle::NONE,
                    Arc::clone(&sender),
                    config.response_timeout,
                )),
                client,
            })
            .collect();

        for entry in &services {
            entry.service.init(&entry.ctx);
        }
        for entry in &clients {
            entry.client.init(&entry.ctx);
        }

        Self {
            config,
            sender,
            services,
            clients,
            loopback,
            discovery,
            timesync,
            discovered: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Registered services with their handles, in registration order.
    pub fn services(&self) -> Vec<(u8, ServiceDescriptor)> {
        self.services
            .iter()
            .map(|entry| (entry.handle, entry.service.descriptor().clone()))
            .collect()
    }

    /// Context of a registered client.
    pub fn client(&self, id: ClientId) -> Option<Arc<ClientContext>> {
        self.clients.get(id.0).map(|entry| Arc::clone(&entry.ctx))
    }

    /// Services reported by the most recent discovery.
    pub fn discovered(&self) -> Vec<DiscoveredService> {
        self.lock_discovered().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Echo `payload` through the peer's loopback service.
    pub fn loopback(&self, payload: &[u8]) -> Result<LoopbackResult> {
        let response = self.loopback.send_and_wait(loopback::ECHO, payload)?;
        if response.message.body.as_ref() != payload {
            return Err(AppError::Malformed(format!(
                "loopback echoed {} bytes that differ from the {} sent",
                response.message.body.len(),
                payload.len()
            )));
        }
        Ok(LoopbackResult {
            payload: response.message.body,
            rtt: response.rtt,
        })
    }

    /// List the peer's negotiated services and bind matching clients.
    pub fn discover(&self) -> Result<Vec<DiscoveredService>> {
        let response = self.discovery.send_and_wait_timeout(
            discovery::DISCOVER_ALL,
            &[],
            self.config.discovery_timeout,
        )?;
        discovery::parse_descriptors(&response.message.body)
    }

    /// Read the peer's wall clock and estimate the offset to ours.
    pub fn timesync(&self) -> Result<TimesyncResult> {
        let request_time_ns = timesync::now_ns();
        let response = self.timesync.send_and_wait(timesync::GET_TIME, &[])?;
        let remote_time_ns = timesync::parse_time(&response.message.body)?;
        Ok(TimesyncResult {
            remote_time_ns,
            rtt: response.rtt,
            offset_ns: timesync::compute_offset(request_time_ns, response.rtt, remote_time_ns),
        })
    }

    /// Route one reassembled datagram.
    pub fn dispatch(&self, datagram: Datagram) {
        let len = datagram.len();
        let message = match Message::parse(datagram) {
            Ok(message) => message,
            Err(err) => {
                warn!(len, error = %err, "dropping undecodable datagram");
                return;
            }
        };

        let header = message.header;
        trace!(
            handle = header.handle,
            kind = ?header.message_type,
            transaction = header.transaction,
            command = header.command,
            len,
            "dispatching"
        );

        if header.handle == handle::NONE {
            debug!(len, command = header.command, "dropping datagram for handle 0");
            return;
        }

        let _scope = DispatchScope::enter();
        if header.message_type.is_for_service() {
            self.dispatch_to_service(&message);
        } else {
            self.dispatch_to_client(&message);
        }
    }

    /// Fail outstanding requests and forget bindings after a link reset.
    pub fn reset_clients(&self, error: AppError) {
        for ctx in [&self.loopback, &self.discovery, &self.timesync] {
            ctx.release_all(&error);
        }
        for entry in &self.clients {
            entry.ctx.release_all(&error);
            entry.ctx.unbind();
            entry.client.on_reset();
        }
        self.lock_discovered().clear();
    }

    /// Release every waiter and deinitialize all registrations. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for ctx in [&self.loopback, &self.discovery, &self.timesync] {
            ctx.close();
        }
        for entry in &self.clients {
            entry.ctx.close();
            entry.client.deinit();
        }
        for entry in &self.services {
            entry.service.deinit();
        }
        info!("app closed");
    }

    fn dispatch_to_service(&self, message: &Message) {
        let header = message.header;
        let is_request = header.message_type == MessageType::ClientRequest;

        let Err(code) = self.route_to_service(message, is_request) else {
            return;
        };

        if is_request {
            debug!(
                handle = header.handle,
                command = header.command,
                error = %code,
                "request rejected"
            );
            let ctx = ServiceContext::new(header.handle, Arc::clone(&self.sender));
            if let Err(err) = ctx.respond_error(message, code) {
                warn!(handle = header.handle, error = %err, "error response not queued");
            }
        } else {
            debug!(
                handle = header.handle,
                command = header.command,
                error = %code,
                "notification rejected"
            );
        }
    }

    fn route_to_service(
        &self,
        message: &Message,
        is_request: bool,
    ) -> std::result::Result<(), AppErrorCode> {
        let header = message.header;
        match header.handle {
            predefined if handle::is_predefined(predefined) && !is_request => {
                Err(AppErrorCode::InvalidCommand)
            }
            handle::LOOPBACK => {
                require_len(message, loopback::MIN_REQUEST_LEN)?;
                loopback::serve(&self.service_context(handle::LOOPBACK), message)
            }
            handle::DISCOVERY => {
                require_len(message, discovery::MIN_REQUEST_LEN)?;
                discovery::serve(
                    &self.service_context(handle::DISCOVERY),
                    message,
                    self.services.iter().map(|entry| entry.service.descriptor()),
                )
            }
            handle::TIMESYNC => {
                require_len(message, timesync::MIN_REQUEST_LEN)?;
                timesync::serve(&self.service_context(handle::TIMESYNC), message)
            }
            other => {
                let entry = handle::negotiated_index(other).and_then(|index| self.services.get(index));
                let Some(entry) = entry else {
                    warn!(
                        handle = other,
                        range = handle_name(other),
                        registered = self.services.len(),
                        "no service for handle"
                    );
                    return Err(AppErrorCode::Unsupported);
                };
                require_len(message, entry.service.descriptor().min_length)?;
                if is_request {
                    entry.service.dispatch_request(&entry.ctx, message)
                } else {
                    entry.service.dispatch_notification(&entry.ctx, message)
                }
            }
        }
    }

    fn dispatch_to_client(&self, message: &Message) {
        let header = message.header;
        let (ctx, client, min_length) = match header.handle {
            handle::LOOPBACK => (&self.loopback, None, APP_HEADER_SIZE),
            handle::DISCOVERY => (&self.discovery, None, APP_HEADER_SIZE),
            handle::TIMESYNC => (&self.timesync, None, timesync::MIN_RESPONSE_LEN),
            other => match self
                .clients
                .iter()
                .find(|entry| entry.ctx.handle() == Some(other))
            {
                Some(entry) => (
                    &entry.ctx,
                    Some(&entry.client),
                    entry.client.descriptor().min_length,
                ),
                None => {
                    warn!(
                        handle = other,
                        range = handle_name(other),
                        "no client bound to handle"
                    );
                    return;
                }
            },
        };

        // Error responses carry no body, so only the header is required.
        if !header.error.is_error() && message.wire_len() < min_length {
            warn!(
                handle = header.handle,
                command = header.command,
                len = message.wire_len(),
                min = min_length,
                "dropping short message"
            );
            return;
        }

        match header.message_type {
            MessageType::ServerResponse => {
                let Some(slot) = ctx.accept_response(&header) else {
                    return;
                };
                if header.handle == handle::DISCOVERY && !header.error.is_error() {
                    self.apply_discovery(message);
                }
                if let Some(client) = client {
                    if let Err(code) = client.dispatch_response(ctx, message) {
                        debug!(handle = header.handle, error = %code, "client rejected response");
                    }
                }
                slot.complete(message.clone());
            }
            MessageType::ServerNotification => match client {
                Some(client) => {
                    if let Err(code) = client.dispatch_notification(ctx, message) {
                        debug!(handle = header.handle, error = %code, "client rejected notification");
                    }
                }
                None => debug!(handle = header.handle, "ignoring predefined notification"),
            },
            MessageType::ClientRequest | MessageType::ClientNotification => {}
        }
    }

    fn apply_discovery(&self, message: &Message) {
        let discovered = match discovery::parse_descriptors(&message.body) {
            Ok(discovered) => discovered,
            Err(err) => {
                warn!(error = %err, "discovery response undecodable");
                return;
            }
        };
        info!(services = discovered.len(), "discovery completed");

        let mut claimed: Vec<u8> = Vec::new();
        for entry in &self.clients {
            let descriptor = entry.client.descriptor();
            let mut matching = discovered
                .iter()
                .filter(|service| descriptor.matches(&service.descriptor))
                .peekable();
            let any_match = matching.peek().is_some();
            match matching.find(|service| !claimed.contains(&service.handle)) {
                Some(service) => {
                    claimed.push(service.handle);
                    info!(
                        client = ?entry.ctx.id(),
                        handle = service.handle,
                        name = %service.descriptor.name,
                        "client bound"
                    );
                    entry.ctx.bind(service.handle);
                    entry.client.on_bound(service.handle);
                }
                None if any_match => {
                    warn!(
                        client = ?entry.ctx.id(),
                        name = %descriptor.name,
                        "every matching service is bound to an earlier client"
                    );
                    entry.ctx.unbind();
                }
                None => {
                    debug!(client = ?entry.ctx.id(), name = %descriptor.name, "no matching service");
                    entry.ctx.unbind();
                }
            }
        }

        *self.lock_discovered() = discovered;
    }

    fn service_context(&self, handle: u8) -> ServiceContext {
        ServiceContext::new(handle, Arc::clone(&self.sender))
    }

    fn lock_discovered(&self) -> MutexGuard<'_, Vec<DiscoveredService>> {
        self.discovered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn require_len(message: &Message, min_length: usize) -> std::result::Result<(), AppErrorCode> {
    if message.wire_len() < min_length {
        return Err(AppErrorCode::InvalidLength);
    }
    Ok(())
}

impl TransportHandler for App {
    fn on_datagram(&self, datagram: Datagram) {
        self.dispatch(datagram);
    }

    fn on_datagram_sent(&self, id: DatagramId) {
        trace!(%id, "datagram acknowledged");
    }

    fn on_peer_reset(&self) {
        warn!("peer reset; failing outstanding requests");
        self.reset_clients(AppError::LinkReset);
    }

    fn on_fatal(&self, error: &TransportError) {
        warn!(error = %error, "transport failed; failing outstanding requests");
        self.reset_clients(AppError::LinkReset);
    }

    fn on_link_closed(&self) {
        self.close();
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("services", &self.services.len())
            .field("clients", &self.clients.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
