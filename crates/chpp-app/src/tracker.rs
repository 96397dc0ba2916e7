//! Request/response correlation.
//!
//! Each request command of a client owns one [`RequestSlot`]: a transaction
//! counter, timestamps for RTT, and a condition a blocked caller waits on.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::header::{AppHeader, Message};

/// Transaction and timing state of the latest request of one command.
#[derive(Debug, Clone, Default)]
pub struct RequestState {
    next_transaction: u8,
    transaction: u8,
    request_time: Option<Instant>,
    response_time: Option<Instant>,
}

impl RequestState {
    /// Start a request: assign the next transaction ID and stamp the send time.
    pub fn allocate(&mut self) -> u8 {
        let transaction = self.next_transaction;
        self.next_transaction = transaction.wrapping_add(1);
        self.transaction = transaction;
        self.request_time = Some(Instant::now());
        self.response_time = None;
        transaction
    }

    /// Accept `header` if it answers the outstanding request.
    ///
    /// Rejects unsolicited, duplicate and mismatched responses.
    pub fn match_response(&mut self, header: &AppHeader) -> bool {
        if self.request_time.is_none() {
            warn!(
                handle = header.handle,
                command = header.command,
                transaction = header.transaction,
                "unsolicited response"
            );
            return false;
        }
        if self.response_time.is_some() {
            warn!(
                handle = header.handle,
                command = header.command,
                transaction = header.transaction,
                "duplicate response"
            );
            return false;
        }
        if header.transaction != self.transaction {
            warn!(
                handle = header.handle,
                command = header.command,
                expected = self.transaction,
                transaction = header.transaction,
                "response transaction mismatch"
            );
            return false;
        }
        self.response_time = Some(Instant::now());
        true
    }

    /// Forget the outstanding request; any late response is unsolicited.
    pub fn abandon(&mut self) {
        self.request_time = None;
        self.response_time = None;
    }

    pub fn transaction(&self) -> u8 {
        self.transaction
    }

    pub fn request_time(&self) -> Option<Instant> {
        self.request_time
    }

    pub fn response_time(&self) -> Option<Instant> {
        self.response_time
    }

    /// Round-trip time of the last matched response.
    pub fn rtt(&self) -> Option<Duration> {
        match (self.request_time, self.response_time) {
            (Some(sent), Some(received)) => Some(received.saturating_duration_since(sent)),
            _ => None,
        }
    }
}

/// A matched response and its round-trip time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub message: Message,
    pub rtt: Duration,
}

#[derive(Debug, Default)]
struct SlotInner {
    state: RequestState,
    /// A caller is blocked in [`RequestSlot::wait`].
    waiting: bool,
    outcome: Option<std::result::Result<Response, AppError>>,
}

/// Tracker state for one request command plus the waiter's condition.
#[derive(Debug, Default)]
pub struct RequestSlot {
    inner: Mutex<SlotInner>,
    ready: Condvar,
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot for a blocking request and allocate its transaction.
    pub fn prepare_blocking(&self, command: u16) -> Result<u8> {
        let mut inner = self.lock();
        if inner.waiting {
            return Err(AppError::RequestPending(command));
        }
        inner.waiting = true;
        inner.outcome = None;
        Ok(inner.state.allocate())
    }

    /// Allocate a transaction for a fire-and-forget request.
    pub fn prepare(&self) -> u8 {
        self.lock().state.allocate()
    }

    /// Undo [`RequestSlot::prepare_blocking`] when the request never left.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        inner.waiting = false;
        inner.outcome = None;
        inner.state.abandon();
    }

    /// Run the response matcher; true when `header` answers the outstanding request.
    pub fn match_response(&self, header: &AppHeader) -> bool {
        self.lock().state.match_response(header)
    }

    /// Hand a matched response to the blocked caller, if any.
    pub fn complete(&self, message: Message) {
        let mut inner = self.lock();
        if !inner.waiting {
            return;
        }
        let rtt = inner.state.rtt().unwrap_or_default();
        inner.outcome = Some(Ok(Response { message, rtt }));
        self.ready.notify_all();
    }

    /// Fail a blocked caller with `error` and forget the request.
    pub fn release(&self, error: AppError) {
        let mut inner = self.lock();
        inner.state.abandon();
        if inner.waiting && inner.outcome.is_none() {
            debug!(error = %error, "releasing blocked request");
            inner.outcome = Some(Err(error));
            self.ready.notify_all();
        }
    }

    /// Block until the response arrives, the slot is released, or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<Response> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(outcome) = inner.outcome.take() {
                inner.waiting = false;
                return outcome;
            }
            let now = Instant::now();
            if now >= deadline {
                inner.waiting = false;
                inner.state.abandon();
                return Err(AppError::Timeout(timeout));
            }
            inner = self
                .ready
                .wait_timeout(inner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Snapshot of the tracker state.
    pub fn state(&self) -> RequestState {
        self.lock().state.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
