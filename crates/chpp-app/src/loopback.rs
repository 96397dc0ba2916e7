//! Loopback: the service echoes the request body back unchanged.

use std::time::Duration;

use bytes::Bytes;
use tracing::warn;

use crate::header::{AppErrorCode, Message, APP_HEADER_SIZE};
use crate::service::ServiceContext;

/// Command used by the loopback client. The service echoes any command.
pub const ECHO: u16 = 0x0000;

/// A loopback request must carry at least one body byte.
pub const MIN_REQUEST_LEN: usize = APP_HEADER_SIZE + 1;

/// Outcome of a loopback round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackResult {
    pub payload: Bytes,
    pub rtt: Duration,
}

pub(crate) fn serve(ctx: &ServiceContext, request: &Message) -> Result<(), AppErrorCode> {
    ctx.respond(request, &request.body).map_err(|err| {
        warn!(len = request.body.len(), error = %err, "loopback response not queued");
        AppErrorCode::Busy
    })?;
    Ok(())
}
