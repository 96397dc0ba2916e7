//! Discovery: enumerate the negotiated services of the peer.
//!
//! A `DISCOVER_ALL` response body is one [`DESCRIPTOR_SIZE`]-byte descriptor
//! per registered service, in registration order. The position of a
//! descriptor determines its handle.

use bytes::BytesMut;
use tracing::warn;

use crate::descriptor::{DiscoveredService, ServiceDescriptor, DESCRIPTOR_SIZE};
use crate::error::{AppError, Result};
use crate::handle::{negotiated_handle, MAX_NEGOTIATED};
use crate::header::{AppErrorCode, Message, APP_HEADER_SIZE};
use crate::service::ServiceContext;

/// Request every registered service descriptor.
pub const DISCOVER_ALL: u16 = 0x0001;

pub const MIN_REQUEST_LEN: usize = APP_HEADER_SIZE;

/// Serialize descriptors in registration order.
pub fn encode_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a ServiceDescriptor>) -> BytesMut {
    let mut buf = BytesMut::new();
    for descriptor in descriptors {
        descriptor.encode(&mut buf);
    }
    buf
}

/// Decode a `DISCOVER_ALL` response body.
pub fn parse_descriptors(body: &[u8]) -> Result<Vec<DiscoveredService>> {
    if body.len() % DESCRIPTOR_SIZE != 0 {
        return Err(AppError::Malformed(format!(
            "discovery body of {} bytes is not a multiple of {DESCRIPTOR_SIZE}",
            body.len()
        )));
    }
    let count = body.len() / DESCRIPTOR_SIZE;
    if count > MAX_NEGOTIATED {
        return Err(AppError::Malformed(format!(
            "discovery lists {count} services, max {MAX_NEGOTIATED}"
        )));
    }

    body.chunks_exact(DESCRIPTOR_SIZE)
        .enumerate()
        .map(|(index, raw)| {
            let handle = negotiated_handle(index)
                .ok_or(AppError::RegistrationFull(MAX_NEGOTIATED))?;
            Ok(DiscoveredService {
                handle,
                descriptor: ServiceDescriptor::decode(raw)?,
            })
        })
        .collect()
}

pub(crate) fn serve<'a>(
    ctx: &ServiceContext,
    request: &Message,
    descriptors: impl IntoIterator<Item = &'a ServiceDescriptor>,
) -> std::result::Result<(), AppErrorCode> {
    if request.header.command != DISCOVER_ALL {
        return Err(AppErrorCode::InvalidCommand);
    }
    let body = encode_descriptors(descriptors);
    ctx.respond(request, &body).map_err(|err| {
        warn!(error = %err, "discovery response not queued");
        AppErrorCode::Busy
    })?;
    Ok(())
}
