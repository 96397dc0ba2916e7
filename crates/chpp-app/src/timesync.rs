//! Timesync: read the peer's wall clock and estimate the offset to ours.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::error::{AppError, Result};
use crate::header::{AppErrorCode, Message, APP_HEADER_SIZE};
use crate::service::ServiceContext;

/// Ask for the responder's wall-clock time.
pub const GET_TIME: u16 = 0x0001;

pub const MIN_REQUEST_LEN: usize = APP_HEADER_SIZE;

/// Response body: u64 LE nanoseconds since the UNIX epoch.
pub const MIN_RESPONSE_LEN: usize = APP_HEADER_SIZE + 8;

/// Outcome of one timesync exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimesyncResult {
    /// Peer wall clock, nanoseconds since the UNIX epoch.
    pub remote_time_ns: u64,
    pub rtt: Duration,
    /// Peer clock minus local clock, nanoseconds.
    pub offset_ns: i64,
}

/// Local wall clock in nanoseconds since the UNIX epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Offset of the remote clock, assuming a symmetric path:
/// `remote - (request_time + rtt / 2)`.
pub fn compute_offset(request_time_ns: u64, rtt: Duration, remote_time_ns: u64) -> i64 {
    let half_rtt = rtt.as_nanos() / 2;
    let midpoint = i128::from(request_time_ns) + half_rtt as i128;
    let offset = i128::from(remote_time_ns) - midpoint;
    offset.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// Decode a `GET_TIME` response body.
pub fn parse_time(body: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = body
        .get(..8)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| AppError::Malformed(format!("timesync body is {} bytes", body.len())))?;
    Ok(u64::from_le_bytes(raw))
}

pub(crate) fn serve(ctx: &ServiceContext, request: &Message) -> std::result::Result<(), AppErrorCode> {
    if request.header.command != GET_TIME {
        return Err(AppErrorCode::InvalidCommand);
    }
    ctx.respond(request, &now_ns().to_le_bytes()).map_err(|err| {
        warn!(error = %err, "timesync response not queued");
        AppErrorCode::Busy
    })?;
    Ok(())
}
