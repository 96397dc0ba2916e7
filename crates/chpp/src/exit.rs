use std::fmt;
use std::io;

use chpp_app::{AppError, AppErrorCode};
use chpp_link::LinkError;
use chpp_transport::{EnqueueErrorKind, TransportError};

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Bind { source, .. }
        | LinkError::Connect { source, .. }
        | LinkError::Accept(source)
        | LinkError::Pair(source)
        | LinkError::Shutdown(source)
        | LinkError::Io(source) => io_error(context, source),
        LinkError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
    }
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Link(err) => link_error(context, err),
        TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidConfig(_) | TransportError::PayloadTooLarge { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn app_error(context: &str, err: AppError) -> CliError {
    let code = match &err {
        AppError::Timeout(_) => TIMEOUT,
        AppError::Remote(
            AppErrorCode::InvalidLength | AppErrorCode::InvalidCommand | AppErrorCode::InvalidArg,
        ) => DATA_INVALID,
        AppError::Remote(_) => FAILURE,
        AppError::Malformed(_) => DATA_INVALID,
        AppError::Enqueue(EnqueueErrorKind::TooLarge { .. } | EnqueueErrorKind::Empty) => USAGE,
        AppError::Enqueue(_) | AppError::Closed | AppError::LinkReset => TRANSPORT_ERROR,
        AppError::InvalidDescriptor(_) | AppError::RegistrationFull(_) => USAGE,
        AppError::NotBound | AppError::WouldDeadlock | AppError::RequestPending(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeouts_map_to_124() {
        let err = app_error("loopback", AppError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("loopback: "));
    }

    #[test]
    fn rejected_requests_are_data_invalid() {
        let err = app_error("loopback", AppError::Remote(AppErrorCode::InvalidLength));
        assert_eq!(err.code, DATA_INVALID);
        assert_eq!(
            app_error("x", AppError::Remote(AppErrorCode::Busy)).code,
            FAILURE
        );
    }

    #[test]
    fn bad_config_is_usage() {
        let err = transport_error(
            "transport",
            TransportError::InvalidConfig("mtu must be within 1..=65535, got 0".to_string()),
        );
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn closed_link_is_transport_error() {
        assert_eq!(app_error("discover", AppError::Closed).code, TRANSPORT_ERROR);
        assert_eq!(
            transport_error("tx", TransportError::Closed).code,
            TRANSPORT_ERROR
        );
    }
}
