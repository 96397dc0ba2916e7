use std::path::PathBuf;

/// Failures of the byte-stream link underneath the transport.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The listening socket could not be created at `path`.
    #[error("cannot bind link socket {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No peer could be reached at `path`.
    #[error("cannot reach link peer at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("link accept failed: {0}")]
    Accept(std::io::Error),

    /// The in-process socket pair could not be created.
    #[error("cannot create link pair: {0}")]
    Pair(std::io::Error),

    /// Shutting the stream down failed for a reason other than the peer being gone.
    #[error("link shutdown failed: {0}")]
    Shutdown(std::io::Error),

    /// Reading, writing or configuring the stream failed.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unix socket paths are limited by `sockaddr_un`.
    #[error("link socket path is {len} bytes, limit is {max}: {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

pub type Result<T> = std::result::Result<T, LinkError>;
