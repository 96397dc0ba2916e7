//! Byte-stream link abstraction.
//!
//! The protocol stack above this crate only needs an unreliable, ordered byte
//! pipe (a UART or SPI link on real hardware). On hosts the link is simulated
//! with Unix domain sockets:
//! - [`LinkStream`] is the connected byte pipe (`Read + Write`)
//! - [`UnixDomainSocket`] binds, accepts and connects filesystem-path sockets
//!
//! This is the lowest layer of chpp. Everything else builds on top of
//! the [`LinkStream`] type provided here.

pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use error::{LinkError, Result};
pub use stream::LinkStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
