//! Reliable datagram protocol stack for peripheral links.
//!
//! chpp carries structured requests, responses and notifications between a
//! sensor hub and its peers over an unreliable byte link.
//!
//! # Crate Structure
//!
//! - [`link`]: byte-stream link abstraction (Unix sockets on hosts)
//! - [`transport`]: framing, CRC, ACK/retransmit, fragmentation and reassembly
//! - [`app`]: handle dispatch, services and clients, discovery (behind `app` feature)

/// Re-export link types.
pub mod link {
    pub use chpp_link::*;
}

/// Re-export transport types.
pub mod transport {
    pub use chpp_transport::*;
}

/// Re-export app-layer types (requires `app` feature).
#[cfg(feature = "app")]
pub mod app {
    pub use chpp_app::*;
}
