//! CHPP app layer.
//!
//! Datagrams delivered by the transport start with a 6-byte app header:
//! handle, message type, transaction, command (u16 LE) and error code.
//! The [`App`] dispatcher routes each one by handle to a service or client.
//!
//! Handles 1 to 3 are the predefined loopback, discovery and timesync
//! services. Services registered with an [`AppBuilder`] answer on
//! negotiated handles starting at [`handle::NEGOTIATED_START`], in
//! registration order. Clients bind to a peer's service by discovery.

pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod header;
pub mod loopback;
pub mod registry;
pub mod service;
pub mod timesync;
pub mod tracker;

pub use config::AppConfig;
pub use descriptor::{ClientDescriptor, DiscoveredService, ServiceDescriptor, Version};
pub use dispatcher::App;
pub use error::{AppError, Result};
pub use header::{encode_message, AppErrorCode, AppHeader, Message, MessageType, APP_HEADER_SIZE};
pub use loopback::LoopbackResult;
pub use registry::AppBuilder;
pub use service::{Client, ClientContext, ClientId, Service, ServiceContext};
pub use timesync::TimesyncResult;
pub use tracker::{RequestState, Response};
