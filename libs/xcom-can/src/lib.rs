//! Xcom-CAN Public Protocol Client
//!
//! Request/response and notification services of the Xcom-CAN gateway over an
//! extended-id CAN bus.
//!
//! # Architecture
//!
//! - **Codec**: bit-packed frame identifiers and fixed big-endian payloads
//! - **Registry**: 3-bit service id to service kind
//! - **Correlation**: token-keyed pending calls, any number in flight
//! - **Node**: receive loop, frame dispatch and `wait_response`
//! - **Client**: one call per service, scoped `open` / `close`
//! - **Transport**: `CanDriver` trait with mock and SocketCAN drivers
//!
//! # Features
//!
//! - `can-linux` - SocketCAN driver (Linux only)

pub mod addresses;
pub mod client;
pub mod codec;
pub mod config;
pub mod correlation;
pub mod error;
pub mod fault;
pub mod identifier;
pub mod logging;
pub mod node;
pub mod notifications;
pub mod registry;
pub mod transport;

// Re-export core types
pub use addresses::Address;
pub use client::XcomClient;
pub use codec::{
    Inbound, MessageNotification, ParameterPart, Request, Response, ServiceKind,
    ServiceMessage, ServicePayload,
};
pub use config::XcomConfig;
pub use error::{Result, XcomError};
pub use fault::{ErrorCategory, ProtocolError};
pub use identifier::FrameId;
pub use node::{DropReason, FrameOutcome, NodeStats, ReplyHandler, XcomNode};
pub use notifications::NotificationRecord;
pub use registry::ServiceRegistry;
pub use transport::{CanDriver, CanFrame, MockCanDriver, TransportError};
#[cfg(all(target_os = "linux", feature = "can-linux"))]
pub use transport::SocketCanDriver;
