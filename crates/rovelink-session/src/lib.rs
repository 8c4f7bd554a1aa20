//! Device session manager.
//!
//! Owns the single connection to the device and provides:
//! - a connect / disconnect state machine with a connect watchdog
//! - automatic reconnection after unexpected drops
//! - a heartbeat probe while connected
//! - fire-and-forget command sending
//! - fan-out of decoded inbound frames to registered listeners

pub mod config;
pub mod error;
mod listeners;
pub mod manager;
mod timer;
pub mod transport;

pub use config::{ReconnectPolicy, SessionConfig};
pub use error::SessionError;
pub use listeners::Registration;
pub use manager::{ConnectionManager, ConnectionState, SessionStatus};
pub use transport::{Connector, EventSink, Transport, TransportEvent, WsConnector};
