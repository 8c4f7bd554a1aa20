//! Transport abstraction.
//!
//! A [`Connector`] opens one [`Transport`] per connection attempt. The
//! transport reports its lifecycle through the [`EventSink`] it was opened
//! with; every event is tagged with the attempt it belongs to so the session
//! can discard events from transports it has already abandoned.

mod ws;

pub use ws::WsConnector;

use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::manager::Event;

/// Lifecycle events reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The connection could not be established.
    Error(String),
    /// The connection ended. Terminal.
    Close { code: u16, reason: String },
}

/// Delivery channel from a transport back to its session.
#[derive(Debug, Clone)]
pub struct EventSink {
    attempt: u64,
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub(crate) const fn new(attempt: u64, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { attempt, tx }
    }

    /// Report an event. Returns `false` once the session is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Event::Transport {
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }
}

/// One live (or pending) connection.
pub trait Transport: Send + Sync {
    /// Queue a text frame. Returns `false` if the transport is not open.
    fn send_text(&self, text: String) -> bool;

    /// Close the connection. Closing a transport that is still connecting
    /// abandons the attempt without further events.
    fn close(&self, code: u16, reason: &str);

    /// Whether the transport is open right now.
    fn is_open(&self) -> bool;
}

/// Opens transports to an endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Start opening a transport. Errors returned here are synchronous
    /// (e.g. an unparsable endpoint); connection failures are reported
    /// later as [`TransportEvent::Error`].
    fn open(&self, endpoint: &str, sink: EventSink) -> Result<Box<dyn Transport>, SessionError>;
}
