//! WebSocket transport over tokio-tungstenite.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

use rovelink_core::protocol::{CLOSE_ABNORMAL, CLOSE_NORMAL};

use super::{Connector, EventSink, Transport, TransportEvent};
use crate::error::SessionError;

/// Status code reported when the peer closes without one.
const CLOSE_NO_STATUS: u16 = 1005;

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSED: u8 = 2;

/// Opens WebSocket connections with `tokio_tungstenite::connect_async`.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub const fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, endpoint: &str, sink: EventSink) -> Result<Box<dyn Transport>, SessionError> {
        let request = endpoint
            .into_client_request()
            .map_err(|e| SessionError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

        let state = Arc::new(AtomicU8::new(CONNECTING));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(request, sink, outbound_rx, Arc::clone(&state)));

        Ok(Box::new(WsTransport {
            outbound,
            state,
            task,
        }))
    }
}

enum Outbound {
    Text(String),
    Close(u16, String),
}

struct WsTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl Transport for WsTransport {
    fn send_text(&self, text: String) -> bool {
        self.is_open() && self.outbound.send(Outbound::Text(text)).is_ok()
    }

    fn close(&self, code: u16, reason: &str) {
        match self.state.swap(CLOSED, Ordering::SeqCst) {
            CONNECTING => self.task.abort(),
            OPEN => {
                let _ = self.outbound.send(Outbound::Close(code, reason.to_string()));
            }
            _ => {}
        }
    }

    fn is_open(&self) -> bool {
        self.state.load(Ordering::SeqCst) == OPEN
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close(CLOSE_NORMAL, "");
    }
}

/// Drive one connection: handshake, then pump frames both ways until the
/// connection ends. Emits exactly one terminal event unless the attempt is
/// abandoned while connecting.
async fn run(
    request: Request,
    sink: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    state: Arc<AtomicU8>,
) {
    let stream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            state.store(CLOSED, Ordering::SeqCst);
            sink.emit(TransportEvent::Error(e.to_string()));
            return;
        }
    };

    let (mut write, mut read) = stream.split();

    if state
        .compare_exchange(CONNECTING, OPEN, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        // Abandoned between handshake completion and here.
        let _ = write.send(Message::Close(None)).await;
        return;
    }
    sink.emit(TransportEvent::Open);

    let (code, reason) = loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    sink.emit(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        sink.emit(TransportEvent::Message(text.to_owned()));
                    }
                    Err(_) => warn!(len = data.len(), "Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || (CLOSE_NO_STATUS, String::new()),
                        |f| (u16::from(f.code), f.reason.as_str().to_owned()),
                    );
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break (CLOSE_ABNORMAL, e.to_string()),
                None => break (CLOSE_ABNORMAL, "connection dropped".to_string()),
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::text(text)).await {
                        break (CLOSE_ABNORMAL, e.to_string());
                    }
                }
                Some(Outbound::Close(code, reason)) => {
                    debug!(code, %reason, "Sending close frame");
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if write.send(Message::Close(Some(frame))).await.is_err() {
                        break (code, reason);
                    }
                    // Keep reading until the peer acknowledges the close.
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break (CLOSE_NORMAL, String::new());
                }
            },
        }
    };

    state.store(CLOSED, Ordering::SeqCst);
    debug!(code, %reason, "WebSocket closed");
    sink.emit(TransportEvent::Close { code, reason });
}
