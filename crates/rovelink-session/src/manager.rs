//! Connection manager.
//!
//! One [`ConnectionManager`] owns the single link to the device. Callers
//! interact through cheap cloneable handles; all transport events and timer
//! firings are funnelled into one driver task that applies them to the
//! session state in arrival order. State changes are computed under the
//! session lock, and listeners are notified only after it is released.
//!
//! Every path that changes state and notifies listeners holds the dispatch
//! guard for the whole transition, so listeners observe transitions one at a
//! time and in the order they were applied. The guard is re-entrant: a
//! listener may call back into the manager from its callback.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use rovelink_core::protocol::{
    CLOSE_NORMAL, Command, CustomMessage, DeviceAction, Inbound, InboundMessage, decode_inbound,
};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::listeners::{ListenerSet, Registration};
use crate::timer::{self, TimerSlot};
use crate::transport::{Connector, EventSink, Transport, TransportEvent, WsConnector};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Snapshot returned by [`ConnectionManager::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub endpoint: String,
}

/// Events consumed by the driver task.
#[derive(Debug)]
pub(crate) enum Event {
    Transport { attempt: u64, event: TransportEvent },
    ConnectTimeout { timer: u64 },
    ReconnectDue { timer: u64 },
    HeartbeatDue { timer: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Reconnect,
}

type Outcome = Result<(), SessionError>;

struct Session {
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    /// Id of the current transport; events tagged otherwise are stale.
    attempt: u64,
    origin: Origin,
    manual_disconnect: bool,
    pending: Option<oneshot::Sender<Outcome>>,
    watchdog: TimerSlot,
    reconnect: TimerSlot,
    heartbeat: TimerSlot,
    next_timer: u64,
    /// Reconnect windows scheduled since the last successful open.
    reconnect_attempts: u32,
}

impl Session {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            transport: None,
            attempt: 0,
            origin: Origin::Caller,
            manual_disconnect: false,
            pending: None,
            watchdog: TimerSlot::default(),
            reconnect: TimerSlot::default(),
            heartbeat: TimerSlot::default(),
            next_timer: 0,
            reconnect_attempts: 0,
        }
    }

    fn timer_id(&mut self) -> u64 {
        self.next_timer += 1;
        self.next_timer
    }

    /// Drop the transport and per-connection timers and become disconnected.
    fn teardown(&mut self) -> Option<Box<dyn Transport>> {
        self.watchdog.cancel();
        self.heartbeat.cancel();
        self.state = ConnectionState::Disconnected;
        self.transport.take()
    }
}

/// Side effects to run once the session lock is released.
#[derive(Default)]
struct Effects {
    notify: Option<bool>,
    message: Option<InboundMessage>,
    resolve: Option<(oneshot::Sender<Outcome>, Outcome)>,
}

impl Effects {
    fn notify(connected: bool) -> Self {
        Self {
            notify: Some(connected),
            ..Self::default()
        }
    }

    fn resolve(mut self, pending: Option<oneshot::Sender<Outcome>>, outcome: Outcome) -> Self {
        self.resolve = pending.map(|tx| (tx, outcome));
        self
    }
}

struct Shared {
    config: SessionConfig,
    connector: Box<dyn Connector>,
    /// Serializes transition plus notification. Always taken before `session`.
    dispatch: ReentrantMutex<()>,
    session: Mutex<Session>,
    events: mpsc::UnboundedSender<Event>,
    state_listeners: ListenerSet<bool>,
    message_listeners: ListenerSet<InboundMessage>,
}

/// Handle to the device connection.
///
/// Clones share the same connection. The driver task stops once every
/// handle has been dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager that connects over WebSocket.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, WsConnector::new())
    }

    /// Create a manager over a custom transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_connector(config: SessionConfig, connector: impl Connector) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            connector: Box::new(connector),
            dispatch: ReentrantMutex::new(()),
            session: Mutex::new(Session::new()),
            events,
            state_listeners: ListenerSet::new(),
            message_listeners: ListenerSet::new(),
        });
        tokio::spawn(drive(Arc::downgrade(&shared), rx));
        Self { shared }
    }

    /// Establish the connection.
    ///
    /// Resolves once the transport opens. Returns `Ok(())` immediately if a
    /// connection is already open or being opened. A caller-initiated attempt
    /// that fails is not retried automatically.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let outcome = {
            let mut session = self.shared.session.lock();
            if session.state != ConnectionState::Disconnected {
                debug!(state = %session.state, "Connect requested while already active");
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            session.reconnect_attempts = 0;
            self.shared
                .start_attempt(&mut session, Origin::Caller, Some(tx))?;
            rx
        };
        outcome.await.unwrap_or(Err(SessionError::Cancelled))
    }

    /// Close the connection and suppress automatic reconnection.
    ///
    /// Always notifies state listeners with `false`, even when already
    /// disconnected. A `connect()` still waiting resolves with
    /// [`SessionError::Cancelled`].
    pub fn disconnect(&self) {
        let _dispatch = self.shared.dispatch.lock();
        let pending = {
            let mut session = self.shared.session.lock();
            info!(state = %session.state, "Disconnecting from device");
            session.manual_disconnect = true;
            session.reconnect.cancel();
            session.reconnect_attempts = 0;
            if let Some(transport) = session.teardown() {
                transport.close(CLOSE_NORMAL, "User disconnected");
            }
            session.pending.take()
        };
        self.shared
            .apply(Effects::notify(false).resolve(pending, Err(SessionError::Cancelled)));
    }

    /// Send a command frame. Returns `false` when not connected.
    pub fn send_command(&self, action: &str, value: Option<f64>) -> bool {
        self.send_prepared(&Command::new(action, value))
    }

    /// Send a command for a known device action. Joint angles are rounded.
    pub fn send_action(&self, action: DeviceAction, value: Option<f64>) -> bool {
        self.send_prepared(&action.command(value))
    }

    /// Send an arbitrary payload wrapped in the custom envelope.
    pub fn send_message(&self, data: Value) -> bool {
        self.send_frame("custom", || CustomMessage::new(data).to_frame())
    }

    fn send_prepared(&self, command: &Command) -> bool {
        self.send_frame(&command.action, || command.to_frame())
    }

    fn send_frame(&self, what: &str, encode: impl FnOnce() -> serde_json::Result<String>) -> bool {
        let session = self.shared.session.lock();
        let transport = match session.transport.as_deref() {
            Some(t) if session.state == ConnectionState::Connected => t,
            _ => {
                debug!(what, state = %session.state, "Not connected, frame not sent");
                return false;
            }
        };
        let frame = match encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(what, error = %e, "Failed to encode frame");
                return false;
            }
        };
        let sent = transport.send_text(frame);
        if sent {
            debug!(what, "Frame sent");
        } else {
            warn!(what, "Transport refused frame");
        }
        sent
    }

    /// Register a connection-state listener.
    ///
    /// The listener is invoked immediately with the current state, then with
    /// `true` on every successful open and `false` on every transition to
    /// disconnected.
    pub fn add_connection_state_listener<F>(&self, listener: F) -> Registration
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let listener: Arc<dyn Fn(&bool) + Send + Sync> = Arc::new(move |c: &bool| listener(*c));
        let _dispatch = self.shared.dispatch.lock();
        let registration = self.shared.state_listeners.register(Arc::clone(&listener));
        listener(&self.is_connected());
        registration
    }

    /// Register a listener for inbound device frames.
    ///
    /// Heartbeat acknowledgements and malformed frames are never delivered.
    pub fn add_message_listener<F>(&self, listener: F) -> Registration
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared.message_listeners.register(Arc::new(listener))
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state();
        SessionStatus {
            state,
            connected: state == ConnectionState::Connected,
            endpoint: self.shared.config.endpoint.clone(),
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.shared.config.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn drive(shared: Weak<Shared>, mut rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle(event);
    }
    trace!("Session driver stopped");
}

impl Shared {
    /// Open a new transport and arm the watchdog. Requires the session to be
    /// disconnected.
    fn start_attempt(
        &self,
        session: &mut Session,
        origin: Origin,
        pending: Option<oneshot::Sender<Outcome>>,
    ) -> Result<(), SessionError> {
        session.reconnect.cancel();
        session.heartbeat.cancel();
        session.manual_disconnect = false;
        session.attempt += 1;
        let attempt = session.attempt;

        let sink = EventSink::new(attempt, self.events.clone());
        let transport = self.connector.open(&self.config.endpoint, sink)?;

        session.transport = Some(transport);
        session.state = ConnectionState::Connecting;
        session.origin = origin;
        session.pending = pending;

        let timer = session.timer_id();
        session.watchdog.arm(
            timer,
            timer::after(
                self.config.connect_timeout,
                self.events.clone(),
                Event::ConnectTimeout { timer },
            ),
        );

        info!(endpoint = %self.config.endpoint, attempt, ?origin, "Connecting to device");
        Ok(())
    }

    fn handle(&self, event: Event) {
        let _dispatch = self.dispatch.lock();
        let effects = {
            let mut session = self.session.lock();
            match event {
                Event::Transport { attempt, event } => {
                    if attempt != session.attempt || session.transport.is_none() {
                        trace!(attempt, "Ignoring event from stale transport");
                        return;
                    }
                    match event {
                        TransportEvent::Open => self.on_open(&mut session),
                        TransportEvent::Message(text) => on_message(&text),
                        TransportEvent::Error(reason) => self.on_error(&mut session, &reason),
                        TransportEvent::Close { code, reason } => {
                            self.on_close(&mut session, code, &reason)
                        }
                    }
                }
                Event::ConnectTimeout { timer } => self.on_connect_timeout(&mut session, timer),
                Event::ReconnectDue { timer } => self.on_reconnect_due(&mut session, timer),
                Event::HeartbeatDue { timer } => {
                    on_heartbeat(&session, timer);
                    Effects::default()
                }
            }
        };
        self.apply(effects);
    }

    fn apply(&self, effects: Effects) {
        if let Some(connected) = effects.notify {
            self.state_listeners.dispatch(&connected);
        }
        if let Some(message) = effects.message {
            self.message_listeners.dispatch(&message);
        }
        if let Some((tx, outcome)) = effects.resolve {
            let _ = tx.send(outcome);
        }
    }

    fn on_open(&self, session: &mut Session) -> Effects {
        if session.state != ConnectionState::Connecting {
            return Effects::default();
        }
        session.watchdog.cancel();
        session.state = ConnectionState::Connected;
        session.reconnect_attempts = 0;

        let timer = session.timer_id();
        session.heartbeat.arm(
            timer,
            timer::every(self.config.heartbeat_interval, self.events.clone(), move || {
                Event::HeartbeatDue { timer }
            }),
        );

        info!(endpoint = %self.config.endpoint, "Connected to device");
        Effects::notify(true).resolve(session.pending.take(), Ok(()))
    }

    fn on_error(&self, session: &mut Session, reason: &str) -> Effects {
        let was = session.state;
        let origin = session.origin;
        drop(session.teardown());

        match was {
            ConnectionState::Connecting => {
                if origin == Origin::Reconnect {
                    debug!(%reason, "Reconnect attempt failed");
                    self.schedule_reconnect(session);
                } else {
                    warn!(%reason, "Connection attempt failed");
                }
                Effects::notify(false).resolve(
                    session.pending.take(),
                    Err(SessionError::Transport(reason.to_string())),
                )
            }
            ConnectionState::Connected => {
                warn!(%reason, "Transport error on open connection");
                self.schedule_reconnect(session);
                Effects::notify(false)
            }
            ConnectionState::Disconnected => Effects::default(),
        }
    }

    fn on_close(&self, session: &mut Session, code: u16, reason: &str) -> Effects {
        let was = session.state;
        let origin = session.origin;
        drop(session.teardown());

        match was {
            ConnectionState::Connected => {
                info!(code, %reason, "Connection closed");
                if code != CLOSE_NORMAL {
                    self.schedule_reconnect(session);
                }
                Effects::notify(false)
            }
            ConnectionState::Connecting => {
                warn!(code, %reason, "Connection closed before opening");
                if origin == Origin::Reconnect {
                    self.schedule_reconnect(session);
                }
                Effects::notify(false).resolve(
                    session.pending.take(),
                    Err(SessionError::Transport(format!(
                        "closed before opening (code {code})"
                    ))),
                )
            }
            ConnectionState::Disconnected => Effects::default(),
        }
    }

    fn on_connect_timeout(&self, session: &mut Session, timer: u64) -> Effects {
        if !session.watchdog.fire(timer) || session.state != ConnectionState::Connecting {
            return Effects::default();
        }
        let origin = session.origin;
        if let Some(transport) = session.teardown() {
            transport.close(CLOSE_NORMAL, "Connection timeout");
        }
        let timeout = self.config.connect_timeout;
        warn!(timeout_ms = timeout.as_millis(), ?origin, "Connection attempt timed out");
        if origin == Origin::Reconnect {
            self.schedule_reconnect(session);
        }
        Effects::notify(false).resolve(session.pending.take(), Err(SessionError::Timeout(timeout)))
    }

    fn on_reconnect_due(&self, session: &mut Session, timer: u64) -> Effects {
        if !session.reconnect.fire(timer) {
            return Effects::default();
        }
        if session.manual_disconnect || session.state != ConnectionState::Disconnected {
            debug!(state = %session.state, "Skipping reconnect");
            return Effects::default();
        }
        if let Err(e) = self.start_attempt(session, Origin::Reconnect, None) {
            error!(error = %e, "Reconnect attempt could not start");
        }
        Effects::default()
    }

    /// Arm the reconnect timer for the next window, unless reconnection is
    /// suppressed or the policy is exhausted.
    fn schedule_reconnect(&self, session: &mut Session) {
        if session.manual_disconnect {
            return;
        }
        let policy = &self.config.reconnect;
        let attempt = session.reconnect_attempts;
        if !policy.should_retry(attempt) {
            error!(attempt, "Max reconnect attempts reached");
            return;
        }
        let delay = policy.delay_for_attempt(attempt);
        session.reconnect_attempts = attempt.saturating_add(1);

        let timer = session.timer_id();
        session.reconnect.arm(
            timer,
            timer::after(delay, self.events.clone(), Event::ReconnectDue { timer }),
        );
        info!(attempt, delay_ms = delay.as_millis(), "Reconnect scheduled");
    }
}

fn on_message(text: &str) -> Effects {
    match decode_inbound(text) {
        Ok(Inbound::Heartbeat) => {
            debug!("Heartbeat acknowledged");
            Effects::default()
        }
        Ok(Inbound::DeviceError(message)) => {
            error!(
                message = message.error_message().unwrap_or("<none>"),
                "Device reported error"
            );
            Effects {
                message: Some(message),
                ..Effects::default()
            }
        }
        Ok(Inbound::Data(message)) => Effects {
            message: Some(message),
            ..Effects::default()
        },
        Err(e) => {
            warn!(error = %e, frame = text, "Dropping malformed frame");
            Effects::default()
        }
    }
}

fn on_heartbeat(session: &Session, timer: u64) {
    if !session.heartbeat.is_current(timer) || session.state != ConnectionState::Connected {
        return;
    }
    let Some(transport) = session.transport.as_deref().filter(|t| t.is_open()) else {
        return;
    };
    match Command::ping().to_frame() {
        Ok(frame) => {
            if transport.send_text(frame) {
                trace!("Heartbeat sent");
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode heartbeat"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
#[path = "manager_tests.rs"]
mod tests;
