//! Persistent connection to the route server.
//!
//! A [`Transport`] owns at most one live [`Connection`] at a time. Callers
//! never see reconnects: [`Transport::send`] waits for an open connection,
//! queued messages survive a drop, and [`Transport::request`] resolves when a
//! matching reply arrives on whichever connection carries it.

pub mod connection;
pub mod mock;
pub mod pending;
pub mod session_store;
pub mod state;

use bytes::Bytes;
use parking_lot::Mutex;
use push_bus::{Delivery, PushBus};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::protocol::{
    ClientRequest, Fault, Inbound, OutboundMessage, ProtocolError, ServerMessage,
};

pub use connection::{CloseInfo, Connection, Connector, Frame, WebSocketConnector};
pub use pending::PendingCalls;
pub use session_store::{FileSessionStore, MemorySessionStore, SessionStore, StoreError};
pub use state::{BackoffPolicy, CloseKind, ConnectionPhase, TransportState};

use pending::PendingGuard;

const SESSION_QUERY_KEY: &str = "session_id";
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport has been shut down")]
    Closed,
    #[error("server fault: {0}")]
    Fault(Fault),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub server_url: Url,
    pub backoff: BackoffPolicy,
}

impl TransportConfig {
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Things observers of the transport may want to show the user.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Phase(ConnectionPhase),
    SessionAssigned(String),
    /// The server refused this client (capacity or session limit).
    Rejected { reason: Option<String> },
    Fault(Fault),
    /// A binary frame arrived with no metadata announcing it.
    OrphanAttachment { len: usize },
}

#[derive(Default)]
struct TaskSlots {
    connection: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Inner {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    store: Arc<dyn SessionStore>,
    state: Mutex<TransportState>,
    phase_tx: watch::Sender<ConnectionPhase>,
    pending: Arc<PendingCalls>,
    bus: PushBus<Inbound>,
    events: broadcast::Sender<TransportEvent>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: AsyncMutex<mpsc::UnboundedReceiver<String>>,
    requeue: Mutex<VecDeque<String>>,
    tasks: Mutex<TaskSlots>,
}

/// Shuts the transport down once the last handle is gone, so background
/// tasks do not keep reconnecting for nobody.
struct Owner(Arc<Inner>);

impl Drop for Owner {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
    _owner: Arc<Owner>,
}

impl Transport {
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let state = TransportState::new(store.load());
        let (phase_tx, _) = watch::channel(state.phase());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            config,
            connector,
            store,
            state: Mutex::new(state),
            phase_tx,
            pending: Arc::new(PendingCalls::new()),
            bus: PushBus::new(),
            events,
            outbound_tx,
            outbound_rx: AsyncMutex::new(outbound_rx),
            requeue: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(TaskSlots::default()),
        });
        Self {
            _owner: Arc::new(Owner(inner.clone())),
            inner,
        }
    }

    /// Opens a connection unless one is open or opening. A scheduled
    /// reconnect is cancelled and replaced by an immediate attempt.
    pub fn connect(&self) -> bool {
        self.inner.connect()
    }

    /// Queues `message` for delivery, waiting for an open connection first.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let text = message.encode()?;
        self.wait_until_open().await?;
        self.inner
            .outbound_tx
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    /// Sends `message` and waits for the first inbound message that echoes
    /// its request id or has one of the `expected` types. Server faults
    /// resolve the call as [`TransportError::Fault`].
    ///
    /// Dropping the returned future withdraws the call.
    pub async fn request<S: AsRef<str>>(
        &self,
        message: OutboundMessage,
        expected: &[S],
    ) -> Result<Inbound, TransportError> {
        let id = message
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let message = message.with_request_id(id.clone());
        let reply = self.inner.pending.register(&id, &message.kind, expected);
        let _guard = PendingGuard {
            id,
            calls: self.inner.pending.clone(),
        };

        self.send(message).await?;
        let inbound = reply.await.map_err(|_| TransportError::Closed)?;
        match inbound.message.as_fault() {
            Some(fault) => Err(TransportError::Fault(fault.clone())),
            None => Ok(inbound),
        }
    }

    pub async fn call(&self, request: &ClientRequest) -> Result<Inbound, TransportError> {
        self.request(request.to_message(), request.expected_responses())
            .await
    }

    pub async fn wait_until_open(&self) -> Result<(), TransportError> {
        let mut phases = self.inner.phase_tx.subscribe();
        let phase = *phases
            .wait_for(|phase| phase.is_open() || *phase == ConnectionPhase::ShutDown)
            .await
            .map_err(|_| TransportError::Closed)?;
        if phase == ConnectionPhase::ShutDown {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    /// Server pushes of one message type.
    pub fn subscribe(&self, kind: &str) -> broadcast::Receiver<Delivery<Inbound>> {
        self.inner.bus.subscribe(kind)
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Delivery<Inbound>> {
        self.inner.bus.subscribe_all()
    }

    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.inner.phase_tx.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.inner.phase_tx.subscribe()
    }

    /// True while at least one request is waiting for its reply.
    pub fn is_communicating(&self) -> bool {
        self.inner.pending.is_busy()
    }

    pub fn subscribe_communicating(&self) -> watch::Receiver<bool> {
        self.inner.pending.subscribe_busy()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().reconnect_attempts()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session_id().map(str::to_string)
    }

    /// Cancels any reconnect timer, drops the live connection and fails
    /// waiting requests with [`TransportError::Closed`]. Safe to repeat.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Inner {
    fn connect(self: &Arc<Self>) -> bool {
        let mut tasks = self.tasks.lock();
        {
            let mut state = self.state.lock();
            if let ConnectionPhase::ReconnectScheduled { .. } = state.phase() {
                if let Some(timer) = tasks.reconnect.take() {
                    timer.abort();
                }
            }
            if !state.begin_connect() {
                return false;
            }
            self.publish_phase(state.phase());
        }
        let inner = self.clone();
        tasks.connection = Some(tokio::spawn(async move { inner.run_connection().await }));
        true
    }

    fn shutdown(&self) {
        let mut tasks = self.tasks.lock();
        {
            let mut state = self.state.lock();
            if state.phase() == ConnectionPhase::ShutDown {
                return;
            }
            state.shut_down();
            self.publish_phase(state.phase());
        }
        if let Some(timer) = tasks.reconnect.take() {
            timer.abort();
        }
        if let Some(connection) = tasks.connection.take() {
            connection.abort();
        }
        drop(tasks);
        let dropped = self.pending.clear();
        info!(
            target = "chartroom::transport",
            dropped_calls = dropped,
            "transport shut down"
        );
    }

    fn publish_phase(&self, phase: ConnectionPhase) {
        self.phase_tx.send_replace(phase);
        let _ = self.events.send(TransportEvent::Phase(phase));
    }

    fn connect_url(&self) -> Url {
        let mut url = self.config.server_url.clone();
        let session = self.state.lock().session_id().map(str::to_string);
        if let Some(session) = session {
            let retained: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| key != SESSION_QUERY_KEY)
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(retained)
                .append_pair(SESSION_QUERY_KEY, &session);
        }
        url
    }

    async fn run_connection(self: Arc<Self>) {
        let url = self.connect_url();
        debug!(target = "chartroom::transport", url = %url, "connecting");

        let mut conn = match self.connector.connect(&url).await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(
                    target = "chartroom::transport",
                    error = %err,
                    "connect attempt failed"
                );
                self.connection_ended(CloseKind::Normal, None);
                return;
            }
        };

        let shut_down = {
            let mut state = self.state.lock();
            if state.phase() == ConnectionPhase::ShutDown {
                true
            } else {
                state.opened();
                self.publish_phase(state.phase());
                false
            }
        };
        if shut_down {
            conn.close().await;
            return;
        }
        info!(target = "chartroom::transport", url = %url, "connection open");

        let (kind, reason) = self.pump(conn.as_mut()).await;
        conn.close().await;
        self.connection_ended(kind, reason);
    }

    /// Moves frames in both directions until the connection ends.
    async fn pump(&self, conn: &mut dyn Connection) -> (CloseKind, Option<String>) {
        let mut outbound = self.outbound_rx.lock().await;
        let mut announced: VecDeque<Inbound> = VecDeque::new();
        let mut unauthorized: Option<String> = None;

        loop {
            let Some(text) = self.requeue.lock().pop_front() else {
                break;
            };
            if let Err(err) = conn.send_text(text.clone()).await {
                warn!(target = "chartroom::transport", error = %err, "resend failed");
                self.requeue.lock().push_front(text);
                return (CloseKind::classify(None, unauthorized.is_some()), unauthorized);
            }
        }

        loop {
            tokio::select! {
                frame = conn.recv() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        self.handle_text(&text, &mut announced, &mut unauthorized);
                    }
                    Some(Ok(Frame::Binary(data))) => self.handle_binary(data, &mut announced),
                    Some(Ok(Frame::Close(info))) => {
                        let code = info.as_ref().map(|info| info.code);
                        let kind = CloseKind::classify(code, unauthorized.is_some());
                        debug!(
                            target = "chartroom::transport",
                            code = ?code,
                            kind = ?kind,
                            "server closed connection"
                        );
                        let reason = unauthorized.or_else(|| {
                            info.map(|info| info.reason).filter(|reason| !reason.is_empty())
                        });
                        return (kind, reason);
                    }
                    Some(Err(err)) => {
                        warn!(target = "chartroom::transport", error = %err, "connection error");
                        return (CloseKind::classify(None, unauthorized.is_some()), unauthorized);
                    }
                    None => {
                        return (CloseKind::classify(None, unauthorized.is_some()), unauthorized);
                    }
                },
                Some(text) = outbound.recv() => {
                    if let Err(err) = conn.send_text(text.clone()).await {
                        warn!(target = "chartroom::transport", error = %err, "write failed, requeueing");
                        self.requeue.lock().push_front(text);
                        return (CloseKind::classify(None, unauthorized.is_some()), unauthorized);
                    }
                }
            }
        }
    }

    fn handle_text(
        &self,
        text: &str,
        announced: &mut VecDeque<Inbound>,
        unauthorized: &mut Option<String>,
    ) {
        let (inbound, follows) = match Inbound::decode(text) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(
                    target = "chartroom::protocol",
                    error = %err,
                    "dropping undecodable message"
                );
                return;
            }
        };
        trace!(
            target = "chartroom::transport",
            kind = %inbound.kind,
            request_id = ?inbound.request_id,
            binary_follows = follows,
            "inbound message"
        );

        match &inbound.message {
            ServerMessage::SetSession { session_id } => self.adopt_session(session_id),
            ServerMessage::Unauthorized { reason } => {
                warn!(target = "chartroom::transport", reason = %reason, "server refused session");
                *unauthorized = Some(reason.clone());
            }
            _ => {}
        }

        if follows {
            announced.push_back(inbound);
        } else {
            self.dispatch(inbound);
        }
    }

    fn handle_binary(&self, data: Bytes, announced: &mut VecDeque<Inbound>) {
        match announced.pop_front() {
            Some(mut inbound) => {
                inbound.attachment = Some(data);
                self.dispatch(inbound);
            }
            None => {
                warn!(
                    target = "chartroom::transport",
                    len = data.len(),
                    "binary frame without announcing message"
                );
                let _ = self
                    .events
                    .send(TransportEvent::OrphanAttachment { len: data.len() });
            }
        }
    }

    fn dispatch(&self, inbound: Inbound) {
        if let Some(fault) = inbound.message.as_fault() {
            warn!(
                target = "chartroom::transport",
                fault = %fault,
                event = ?fault.event,
                "server reported a fault"
            );
            let _ = self.events.send(TransportEvent::Fault(fault.clone()));
        }
        let satisfied = self.pending.resolve(&inbound);
        let kind = inbound.kind.clone();
        match self.bus.publish_required(&kind, inbound) {
            Ok(subscribers) => trace!(
                target = "chartroom::transport",
                kind = %kind,
                satisfied,
                subscribers,
                "dispatched"
            ),
            Err(err) if satisfied == 0 => debug!(
                target = "chartroom::transport",
                error = %err,
                "unhandled server message"
            ),
            Err(_) => {}
        }
    }

    fn adopt_session(&self, session_id: &str) {
        self.state.lock().set_session_id(session_id);
        if let Err(err) = self.store.save(session_id) {
            warn!(
                target = "chartroom::session",
                error = %err,
                "failed to persist session id"
            );
        }
        info!(target = "chartroom::session", session_id, "session assigned");
        let _ = self
            .events
            .send(TransportEvent::SessionAssigned(session_id.to_string()));
    }

    fn connection_ended(self: &Arc<Self>, kind: CloseKind, reason: Option<String>) {
        let mut tasks = self.tasks.lock();
        let delay = {
            let mut state = self.state.lock();
            if state.phase() == ConnectionPhase::ShutDown {
                return;
            }
            state.closed(kind);
            self.publish_phase(state.phase());
            self.bus.prune();
            let delay = state.schedule_reconnect(&self.config.backoff);
            self.publish_phase(state.phase());
            delay
        };

        if kind == CloseKind::Rejected {
            warn!(
                target = "chartroom::transport",
                reason = ?reason,
                "connection rejected by server"
            );
            let _ = self.events.send(TransportEvent::Rejected { reason });
        }

        if let Some(delay) = delay {
            info!(
                target = "chartroom::transport",
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
            tasks.reconnect = Some(self.spawn_reconnect(delay));
        }
    }

    fn spawn_reconnect(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.tasks.lock().reconnect.take();
            inner.connect();
        })
    }
}
