//! Connection management for AMI

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::{
    constants::{DEFAULT_EVENT_QUEUE_SIZE, DEFAULT_TIMEOUT_MS, RESPONSE_GOODBYE, SOCKET_BUF_SIZE, WIRE_TAP_CAPACITY},
    error::{AmiError, AmiResult, DisconnectReason},
    fields::AmiField,
    hub::{DeliveryPolicy, EventSource, SourceItem, SubscriptionHub},
    message::AmiMessage,
    pending::PendingTable,
    protocol::AmiParser,
};

/// Any bidirectional byte stream the client can run over.
///
/// Blanket-implemented; `TcpStream`, TLS wrappers, and in-memory duplex
/// streams all qualify.
pub trait AmiStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> AmiStream for T {}

/// Connection status for the AMI client
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// The session is active.
    Connected,
    /// The session reached its terminal state.
    Disconnected(DisconnectReason),
}

/// Direction of a raw-bytes observer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDirection {
    /// Bytes written to the stream
    Sent,
    /// Bytes read from the stream
    Received,
}

/// One raw-bytes observation, carrying the exact bytes that crossed the wire.
///
/// Delivery is best-effort and for debugging only; slow observers lose
/// events without affecting the client.
#[derive(Debug, Clone)]
pub struct WireEvent {
    /// Whether the bytes were written or read
    pub direction: WireDirection,
    /// The exact bytes, including terminators and the server banner
    pub bytes: Bytes,
}

/// Generator for ActionID values assigned by the client's own helpers.
pub type ActionIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Options fixed at construction time.
///
/// Use [`Default::default()`] for standard settings: drop-oldest delivery,
/// a 1000-event queue per subscriber, UUID ActionIDs.
#[derive(Clone)]
pub struct AmiConnectOptions {
    /// Back-pressure policy between the reader and slow subscribers.
    pub delivery_policy: DeliveryPolicy,
    /// Per-subscriber event queue capacity. Default: 1000.
    pub event_queue_size: usize,
    /// Override for ActionIDs assigned by [`AmiClient::new_action`], used
    /// for deterministic tests. `None` keeps the UUID default.
    pub action_id_generator: Option<ActionIdGenerator>,
}

impl Default for AmiConnectOptions {
    fn default() -> Self {
        Self {
            delivery_policy: DeliveryPolicy::default(),
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
            action_id_generator: None,
        }
    }
}

impl std::fmt::Debug for AmiConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiConnectOptions")
            .field("delivery_policy", &self.delivery_policy)
            .field("event_queue_size", &self.event_queue_size)
            .field(
                "action_id_generator",
                &self.action_id_generator.as_ref().map(|_| "<fn>"),
            )
            .finish()
    }
}

/// Shared state between client handles and the reader task
struct SharedState {
    writer: Mutex<WriteHalf<Box<dyn AmiStream>>>,
    pending: PendingTable,
    hub: SubscriptionHub,
    status_tx: watch::Sender<ConnectionStatus>,
    wire_tap: broadcast::Sender<WireEvent>,
    action_ids: Option<ActionIdGenerator>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// AMI client handle (Clone + Send)
///
/// Actions from any number of tasks are serialized through the writer mutex
/// and correlated to replies by ActionID; the background reader task routes
/// each inbound message to its pending slot or to the event subscribers.
#[derive(Clone)]
pub struct AmiClient {
    shared: Arc<SharedState>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for AmiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiClient")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Live event subscription (!Clone)
///
/// Yields every inbound message that is not a reply, in wire order, as
/// `Result<AmiMessage, AmiError>`. An `Err(AmiError::EventsDropped { .. })`
/// item means this subscriber fell behind under the drop-oldest policy. The
/// stream ends with one `Err(AmiError::ClientClosed(reason))` carrying the
/// terminal cause, then `None`.
pub struct AmiEventStream {
    source: EventSource,
    status_rx: watch::Receiver<ConnectionStatus>,
    finished: bool,
}

impl std::fmt::Debug for AmiEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiEventStream")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(host: &str, port: u16) -> AmiResult<TcpStream> {
    let tcp_result = timeout(
        Duration::from_millis(DEFAULT_TIMEOUT_MS),
        TcpStream::connect((host, port)),
    )
    .await;

    match tcp_result {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(AmiError::Io(e))
        }
        Err(_) => {
            warn!(
                "[CONNECT] TCP connect timed out after {}ms",
                DEFAULT_TIMEOUT_MS
            );
            Err(AmiError::Timeout {
                timeout_ms: DEFAULT_TIMEOUT_MS,
            })
        }
    }
}

/// One-time transition to the terminal state.
///
/// The first caller records the cause, fails every pending request,
/// completes every subscriber, and shuts the stream down. Later callers
/// are no-ops.
async fn terminate(shared: &SharedState, cause: DisconnectReason) {
    let mut first = false;
    shared.status_tx.send_if_modified(|status| {
        if matches!(status, ConnectionStatus::Connected) {
            *status = ConnectionStatus::Disconnected(cause.clone());
            first = true;
            true
        } else {
            false
        }
    });
    if !first {
        return;
    }

    info!("Client terminal: {}", cause);
    shared.pending.fail_all(&cause);
    shared.hub.complete();

    let mut writer = shared.writer.lock().await;
    let _ = writer.shutdown().await;
}

/// Background reader loop
async fn reader_loop(
    reader: ReadHalf<Box<dyn AmiStream>>,
    parser: AmiParser,
    shared: Arc<SharedState>,
) {
    let result = std::panic::AssertUnwindSafe(reader_loop_inner(reader, parser, shared.clone()));
    if futures_util::FutureExt::catch_unwind(result).await.is_err() {
        tracing::error!("reader task panicked");
        terminate(
            &shared,
            DisconnectReason::IoError("reader task panicked".to_string()),
        )
        .await;
    }
}

async fn reader_loop_inner(
    mut reader: ReadHalf<Box<dyn AmiStream>>,
    mut parser: AmiParser,
    shared: Arc<SharedState>,
) {
    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];

    loop {
        // Drain complete messages from buffered data first
        match parser.parse_message() {
            Ok(Some(message)) => {
                dispatch(&shared, message).await;
                continue;
            }
            Ok(None) => {
                // Need more data from the stream
            }
            Err(e) => {
                warn!("Decode error: {}", e);
                let reason = e
                    .disconnect_reason()
                    .unwrap_or_else(|| DisconnectReason::Malformed(e.to_string()));
                terminate(&shared, reason).await;
                return;
            }
        }

        match reader.read(&mut read_buffer).await {
            Ok(0) => {
                let reason = if parser.has_buffered_data() {
                    warn!("Connection closed mid-frame");
                    DisconnectReason::UnexpectedEof
                } else {
                    info!("Connection closed (EOF)");
                    DisconnectReason::ConnectionClosed
                };
                terminate(&shared, reason).await;
                return;
            }
            Ok(n) => {
                trace!("[RECV] Read {} bytes from stream", n);
                let _ = shared.wire_tap.send(WireEvent {
                    direction: WireDirection::Received,
                    bytes: Bytes::copy_from_slice(&read_buffer[..n]),
                });
                if let Err(e) = parser.add_data(&read_buffer[..n]) {
                    warn!("Buffer error: {}", e);
                    let reason = e
                        .disconnect_reason()
                        .unwrap_or_else(|| DisconnectReason::Malformed(e.to_string()));
                    terminate(&shared, reason).await;
                    return;
                }
            }
            Err(e) => {
                warn!("Read error: {}", e);
                terminate(&shared, DisconnectReason::IoError(e.to_string())).await;
                return;
            }
        }
    }
}

/// Route one inbound message: reply to its pending slot, or event to the hub.
///
/// First-response-wins: once a reply has consumed the pending entry, later
/// messages bearing the same ActionID (list events, late replies after
/// cancellation) flow to the subscribers. A message is never delivered to
/// both surfaces.
async fn dispatch(shared: &SharedState, message: AmiMessage) {
    let action_id = message.action_id().unwrap_or("").to_string();

    let as_event = if action_id.is_empty() {
        Some(message)
    } else {
        trace!("[DISPATCH] Inbound message for ActionID {}", action_id);
        shared.pending.complete(&action_id, message)
    };

    if let Some(event) = as_event {
        shared.hub.publish(event).await;
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Removes the pending entry if the caller abandons the wait (timeout,
/// task cancellation), so a late reply is re-routed to the subscribers.
struct CancelOnDrop<'a> {
    pending: &'a PendingTable,
    id: &'a str,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.cancel(self.id);
        }
    }
}

impl AmiClient {
    /// Connect to an Asterisk server over TCP.
    ///
    /// Opens the stream and starts the reader; authentication is a separate
    /// step via [`login`](Self::login).
    pub async fn connect(host: &str, port: u16) -> AmiResult<Self> {
        Self::connect_with_options(host, port, AmiConnectOptions::default()).await
    }

    /// Connect with custom options.
    pub async fn connect_with_options(
        host: &str,
        port: u16,
        options: AmiConnectOptions,
    ) -> AmiResult<Self> {
        info!("Connecting to Asterisk at {}:{}", host, port);
        let stream = tcp_connect_with_timeout(host, port).await?;
        Ok(Self::from_stream(stream, options))
    }

    /// Run the client over an already-opened bidirectional byte stream.
    ///
    /// The client owns the stream for its lifetime and closes it exactly
    /// once on the terminal transition.
    pub fn from_stream<S>(stream: S, options: AmiConnectOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let queue_size = options.event_queue_size.max(1);

        let boxed: Box<dyn AmiStream> = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let (wire_tap, _) = broadcast::channel(WIRE_TAP_CAPACITY);

        let shared = Arc::new(SharedState {
            writer: Mutex::new(write_half),
            pending: PendingTable::new(),
            hub: SubscriptionHub::new(options.delivery_policy, queue_size),
            status_tx,
            wire_tap,
            action_ids: options.action_id_generator,
            reader_task: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(reader_loop(read_half, AmiParser::new(), shared.clone()));
        *shared
            .reader_task
            .lock()
            .expect("reader handle lock poisoned") = Some(handle);

        AmiClient { shared, status_rx }
    }

    /// Build an action message, applying the configured ActionID generator.
    ///
    /// Equivalent to [`AmiMessage::new`] unless an
    /// [`action_id_generator`](AmiConnectOptions::action_id_generator) was
    /// supplied at construction.
    pub fn new_action(&self, action: &str) -> AmiMessage {
        let mut message = AmiMessage::new(action);
        if let Some(generate) = &self.shared.action_ids {
            message.set(AmiField::ActionId, generate());
        }
        message
    }

    /// Send an action and wait for the matching reply.
    ///
    /// Any number of actions may be in flight concurrently; replies are
    /// correlated by ActionID, so completion order follows the server, not
    /// the send order. The writer lock covers only the bytes-to-wire step.
    ///
    /// Abandoning the returned future (e.g. via `tokio::time::timeout`)
    /// releases the ActionID; a reply arriving afterwards is delivered to
    /// event subscribers.
    pub async fn send_action(&self, action: AmiMessage) -> AmiResult<AmiMessage> {
        if let ConnectionStatus::Disconnected(reason) = self.status() {
            return Err(AmiError::ClientClosed(reason));
        }

        let id = match action.action_id() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(AmiError::invalid_argument(
                    "action is missing an ActionID",
                ))
            }
        };

        let slot = self.shared.pending.register(&id)?;
        let bytes = action.to_bytes();
        debug!(
            "Sending action {} ({})",
            action.action().unwrap_or("<none>"),
            id
        );

        {
            let mut writer = self.shared.writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, &bytes).await {
                drop(writer);
                warn!("Write failed: {}", e);
                self.shared.pending.cancel(&id);
                terminate(&self.shared, DisconnectReason::IoError(e.to_string())).await;
                return Err(AmiError::Io(e));
            }
            let _ = self.shared.wire_tap.send(WireEvent {
                direction: WireDirection::Sent,
                bytes: Bytes::from(bytes),
            });
        }

        let mut guard = CancelOnDrop {
            pending: &self.shared.pending,
            id: &id,
            armed: true,
        };
        let outcome = slot.await;
        guard.armed = false;

        match outcome {
            Ok(result) => result,
            // Slots are always fulfilled before removal; an aborted sender
            // means the client state went away entirely
            Err(_) => Err(self.closed_error()),
        }
    }

    /// Log in to the server.
    ///
    /// With `use_md5`, performs the challenge-response exchange: requests a
    /// challenge, then answers with `md5_hex(challenge || secret)` as the
    /// `Key` field. Otherwise sends the secret directly. Returns `Ok(true)`
    /// iff the final reply has `Response: Success`.
    pub async fn login(&self, username: &str, secret: &str, use_md5: bool) -> AmiResult<bool> {
        let reply = if use_md5 {
            let mut challenge_req = self.new_action("Challenge");
            challenge_req.set(AmiField::AuthType, "MD5");
            let challenge_reply = self.send_action(challenge_req).await?;

            let Some(challenge) = challenge_reply.get(AmiField::Challenge) else {
                debug!("Challenge request returned no Challenge field");
                return Ok(false);
            };

            let mut login = self.new_action("Login");
            login.set(AmiField::AuthType, "MD5");
            login.set(AmiField::Username, username);
            login.set(AmiField::Key, md5_hex(challenge, secret));
            debug!("Sending Login for {} (MD5 key [REDACTED])", username);
            self.send_action(login).await?
        } else {
            let mut login = self.new_action("Login");
            login.set(AmiField::Username, username);
            login.set(AmiField::Secret, secret);
            debug!("Sending Login for {} (secret [REDACTED])", username);
            self.send_action(login).await?
        };

        Ok(reply.is_success())
    }

    /// Log off gracefully. Returns `Ok(true)` iff the server replied
    /// `Response: Goodbye`.
    pub async fn logoff(&self) -> AmiResult<bool> {
        let reply = self.send_action(self.new_action("Logoff")).await?;
        Ok(reply.response() == Some(RESPONSE_GOODBYE))
    }

    /// Subscribe to the event flow.
    ///
    /// Every inbound message that is not a reply is delivered to every live
    /// subscriber, including solicited follow-up events that share an
    /// ActionID with a completed action. Dropping the stream removes the
    /// subscription.
    pub fn subscribe(&self) -> AmiEventStream {
        AmiEventStream {
            source: self.shared.hub.subscribe(),
            status_rx: self.status_rx.clone(),
            finished: false,
        }
    }

    /// Observe the exact bytes crossing the wire, for debugging.
    ///
    /// Best-effort: a slow observer loses events without affecting the
    /// client.
    pub fn wire_events(&self) -> broadcast::Receiver<WireEvent> {
        self.shared.wire_tap.subscribe()
    }

    /// Whether the connection is alive (not yet terminal).
    pub fn is_connected(&self) -> bool {
        matches!(*self.status_rx.borrow(), ConnectionStatus::Connected)
    }

    /// Current connection status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Tear the client down.
    ///
    /// Fails outstanding requests and completes subscribers with
    /// [`DisconnectReason::ClientRequested`], closes the stream, and stops
    /// the reader. Idempotent.
    pub async fn disconnect(&self) {
        info!("Client requested disconnect");
        terminate(&self.shared, DisconnectReason::ClientRequested).await;

        let handle = self
            .shared
            .reader_task
            .lock()
            .expect("reader handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    fn closed_error(&self) -> AmiError {
        match self.status() {
            ConnectionStatus::Disconnected(reason) => AmiError::ClientClosed(reason),
            ConnectionStatus::Connected => AmiError::Cancelled,
        }
    }
}

fn md5_hex(challenge: &str, secret: &str) -> String {
    use md5::{Digest, Md5};
    use std::fmt::Write as _;

    let mut hasher = Md5::new();
    hasher.update(challenge.as_bytes());
    hasher.update(secret.as_bytes());
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(32), |mut out, byte| {
            let _ = write!(out, "{:02x}", byte);
            out
        })
}

impl AmiEventStream {
    /// Receive the next event, or `None` once the terminal cause has been
    /// delivered.
    pub async fn recv(&mut self) -> Option<Result<AmiMessage, AmiError>> {
        self.next().await
    }

    /// Whether the connection is alive (not yet terminal).
    pub fn is_connected(&self) -> bool {
        matches!(*self.status_rx.borrow(), ConnectionStatus::Connected)
    }

    /// Current connection status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }
}

impl futures_util::Stream for AmiEventStream {
    type Item = Result<AmiMessage, AmiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.source.poll_recv(cx) {
            Poll::Ready(SourceItem::Message(message)) => Poll::Ready(Some(Ok(message))),
            Poll::Ready(SourceItem::Lagged(count)) => {
                Poll::Ready(Some(Err(AmiError::EventsDropped { count })))
            }
            Poll::Ready(SourceItem::Closed) => {
                this.finished = true;
                let reason = match &*this.status_rx.borrow() {
                    ConnectionStatus::Disconnected(reason) => reason.clone(),
                    ConnectionStatus::Connected => DisconnectReason::ConnectionClosed,
                };
                Poll::Ready(Some(Err(AmiError::ClientClosed(reason))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
