//! One TCP connection to one LLRP reader
// (c) 2025 the llrpd contributors
//
// The client multiplexes many concurrent requests over a single
// socket. Senders serialise on the write lock for the duration of one
// header+payload write; a dedicated receive task owns the read side
// and routes each incoming frame by message id. Responses correlate by
// id, never by arrival order.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::protocol::frame::{FrameReader, FrameWriter};
use crate::protocol::header::{FrameError, Header, MessageType, ProtocolVersion};
use crate::protocol::messages::{
    EncodeError, GetSupportedVersion, GetSupportedVersionResponse, IncomingPayload as _,
    LlrpResponse as _, OutgoingPayload, SetProtocolVersion, SetProtocolVersionResponse,
};
use crate::protocol::status::DecodeError;
use crate::util::lock;

/// Errors surfaced by the correlated send path.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message type has no registered response and cannot be used
    /// as a request.
    #[error("{0} has no registered response type")]
    UnknownRequestType(MessageType),
    /// The correlated response arrived under a different type than the
    /// catalog pairs with the request.
    #[error("response type mismatch: expected {expected}, got {got}")]
    ResponseTypeMismatch {
        /// type the catalog pairs with the request
        expected: MessageType,
        /// type actually received
        got: MessageType,
    },
    /// The connection closed before the response arrived (or before
    /// the request could be written).
    #[error("connection closed")]
    ConnectionClosed,
    /// The caller's deadline passed first. The request may still have
    /// been flushed; it is not rescinded.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The 32-bit id counter wrapped onto an id that is still in
    /// flight.
    #[error("message id {0} is already awaiting a response")]
    IdInFlight(u32),
    /// The reader reported a non-success status, or answered with an
    /// `ErrorMessage` frame.
    #[error("reader rejected the request: {code_name} (code {code}): {description}")]
    ReaderRejected {
        /// raw LLRP status code
        code: u16,
        /// catalog name of the code (or a numeric fallback)
        code_name: String,
        /// the reader's description, possibly empty
        description: String,
    },
    /// Framing failure.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Response payload failed to parse.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Request payload failed to marshal.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// An unsolicited message a reader originated on its own: a tag
/// report, a reader event, or a keepalive.
#[derive(Clone, Debug)]
pub struct ReaderEvent {
    /// Name of the device the connection belongs to.
    pub device: Arc<str>,
    /// The frame's message type.
    pub message_type: MessageType,
    /// The frame's payload, undecoded.
    pub payload: Bytes,
}

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::FromRepr)]
#[repr(u8)]
enum State {
    Connecting = 0,
    Handshaking = 1,
    Ready = 2,
    Draining = 3,
    Closed = 4,
}

struct Shared {
    device: Arc<str>,
    writer: tokio::sync::Mutex<FrameWriter<OwnedWriteHalf>>,
    pending: Mutex<HashMap<u32, oneshot::Sender<(MessageType, Bytes)>>>,
    next_id: AtomicU32,
    version: AtomicU8,
    state: AtomicU8,
    closed: CancellationToken,
    events: mpsc::Sender<ReaderEvent>,
}

impl Shared {
    fn state(&self) -> State {
        State::from_repr(self.state.load(Ordering::Acquire)).unwrap_or(State::Closed)
    }

    fn set_state(&self, s: State) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// Fails every waiting sender and marks the connection unusable.
    /// Idempotent.
    fn begin_drain(&self) {
        if matches!(self.state(), State::Draining | State::Closed) {
            self.closed.cancel();
            return;
        }
        self.set_state(State::Draining);
        // Dropping the senders resolves every waiting receiver with a
        // channel-closed error, which send_await maps to
        // ConnectionClosed.
        lock(&self.pending).clear();
        self.closed.cancel();
    }

    async fn write_frame(&self, header: &Header, payload: &[u8]) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        match writer.send(header, payload).await {
            Ok(()) => Ok(()),
            Err(e @ FrameError::PayloadWriteInterrupted { .. }) => {
                // The peer's framing is desynchronised; nothing else
                // can be sent on this socket.
                drop(writer);
                warn!(device = %self.device, error = %e, "payload write failed, closing connection");
                self.begin_drain();
                Err(SendError::Frame(e))
            }
            Err(FrameError::Io(e)) => {
                drop(writer);
                debug!(device = %self.device, error = %e, "socket write failed");
                self.begin_drain();
                Err(SendError::ConnectionClosed)
            }
            Err(e) => Err(SendError::Frame(e)),
        }
    }

    async fn send_no_reply(&self, mtype: MessageType, payload: &[u8]) -> Result<(), SendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let header = Header::for_payload(self.version.load(Ordering::Acquire), mtype, payload.len(), id)?;
        self.write_frame(&header, payload).await
    }
}

/// Removes the pending slot if the owning future is dropped before a
/// response arrives (deadline, caller cancellation, shutdown).
struct SlotGuard<'a> {
    shared: &'a Shared,
    id: u32,
    armed: bool,
}

impl SlotGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = lock(&self.shared.pending).remove(&self.id);
        }
    }
}

/// A live connection to one reader.
///
/// Created by [`connect`](Self::connect), which dials, spawns the
/// receive task and runs the version handshake. Clients are transient:
/// the supervisor replaces them on failure.
pub struct ReaderClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ReaderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderClient")
            .field("device", &self.shared.device)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl ReaderClient {
    /// Dials `addr` and completes the version handshake.
    ///
    /// Readers that answer the version probe with an `ErrorMessage`
    /// (pre-1.1 firmware) are accepted at the library minimum version.
    pub async fn connect(
        addr: SocketAddr,
        device: Arc<str>,
        events: mpsc::Sender<ReaderEvent>,
        handshake_timeout: Duration,
    ) -> Result<Arc<Self>, SendError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SendError::Frame(FrameError::Io(e)))?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared {
            device,
            writer: tokio::sync::Mutex::new(FrameWriter::new(write_half)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            version: AtomicU8::new(ProtocolVersion::MIN as u8),
            state: AtomicU8::new(State::Connecting as u8),
            closed: CancellationToken::new(),
            events,
        });
        shared.set_state(State::Handshaking);
        drop(tokio::spawn(recv_loop(
            shared.clone(),
            FrameReader::new(read_half),
        )));

        let client = Arc::new(Self { shared });
        if let Err(e) = client.negotiate(handshake_timeout).await {
            client.shutdown().await;
            return Err(e);
        }
        if client.shared.closed.is_cancelled() {
            return Err(SendError::ConnectionClosed);
        }
        client.shared.set_state(State::Ready);
        Ok(client)
    }

    /// The protocol version negotiated for this connection.
    #[must_use]
    pub fn negotiated_version(&self) -> u8 {
        self.shared.version.load(Ordering::Acquire)
    }

    /// Has the connection stopped accepting work?
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
            || matches!(self.shared.state(), State::Draining | State::Closed)
    }

    /// Resolves when the connection has stopped accepting work.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// Sends one request and waits for the response that echoes its
    /// message id.
    ///
    /// Many callers may run concurrently; they serialise only on id
    /// allocation and on the header+payload write. Responses may
    /// arrive in any order. If the deadline passes, the pending slot
    /// is removed but any bytes already flushed stay flushed.
    pub async fn send_await(
        &self,
        mtype: MessageType,
        payload: Bytes,
        deadline: Instant,
    ) -> Result<(MessageType, Bytes), SendError> {
        let shared = &*self.shared;
        match shared.state() {
            State::Handshaking | State::Ready => (),
            _ => return Err(SendError::ConnectionClosed),
        }
        let _expected = mtype
            .response_type()
            .ok_or(SendError::UnknownRequestType(mtype))?;

        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&shared.pending);
            match pending.entry(id) {
                Entry::Occupied(_) => return Err(SendError::IdInFlight(id)),
                Entry::Vacant(v) => {
                    let _ = v.insert(tx);
                }
            }
        }
        let mut guard = SlotGuard {
            shared,
            id,
            armed: true,
        };

        let header = Header::for_payload(
            shared.version.load(Ordering::Acquire),
            mtype,
            payload.len(),
            id,
        )?;
        trace!(device = %shared.device, %mtype, id, len = payload.len(), "sending");
        shared.write_frame(&header, &payload).await?;

        tokio::select! {
            reply = rx => {
                guard.disarm();
                match reply {
                    Ok((got, body)) => {
                        trace!(device = %shared.device, %got, id, "response");
                        Ok((got, body))
                    }
                    // Sender dropped: the pending map was drained.
                    Err(_) => Err(SendError::ConnectionClosed),
                }
            }
            () = tokio::time::sleep_until(deadline) => Err(SendError::DeadlineExceeded),
            () = shared.closed.cancelled() => Err(SendError::ConnectionClosed),
        }
    }

    /// Asks the reader to close the session, then tears the socket
    /// down regardless of the answer.
    pub async fn close_gracefully(&self, grace: Duration) {
        use crate::protocol::messages::CloseConnection;
        if matches!(self.shared.state(), State::Ready) {
            let payload = Bytes::new();
            let deadline = Instant::now() + grace;
            match self
                .send_await(CloseConnection::MESSAGE_TYPE, payload, deadline)
                .await
            {
                Ok(_) => debug!(device = %self.shared.device, "reader acknowledged close"),
                Err(e) => debug!(device = %self.shared.device, error = %e, "close request not acknowledged"),
            }
        }
        self.shutdown().await;
    }

    /// Closes the socket and fails every pending request with
    /// [`SendError::ConnectionClosed`].
    pub async fn shutdown(&self) {
        self.shared.begin_drain();
        let mut writer = self.shared.writer.lock().await;
        let _ = writer.shutdown().await;
        self.shared.set_state(State::Closed);
    }

    /// Version handshake: probe for 1.1 support, fall back to the
    /// minimum when the reader predates the probe message.
    async fn negotiate(&self, timeout: Duration) -> Result<(), SendError> {
        let deadline = Instant::now() + timeout;
        let (mtype, body) = self
            .send_await(
                MessageType::GET_SUPPORTED_VERSION,
                GetSupportedVersion.to_bytes()?,
                deadline,
            )
            .await?;
        if mtype == MessageType::ERROR_MESSAGE {
            debug!(
                device = %self.shared.device,
                "reader does not understand GetSupportedVersion, staying at {}",
                ProtocolVersion::MIN
            );
            return Ok(());
        }
        if mtype != MessageType::GET_SUPPORTED_VERSION_RESPONSE {
            return Err(SendError::ResponseTypeMismatch {
                expected: MessageType::GET_SUPPORTED_VERSION_RESPONSE,
                got: mtype,
            });
        }
        let reply = GetSupportedVersionResponse::decode(body)?;
        if !reply.status.is_success() {
            debug!(
                device = %self.shared.device,
                status = %reply.status,
                "version probe refused, staying at {}",
                ProtocolVersion::MIN
            );
            return Ok(());
        }
        let target = reply.supported_version.min(ProtocolVersion::MAX as u8);
        let target = target.max(ProtocolVersion::MIN as u8);
        if target == self.negotiated_version() {
            return Ok(());
        }

        let payload = SetProtocolVersion { version: target }.to_bytes()?;
        let (mtype, body) = self
            .send_await(MessageType::SET_PROTOCOL_VERSION, payload, deadline)
            .await?;
        if mtype != MessageType::SET_PROTOCOL_VERSION_RESPONSE {
            return Err(SendError::ResponseTypeMismatch {
                expected: MessageType::SET_PROTOCOL_VERSION_RESPONSE,
                got: mtype,
            });
        }
        let reply = SetProtocolVersionResponse::decode(body)?;
        if let Some(st) = reply.status()
            && !st.is_success()
        {
            return Err(SendError::ReaderRejected {
                code: st.code,
                code_name: st.code_name(),
                description: st.description.clone(),
            });
        }
        self.shared.version.store(target, Ordering::Release);
        info!(device = %self.shared.device, version = target, "negotiated protocol version");
        Ok(())
    }
}

/// The receive task: sole owner of the socket's read side.
async fn recv_loop(shared: Arc<Shared>, mut frames: FrameReader<OwnedReadHalf>) {
    let outcome = loop {
        let header = tokio::select! {
            h = frames.next() => h,
            () = shared.closed.cancelled() => break Ok(()),
        };
        match header {
            Ok(Some(header)) => {
                if let Err(e) = dispatch(&shared, &mut frames, header).await {
                    break Err(e);
                }
            }
            Ok(None) => {
                debug!(device = %shared.device, "reader closed the connection");
                break Ok(());
            }
            // A bad length field costs only that header: nothing of
            // the (nonexistent) body was attributed to it, so the
            // stream position is still at a frame boundary.
            Err(e @ FrameError::LengthUnderflow(_)) => {
                warn!(device = %shared.device, error = %e, "discarding malformed header");
            }
            // Everything else leaves the stream position unknown.
            Err(e) => break Err(e),
        }
    };
    if let Err(e) = outcome {
        warn!(device = %shared.device, error = %e, "receive loop failed");
    }
    shared.begin_drain();
    shared.set_state(State::Closed);
}

async fn dispatch(
    shared: &Arc<Shared>,
    frames: &mut FrameReader<OwnedReadHalf>,
    header: Header,
) -> Result<(), FrameError> {
    let mtype = header.message_type;
    if mtype.is_reserved() {
        warn!(
            device = %shared.device,
            code = mtype.code(),
            id = header.message_id,
            "peer sent a reserved message type, discarding"
        );
        return frames.skip_payload().await;
    }

    let slot = lock(&shared.pending).remove(&header.message_id);
    if let Some(tx) = slot {
        let payload = frames.payload(header.payload_len).await?;
        if tx.send((mtype, payload)).is_err() {
            // The waiter gave up between our lookup and now.
            debug!(device = %shared.device, %mtype, id = header.message_id, "response for a vacated request");
        }
        return Ok(());
    }

    if mtype.is_notification() {
        let payload = frames.payload(header.payload_len).await?;
        if mtype == MessageType::KEEP_ALIVE {
            let ack = shared.clone();
            drop(tokio::spawn(async move {
                if let Err(e) = ack.send_no_reply(MessageType::KEEP_ALIVE_ACK, &[]).await {
                    debug!(device = %ack.device, error = %e, "keepalive ack failed");
                }
            }));
        }
        let event = ReaderEvent {
            device: shared.device.clone(),
            message_type: mtype,
            payload,
        };
        if let Err(e) = shared.events.try_send(event) {
            warn!(device = %shared.device, %mtype, "notification channel full, dropping: {e}");
        }
        return Ok(());
    }

    // A response nobody is waiting for: most likely the caller's
    // deadline passed. Not an error.
    debug!(
        device = %shared.device,
        %mtype,
        id = header.message_id,
        "discarding response with no matching request"
    );
    frames.skip_payload().await
}
