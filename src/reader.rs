//! The durable per-reader handle: owns a transient client, reconnects
//! on failure, serialises command traffic from the adapter surface
// (c) 2025 the llrpd contributors

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ReaderClient, ReaderEvent, SendError};
use crate::protocol::header::MessageType;
use crate::protocol::messages::{IncomingPayload, LlrpRequest, LlrpResponse, OutgoingPayload as _};

/// How many extra attempts a send gets when the connection closes
/// under it. Each retry waits for the next reconnect.
const CLOSED_SEND_RETRIES: usize = 3;

/// Tunables for the connection lifecycle. The defaults suit real
/// readers; tests shrink them.
#[derive(Clone, Debug)]
pub struct ReaderOptions {
    /// First reconnect delay; doubles per failure.
    pub initial_backoff: Duration,
    /// Ceiling for the reconnect delay.
    pub max_backoff: Duration,
    /// Bound on dialling the socket.
    pub connect_timeout: Duration,
    /// Bound on the version handshake once connected.
    pub handshake_timeout: Duration,
    /// How long a closing connection may wait for the reader to
    /// acknowledge `CloseConnection`.
    pub close_grace: Duration,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(1),
        }
    }
}

/// Errors surfaced by [`ManagedReader::try_send`].
#[derive(Debug, thiserror::Error)]
pub enum TrySendError {
    /// The supervisor has been stopped; no further sends.
    #[error("device is shutting down")]
    ShuttingDown,
    /// The caller's deadline passed while waiting for a connection or
    /// a response.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// A client-level failure (including `ReaderRejected`, which is
    /// never retried).
    #[error(transparent)]
    Send(#[from] SendError),
}

/// The durable abstraction the registry hands out: always addressable
/// by name, connected whenever the reader lets us be.
#[derive(Debug)]
pub struct ManagedReader {
    name: Arc<str>,
    addr: Mutex<SocketAddr>,
    client_rx: watch::Receiver<Option<Arc<ReaderClient>>>,
    redial: Notify,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    opts: ReaderOptions,
}

impl ManagedReader {
    /// Creates the supervisor and starts its reconnect loop
    /// immediately.
    pub(crate) fn start(
        name: &str,
        addr: SocketAddr,
        events: mpsc::Sender<ReaderEvent>,
        opts: ReaderOptions,
    ) -> Arc<Self> {
        let (client_tx, client_rx) = watch::channel(None);
        let me = Arc::new(Self {
            name: Arc::from(name),
            addr: Mutex::new(addr),
            client_rx,
            redial: Notify::new(),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
            opts,
        });
        let handle = tokio::spawn(run_loop(me.clone(), events, client_tx));
        *crate::util::lock(&me.task) = Some(handle);
        me
    }

    /// The device name this supervisor serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address the reconnect loop is currently dialling.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        *crate::util::lock(&self.addr)
    }

    /// Sends a typed request and decodes its paired response.
    ///
    /// Blocks (bounded by `deadline`) while no connection is live. A
    /// send interrupted by a connection drop is retried, up to three
    /// times, against the replacement connection. A reader that
    /// answers with an `ErrorMessage`, or embeds a non-success
    /// `LLRPStatus`, fails the call immediately - that outcome would
    /// not improve on retry.
    pub async fn try_send<R: LlrpRequest>(
        &self,
        request: &R,
        deadline: Instant,
    ) -> Result<R::Reply, TrySendError> {
        let payload = request.to_bytes().map_err(SendError::from)?;
        let (mtype, body) = self
            .try_send_raw(R::MESSAGE_TYPE, payload, deadline)
            .await?;

        let expected = R::Reply::MESSAGE_TYPE;
        if mtype == MessageType::ERROR_MESSAGE && expected != MessageType::ERROR_MESSAGE {
            let err = crate::protocol::messages::ErrorMessage::decode(body)
                .map_err(SendError::from)?;
            return Err(rejected(&err.status).into());
        }
        if mtype != expected {
            return Err(SendError::ResponseTypeMismatch {
                expected,
                got: mtype,
            }
            .into());
        }
        let reply = R::Reply::decode(body).map_err(SendError::from)?;
        if let Some(status) = reply.status()
            && !status.is_success()
        {
            return Err(rejected(status).into());
        }
        Ok(reply)
    }

    /// Untyped send path: bytes out, `(type, bytes)` back.
    pub(crate) async fn try_send_raw(
        &self,
        mtype: MessageType,
        payload: Bytes,
        deadline: Instant,
    ) -> Result<(MessageType, Bytes), TrySendError> {
        if self.shutdown.is_cancelled() {
            return Err(TrySendError::ShuttingDown);
        }
        let mut rx = self.client_rx.clone();
        let mut retries = 0;
        loop {
            let client = self.wait_for_client(&mut rx, deadline).await?;
            match client.send_await(mtype, payload.clone(), deadline).await {
                Err(SendError::ConnectionClosed) if retries < CLOSED_SEND_RETRIES => {
                    retries += 1;
                    debug!(
                        device = %self.name,
                        retries,
                        "connection closed mid-send, waiting for reconnect"
                    );
                }
                Err(SendError::DeadlineExceeded) => return Err(TrySendError::DeadlineExceeded),
                other => return Ok(other?),
            }
        }
    }

    /// Swaps the dial address. A no-op when unchanged; otherwise the
    /// current connection is torn down and the loop dials the new
    /// address.
    pub fn update_addr(&self, addr: SocketAddr) {
        {
            let mut current = crate::util::lock(&self.addr);
            if *current == addr {
                return;
            }
            info!(device = %self.name, old = %current, new = %addr, "address changed");
            *current = addr;
        }
        self.redial.notify_one();
    }

    /// Stops the supervisor: closes the current connection (politely,
    /// within its grace period) and joins the reconnect loop, bounded
    /// by `grace`. `try_send` fails with
    /// [`TrySendError::ShuttingDown`] from here on.
    pub async fn stop(&self, grace: Duration) {
        self.shutdown.cancel();
        let handle = crate::util::lock(&self.task).take();
        if let Some(mut handle) = handle {
            tokio::select! {
                r = &mut handle => {
                    if let Err(e) = r {
                        warn!(device = %self.name, error = %e, "reconnect loop panicked");
                    }
                }
                () = tokio::time::sleep(grace) => {
                    warn!(device = %self.name, "reconnect loop did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }

    async fn wait_for_client(
        &self,
        rx: &mut watch::Receiver<Option<Arc<ReaderClient>>>,
        deadline: Instant,
    ) -> Result<Arc<ReaderClient>, TrySendError> {
        loop {
            if self.shutdown.is_cancelled() {
                return Err(TrySendError::ShuttingDown);
            }
            if let Some(client) = rx.borrow_and_update().clone()
                && !client.is_closed()
            {
                return Ok(client);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(TrySendError::ShuttingDown);
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    return Err(TrySendError::DeadlineExceeded);
                }
                () = self.shutdown.cancelled() => {
                    return Err(TrySendError::ShuttingDown);
                }
            }
        }
    }
}

fn rejected(status: &crate::protocol::status::LlrpStatus) -> SendError {
    SendError::ReaderRejected {
        code: status.code,
        code_name: status.code_name(),
        description: status.description.clone(),
    }
}

/// The reconnect loop. Owns publication of the current client; dials
/// with exponential backoff until stopped.
async fn run_loop(
    me: Arc<ManagedReader>,
    events: mpsc::Sender<ReaderEvent>,
    client_tx: watch::Sender<Option<Arc<ReaderClient>>>,
) {
    let mut backoff = me.opts.initial_backoff;
    loop {
        if me.shutdown.is_cancelled() {
            break;
        }
        let addr = me.addr();
        let attempt = tokio::time::timeout(
            me.opts.connect_timeout + me.opts.handshake_timeout,
            ReaderClient::connect(
                addr,
                me.name.clone(),
                events.clone(),
                me.opts.handshake_timeout,
            ),
        );
        match attempt.await {
            Ok(Ok(client)) => {
                info!(device = %me.name, %addr, version = client.negotiated_version(), "connected");
                backoff = me.opts.initial_backoff;
                let _ = client_tx.send(Some(client.clone()));

                tokio::select! {
                    () = client.closed() => {
                        warn!(device = %me.name, %addr, "connection lost, reconnecting");
                    }
                    () = me.redial.notified() => {
                        debug!(device = %me.name, "redial requested");
                        client.shutdown().await;
                    }
                    () = me.shutdown.cancelled() => {
                        let _ = client_tx.send(None);
                        client.close_gracefully(me.opts.close_grace).await;
                        break;
                    }
                }
                let _ = client_tx.send(None);
            }
            Ok(Err(e)) => {
                warn!(device = %me.name, %addr, error = %e, "connect failed");
                if !wait_backoff(&me, backoff).await {
                    break;
                }
                backoff = (backoff * 2).min(me.opts.max_backoff);
            }
            Err(_elapsed) => {
                warn!(device = %me.name, %addr, "connect timed out");
                if !wait_backoff(&me, backoff).await {
                    break;
                }
                backoff = (backoff * 2).min(me.opts.max_backoff);
            }
        }
    }
    let _ = client_tx.send(None);
    debug!(device = %me.name, "reconnect loop stopped");
}

/// Sleeps out the backoff. Returns false when shutdown interrupted the
/// wait; an address change cuts the wait short instead.
async fn wait_backoff(me: &ManagedReader, backoff: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(backoff) => true,
        () = me.redial.notified() => true,
        () = me.shutdown.cancelled() => false,
    }
}
