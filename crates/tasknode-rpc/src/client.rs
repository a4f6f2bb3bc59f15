use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::FrameCodec;
use crate::error::{Result, RpcError};
use crate::frames::{decode, encode, Frame, Outcome, ReqFrame};
use crate::methods;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub dial_timeout: Duration,
    pub call_timeout: Duration,
    pub ping_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One live TCP connection with its reader and writer tasks.
struct Connection {
    outbound: mpsc::Sender<Frame>,
    pending: Pending,
    closed: CancellationToken,
}

impl Connection {
    async fn open(addr: &str, dial_timeout: Duration) -> Result<Arc<Self>> {
        let stream = match tokio::time::timeout(dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(RpcError::Dial {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(RpcError::Dial {
                    addr: addr.to_string(),
                    reason: format!("no answer within {}ms", dial_timeout.as_millis()),
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr, error = %e, "set_nodelay failed");
        }

        let (mut sink, mut frames) = Framed::new(stream, FrameCodec::new()).split();
        let (outbound, mut queue) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
        let pending: Pending = Arc::default();
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    frame = queue.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = sink.send(frame).await {
                                debug!(error = %e, "rpc write failed");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            writer_closed.cancel();
        });

        let reader_closed = closed.clone();
        let reader_pending = pending.clone();
        let peer = addr.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_closed.cancelled() => break,
                    frame = frames.next() => match frame {
                        Some(Ok(Frame::Response(res))) => {
                            let waiter = lock(&reader_pending).remove(&res.id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(res.outcome);
                                }
                                None => debug!(id = res.id, "reply for abandoned call"),
                            }
                        }
                        Some(Ok(Frame::Request(req))) => {
                            debug!(method = %req.method, "request on client connection ignored");
                        }
                        Some(Err(e)) => {
                            debug!(addr = %peer, error = %e, "rpc read failed");
                            break;
                        }
                        None => break,
                    },
                }
            }
            reader_closed.cancel();
            // Dropping the senders wakes every waiter with `Closed`.
            lock(&reader_pending).clear();
            debug!(addr = %peer, "rpc connection closed");
        });

        Ok(Arc::new(Self {
            outbound,
            pending,
            closed,
        }))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Removes an abandoned call's waiter.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

/// Request/reply client for one peer address.
///
/// The connection is dialled on first use and redialled on the next call
/// after it drops. Calls are multiplexed over it by request id.
pub struct Client {
    addr: String,
    options: ClientOptions,
    conn: tokio::sync::Mutex<Option<Arc<Connection>>>,
    next_id: AtomicU64,
}

impl Client {
    pub fn new(addr: impl Into<String>, options: ClientOptions) -> Self {
        Self {
            addr: addr.into(),
            options,
            conn: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Call `method` with `args` and decode the reply.
    ///
    /// Returns `Cancelled` as soon as `cancel` fires (immediately, without
    /// dialling, if it already has) and `Timeout` once the call timeout
    /// elapses, whichever comes first.
    pub async fn call<A, R>(&self, method: &str, cancel: &CancellationToken, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if cancel.is_cancelled() {
            return Err(RpcError::Cancelled);
        }
        let body = encode(args)?;
        let limit = self.options.call_timeout;

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RpcError::Cancelled),
            reply = tokio::time::timeout(limit, self.round_trip(method, body)) => match reply {
                Ok(reply) => reply?,
                Err(_) => {
                    return Err(RpcError::Timeout {
                        ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    })
                }
            },
        };
        decode(&reply)
    }

    /// `Serve.Ping` round trip.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        self.call::<(), ()>(methods::PING, cancel, &()).await
    }

    /// Drop the current connection; the next call redials.
    pub async fn mark_down(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.closed.cancel();
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .await
            .as_ref()
            .is_some_and(|conn| !conn.closed.is_cancelled())
    }

    async fn round_trip(&self, method: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let conn = self.connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&conn.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: &conn.pending,
            id,
        };
        if conn.closed.is_cancelled() {
            return Err(RpcError::Closed);
        }

        let request = Frame::Request(ReqFrame {
            id,
            method: method.to_string(),
            body,
        });
        if conn.outbound.send(request).await.is_err() {
            conn.closed.cancel();
            return Err(RpcError::Closed);
        }

        match rx.await {
            Ok(Outcome::Ok(bytes)) => Ok(bytes),
            Ok(Outcome::Err(shape)) => Err(shape.into()),
            Err(_) => Err(RpcError::Closed),
        }
    }

    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            if !conn.closed.is_cancelled() {
                return Ok(conn.clone());
            }
        }
        *slot = None;
        let conn = Connection::open(&self.addr, self.options.dial_timeout).await?;
        info!(addr = %self.addr, "rpc connected");
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

/// Ping `client` every `ping_interval` until it is dropped.
fn spawn_liveness(client: &Arc<Client>) {
    let weak: Weak<Client> = Arc::downgrade(client);
    let period = client.options.ping_interval;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await;
        loop {
            tick.tick().await;
            let Some(client) = weak.upgrade() else { break };
            if let Err(e) = client.ping(&CancellationToken::new()).await {
                warn!(addr = %client.addr, error = %e, "liveness ping failed");
                client.mark_down().await;
            }
        }
    });
}

/// One [`Client`] per peer address, created on first use.
pub struct ClientPool {
    options: ClientOptions,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl ClientPool {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Cached client for `addr`. A new client starts its liveness loop, so
    /// this must run inside a Tokio runtime.
    pub fn get(&self, addr: &str) -> Arc<Client> {
        let mut clients = lock(&self.clients);
        if let Some(client) = clients.get(addr) {
            return client.clone();
        }
        let client = Arc::new(Client::new(addr, self.options));
        spawn_liveness(&client);
        clients.insert(addr.to_string(), client.clone());
        client
    }

    pub async fn call<A, R>(
        &self,
        addr: &str,
        method: &str,
        cancel: &CancellationToken,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.get(addr).call(method, cancel, args).await
    }

    /// Forget the client for `addr`; its liveness loop ends with it.
    pub fn remove(&self, addr: &str) -> bool {
        lock(&self.clients).remove(addr).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}
