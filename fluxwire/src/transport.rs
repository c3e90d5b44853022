//! Connection pooling and request pipelining
//!
//! Every [`Connection`] is driven by a background task that owns the
//! framed stream and a FIFO of in-flight correlation ids. Responses must
//! come back in send order; anything else is a desync and kills the
//! connection.
//!
//! [`Transport`] keeps idle connections per endpoint. A connection is
//! checked out exclusively as a [`PooledConnection`] and goes back to the
//! pool only through [`PooledConnection::release`]; dropping it closes the
//! connection, so timed-out or cancelled exchanges never leave a
//! half-read stream in the pool.

use std::collections::VecDeque;
use std::io;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;
use crate::error::FluxwireError;
use crate::protocol::{
    ClientCodec, ProduceResponse, Request, RequestFrame, RequestHeader, Response, ResponseFrame,
};
use crate::Result;

/// Byte stream a connection runs over
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens byte streams to brokers; supply a custom one for TLS or tests
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, endpoint: &str) -> io::Result<BoxedStream>;
}

/// Plain TCP with `TCP_NODELAY`
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, endpoint: &str) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(endpoint).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

type Reply = oneshot::Sender<Result<Option<ResponseFrame>>>;

struct Command {
    request: Request,
    reply: Reply,
}

/// A single broker connection
#[derive(Debug)]
pub struct Connection {
    id: u64,
    endpoint: String,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("api", &self.request.api_key())
            .finish()
    }
}

/// Decrements the open-connection count when a connection task ends
struct OpenGuard(watch::Sender<usize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.send_modify(|open| *open = open.saturating_sub(1));
    }
}

impl Connection {
    fn spawn(
        id: u64,
        endpoint: String,
        stream: BoxedStream,
        client_id: Option<String>,
        config: &TransportConfig,
        guard: OpenGuard,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(config.queue_depth.max(1));
        let cancel = CancellationToken::new();
        let framed = Framed::new(stream, ClientCodec::new(config.max_frame_bytes));

        tokio::spawn(connection_loop(
            endpoint.clone(),
            framed,
            command_rx,
            client_id,
            cancel.clone(),
            guard,
        ));

        Self {
            id,
            endpoint,
            commands,
            cancel,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the connection task is still running
    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed() && !self.cancel.is_cancelled()
    }

    /// Send a request and wait for its response.
    ///
    /// Requests that expect no response resolve once written, with an
    /// empty response of their API.
    pub async fn round_trip(&self, request: Request) -> Result<Response> {
        let api_key = request.api_key();
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command { request, reply })
            .await
            .map_err(|_| FluxwireError::connection(format!("connection to {} closed", self.endpoint)))?;

        let frame = response.await.map_err(|_| {
            FluxwireError::connection(format!("connection to {} closed", self.endpoint))
        })??;
        match frame {
            Some(frame) => frame.decode(api_key),
            None => Ok(Response::Produce(ProduceResponse::default())),
        }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

async fn connection_loop(
    endpoint: String,
    mut framed: Framed<BoxedStream, ClientCodec>,
    mut commands: mpsc::Receiver<Command>,
    client_id: Option<String>,
    cancel: CancellationToken,
    _guard: OpenGuard,
) {
    let mut pending: VecDeque<(i32, Reply)> = VecDeque::new();
    let mut next_correlation_id: i32 = 0;

    let error = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break FluxwireError::connection(format!("connection to {} closed", endpoint));
            }

            command = commands.recv() => {
                let Some(Command { request, reply }) = command else {
                    break FluxwireError::connection(format!("connection to {} closed", endpoint));
                };

                let correlation_id = next_correlation_id;
                next_correlation_id = next_correlation_id.wrapping_add(1);
                let api_key = request.api_key();
                let expects_response = request.expects_response();
                debug!(%endpoint, correlation_id, api = ?api_key, "sending request");

                let frame = RequestFrame {
                    header: RequestHeader {
                        api_key: api_key.as_i16(),
                        api_version: api_key.version(),
                        correlation_id,
                        client_id: client_id.clone(),
                    },
                    request,
                };
                if let Err(e) = framed.send(frame).await {
                    let _ = reply.send(Err(e.clone()));
                    break e;
                }

                if expects_response {
                    pending.push_back((correlation_id, reply));
                } else {
                    let _ = reply.send(Ok(None));
                }
            }

            frame = framed.next() => {
                match frame {
                    Some(Ok(frame)) => match pending.pop_front() {
                        Some((expected, reply)) if expected == frame.correlation_id => {
                            trace!(%endpoint, correlation_id = expected, "received response");
                            let _ = reply.send(Ok(Some(frame)));
                        }
                        Some((expected, reply)) => {
                            let e = FluxwireError::CorrelationMismatch {
                                expected,
                                got: frame.correlation_id,
                            };
                            let _ = reply.send(Err(e.clone()));
                            break e;
                        }
                        None => {
                            break FluxwireError::protocol(format!(
                                "unsolicited response {} from {}",
                                frame.correlation_id, endpoint
                            ));
                        }
                    },
                    Some(Err(e)) => break e,
                    None => {
                        break FluxwireError::connection(format!(
                            "connection closed by {}",
                            endpoint
                        ));
                    }
                }
            }
        }
    };

    if !pending.is_empty() {
        warn!(%endpoint, pending = pending.len(), error = %error, "failing in-flight requests");
    }
    for (_, reply) in pending.drain(..) {
        let _ = reply.send(Err(error.clone()));
    }
    commands.close();
    while let Ok(Command { reply, .. }) = commands.try_recv() {
        let _ = reply.send(Err(FluxwireError::connection(format!(
            "connection to {} closed",
            endpoint
        ))));
    }
    cancel.cancel();
    debug!(%endpoint, reason = %error, "connection closed");
}

struct IdleConnection {
    connection: Connection,
    since: Instant,
}

struct TransportInner {
    config: TransportConfig,
    client_id: Option<String>,
    dialer: Arc<dyn Dialer>,
    idle: DashMap<String, Vec<IdleConnection>>,
    open: watch::Sender<usize>,
    next_id: AtomicU64,
}

/// Pool of broker connections keyed by endpoint
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("open", &self.open_connections())
            .field("idle_endpoints", &self.inner.idle.len())
            .finish()
    }
}

impl Transport {
    pub fn new(config: TransportConfig, client_id: Option<String>) -> Self {
        Self::with_dialer(config, client_id, Arc::new(TcpDialer))
    }

    pub fn with_dialer(
        config: TransportConfig,
        client_id: Option<String>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let (open, _) = watch::channel(0);
        Self {
            inner: Arc::new(TransportInner {
                config,
                client_id,
                dialer,
                idle: DashMap::new(),
                open,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Borrow a connection to `endpoint`, reusing a fresh idle one if any
    pub async fn checkout(&self, endpoint: &str) -> Result<PooledConnection> {
        if let Some(connection) = self.take_idle(endpoint) {
            trace!(endpoint, id = connection.id(), "reusing pooled connection");
            return Ok(PooledConnection {
                connection: Some(connection),
                transport: self.inner.clone(),
            });
        }

        let connection = self.dial(endpoint).await?;
        Ok(PooledConnection {
            connection: Some(connection),
            transport: self.inner.clone(),
        })
    }

    fn take_idle(&self, endpoint: &str) -> Option<Connection> {
        let idle_timeout = self.inner.config.idle_timeout;
        let mut list = self.inner.idle.get_mut(endpoint)?;
        while let Some(idle) = list.pop() {
            if idle.since.elapsed() < idle_timeout && idle.connection.is_alive() {
                return Some(idle.connection);
            }
            idle.connection.close();
        }
        None
    }

    async fn dial(&self, endpoint: &str) -> Result<Connection> {
        let timeout = self.inner.config.connect_timeout;
        let stream = tokio::time::timeout(timeout, self.inner.dialer.dial(endpoint))
            .await
            .map_err(|_| {
                FluxwireError::connection(format!(
                    "connecting to {} timed out after {:?}",
                    endpoint, timeout
                ))
            })?
            .map_err(|e| FluxwireError::connection(format!("failed to connect to {}: {}", endpoint, e)))?;

        self.inner.open.send_modify(|open| *open += 1);
        let guard = OpenGuard(self.inner.open.clone());
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::spawn(
            id,
            endpoint.to_string(),
            stream,
            self.inner.client_id.clone(),
            &self.inner.config,
            guard,
        );
        info!(endpoint, id, "connected to broker");
        Ok(connection)
    }

    /// Close every pooled connection that is not checked out
    pub fn close_idle(&self) {
        for mut entry in self.inner.idle.iter_mut() {
            for idle in entry.value_mut().drain(..) {
                idle.connection.close();
            }
        }
        self.inner.idle.clear();
    }

    /// Connections whose task is still running, pooled or checked out
    pub fn open_connections(&self) -> usize {
        *self.inner.open.borrow()
    }

    /// Wait until every connection this transport opened has closed
    pub async fn wait_closed(&self) {
        let mut open = self.inner.open.subscribe();
        let _ = open.wait_for(|open| *open == 0).await;
    }

    /// Same as [`wait_closed`](Self::wait_closed) but gives up after `timeout`
    pub async fn wait_closed_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_closed()).await.is_ok()
    }
}

/// A connection checked out of a [`Transport`].
///
/// Dropping it without [`release`](Self::release) closes the connection.
pub struct PooledConnection {
    connection: Option<Connection>,
    transport: Arc<TransportInner>,
}

impl PooledConnection {
    /// Return the connection to the pool
    pub fn release(mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if !connection.is_alive() {
            return;
        }
        self.transport
            .idle
            .entry(connection.endpoint.clone())
            .or_default()
            .push(IdleConnection {
                connection,
                since: Instant::now(),
            });
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("PooledConnection");
        if let Some(connection) = &self.connection {
            debug
                .field("endpoint", &connection.endpoint())
                .field("id", &connection.id());
        }
        debug.finish()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `release` and `drop` take the connection, and both consume self
        self.connection
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            trace!(endpoint = connection.endpoint(), id = connection.id(), "discarding connection");
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        ApiVersionsRequest, ApiVersionsResponse, HeartbeatRequest, HeartbeatResponse,
        ProduceRequest, ServerCodec,
    };
    use std::sync::atomic::AtomicUsize;
    use tokio::io::DuplexStream;

    /// How the in-memory broker answers
    #[derive(Clone, Copy)]
    enum Behavior {
        Answer,
        /// Echo the wrong correlation id
        Desync,
        /// Hang up on the first request
        HangUp,
        /// Never answer
        Silent,
    }

    struct MemoryDialer {
        behavior: Behavior,
        dials: AtomicUsize,
    }

    impl MemoryDialer {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                dials: AtomicUsize::new(0),
            })
        }
    }

    async fn serve(stream: DuplexStream, behavior: Behavior) {
        let mut framed = Framed::new(stream, ServerCodec::default());
        while let Some(Ok(frame)) = framed.next().await {
            let correlation_id = frame.header.correlation_id;
            let response: Response = match frame.request {
                Request::Heartbeat(_) => HeartbeatResponse::default().into(),
                Request::Produce(_) => ProduceResponse::default().into(),
                _ => ApiVersionsResponse::default().into(),
            };
            if !frame.request.expects_response() {
                continue;
            }
            match behavior {
                Behavior::Answer => {
                    let _ = framed.send((correlation_id, response)).await;
                }
                Behavior::Desync => {
                    let _ = framed.send((correlation_id + 100, response)).await;
                }
                Behavior::HangUp => return,
                Behavior::Silent => {}
            }
        }
    }

    #[async_trait]
    impl Dialer for MemoryDialer {
        async fn dial(&self, _endpoint: &str) -> io::Result<BoxedStream> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(64 * 1024);
            tokio::spawn(serve(server, self.behavior));
            Ok(Box::new(client))
        }
    }

    struct RefusingDialer;

    #[async_trait]
    impl Dialer for RefusingDialer {
        async fn dial(&self, _endpoint: &str) -> io::Result<BoxedStream> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }
    }

    fn transport(dialer: Arc<dyn Dialer>) -> Transport {
        Transport::with_dialer(TransportConfig::default(), Some("test".into()), dialer)
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let dialer = MemoryDialer::new(Behavior::Answer);
        let transport = transport(dialer.clone());

        for _ in 0..3 {
            let conn = transport.checkout("broker:9092").await.unwrap();
            let response = conn.round_trip(ApiVersionsRequest {}.into()).await.unwrap();
            assert!(matches!(response, Response::ApiVersions(_)));
            conn.release();
        }
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);
        assert_eq!(transport.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_dropped_connection_is_discarded() {
        let dialer = MemoryDialer::new(Behavior::Answer);
        let transport = transport(dialer.clone());

        let conn = transport.checkout("broker:9092").await.unwrap();
        drop(conn);
        let conn = transport.checkout("broker:9092").await.unwrap();
        conn.release();

        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);
        transport.close_idle();
        assert!(transport.wait_closed_timeout(Duration::from_secs(5)).await);
        assert_eq!(transport.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_pipelined_requests_complete_in_order() {
        let transport = transport(MemoryDialer::new(Behavior::Answer));
        let conn = transport.checkout("broker:9092").await.unwrap();

        let heartbeat = HeartbeatRequest::default();
        let (a, b, c) = tokio::join!(
            conn.round_trip(ApiVersionsRequest {}.into()),
            conn.round_trip(heartbeat.clone().into()),
            conn.round_trip(ApiVersionsRequest {}.into()),
        );
        assert!(matches!(a.unwrap(), Response::ApiVersions(_)));
        assert!(matches!(b.unwrap(), Response::Heartbeat(_)));
        assert!(matches!(c.unwrap(), Response::ApiVersions(_)));
        conn.release();
    }

    #[tokio::test]
    async fn test_correlation_mismatch_kills_connection() {
        let transport = transport(MemoryDialer::new(Behavior::Desync));
        let conn = transport.checkout("broker:9092").await.unwrap();

        let err = conn.round_trip(ApiVersionsRequest {}.into()).await.unwrap_err();
        assert!(matches!(
            err,
            FluxwireError::CorrelationMismatch {
                expected: 0,
                got: 100
            }
        ));
        let err = conn.round_trip(ApiVersionsRequest {}.into()).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_disconnect_fails_every_waiter() {
        let transport = transport(MemoryDialer::new(Behavior::HangUp));
        let conn = transport.checkout("broker:9092").await.unwrap();

        let (a, b) = tokio::join!(
            conn.round_trip(ApiVersionsRequest {}.into()),
            conn.round_trip(ApiVersionsRequest {}.into()),
        );
        assert!(a.unwrap_err().is_transport());
        assert!(b.unwrap_err().is_transport());

        conn.release();
        assert!(transport.wait_closed_timeout(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_acks_zero_completes_once_written() {
        let transport = transport(MemoryDialer::new(Behavior::Silent));
        let conn = transport.checkout("broker:9092").await.unwrap();

        let request = ProduceRequest {
            acks: 0,
            ..Default::default()
        };
        let response = conn.round_trip(request.into()).await.unwrap();
        assert_eq!(response, Response::Produce(ProduceResponse::default()));
    }

    #[tokio::test]
    async fn test_timed_out_exchange_closes_connection() {
        let transport = transport(MemoryDialer::new(Behavior::Silent));
        let conn = transport.checkout("broker:9092").await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            conn.round_trip(ApiVersionsRequest {}.into()),
        )
        .await;
        assert!(result.is_err());
        drop(conn);
        assert!(transport.wait_closed_timeout(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_idle_timeout_forces_new_dial() {
        let dialer = MemoryDialer::new(Behavior::Answer);
        let config = TransportConfig {
            idle_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let transport = Transport::with_dialer(config, None, dialer.clone());

        transport.checkout("broker:9092").await.unwrap().release();
        tokio::time::sleep(Duration::from_millis(30)).await;
        transport.checkout("broker:9092").await.unwrap().release();

        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dial_failure_is_a_connection_error() {
        let transport = transport(Arc::new(RefusingDialer));
        let err = transport.checkout("broker:9092").await.unwrap_err();
        assert!(matches!(err, FluxwireError::Connection { .. }));
        assert_eq!(transport.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_pooled_connection_debug_names_endpoint() {
        let transport = transport(MemoryDialer::new(Behavior::Answer));
        let conn = transport.checkout("broker:9092").await.unwrap();
        let debug = format!("{:?}", conn);
        assert!(debug.contains("broker:9092"), "{}", debug);
        conn.release();
    }
}
