//! An established WebSocket connection and its two pumps.
//!
//! ```text
//!   client ──frames──▶ read pump ──payloads──▶ inbound queue ──▶ WebSocket::recv
//!   client ◀─frames─── write pump ◀─frames──── outbound queue ◀── WebSocket::send
//! ```
//!
//! The pumps share the connection state and the write half of the stream.
//! Whichever side closes first moves the state `Open → Closing`; the write
//! pump then flushes what is queued, sends a close frame, and releases the
//! stream exactly once, which moves the state to `Closed`.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::WebSocketConfig;
use crate::error::{Error, Result};
use crate::ws::frame::{Frame, Opcode, read_frame};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Runs once per upgraded connection, on the connection's own task.
pub type WebSocketHandler = Arc<dyn Fn(WebSocket) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async function as a [`WebSocketHandler`].
pub fn handler<F, Fut>(f: F) -> WebSocketHandler
where
    F: Fn(WebSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ws| Box::pin(f(ws)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

struct Shared {
    id: u64,
    state: watch::Sender<ConnectionState>,
    sink: Mutex<Option<Sink>>,
    write_timeout: Duration,
}

impl Shared {
    /// `Open → Closing`. Returns whether this call made the transition.
    fn begin_close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Open {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        })
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let buf = frame.to_bytes();
        let mut sink = self.sink.lock().await;
        let writer = sink.as_mut().ok_or(Error::ConnectionClosed)?;

        let write = async {
            writer.write_all(&buf).await?;
            writer.flush().await
        };
        match time::timeout(self.write_timeout, write).await {
            Ok(res) => res.map_err(Error::from),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "websocket write timed out").into()),
        }
    }

    /// Shuts the write half down and marks the connection `Closed`.
    /// Only the first call touches the stream.
    async fn release(&self) {
        let writer = self.sink.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(conn = self.id, error = %e, "Shutdown of released stream failed");
            }
            self.state.send_replace(ConnectionState::Closed);
            debug!(conn = self.id, "WebSocket closed");
        }
    }
}

/// Resolves once the connection has left `Open`.
async fn closing(mut state: watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(|s| *s != ConnectionState::Open).await;
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Application-side handle to an established connection.
///
/// Incoming text and binary payloads are read with [`WebSocket::recv`] or
/// through the [`Stream`] impl; the sequence ends once the connection
/// starts closing. Dropping the handle closes the connection.
pub struct WebSocket {
    inbound: mpsc::Receiver<Vec<u8>>,
    sender: WebSocketSender,
}

/// Cloneable sending half of a [`WebSocket`].
#[derive(Clone)]
pub struct WebSocketSender {
    outbound: mpsc::Sender<Frame>,
    shared: Arc<Shared>,
}

impl WebSocket {
    /// Takes over `stream` and starts both pumps.
    pub fn new<S>(stream: S, config: &WebSocketConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_prefix(stream, Bytes::new(), config)
    }

    /// Like [`WebSocket::new`], with `prefix` read before anything from
    /// `stream`. Used for bytes the HTTP layer buffered past the handshake.
    pub fn with_prefix<S>(stream: S, prefix: impl Into<Bytes>, config: &WebSocketConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = io::Cursor::new(prefix.into()).chain(read_half);

        let (state, _) = watch::channel(ConnectionState::Open);
        let shared = Arc::new(Shared {
            id,
            state,
            sink: Mutex::new(Some(Box::new(write_half))),
            write_timeout: config.write_timeout(),
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));

        tokio::spawn(read_pump(
            reader,
            Arc::clone(&shared),
            inbound_tx,
            config.max_frame_size,
        ));
        tokio::spawn(write_pump(
            Arc::clone(&shared),
            outbound_rx,
            config.ping_interval(),
        ));

        debug!(conn = id, "WebSocket opened");

        Self {
            inbound: inbound_rx,
            sender: WebSocketSender {
                outbound: outbound_tx,
                shared,
            },
        }
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.sender.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.sender.shared.state()
    }

    /// Next inbound payload, or `None` once the connection is closing.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await
    }

    /// Queues `msg` as a text frame.
    pub fn send(&self, msg: impl Into<Vec<u8>>) -> Result<()> {
        self.sender.send(msg)
    }

    /// Queues `msg` as a binary frame.
    pub fn send_binary(&self, msg: impl Into<Vec<u8>>) -> Result<()> {
        self.sender.send_binary(msg)
    }

    pub fn sender(&self) -> WebSocketSender {
        self.sender.clone()
    }

    /// Starts closing. Already queued messages are still written.
    pub fn close(&self) {
        self.sender.close();
    }

    /// Waits until the stream has been released.
    pub async fn closed(&self) {
        let mut state = self.sender.shared.state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        self.sender.close();
    }
}

impl Stream for WebSocket {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inbound.poll_recv(cx)
    }
}

impl WebSocketSender {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn send(&self, msg: impl Into<Vec<u8>>) -> Result<()> {
        self.enqueue(Frame::text(msg))
    }

    pub fn send_binary(&self, msg: impl Into<Vec<u8>>) -> Result<()> {
        self.enqueue(Frame::binary(msg))
    }

    fn enqueue(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => Error::SendBufferFull,
            TrySendError::Closed(_) => Error::ConnectionClosed,
        })
    }

    pub fn close(&self) {
        if self.shared.begin_close() {
            debug!(conn = self.shared.id, "Close requested by application");
        }
    }

    /// Whether the connection has left `Open`.
    pub fn is_closed(&self) -> bool {
        self.shared.state() != ConnectionState::Open
    }
}

async fn read_pump<R>(
    mut reader: R,
    shared: Arc<Shared>,
    inbound: mpsc::Sender<Vec<u8>>,
    max_frame_size: u64,
) where
    R: AsyncRead + Unpin,
{
    let id = shared.id;
    let closing = closing(shared.state.subscribe());
    tokio::pin!(closing);

    loop {
        let frame = tokio::select! {
            _ = &mut closing => break,
            res = read_frame(&mut reader, max_frame_size) => res,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(Error::StreamIo(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(conn = id, "Peer closed the stream");
                break;
            }
            Err(e) => {
                warn!(conn = id, error = %e, "Read failed");
                break;
            }
        };

        match frame.opcode {
            Opcode::Text | Opcode::Binary => match inbound.try_send(frame.payload) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(conn = id, "Inbound queue full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {}
            },
            Opcode::Ping => {
                if let Err(e) = shared.write_frame(&Frame::pong(frame.payload)).await {
                    warn!(conn = id, error = %e, "Pong write failed");
                    break;
                }
            }
            Opcode::Pong => {}
            Opcode::Close => {
                debug!(conn = id, "Close frame received");
                break;
            }
            Opcode::Continuation => {
                warn!(conn = id, "Ignoring stray continuation frame");
            }
        }
    }

    shared.begin_close();
}

async fn write_pump(
    shared: Arc<Shared>,
    mut outbound: mpsc::Receiver<Frame>,
    ping_interval: Option<Duration>,
) {
    let id = shared.id;
    let closing = closing(shared.state.subscribe());
    tokio::pin!(closing);

    let mut ticker = ping_interval.map(|period| {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(frame) = msg else {
                    let _ = shared.write_frame(&Frame::close()).await;
                    break;
                };
                if let Err(e) = shared.write_frame(&frame).await {
                    warn!(conn = id, error = %e, "Write failed");
                    break;
                }
            }
            _ = tick(&mut ticker) => {
                if let Err(e) = shared.write_frame(&Frame::ping(Vec::new())).await {
                    warn!(conn = id, error = %e, "Ping write failed");
                    break;
                }
            }
            _ = &mut closing => {
                outbound.close();
                while let Some(frame) = outbound.recv().await {
                    if shared.write_frame(&frame).await.is_err() {
                        break;
                    }
                }
                let _ = shared.write_frame(&Frame::close()).await;
                break;
            }
        }
    }

    shared.begin_close();
    shared.release().await;
}
