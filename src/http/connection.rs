use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::config::{TimeoutConfig, WebSocketConfig};
use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, Upgrade};
use crate::http::writer::ResponseWriter;
use crate::router::Router;
use crate::ws::WebSocket;

const READ_CHUNK: usize = 4096;

/// One accepted stream, driven from request to request until it closes or
/// is handed over to a WebSocket handler.
pub struct Connection<S> {
    stream: S,
    buffer: Vec<u8>,
    state: ConnectionState,
    router: Arc<Router>,
    peer: Option<SocketAddr>,
    timeouts: TimeoutConfig,
    websocket: WebSocketConfig,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    /// Serialized response, whether to keep the connection alive, and the
    /// handler that takes over once the response is out.
    Writing(ResponseWriter, bool, Option<Upgrade>),
    Upgraded(Upgrade),
    Closed,
}

enum ReadOutcome {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S, router: Arc<Router>) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
            state: ConnectionState::Reading,
            router,
            peer: None,
            timeouts: TimeoutConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_websocket_config(mut self, websocket: WebSocketConfig) -> Self {
        self.websocket = websocket;
        self
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        ReadOutcome::Request(req) => ConnectionState::Processing(req),
                        ReadOutcome::Malformed(e) => {
                            warn!(peer = ?self.peer, error = ?e, "Malformed request");
                            let writer = ResponseWriter::new(&Response::bad_request());
                            ConnectionState::Writing(writer, false, None)
                        }
                        ReadOutcome::Eof => ConnectionState::Closed,
                    };
                }

                ConnectionState::Processing(req) => {
                    let wants_keep_alive = req.keep_alive();
                    let is_head = req.method == Method::HEAD;
                    let mut response = self.router.dispatch(req, self.peer).await;
                    let upgrade = response.upgrade.take();

                    let keep_alive = wants_keep_alive
                        && upgrade.is_none()
                        && !response
                            .header("Connection")
                            .is_some_and(|v| v.eq_ignore_ascii_case("close"));
                    if !keep_alive && upgrade.is_none() {
                        response
                            .headers
                            .insert("Connection".to_string(), "close".to_string());
                    }

                    // HEAD keeps the Content-Length of the body it does not send.
                    if is_head {
                        response.body.clear();
                    }

                    let writer = ResponseWriter::new(&response);
                    self.state = ConnectionState::Writing(writer, keep_alive, upgrade);
                }

                ConnectionState::Writing(mut writer, keep_alive, upgrade) => {
                    let limit = match upgrade {
                        Some(_) => self.timeouts.handshake(),
                        None => self.timeouts.write(),
                    };
                    time::timeout(limit, writer.write_to_stream(&mut self.stream))
                        .await
                        .context("response write timed out")??;

                    self.state = match upgrade {
                        Some(upgrade) => ConnectionState::Upgraded(upgrade),
                        None if keep_alive => ConnectionState::Reading,
                        None => ConnectionState::Closed,
                    };
                }

                ConnectionState::Upgraded(upgrade) => {
                    self.hand_over(upgrade).await;
                    return Ok(());
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        let mut deadline = (!self.buffer.is_empty()).then(|| Instant::now() + self.timeouts.read());

        loop {
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(ReadOutcome::Request(request));
                }
                Err(ParseError::Incomplete) => {}
                Err(e) => return Ok(ReadOutcome::Malformed(e)),
            }

            let limit = deadline.unwrap_or_else(|| Instant::now() + self.timeouts.idle());
            let mut temp = [0u8; READ_CHUNK];
            let n = match time::timeout_at(limit, self.stream.read(&mut temp)).await {
                Ok(res) => res?,
                Err(_) => {
                    debug!(peer = ?self.peer, partial = !self.buffer.is_empty(), "Read timed out");
                    return Ok(ReadOutcome::Eof);
                }
            };

            if n == 0 {
                return Ok(ReadOutcome::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
            deadline.get_or_insert_with(|| Instant::now() + self.timeouts.read());
        }
    }

    /// Gives the raw stream, plus anything already read past the handshake,
    /// to the WebSocket handler and runs it to completion.
    async fn hand_over(self, upgrade: Upgrade) {
        let Connection {
            stream,
            buffer,
            peer,
            websocket,
            ..
        } = self;

        debug!(peer = ?peer, buffered = buffer.len(), "Switching to WebSocket");
        let ws = WebSocket::with_prefix(stream, Bytes::from(buffer), &websocket);
        (upgrade.handler)(ws).await;
    }
}
