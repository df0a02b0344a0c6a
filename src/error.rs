//! Error taxonomy shared by routing, admission control, and the WebSocket layer.
//!
//! Routing and admission errors are resolved into a response by the
//! dispatcher and never escape it. Protocol and stream errors terminate the
//! pump that hit them and drive the connection to `Closing`.

use std::io;

use thiserror::Error;

use crate::http::request::Method;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// Convenience alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("route not found")]
    RouteNotFound,

    #[error("method not allowed")]
    MethodNotAllowed {
        /// Methods the matched path does accept.
        allow: Vec<Method>,
    },

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("worker pool unavailable")]
    PoolUnavailable,

    #[error("websocket handshake rejected: {0}")]
    HandshakeRejected(&'static str),

    #[error("websocket protocol violation: {0}")]
    Protocol(#[from] FrameError),

    #[error("stream I/O error: {0}")]
    StreamIo(#[from] io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("send buffer full")]
    SendBufferFull,
}

/// Reasons a WebSocket frame is refused by the decoder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Multi-frame messages are not supported.
    #[error("fragmented messages not supported")]
    Fragmented,

    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLong(u64),

    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: u64, max: u64 },
}

impl Error {
    /// HTTP status used when this error answers a request.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::RouteNotFound => StatusCode::NotFound,
            Error::MethodNotAllowed { .. } => StatusCode::MethodNotAllowed,
            Error::RateLimited => StatusCode::TooManyRequests,
            Error::PoolUnavailable => StatusCode::ServiceUnavailable,
            Error::HandshakeRejected(_) => StatusCode::BadRequest,
            _ => StatusCode::InternalServerError,
        }
    }

    /// Builds the plain-text response for this error.
    pub fn into_response(self) -> Response {
        let status = self.status();
        let mut builder = ResponseBuilder::new(status).header("Content-Type", "text/plain");

        if let Error::MethodNotAllowed { allow } = &self {
            let allow = allow
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            builder = builder.header("Allow", allow);
        }

        let body = format!("{} {}", status.as_u16(), status.reason_phrase());
        builder.body(body.into_bytes()).build()
    }
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        err.into_response()
    }
}
