//! Switchyard - HTTP routing and WebSocket engine
//!
//! Core library: a radix-trie router with middleware, admission control
//! (rate limiter, worker pool), and RFC 6455 WebSocket connections.

pub mod config;
pub mod error;
pub mod exec;
pub mod http;
pub mod router;
pub mod server;
pub mod ws;

pub use error::{Error, FrameError, Result};
pub use router::{Context, Router, Routing};
pub use ws::{WebSocket, WebSocketSender};
