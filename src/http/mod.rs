//! HTTP/1.1 transport.
//!
//! Just enough HTTP to receive requests, hand them to the [`Router`], and give
//! the raw stream to the WebSocket layer after an upgrade.
//!
//! # Architecture
//!
//! - **`connection`**: per-stream request/response state machine
//! - **`parser`**: parses one request from the front of a byte buffer
//! - **`request`**: HTTP request representation
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: serializes and writes responses to the client
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data (idle / read timeout)
//!        └──────┬──────┘
//!               │ Request received (malformed → 400, then Closed)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Router::dispatch
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client (write / handshake timeout)
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               ├─ 101 with upgrade → Upgraded (stream handed to WebSocket)
//!               └─ Close → Closed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchyard::http::connection::Connection;
//! use switchyard::router::Router;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let router = Arc::new(Router::new());
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!
//!     loop {
//!         let (socket, peer) = listener.accept().await?;
//!         let conn = Connection::new(socket, Arc::clone(&router)).with_peer(peer);
//!         tokio::spawn(async move {
//!             if let Err(e) = conn.run().await {
//!                 eprintln!("Connection error: {}", e);
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! [`Router`]: crate::router::Router

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
