//! Server side of the RFC 6455 opening handshake.

use base64::{Engine, engine::general_purpose::STANDARD};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode, Upgrade};

/// Appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `base64(sha1(key + GUID))`.
///
/// ```
/// # use switchyard::ws::handshake::accept_key;
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Whether the request asks to switch to the WebSocket protocol at all.
pub fn is_upgrade_request(request: &Request) -> bool {
    request
        .header("Upgrade")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
}

/// A validated handshake, ready to be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub accept: String,
    /// First subprotocol the client offered, echoed back as-is.
    pub protocol: Option<String>,
}

impl Handshake {
    /// The `101 Switching Protocols` response for this handshake.
    pub fn response(&self) -> ResponseBuilder {
        let mut builder = ResponseBuilder::new(StatusCode::SwitchingProtocols)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Accept", self.accept.clone());

        if let Some(protocol) = &self.protocol {
            builder = builder.header("Sec-WebSocket-Protocol", protocol.clone());
        }
        builder
    }

    /// The `101` carrying `upgrade`, to be run once it is on the wire.
    pub fn accept(&self, upgrade: Upgrade) -> Response {
        self.response().upgrade(upgrade).build()
    }
}

/// Validates the upgrade headers of `request`.
///
/// Nothing is written on failure; the caller answers with the error's
/// response (400) and the stream stays plain HTTP.
pub fn negotiate(request: &Request) -> Result<Handshake> {
    if request.method != Method::GET {
        return Err(Error::HandshakeRejected("method must be GET"));
    }

    if !is_upgrade_request(request) {
        return Err(Error::HandshakeRejected("missing Upgrade: websocket"));
    }

    let connection_upgrade = request.header("Connection").is_some_and(|v| {
        v.split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    });
    if !connection_upgrade {
        return Err(Error::HandshakeRejected("missing Connection: upgrade"));
    }

    let key = request
        .header("Sec-WebSocket-Key")
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(Error::HandshakeRejected("missing Sec-WebSocket-Key"))?;

    let protocol = request
        .header("Sec-WebSocket-Protocol")
        .and_then(|offered| offered.split(',').map(str::trim).find(|p| !p.is_empty()))
        .map(str::to_string);

    Ok(Handshake {
        accept: accept_key(key),
        protocol,
    })
}
