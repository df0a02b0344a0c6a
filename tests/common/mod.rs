//! Client-side helpers shared by the WebSocket integration tests.
#![allow(dead_code)]

use std::time::Duration;

use switchyard::ws::frame::{Frame, read_frame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// A single frame as a client would send it: `first_byte` verbatim, masked
/// with `key` when given.
pub fn client_frame(first_byte: u8, payload: &[u8], key: Option<[u8; 4]>) -> Vec<u8> {
    let mask_bit = if key.is_some() { 0x80 } else { 0x00 };
    let mut out = vec![first_byte];

    match payload.len() {
        len if len <= 125 => out.push(mask_bit | len as u8),
        len if len <= u16::MAX as usize => {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    match key {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// A final, masked frame with the given opcode.
pub fn masked(opcode: u8, payload: &[u8]) -> Vec<u8> {
    client_frame(0x80 | opcode, payload, Some([0x12, 0x34, 0x56, 0x78]))
}

pub fn masked_text(payload: &str) -> Vec<u8> {
    masked(0x1, payload.as_bytes())
}

pub fn masked_close() -> Vec<u8> {
    masked(0x8, &[])
}

pub async fn send<W: AsyncWrite + Unpin>(stream: &mut W, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
    stream.flush().await.unwrap();
}

/// Reads the next server frame, failing the test after [`WAIT`].
pub async fn next_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Frame {
    tokio::time::timeout(WAIT, read_frame(stream, 1 << 24))
        .await
        .expect("timed out waiting for a frame")
        .expect("server sent an invalid frame")
}

pub fn upgrade_request(path: &str, extra_headers: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {SAMPLE_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         {extra_headers}\r\n"
    )
}

/// Reads an HTTP response head plus its `Content-Length` body.
///
/// Reads byte by byte so nothing past the response is consumed.
pub async fn read_http_response<R: AsyncRead + Unpin>(stream: &mut R) -> String {
    let read = async {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(stream.read_u8().await.unwrap());
        }
        let head = String::from_utf8(head).unwrap();

        let len = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        head + &String::from_utf8_lossy(&body)
    };

    tokio::time::timeout(WAIT, read)
        .await
        .expect("timed out waiting for an HTTP response")
}
