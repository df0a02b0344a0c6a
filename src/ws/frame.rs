//! RFC 6455 frame encoding and decoding.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |            (16/64)            |
//! |N|V|V|V|       |S|             |  (if payload len==126/127)    |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{FrameError, Result};

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_MASK: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_MASK: u8 = 0x7F;

/// Largest payload that fits in the 7-bit length field.
pub const MAX_INLINE_LEN: usize = 125;
const LEN_U16: u8 = 126;
const LEN_U64: u8 = 127;

/// Longest possible frame header: 2 + 8 length bytes + 4 mask bytes.
pub const MAX_HEADER_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Key the payload was masked with on the wire, if any. The payload held
    /// here is always unmasked.
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final, unmasked frame.
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    pub fn close() -> Self {
        Self::new(Opcode::Close, Vec::new())
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Appends the wire form of this frame to `dst`.
    ///
    /// Server frames always go out final and unmasked, whatever `fin` and
    /// `mask` say.
    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.payload.len();
        dst.reserve(MAX_HEADER_LEN + len);

        dst.put_u8(FIN_BIT | self.opcode.as_u8());

        if len <= MAX_INLINE_LEN {
            dst.put_u8(len as u8);
        } else if let Ok(len) = u16::try_from(len) {
            dst.put_u8(LEN_U16);
            dst.put_u16(len);
        } else {
            dst.put_u8(LEN_U64);
            dst.put_u64(len as u64);
        }

        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf
    }
}

/// XORs `payload` with the repeating 4-byte `key`, in place.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Reads exactly one frame from `reader`.
///
/// The whole frame is consumed before any fragmentation error is reported,
/// so the stream stays aligned on a frame boundary. Payloads above
/// `max_payload` are refused before anything is allocated for them.
pub async fn read_frame<R>(reader: &mut R, max_payload: u64) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;

    let fin = head[0] & FIN_BIT != 0;
    if head[0] & RSV_BITS != 0 {
        return Err(FrameError::ReservedBits.into());
    }
    let opcode_bits = head[0] & OPCODE_MASK;
    let opcode = Opcode::from_u8(opcode_bits).ok_or(FrameError::ReservedOpcode(opcode_bits))?;

    let masked = head[1] & MASK_BIT != 0;
    let len = match head[1] & LEN_MASK {
        LEN_U16 => u64::from(reader.read_u16().await?),
        LEN_U64 => reader.read_u64().await?,
        short => u64::from(short),
    };

    if opcode.is_control() && len > MAX_INLINE_LEN as u64 {
        return Err(FrameError::ControlFrameTooLong(len).into());
    }
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge { len, max: max_payload }.into());
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let len = usize::try_from(len).map_err(|_| FrameError::PayloadTooLarge { len, max: max_payload })?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    if !fin {
        return Err(FrameError::Fragmented.into());
    }

    Ok(Frame {
        fin,
        opcode,
        mask,
        payload,
    })
}
