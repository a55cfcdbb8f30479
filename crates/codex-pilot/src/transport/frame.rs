//! WebSocket frame codec.
//!
//! Frames are encoded as single FIN frames. Decoding works over a growing
//! receive buffer and only yields a frame once every byte of it has arrived,
//! so split reads and coalesced reads decode the same way.

/// Largest payload that fits in the 7-bit length field.
const SMALL_PAYLOAD_MAX: usize = 125;
const LEN_16_MARKER: u8 = 126;
const LEN_64_MARKER: u8 = 127;
/// Largest inbound payload accepted before the connection is failed.
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(bits) => bits & 0x0F,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Encode one FIN frame. Client-to-server frames must pass a mask.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(0x80 | opcode.bits());

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let len = payload.len();
    if len <= SMALL_PAYLOAD_MAX {
        out.push(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        out.push(mask_bit | LEN_16_MARKER);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | LEN_64_MARKER);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(
                payload
                    .iter()
                    .enumerate()
                    .map(|(index, byte)| byte ^ key[index % 4]),
            );
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// Encode a client frame with a fresh random mask.
pub fn encode_masked(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    encode_frame(opcode, payload, Some(rand::random::<[u8; 4]>()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Declared payload length above [`MAX_PAYLOAD`]. The stream cannot be
    /// resynchronised after this.
    #[error("frame payload too large: {0} bytes")]
    TooLarge(u64),
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Peel one complete frame off the front of the buffer. `Ok(None)` means
    /// more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let Some((frame, consumed)) = peel_frame(&self.buffer)? else {
            return Ok(None);
        };
        self.buffer.drain(..consumed);
        Ok(Some(frame))
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    buf.get(offset..offset + N)?.try_into().ok()
}

fn peel_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = Opcode::from_bits(buf[0]);
    let masked = buf[1] & 0x80 != 0;
    let len_bits = buf[1] & 0x7F;

    let mut offset = 2;
    let declared_len = match len_bits {
        LEN_16_MARKER => {
            let Some(bytes) = read_array::<2>(buf, offset) else {
                return Ok(None);
            };
            offset += 2;
            u64::from(u16::from_be_bytes(bytes))
        }
        LEN_64_MARKER => {
            let Some(bytes) = read_array::<8>(buf, offset) else {
                return Ok(None);
            };
            offset += 8;
            u64::from_be_bytes(bytes)
        }
        small => u64::from(small),
    };
    if declared_len > MAX_PAYLOAD as u64 {
        return Err(FrameError::TooLarge(declared_len));
    }
    let payload_len = declared_len as usize;

    let mask = if masked {
        let Some(key) = read_array::<4>(buf, offset) else {
            return Ok(None);
        };
        offset += 4;
        Some(key)
    } else {
        None
    };

    let end = offset + payload_len;
    let Some(raw) = buf.get(offset..end) else {
        return Ok(None);
    };
    let payload = match mask {
        Some(key) => raw
            .iter()
            .enumerate()
            .map(|(index, byte)| byte ^ key[index % 4])
            .collect(),
        None => raw.to_vec(),
    };

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload,
        },
        end,
    )))
}
