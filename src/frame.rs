//! WebSocket frame codec according to RFC 6455.
//!
//! Implements the client half of the WebSocket wire format:
//! - Frame encoding with per-frame masking
//! - Blocking frame decoding from a byte stream
//! - Control frame validation
//!
//! # Frame Format (RFC 6455 Section 5.2)
//!
//! ```text
//! byte0: FIN(1) RSV(3,=0) OPCODE(4)
//! byte1: MASK(1) LEN7(7)
//! [2 or 8 bytes extended length, big-endian, present iff LEN7 = 126/127]
//! [4 bytes masking key, present iff MASK=1]
//! payload: LEN bytes, XORed with masking key repeating every 4 bytes
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::io::{self, Read};
use thiserror::Error;

use crate::close::CloseReason;
use crate::handshake::HandshakeError;

/// WebSocket frame opcode (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation frame (fragmented message).
    Continuation = 0x0,
    /// Text data frame.
    Text = 0x1,
    /// Binary data frame.
    Binary = 0x2,
    // 0x3-0x7 reserved for non-control frames
    /// Connection close control frame.
    Close = 0x8,
    /// Ping control frame.
    Ping = 0x9,
    /// Pong control frame.
    Pong = 0xA,
    // 0xB-0xF reserved for control frames
}

impl Opcode {
    /// Returns true if this is a control frame (Close, Ping, Pong).
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Returns true if this is a data frame (Continuation, Text, Binary).
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Continuation | Self::Text | Self::Binary)
    }

    /// Try to parse an opcode from a byte value.
    pub fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WsError::InvalidOpcode(value)),
        }
    }
}

/// One unit of the WebSocket wire format.
///
/// `masked`/`mask_key` reflect what was (or will be) on the wire; decoded
/// payloads are always stored unmasked.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Final fragment flag (FIN bit).
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Mask flag (client-to-server frames are masked).
    pub masked: bool,
    /// Masking key (4 bytes, only present if masked).
    pub mask_key: Option<[u8; 4]>,
    /// Payload data, unmasked.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new text frame with the given payload.
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Text,
            masked: false,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Create a ping frame with optional payload.
    #[must_use]
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Ping,
            masked: false,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Create a pong frame echoing a ping's application payload.
    #[must_use]
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Pong,
            masked: false,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Create a close frame carrying a big-endian status code.
    #[must_use]
    pub fn close(code: u16) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Close,
            masked: false,
            mask_key: None,
            payload: CloseReason::encode(code),
        }
    }
}

/// WebSocket protocol errors.
#[derive(Debug, Error)]
pub enum WsError {
    /// An operation requiring an open connection was invoked while closed.
    #[error("socket is not connected to a server")]
    NotConnected,
    /// The HTTP upgrade handshake failed; the transport has been closed.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// The peer sent a Close frame; the transport has been closed.
    #[error("server closed connection with code {code} ({description})")]
    ConnectionTerminated {
        /// Close status code from the frame payload (1005 if absent).
        code: u16,
        /// Registry description for the code.
        description: &'static str,
    },
    /// Transport-level failure (end-of-stream or I/O error), propagated
    /// unchanged and never retried at this layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid opcode value on the wire.
    #[error("invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),
    /// Reserved header bits set without a negotiated extension.
    #[error("reserved bits set without extension")]
    ReservedBitsSet,
    /// Payload exceeds the configured maximum.
    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge {
        /// Declared payload size in bytes.
        size: u64,
        /// Configured maximum in bytes.
        max: usize,
    },
    /// Control frame payload exceeds 125 bytes (includes an attempted pong
    /// echo of an oversized ping).
    #[error("control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),
    /// Control frame with FIN unset.
    #[error("control frame cannot be fragmented")]
    FragmentedControlFrame,
    /// Frame sequencing violation.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
}

/// Source of 4-byte masking keys.
///
/// Masking is obfuscation against intermediaries, not confidentiality, so the
/// source does not need to be cryptographic. Injecting it keeps encoded
/// frames reproducible in tests.
pub type MaskSource = Box<dyn FnMut() -> [u8; 4] + Send>;

fn os_mask_source() -> MaskSource {
    Box::new(|| {
        let mut key = [0u8; 4];
        getrandom::fill(&mut key).expect("OS RNG unavailable");
        key
    })
}

/// WebSocket frame codec for the client role.
///
/// Encoding always masks (RFC 6455 Section 5.3: every client-originated
/// frame carries a fresh key). Decoding accepts both masked and unmasked
/// frames, since this layer does not negotiate what the peer sends.
pub struct FrameCodec {
    max_payload_size: usize,
    mask_source: MaskSource,
}

impl FrameCodec {
    /// Default maximum payload size (16 MiB).
    pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

    /// Creates a codec with the OS RNG as mask source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_payload_size: Self::DEFAULT_MAX_PAYLOAD_SIZE,
            mask_source: os_mask_source(),
        }
    }

    /// Sets the maximum accepted payload size.
    #[must_use]
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Replaces the masking-key source (deterministic keys for tests).
    #[must_use]
    pub fn with_mask_source(mut self, source: MaskSource) -> Self {
        self.mask_source = source;
        self
    }

    /// Encode one frame into `dst` as a single contiguous buffer, masking the
    /// payload with a fresh key.
    ///
    /// The caller writes `dst` to the transport in one `write_all` so the
    /// peer never observes a partial frame.
    pub fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), WsError> {
        let payload_len = frame.payload.len();

        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(WsError::FragmentedControlFrame);
            }
            if payload_len > 125 {
                return Err(WsError::ControlFrameTooLarge(payload_len));
            }
        }

        let mut first_byte = frame.opcode as u8;
        if frame.fin {
            first_byte |= 0x80;
        }

        let extended_len = if payload_len > 65535 {
            8
        } else if payload_len > 125 {
            2
        } else {
            0
        };
        dst.reserve(2 + extended_len + 4 + payload_len);

        dst.put_u8(first_byte);
        if payload_len <= 125 {
            dst.put_u8(0x80 | payload_len as u8);
        } else if payload_len <= 65535 {
            dst.put_u8(0x80 | 126);
            dst.put_u16(payload_len as u16);
        } else {
            dst.put_u8(0x80 | 127);
            dst.put_u64(payload_len as u64);
        }

        let mask_key = (self.mask_source)();
        dst.put_slice(&mask_key);

        let mut masked_payload = BytesMut::from(frame.payload.as_ref());
        apply_mask(&mut masked_payload, mask_key);
        dst.put_slice(&masked_payload);

        Ok(())
    }

    /// Read exactly one frame from a blocking byte stream.
    ///
    /// Blocks until the full header, optional mask key, and payload have been
    /// consumed; a stream that ends mid-frame surfaces as [`WsError::Io`]
    /// with `UnexpectedEof`.
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<Frame, WsError> {
        let mut header = [0u8; 2];
        reader.read_exact(&mut header)?;

        let fin = (header[0] & 0x80) != 0;
        if header[0] & 0x70 != 0 {
            return Err(WsError::ReservedBitsSet);
        }
        let opcode = Opcode::from_u8(header[0] & 0x0F)?;
        let masked = (header[1] & 0x80) != 0;
        let len7 = header[1] & 0x7F;

        if opcode.is_control() {
            if !fin {
                return Err(WsError::FragmentedControlFrame);
            }
            if len7 > 125 {
                return Err(WsError::ControlFrameTooLarge(len7 as usize));
            }
        }

        let payload_len = match len7 {
            126 => {
                let mut ext = [0u8; 2];
                reader.read_exact(&mut ext)?;
                u64::from(u16::from_be_bytes(ext))
            }
            127 => {
                let mut ext = [0u8; 8];
                reader.read_exact(&mut ext)?;
                u64::from_be_bytes(ext)
            }
            n => u64::from(n),
        };

        if payload_len > self.max_payload_size as u64 {
            return Err(WsError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload_size,
            });
        }

        let mask_key = if masked {
            let mut key = [0u8; 4];
            reader.read_exact(&mut key)?;
            Some(key)
        } else {
            None
        };

        #[allow(clippy::cast_possible_truncation)] // bounded by max_payload_size above
        let mut payload = vec![0u8; payload_len as usize];
        reader.read_exact(&mut payload)?;
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Frame {
            fin,
            opcode,
            masked,
            mask_key,
            payload: Bytes::from(payload),
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec")
            .field("max_payload_size", &self.max_payload_size)
            .finish_non_exhaustive()
    }
}

/// Apply XOR masking to payload data.
///
/// Masking and unmasking are the same operation; the key repeats every
/// 4 bytes. The mask is applied in-place.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}
