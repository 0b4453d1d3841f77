//! Protocol codec for encoding/decoding messages
//!
//! Handles the fixed byte layout, the CRC-16 checksum and the producer clock.

use bytes::{Buf, BufMut};
use std::fmt::Write as _;
use std::time::Instant;
use thiserror::Error;

use super::{
    FixedStr, MessageType, ShowcaseMessage, Status, CHECKSUM_SPAN, DESCRIPTION_CAPACITY,
    MESSAGE_SIZE, USERNAME_CAPACITY,
};

/// Byte offset of the checksum field
pub const CHECKSUM_OFFSET: usize = 1 + USERNAME_CAPACITY + 4 + DESCRIPTION_CAPACITY + 1;

const CRC_SEED: u16 = 0xFFFF;
const CRC_POLY: u16 = 0xA001;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid length: {0} bytes (expected 64)")]
    InvalidLength(usize),

    #[error("Checksum mismatch: computed {computed:#06x}, carried {carried:#06x}")]
    ChecksumMismatch { computed: u16, carried: u16 },

    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}

/// CRC-16, reflected polynomial 0xA001, seed 0xFFFF, one bit at a time
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC_SEED;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ CRC_POLY } else { crc >> 1 };
        }
    }
    crc
}

impl ShowcaseMessage {
    /// Serialize into the packed wire layout
    pub fn to_bytes(&self) -> [u8; MESSAGE_SIZE] {
        let mut out = [0u8; MESSAGE_SIZE];
        let mut buf = &mut out[..];

        buf.put_u8(self.msg_type.code());
        buf.put_slice(self.username.as_bytes());
        buf.put_i32_le(self.amount);
        buf.put_slice(self.description.as_bytes());
        buf.put_u8(self.status.code());
        buf.put_u16_le(self.checksum);
        buf.put_u32_le(self.timestamp);
        buf.put_slice(&self.padding);

        out
    }

    /// Reinterpret exactly one packet's worth of bytes
    pub fn from_bytes(bytes: &[u8; MESSAGE_SIZE]) -> Self {
        let mut buf = &bytes[..];

        let msg_type = MessageType::from_code(buf.get_u8());
        let mut username = [0u8; USERNAME_CAPACITY];
        buf.copy_to_slice(&mut username);
        let amount = buf.get_i32_le();
        let mut description = [0u8; DESCRIPTION_CAPACITY];
        buf.copy_to_slice(&mut description);
        let status = Status::from_code(buf.get_u8());
        let checksum = buf.get_u16_le();
        let timestamp = buf.get_u32_le();
        let mut padding = [0u8; 4];
        buf.copy_to_slice(&mut padding);

        Self {
            msg_type,
            username: FixedStr::from_raw(username),
            amount,
            description: FixedStr::from_raw(description),
            status,
            checksum,
            timestamp,
            padding,
        }
    }

    /// CRC over the first `CHECKSUM_SPAN` bytes with the checksum field read as zero
    pub fn compute_checksum(&self) -> u16 {
        let mut bytes = self.to_bytes();
        bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].fill(0);
        crc16(&bytes[..CHECKSUM_SPAN])
    }

    /// Store the checksum for the current contents
    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }
}

/// Source of producer timestamps
pub trait Clock: Send + Sync {
    /// Milliseconds on a monotonic clock, wrapping at `u32::MAX`
    fn now_millis(&self) -> u32;
}

/// Milliseconds since this clock was created
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    started: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }
}

/// Clock pinned to one value
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn now_millis(&self) -> u32 {
        self.0
    }
}

/// Encodes messages into the wire format
pub struct Encoder<C: Clock = MonotonicClock> {
    clock: C,
}

impl Encoder<MonotonicClock> {
    pub fn new() -> Self {
        Self { clock: MonotonicClock::new() }
    }
}

impl Default for Encoder<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Encoder<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    /// Encode a pending message
    ///
    /// Strings are truncated silently to 31 and 15 bytes.
    pub fn encode(
        &self,
        msg_type: MessageType,
        username: &str,
        amount: i32,
        description: &str,
    ) -> [u8; MESSAGE_SIZE] {
        self.encode_with_status(msg_type, username, amount, description, Status::Pending)
    }

    /// Encode a message carrying an explicit status (confirmations)
    pub fn encode_with_status(
        &self,
        msg_type: MessageType,
        username: &str,
        amount: i32,
        description: &str,
        status: Status,
    ) -> [u8; MESSAGE_SIZE] {
        self.seal(ShowcaseMessage::new(msg_type, username, amount, description).with_status(status))
            .to_bytes()
    }

    /// Stamp and checksum an already-built message
    pub fn seal(&self, message: ShowcaseMessage) -> ShowcaseMessage {
        let mut message = message.with_timestamp(self.clock.now_millis());
        message.seal();
        message
    }
}

/// Parse a packet without checking its integrity
///
/// Anything that is not exactly `MESSAGE_SIZE` bytes is rejected outright.
pub fn decode(bytes: &[u8]) -> Result<ShowcaseMessage, CodecError> {
    let packet: &[u8; MESSAGE_SIZE] = bytes
        .try_into()
        .map_err(|_| CodecError::InvalidLength(bytes.len()))?;
    Ok(ShowcaseMessage::from_bytes(packet))
}

/// Check the carried checksum against a fresh computation
pub fn verify(message: &ShowcaseMessage) -> bool {
    message.compute_checksum() == message.checksum
}

/// Parse and verify; the only entry point the receive path uses
pub fn decode_verified(bytes: &[u8]) -> Result<ShowcaseMessage, CodecError> {
    let message = decode(bytes)?;
    let computed = message.compute_checksum();
    if computed != message.checksum {
        return Err(CodecError::ChecksumMismatch {
            computed,
            carried: message.checksum,
        });
    }
    Ok(message)
}

/// Lowercase hex dump, no separators
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Parse a hex dump; whitespace and `:` separators are ignored
pub fn from_hex(text: &str) -> Result<Vec<u8>, CodecError> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();

    if digits.len() % 2 != 0 {
        return Err(CodecError::InvalidHex("odd number of digits".to_string()));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair)
                .map_err(|_| CodecError::InvalidHex("non-ASCII input".to_string()))?;
            u8::from_str_radix(pair, 16).map_err(|_| CodecError::InvalidHex(pair.to_string()))
        })
        .collect()
}
