//! Protocol message definitions
//!
//! Typed view of the 64-byte `ShowcaseMessage` exchanged between stations.

use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Capacity of the username field, terminator included
pub const USERNAME_CAPACITY: usize = 32;

/// Capacity of the description field, terminator included
pub const DESCRIPTION_CAPACITY: usize = 16;

/// Message type tag (first byte of every packet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageType {
    /// Station 1 hands a fresh identity to the wearable
    IdentityAssign,
    /// Station 2 sensor asks for authentication
    AuthRequest,
    /// Station 2 confirms authentication
    AuthSuccess,
    /// Station 3 credits coins
    EarnCoin,
    /// Station 4 menu orders an item
    SpendRequest,
    /// Station 4 terminal settles an order
    SpendConfirm,
    /// Reset button: every station back to its initial state
    ResetAll,
    /// Keep-alive
    Heartbeat,
    /// Wallet broadcasts its balance
    BalanceUpdate,
    /// Error report
    Error,
    /// Any code this build does not know about
    Unknown(u8),
}

impl MessageType {
    /// Every known type, in wire-code order
    pub const KNOWN: [MessageType; 10] = [
        MessageType::IdentityAssign,
        MessageType::AuthRequest,
        MessageType::AuthSuccess,
        MessageType::EarnCoin,
        MessageType::SpendRequest,
        MessageType::SpendConfirm,
        MessageType::ResetAll,
        MessageType::Heartbeat,
        MessageType::BalanceUpdate,
        MessageType::Error,
    ];

    /// Get the wire code
    pub fn code(&self) -> u8 {
        match self {
            MessageType::IdentityAssign => 1,
            MessageType::AuthRequest => 2,
            MessageType::AuthSuccess => 3,
            MessageType::EarnCoin => 4,
            MessageType::SpendRequest => 5,
            MessageType::SpendConfirm => 6,
            MessageType::ResetAll => 99,
            MessageType::Heartbeat => 100,
            MessageType::BalanceUpdate => 101,
            MessageType::Error => 200,
            MessageType::Unknown(code) => *code,
        }
    }

    /// Map a wire code to a type; unrecognised codes are kept as `Unknown`
    pub fn from_code(code: u8) -> Self {
        Self::KNOWN
            .iter()
            .copied()
            .find(|t| t.code() == code)
            .unwrap_or(MessageType::Unknown(code))
    }

    /// Kebab-case name used on the command line and in logs
    pub fn name(&self) -> Cow<'static, str> {
        let name = match self {
            MessageType::IdentityAssign => "identity-assign",
            MessageType::AuthRequest => "auth-request",
            MessageType::AuthSuccess => "auth-success",
            MessageType::EarnCoin => "earn-coin",
            MessageType::SpendRequest => "spend-request",
            MessageType::SpendConfirm => "spend-confirm",
            MessageType::ResetAll => "reset-all",
            MessageType::Heartbeat => "heartbeat",
            MessageType::BalanceUpdate => "balance-update",
            MessageType::Error => "error",
            MessageType::Unknown(code) => return Cow::Owned(format!("unknown-{}", code)),
        };
        Cow::Borrowed(name)
    }

    /// Check if applying this message can change a balance
    pub fn is_balance_affecting(&self) -> bool {
        matches!(self, MessageType::EarnCoin | MessageType::SpendConfirm)
    }
}

impl From<u8> for MessageType {
    fn from(code: u8) -> Self {
        MessageType::from_code(code)
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> Self {
        t.code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for MessageType {
    type Err = String;

    /// Accepts the kebab-case name or the numeric wire code
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u8>() {
            return Ok(MessageType::from_code(code));
        }
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        MessageType::KNOWN
            .iter()
            .copied()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| format!("unknown message type: {}", s))
    }
}

/// Status byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    #[default]
    Pending,
    Success,
    Error,
    Unknown(u8),
}

impl Status {
    pub fn code(&self) -> u8 {
        match self {
            Status::Pending => 0,
            Status::Success => 1,
            Status::Error => 2,
            Status::Unknown(code) => *code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Status::Pending,
            1 => Status::Success,
            2 => Status::Error,
            other => Status::Unknown(other),
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "success" => Ok(Status::Success),
            "error" => Ok(Status::Error),
            other => other
                .parse::<u8>()
                .map(Status::from_code)
                .map_err(|_| format!("unknown status: {}", s)),
        }
    }
}

/// Fixed-capacity, NUL-terminated text field
///
/// At most `N - 1` bytes of text are stored so the last byte is always a
/// terminator for packets this crate produces. Bytes read off the wire are kept
/// verbatim, including anything after the first NUL.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    /// Build from text, silently truncating on a character boundary
    pub fn new(text: &str) -> Self {
        let mut end = text.len().min(N.saturating_sub(1));
        while !text.is_char_boundary(end) {
            end -= 1;
        }

        let mut bytes = [0u8; N];
        bytes[..end].copy_from_slice(&text.as_bytes()[..end]);
        Self { bytes }
    }

    /// Wrap raw wire bytes
    pub fn from_raw(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    /// Text up to the first NUL (or the whole field if unterminated)
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes[..self.text_len()])
    }

    /// Length of the text in bytes
    pub fn text_len(&self) -> usize {
        self.bytes.iter().position(|&b| b == 0).unwrap_or(N)
    }

    pub fn is_empty(&self) -> bool {
        self.text_len() == 0
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self { bytes: [0u8; N] }
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl<const N: usize> Serialize for FixedStr<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

/// The broadcast message
///
/// Exists for one hop only: built right before a send, parsed on receipt,
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShowcaseMessage {
    pub msg_type: MessageType,
    pub username: FixedStr<USERNAME_CAPACITY>,
    /// Coin delta
    pub amount: i32,
    /// Menu item or activity label
    pub description: FixedStr<DESCRIPTION_CAPACITY>,
    pub status: Status,
    pub checksum: u16,
    /// Producer's monotonic clock in milliseconds
    pub timestamp: u32,
    #[serde(skip)]
    pub padding: [u8; 4],
}

impl ShowcaseMessage {
    /// Create an unsealed message: pending status, zero timestamp and checksum
    pub fn new(msg_type: MessageType, username: &str, amount: i32, description: &str) -> Self {
        Self {
            msg_type,
            username: FixedStr::new(username),
            amount,
            description: FixedStr::new(description),
            status: Status::Pending,
            checksum: 0,
            timestamp: 0,
            padding: [0u8; 4],
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Short one-line summary for logs
    pub fn summary(&self) -> String {
        let mut out = format!("{}", self.msg_type);
        if !self.username.is_empty() {
            out.push_str(&format!(" user={}", self.username));
        }
        if self.amount != 0 {
            out.push_str(&format!(" amount={}", self.amount));
        }
        if !self.description.is_empty() {
            out.push_str(&format!(" desc={}", self.description));
        }
        if self.status != Status::Pending {
            out.push_str(&format!(" status={:?}", self.status));
        }
        out
    }
}

/// Fixed descriptions carried in `Error` messages
pub mod error_labels {
    pub const INSUFFICIENT_FUNDS: &str = "insufficient";
}
