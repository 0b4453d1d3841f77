//! Protocol module - Defines the broadcast wire protocol shared by every station
//!
//! Every packet is a fixed 64-byte packed record, little-endian:
//! - 1 byte message type
//! - 32 bytes username (31 chars + NUL)
//! - 4 bytes amount (signed)
//! - 16 bytes description (15 chars + NUL)
//! - 1 byte status
//! - 2 bytes checksum
//! - 4 bytes producer timestamp (ms)
//! - 4 bytes padding

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Size of every packet on the wire
pub const MESSAGE_SIZE: usize = 64;

/// Number of leading bytes covered by the checksum
pub const CHECKSUM_SPAN: usize = MESSAGE_SIZE - 2;

/// Radio channel shared by all stations (fixed, never negotiated)
pub const BROADCAST_CHANNEL: u8 = 1;

/// Link-layer broadcast address
pub const BROADCAST_MAC: [u8; 6] = [0xFF; 6];

/// Default UDP port standing in for the link-layer broadcast on a host
pub const DEFAULT_PORT: u16 = 47264;
