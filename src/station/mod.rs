//! Station module - per-station state and how messages move it
//!
//! Each physical device in the exhibit plays one `StationRole`. The role decides
//! which messages a station reacts to and which it produces; `dispatch` is the
//! only way inbound messages change a `StationState`.

mod dispatch;
mod replay;
mod runner;
mod state;
mod trigger;

pub use dispatch::*;
pub use replay::*;
pub use runner::*;
pub use state::*;
pub use trigger::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The part a device plays in the visitor journey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StationRole {
    /// Station 1: hands out identities
    Identity,
    /// Wearable carried by the visitor; owns the balance
    Wallet,
    /// Station 2 screen showing authentication progress
    AuthMonitor,
    /// Station 2 proximity sensor that starts authentication
    AuthSensor,
    /// Station 2 speaker that confirms authentication
    AuthSpeaker,
    /// Station 3: earn coins
    Earn,
    /// Station 4 touch menu
    Menu,
    /// Station 4 terminal that settles orders
    PaymentTerminal,
    /// Reset button
    Reset,
}

impl StationRole {
    pub const ALL: [StationRole; 9] = [
        StationRole::Identity,
        StationRole::Wallet,
        StationRole::AuthMonitor,
        StationRole::AuthSensor,
        StationRole::AuthSpeaker,
        StationRole::Earn,
        StationRole::Menu,
        StationRole::PaymentTerminal,
        StationRole::Reset,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StationRole::Identity => "identity",
            StationRole::Wallet => "wallet",
            StationRole::AuthMonitor => "auth-monitor",
            StationRole::AuthSensor => "auth-sensor",
            StationRole::AuthSpeaker => "auth-speaker",
            StationRole::Earn => "earn",
            StationRole::Menu => "menu",
            StationRole::PaymentTerminal => "payment-terminal",
            StationRole::Reset => "reset",
        }
    }

    /// Label carried in the description field of heartbeats (fits in 15 bytes)
    pub fn label(&self) -> &'static str {
        match self {
            StationRole::PaymentTerminal => "terminal",
            other => other.name(),
        }
    }
}

impl fmt::Display for StationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        StationRole::ALL
            .iter()
            .copied()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| format!("unknown station role: {}", s))
    }
}
