//! Per-station UI state

use serde::{Deserialize, Serialize};

/// Most recent notable thing that happened, for the renderer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StationEvent {
    #[default]
    Idle,
    IdentityReceived,
    Verifying,
    Authenticated,
    Earned { amount: i32 },
    OrderPlaced { item: String, amount: i32 },
    /// No confirmation arrived in time; the menu accepts orders again
    OrderExpired { item: String, amount: i32 },
    SpendApproved { item: String, amount: i32 },
    SpendRejected { item: String, amount: i32 },
    ErrorReported { label: String },
}

/// Flat record of what one station currently shows
///
/// Stations do not agree with each other by construction: after a reset or a
/// lost broadcast two stations can briefly show different visitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationState {
    /// Current visitor; empty means guest
    pub username: String,
    pub balance: i32,
    pub authenticated: bool,
    pub auth_in_progress: bool,
    pub last_event: StationEvent,
}

impl StationState {
    /// Guest identity, zero balance, not authenticated
    pub fn initial() -> Self {
        Self {
            username: String::new(),
            balance: 0,
            authenticated: false,
            auth_in_progress: false,
            last_event: StationEvent::Idle,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.username.is_empty()
    }

    /// Name to put on screen
    pub fn display_name(&self) -> &str {
        if self.is_guest() {
            "Guest"
        } else {
            &self.username
        }
    }

    /// Forget the previous visitor and adopt a new one
    pub(crate) fn adopt_identity(&mut self, username: String) {
        self.username = username;
        self.balance = 0;
        self.authenticated = false;
        self.auth_in_progress = false;
        self.last_event = StationEvent::IdentityReceived;
    }

    /// Give up on an unconfirmed order; false if nothing was pending
    pub(crate) fn expire_order(&mut self) -> bool {
        match std::mem::take(&mut self.last_event) {
            StationEvent::OrderPlaced { item, amount } => {
                self.last_event = StationEvent::OrderExpired { item, amount };
                true
            }
            other => {
                self.last_event = other;
                false
            }
        }
    }

    /// Apply a signed delta without ever dropping below zero
    pub(crate) fn credit(&mut self, amount: i32) {
        self.balance = self.balance.saturating_add(amount).max(0);
    }
}

impl Default for StationState {
    fn default() -> Self {
        Self::initial()
    }
}
