//! Duplicate-delivery filter
//!
//! The transport may hand the same packet over more than once (the reset button
//! sends every reset three times). A message whose timestamp and checksum both
//! match the last one applied for its type is an exact re-delivery and is not
//! dispatched again. Producer clocks are independent, so there is no time window.

use std::collections::HashMap;

use crate::protocol::{MessageType, ShowcaseMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    timestamp: u32,
    checksum: u16,
}

/// Remembers the last applied message per type
#[derive(Debug, Default)]
pub struct ReplayGuard {
    last_applied: HashMap<MessageType, Fingerprint>,
    dropped: u64,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the message and report whether it should be dispatched
    pub fn admit(&mut self, message: &ShowcaseMessage) -> bool {
        let fingerprint = Fingerprint {
            timestamp: message.timestamp,
            checksum: message.checksum,
        };

        match self.last_applied.insert(message.msg_type, fingerprint) {
            Some(previous) if previous == fingerprint => {
                self.dropped += 1;
                false
            }
            _ => true,
        }
    }

    /// Number of duplicates filtered so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.last_applied.clear();
    }
}
