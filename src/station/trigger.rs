//! Local input on a station (button press, touch, form submit) that produces a broadcast

use std::str::FromStr;
use thiserror::Error;

use super::{Dispatch, Outbound, StationEvent, StationRole, StationState};
use crate::protocol::{MessageType, ShowcaseMessage};

/// Trigger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("{trigger} is not available on the {role} station")]
    NotSupported { role: StationRole, trigger: &'static str },

    #[error("Username must not be empty")]
    EmptyUsername,

    #[error("No visitor identity on this station")]
    NoIdentity,

    #[error("Invalid amount: {0}")]
    InvalidAmount(i32),

    #[error("Another request is still in progress")]
    InProgress,

    #[error("Cannot parse trigger: {0}")]
    Parse(String),

    #[error("Station is not running")]
    Stopped,
}

/// Something a visitor or operator did at a station
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Name entered on the identity portal
    AssignIdentity { username: String },
    /// Visitor stepped up to the sensor
    Authenticate,
    /// Activity completed at the earn station
    Earn { amount: i32, activity: String },
    /// Menu item picked on the spend station
    Order { item: String, amount: i32 },
    /// Reset button held down
    ResetAll,
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::AssignIdentity { .. } => "assign",
            Trigger::Authenticate => "auth",
            Trigger::Earn { .. } => "earn",
            Trigger::Order { .. } => "order",
            Trigger::ResetAll => "reset",
        }
    }
}

impl FromStr for Trigger {
    type Err = TriggerError;

    /// `assign <name>`, `auth`, `earn <amount> [activity]`, `order <amount> <item>`, `reset`
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let parse_amount = |text: &str| {
            text.parse::<i32>()
                .map_err(|_| TriggerError::Parse(format!("bad amount '{}'", text)))
        };

        match verb.to_ascii_lowercase().as_str() {
            "assign" => Ok(Trigger::AssignIdentity {
                username: rest.to_string(),
            }),
            "auth" => Ok(Trigger::Authenticate),
            "earn" => {
                let (amount, activity) = rest.split_once(' ').unwrap_or((rest, ""));
                Ok(Trigger::Earn {
                    amount: parse_amount(amount)?,
                    activity: activity.trim().to_string(),
                })
            }
            "order" => {
                let (amount, item) = rest
                    .split_once(' ')
                    .ok_or_else(|| TriggerError::Parse("usage: order <amount> <item>".to_string()))?;
                Ok(Trigger::Order {
                    item: item.trim().to_string(),
                    amount: parse_amount(amount)?,
                })
            }
            "reset" => Ok(Trigger::ResetAll),
            _ => Err(TriggerError::Parse(line.to_string())),
        }
    }
}

/// Turn a local trigger into a state change plus the broadcast it causes
pub fn request(
    role: StationRole,
    trigger: Trigger,
    mut state: StationState,
    reset_repeats: u32,
) -> Result<Dispatch, TriggerError> {
    let not_supported = TriggerError::NotSupported {
        role,
        trigger: trigger.name(),
    };

    let outbound = match (role, trigger) {
        (StationRole::Identity, Trigger::AssignIdentity { username }) => {
            let username = username.trim().to_string();
            if username.is_empty() {
                return Err(TriggerError::EmptyUsername);
            }
            state.adopt_identity(username);
            Outbound::once(ShowcaseMessage::new(
                MessageType::IdentityAssign,
                &state.username,
                0,
                "",
            ))
        }
        (StationRole::AuthSensor, Trigger::Authenticate) => {
            if state.auth_in_progress {
                return Err(TriggerError::InProgress);
            }
            state.auth_in_progress = true;
            state.authenticated = false;
            state.last_event = StationEvent::Verifying;
            Outbound::once(ShowcaseMessage::new(
                MessageType::AuthRequest,
                &state.username,
                0,
                "",
            ))
        }
        (StationRole::Earn, Trigger::Earn { amount, activity }) => {
            if state.is_guest() {
                return Err(TriggerError::NoIdentity);
            }
            if amount == 0 {
                return Err(TriggerError::InvalidAmount(amount));
            }
            state.credit(amount);
            state.last_event = StationEvent::Earned { amount };
            Outbound::once(ShowcaseMessage::new(
                MessageType::EarnCoin,
                &state.username,
                amount,
                &activity,
            ))
        }
        (StationRole::Menu, Trigger::Order { item, amount }) => {
            if state.is_guest() {
                return Err(TriggerError::NoIdentity);
            }
            if amount <= 0 {
                return Err(TriggerError::InvalidAmount(amount));
            }
            if matches!(state.last_event, StationEvent::OrderPlaced { .. }) {
                return Err(TriggerError::InProgress);
            }
            let message =
                ShowcaseMessage::new(MessageType::SpendRequest, &state.username, amount, &item);
            state.last_event = StationEvent::OrderPlaced { item, amount };
            Outbound::once(message)
        }
        (StationRole::Reset, Trigger::ResetAll) => {
            state = StationState::initial();
            Outbound::repeated(
                ShowcaseMessage::new(MessageType::ResetAll, "", 0, ""),
                reset_repeats,
            )
        }
        _ => return Err(not_supported),
    };

    Ok(Dispatch {
        state,
        outbound: vec![outbound],
    })
}
