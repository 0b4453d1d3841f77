//! Message dispatch: the pure state transition run for every verified message

use super::{StationEvent, StationRole, StationState};
use crate::protocol::{error_labels, MessageType, ShowcaseMessage, Status};

/// A message the station wants broadcast after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Unsealed message; timestamp and checksum are stamped at send time
    pub message: ShowcaseMessage,
    /// How many times to send it back to back
    pub repeats: u32,
}

impl Outbound {
    pub fn once(message: ShowcaseMessage) -> Self {
        Self { message, repeats: 1 }
    }

    pub fn repeated(message: ShowcaseMessage, repeats: u32) -> Self {
        Self {
            message,
            repeats: repeats.max(1),
        }
    }
}

/// Result of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub state: StationState,
    pub outbound: Vec<Outbound>,
}

impl Dispatch {
    fn quiet(state: StationState) -> Self {
        Self {
            state,
            outbound: Vec::new(),
        }
    }

    fn with(state: StationState, outbound: Outbound) -> Self {
        Self {
            state,
            outbound: vec![outbound],
        }
    }
}

/// Apply one verified message to a station's state
///
/// `ResetAll` restores the initial state on every role. Balance changes are
/// applied once per delivery; duplicates are filtered upstream by `ReplayGuard`.
pub fn dispatch(role: StationRole, message: &ShowcaseMessage, state: StationState) -> Dispatch {
    match message.msg_type {
        MessageType::ResetAll => Dispatch::quiet(StationState::initial()),
        MessageType::Heartbeat | MessageType::Unknown(_) => Dispatch::quiet(state),
        _ => match role {
            StationRole::Wallet => wallet(message, state),
            StationRole::AuthMonitor => auth_monitor(message, state),
            StationRole::AuthSensor => auth_sensor(message, state),
            StationRole::AuthSpeaker => auth_speaker(message, state),
            StationRole::Earn => earn(message, state),
            StationRole::Menu => menu(message, state),
            StationRole::PaymentTerminal => payment_terminal(message, state),
            StationRole::Identity | StationRole::Reset => Dispatch::quiet(state),
        },
    }
}

/// Adopt the identity carried by an `IdentityAssign`; empty names are ignored
fn take_identity(message: &ShowcaseMessage, state: &mut StationState) -> bool {
    if message.username.is_empty() {
        return false;
    }
    state.adopt_identity(message.username.as_str().into_owned());
    true
}

/// Replace a mirrored balance with the wallet's figure, unless it belongs to
/// someone else
fn mirror_balance(message: &ShowcaseMessage, state: &mut StationState) {
    let owner = message.username.as_str();
    if !owner.is_empty() && !state.is_guest() && owner != state.username {
        return;
    }
    state.balance = message.amount.max(0);
}

fn balance_update(state: &StationState) -> Outbound {
    Outbound::once(ShowcaseMessage::new(
        MessageType::BalanceUpdate,
        &state.username,
        state.balance,
        "",
    ))
}

fn wallet(message: &ShowcaseMessage, mut state: StationState) -> Dispatch {
    match message.msg_type {
        MessageType::IdentityAssign => {
            if take_identity(message, &mut state) {
                let update = balance_update(&state);
                return Dispatch::with(state, update);
            }
            Dispatch::quiet(state)
        }
        MessageType::AuthRequest => {
            state.auth_in_progress = true;
            state.last_event = StationEvent::Verifying;
            Dispatch::quiet(state)
        }
        MessageType::AuthSuccess => {
            state.auth_in_progress = false;
            state.authenticated = true;
            state.last_event = StationEvent::Authenticated;
            Dispatch::quiet(state)
        }
        MessageType::EarnCoin => {
            state.credit(message.amount);
            state.last_event = StationEvent::Earned {
                amount: message.amount,
            };
            let update = balance_update(&state);
            Dispatch::with(state, update)
        }
        MessageType::SpendConfirm => wallet_settle(message, state),
        _ => Dispatch::quiet(state),
    }
}

/// The wallet re-validates every confirmed spend against its own balance
fn wallet_settle(message: &ShowcaseMessage, mut state: StationState) -> Dispatch {
    let item = message.description.as_str().into_owned();
    let amount = message.amount;

    match message.status {
        Status::Success if amount >= 0 && state.balance >= amount => {
            state.balance -= amount;
            state.last_event = StationEvent::SpendApproved { item, amount };
            let update = balance_update(&state);
            Dispatch::with(state, update)
        }
        Status::Success => {
            state.last_event = StationEvent::SpendRejected { item, amount };
            let error = ShowcaseMessage::new(
                MessageType::Error,
                &state.username,
                amount,
                error_labels::INSUFFICIENT_FUNDS,
            )
            .with_status(Status::Error);
            // The terminal already deducted its mirror; resend the real figure
            let update = balance_update(&state);
            Dispatch {
                state,
                outbound: vec![Outbound::once(error), update],
            }
        }
        Status::Error => {
            state.last_event = StationEvent::SpendRejected { item, amount };
            Dispatch::quiet(state)
        }
        Status::Pending | Status::Unknown(_) => Dispatch::quiet(state),
    }
}

fn auth_monitor(message: &ShowcaseMessage, mut state: StationState) -> Dispatch {
    match message.msg_type {
        MessageType::IdentityAssign => {
            take_identity(message, &mut state);
        }
        MessageType::AuthRequest => {
            state.auth_in_progress = true;
            state.last_event = StationEvent::Verifying;
        }
        MessageType::AuthSuccess => {
            state.auth_in_progress = false;
            state.authenticated = true;
            state.last_event = StationEvent::Authenticated;
        }
        _ => {}
    }
    Dispatch::quiet(state)
}

fn auth_sensor(message: &ShowcaseMessage, mut state: StationState) -> Dispatch {
    if message.msg_type == MessageType::AuthSuccess {
        state.auth_in_progress = false;
        state.authenticated = true;
        state.last_event = StationEvent::Authenticated;
    }
    Dispatch::quiet(state)
}

/// The speaker answers every request with a confirmation
fn auth_speaker(message: &ShowcaseMessage, mut state: StationState) -> Dispatch {
    if message.msg_type != MessageType::AuthRequest {
        return Dispatch::quiet(state);
    }

    if !message.username.is_empty() {
        state.username = message.username.as_str().into_owned();
    }
    state.auth_in_progress = false;
    state.authenticated = true;
    state.last_event = StationEvent::Authenticated;

    let confirm = ShowcaseMessage::new(MessageType::AuthSuccess, &state.username, 0, "")
        .with_status(Status::Success);
    Dispatch::with(state, Outbound::once(confirm))
}

fn earn(message: &ShowcaseMessage, mut state: StationState) -> Dispatch {
    match message.msg_type {
        MessageType::IdentityAssign => {
            take_identity(message, &mut state);
        }
        MessageType::BalanceUpdate => mirror_balance(message, &mut state),
        _ => {}
    }
    Dispatch::quiet(state)
}

fn menu(message: &ShowcaseMessage, mut state: StationState) -> Dispatch {
    match message.msg_type {
        MessageType::IdentityAssign => {
            take_identity(message, &mut state);
        }
        MessageType::EarnCoin => state.credit(message.amount),
        MessageType::BalanceUpdate => mirror_balance(message, &mut state),
        MessageType::SpendConfirm => {
            let item = message.description.as_str().into_owned();
            let amount = message.amount;
            match message.status {
                Status::Success => state.last_event = StationEvent::SpendApproved { item, amount },
                Status::Error => state.last_event = StationEvent::SpendRejected { item, amount },
                _ => {}
            }
        }
        MessageType::Error => {
            state.last_event = StationEvent::ErrorReported {
                label: message.description.as_str().into_owned(),
            };
        }
        _ => {}
    }
    Dispatch::quiet(state)
}

/// The terminal approves a spend only when its mirrored balance covers it
fn payment_terminal(message: &ShowcaseMessage, mut state: StationState) -> Dispatch {
    match message.msg_type {
        MessageType::IdentityAssign => {
            take_identity(message, &mut state);
            Dispatch::quiet(state)
        }
        MessageType::EarnCoin => {
            state.credit(message.amount);
            Dispatch::quiet(state)
        }
        MessageType::BalanceUpdate => {
            mirror_balance(message, &mut state);
            Dispatch::quiet(state)
        }
        MessageType::SpendRequest => {
            let item = message.description.as_str().into_owned();
            let amount = message.amount;
            let approved = amount > 0 && state.balance >= amount;

            let status = if approved {
                state.balance -= amount;
                state.last_event = StationEvent::SpendApproved {
                    item: item.clone(),
                    amount,
                };
                Status::Success
            } else {
                state.last_event = StationEvent::SpendRejected {
                    item: item.clone(),
                    amount,
                };
                Status::Error
            };

            let confirm = ShowcaseMessage::new(
                MessageType::SpendConfirm,
                message.username.as_str().as_ref(),
                amount,
                &item,
            )
            .with_status(status);
            Dispatch::with(state, Outbound::once(confirm))
        }
        _ => Dispatch::quiet(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_verified, Encoder, FixedClock};

    fn received(msg_type: MessageType, username: &str, amount: i32, desc: &str) -> ShowcaseMessage {
        received_with(msg_type, username, amount, desc, Status::Pending)
    }

    /// Run the message through the real codec so tests see what a receiver sees
    fn received_with(
        msg_type: MessageType,
        username: &str,
        amount: i32,
        desc: &str,
        status: Status,
    ) -> ShowcaseMessage {
        let bytes = Encoder::with_clock(FixedClock(42))
            .encode_with_status(msg_type, username, amount, desc, status);
        decode_verified(&bytes).unwrap()
    }

    fn with_balance(username: &str, balance: i32) -> StationState {
        StationState {
            username: username.to_string(),
            balance,
            ..StationState::initial()
        }
    }

    #[test]
    fn test_reset_restores_initial_state_on_every_role() {
        let busy = StationState {
            username: "Mallory".to_string(),
            balance: 999,
            authenticated: true,
            auth_in_progress: true,
            last_event: StationEvent::OrderPlaced {
                item: "Cake".to_string(),
                amount: 3,
            },
        };
        let reset = received(MessageType::ResetAll, "", 0, "");

        for role in StationRole::ALL {
            let out = dispatch(role, &reset, busy.clone());
            assert_eq!(out.state, StationState::initial(), "role {}", role);
            assert!(out.outbound.is_empty());

            let again = dispatch(role, &reset, out.state);
            assert_eq!(again.state, StationState::initial());
        }
    }

    #[test]
    fn test_identity_assign_on_fresh_wallet() {
        let msg = received(MessageType::IdentityAssign, "Alice", 0, "");
        let out = dispatch(StationRole::Wallet, &msg, StationState::initial());

        assert_eq!(out.state.username, "Alice");
        assert_eq!(out.state.balance, 0);
        assert!(!out.state.authenticated);
        assert_eq!(out.outbound.len(), 1);
        assert_eq!(out.outbound[0].message.msg_type, MessageType::BalanceUpdate);
    }

    #[test]
    fn test_identity_assign_replaces_previous_visitor() {
        let mut state = with_balance("Bob", 70);
        state.authenticated = true;
        let msg = received(MessageType::IdentityAssign, "Alice", 0, "");

        for role in [StationRole::Wallet, StationRole::Menu, StationRole::AuthMonitor] {
            let out = dispatch(role, &msg, state.clone());
            assert_eq!(out.state.username, "Alice");
            assert_eq!(out.state.balance, 0);
            assert!(!out.state.authenticated);
        }
    }

    #[test]
    fn test_empty_identity_is_ignored() {
        let state = with_balance("Bob", 70);
        let msg = received(MessageType::IdentityAssign, "", 0, "");
        let out = dispatch(StationRole::Wallet, &msg, state.clone());
        assert_eq!(out.state, state);
        assert!(out.outbound.is_empty());
    }

    #[test]
    fn test_earn_coin_adds_to_balance() {
        let msg = received(MessageType::EarnCoin, "Alice", 50, "Quiz");
        let out = dispatch(StationRole::Wallet, &msg, with_balance("Alice", 100));

        assert_eq!(out.state.balance, 150);
        assert_eq!(out.state.last_event, StationEvent::Earned { amount: 50 });
        assert_eq!(out.outbound[0].message.amount, 150);
    }

    #[test]
    fn test_negative_earn_never_goes_below_zero() {
        let msg = received(MessageType::EarnCoin, "Alice", -80, "Penalty");
        let out = dispatch(StationRole::Wallet, &msg, with_balance("Alice", 30));
        assert_eq!(out.state.balance, 0);
    }

    #[test]
    fn test_wallet_rejects_overdraft() {
        let msg = received_with(MessageType::SpendConfirm, "Alice", 30, "Latte", Status::Success);
        // The codec side is unaffected by the business outcome
        assert_eq!(msg.status, Status::Success);

        let out = dispatch(StationRole::Wallet, &msg, with_balance("Alice", 20));
        assert_eq!(out.state.balance, 20);
        assert_eq!(
            out.state.last_event,
            StationEvent::SpendRejected {
                item: "Latte".to_string(),
                amount: 30
            }
        );
        let error = &out.outbound[0].message;
        assert_eq!(error.msg_type, MessageType::Error);
        assert_eq!(error.description.as_str(), error_labels::INSUFFICIENT_FUNDS);
        let update = &out.outbound[1].message;
        assert_eq!(update.msg_type, MessageType::BalanceUpdate);
        assert_eq!(update.amount, 20);
    }

    #[test]
    fn test_terminal_mirror_resyncs_after_wallet_rejection() {
        // The terminal approved against a stale mirror of 50
        let order = received(MessageType::SpendRequest, "Alice", 30, "Latte");
        let terminal = dispatch(StationRole::PaymentTerminal, &order, with_balance("Alice", 50));
        assert_eq!(terminal.state.balance, 20);
        let confirm = &terminal.outbound[0].message;
        assert_eq!(confirm.status, Status::Success);

        // The wallet only holds 10, rejects and republishes its balance
        let confirm = received_with(MessageType::SpendConfirm, "Alice", 30, "Latte", Status::Success);
        let wallet = dispatch(StationRole::Wallet, &confirm, with_balance("Alice", 10));
        let update = wallet
            .outbound
            .iter()
            .find(|o| o.message.msg_type == MessageType::BalanceUpdate)
            .unwrap();

        let resync = decode_verified(&Encoder::with_clock(FixedClock(43)).seal(update.message.clone()).to_bytes())
            .unwrap();
        let terminal = dispatch(StationRole::PaymentTerminal, &resync, terminal.state);
        assert_eq!(terminal.state.balance, 10);
    }

    #[test]
    fn test_wallet_applies_confirmed_spend() {
        let msg = received_with(MessageType::SpendConfirm, "Alice", 30, "Latte", Status::Success);
        let out = dispatch(StationRole::Wallet, &msg, with_balance("Alice", 100));
        assert_eq!(out.state.balance, 70);
        assert_eq!(out.outbound[0].message.msg_type, MessageType::BalanceUpdate);
        assert_eq!(out.outbound[0].message.amount, 70);
    }

    #[test]
    fn test_wallet_ignores_failed_and_pending_confirms() {
        let failed = received_with(MessageType::SpendConfirm, "Alice", 30, "Latte", Status::Error);
        let out = dispatch(StationRole::Wallet, &failed, with_balance("Alice", 100));
        assert_eq!(out.state.balance, 100);
        assert!(out.outbound.is_empty());

        let pending = received(MessageType::SpendConfirm, "Alice", 30, "Latte");
        let out = dispatch(StationRole::Wallet, &pending, with_balance("Alice", 100));
        assert_eq!(out.state, with_balance("Alice", 100));
    }

    #[test]
    fn test_wallet_auth_flow() {
        let request = received(MessageType::AuthRequest, "Alice", 0, "");
        let out = dispatch(StationRole::Wallet, &request, with_balance("Alice", 0));
        assert!(out.state.auth_in_progress);

        let success = received(MessageType::AuthSuccess, "Alice", 0, "");
        let out = dispatch(StationRole::Wallet, &success, out.state);
        assert!(out.state.authenticated);
        assert!(!out.state.auth_in_progress);
    }

    #[test]
    fn test_speaker_confirms_auth_request() {
        let request = received(MessageType::AuthRequest, "Alice", 0, "");
        let out = dispatch(StationRole::AuthSpeaker, &request, StationState::initial());

        assert!(out.state.authenticated);
        assert_eq!(out.outbound.len(), 1);
        let confirm = &out.outbound[0].message;
        assert_eq!(confirm.msg_type, MessageType::AuthSuccess);
        assert_eq!(confirm.username.as_str(), "Alice");
    }

    #[test]
    fn test_terminal_settles_requests() {
        let order = received(MessageType::SpendRequest, "Alice", 30, "Latte");

        let out = dispatch(StationRole::PaymentTerminal, &order, with_balance("Alice", 100));
        assert_eq!(out.state.balance, 70);
        let confirm = &out.outbound[0].message;
        assert_eq!(confirm.msg_type, MessageType::SpendConfirm);
        assert_eq!(confirm.status, Status::Success);
        assert_eq!(confirm.description.as_str(), "Latte");

        let out = dispatch(StationRole::PaymentTerminal, &order, with_balance("Alice", 20));
        assert_eq!(out.state.balance, 20);
        assert_eq!(out.outbound[0].message.status, Status::Error);
    }

    #[test]
    fn test_terminal_rejects_non_positive_amounts() {
        let order = received(MessageType::SpendRequest, "Alice", -5, "Refund");
        let out = dispatch(StationRole::PaymentTerminal, &order, with_balance("Alice", 100));
        assert_eq!(out.state.balance, 100);
        assert_eq!(out.outbound[0].message.status, Status::Error);
    }

    #[test]
    fn test_balance_mirror_ignores_other_visitors() {
        let update = received(MessageType::BalanceUpdate, "Bob", 500, "");
        let out = dispatch(StationRole::Earn, &update, with_balance("Alice", 10));
        assert_eq!(out.state.balance, 10);

        let update = received(MessageType::BalanceUpdate, "Alice", 40, "");
        let out = dispatch(StationRole::Menu, &update, with_balance("Alice", 10));
        assert_eq!(out.state.balance, 40);
    }

    #[test]
    fn test_heartbeat_and_unknown_change_nothing() {
        let state = with_balance("Alice", 10);
        let heartbeat = received(MessageType::Heartbeat, "", 0, "wallet");
        let unknown = received(MessageType::Unknown(77), "Zed", 5, "");

        for role in StationRole::ALL {
            assert_eq!(dispatch(role, &heartbeat, state.clone()).state, state);
            assert_eq!(dispatch(role, &unknown, state.clone()).state, state);
        }
    }

    #[test]
    fn test_roles_ignore_their_own_broadcasts() {
        let own = [
            (StationRole::Identity, MessageType::IdentityAssign),
            (StationRole::Wallet, MessageType::BalanceUpdate),
            (StationRole::Wallet, MessageType::Error),
            (StationRole::AuthSensor, MessageType::AuthRequest),
            (StationRole::AuthSpeaker, MessageType::AuthSuccess),
            (StationRole::Earn, MessageType::EarnCoin),
            (StationRole::Menu, MessageType::SpendRequest),
            (StationRole::PaymentTerminal, MessageType::SpendConfirm),
        ];
        let state = with_balance("Alice", 10);

        for (role, msg_type) in own {
            let echo = received(msg_type, "Alice", 10, "");
            let out = dispatch(role, &echo, state.clone());
            assert!(out.outbound.is_empty(), "{} answered its own {}", role, msg_type);
        }
    }
}
