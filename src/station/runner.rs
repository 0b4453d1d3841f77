//! Station main loop
//!
//! The loop owns the station state. Verified messages arrive from the receive
//! task through a queue, local triggers arrive from a `StationHandle`, and every
//! change is published as a `Snapshot` for whoever renders the station.

use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use super::{
    dispatch, request, Dispatch, Outbound, ReplayGuard, StationEvent, StationRole, StationState, Trigger,
    TriggerError,
};
use crate::config::Config;
use crate::network::{broadcast_repeated, spawn_receiver, ReceiverStats, Transport};
use crate::protocol::{Encoder, MessageType, ShowcaseMessage};

/// Tunables for one running station
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Name used in logs and snapshots
    pub name: String,
    /// Heartbeat period; `None` disables heartbeats
    pub heartbeat_interval: Option<Duration>,
    /// Silence after which the station flags itself stale
    pub stale_after: Duration,
    /// Filter exact re-deliveries before dispatch
    pub drop_duplicates: bool,
    /// How many times the reset button repeats its broadcast
    pub reset_repeats: u32,
    /// Gap between repeated sends
    pub repeat_gap: Duration,
    /// Depth of the receive queue
    pub queue_capacity: usize,
    /// How long a menu order may wait for its `SpendConfirm`
    pub order_timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            name: "station".to_string(),
            heartbeat_interval: Some(Duration::from_secs(5)),
            stale_after: Duration::from_secs(30),
            drop_duplicates: true,
            reset_repeats: 3,
            repeat_gap: Duration::from_millis(100),
            queue_capacity: 64,
            order_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for RunnerSettings {
    fn from(config: &Config) -> Self {
        let heartbeat_ms = config.network.heartbeat_interval_ms;
        Self {
            name: config.general.name.clone(),
            heartbeat_interval: (heartbeat_ms > 0).then(|| Duration::from_millis(heartbeat_ms)),
            stale_after: Duration::from_millis(config.station.stale_after_ms),
            drop_duplicates: config.station.drop_duplicates,
            reset_repeats: config.station.reset_repeats,
            repeat_gap: Duration::from_millis(config.station.repeat_gap_ms),
            queue_capacity: config.network.queue_capacity.max(1),
            order_timeout: Duration::from_millis(config.station.order_timeout_ms),
        }
    }
}

/// What the renderer gets after every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub role: StationRole,
    pub name: String,
    #[serde(flatten)]
    pub state: StationState,
    /// No valid message for longer than the stale threshold
    pub stale: bool,
    /// Verified messages received
    pub received: u64,
    /// Frames dropped for length, checksum, queue overflow or duplication
    pub dropped: u64,
}

enum Command {
    Trigger(Trigger, oneshot::Sender<Result<(), TriggerError>>),
    Shutdown,
}

/// Control side of a running station
#[derive(Clone)]
pub struct StationHandle {
    role: StationRole,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
}

impl StationHandle {
    pub fn role(&self) -> StationRole {
        self.role
    }

    /// Feed a local trigger to the station and wait for it to be handled
    pub async fn trigger(&self, trigger: Trigger) -> Result<(), TriggerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Trigger(trigger, reply_tx))
            .await
            .map_err(|_| TriggerError::Stopped)?;
        reply_rx.await.map_err(|_| TriggerError::Stopped)?
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Stream of snapshots
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Ask the loop to stop
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// One station: state, transport and the loop that ties them together
pub struct StationRunner {
    role: StationRole,
    settings: RunnerSettings,
    transport: Arc<dyn Transport>,
    encoder: Encoder,
    state: StationState,
    guard: ReplayGuard,
    stats: Arc<ReceiverStats>,
    stale: bool,
    order_deadline: Option<Instant>,
    commands: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl StationRunner {
    pub fn new(
        role: StationRole,
        transport: Arc<dyn Transport>,
        settings: RunnerSettings,
    ) -> (Self, StationHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let state = StationState::initial();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot {
            role,
            name: settings.name.clone(),
            state: state.clone(),
            stale: false,
            received: 0,
            dropped: 0,
        });

        let runner = Self {
            role,
            settings,
            transport,
            encoder: Encoder::new(),
            state,
            guard: ReplayGuard::new(),
            stats: Arc::new(ReceiverStats::default()),
            stale: false,
            order_deadline: None,
            commands: command_rx,
            snapshot_tx,
        };

        let handle = StationHandle {
            role,
            commands: command_tx,
            snapshots: snapshot_rx,
        };

        (runner, handle)
    }

    /// Run until shut down; returns the final state
    pub async fn run(mut self) -> StationState {
        let (queue_tx, mut queue_rx) = mpsc::channel(self.settings.queue_capacity);
        let receiver = spawn_receiver(self.transport.clone(), queue_tx, self.stats.clone());

        let mut heartbeat = self.settings.heartbeat_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let check_every = self.settings.stale_after.min(self.settings.order_timeout) / 4;
        let mut liveness = interval(check_every.max(Duration::from_millis(10)));
        let mut last_message = Instant::now();

        tracing::info!("Station '{}' running as {}", self.settings.name, self.role);

        loop {
            tokio::select! {
                Some(message) = queue_rx.recv() => {
                    last_message = Instant::now();
                    if self.stale {
                        tracing::info!("Traffic resumed");
                        self.stale = false;
                    }
                    self.on_message(message).await;
                    self.publish();
                }
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Trigger(trigger, reply)) => {
                            let result = self.on_trigger(trigger).await;
                            let _ = reply.send(result);
                            self.publish();
                        }
                        Some(Command::Shutdown) | None => break,
                    }
                }
                _ = tick(&mut heartbeat) => {
                    self.send_heartbeat().await;
                }
                _ = liveness.tick() => {
                    if !self.stale && last_message.elapsed() >= self.settings.stale_after {
                        tracing::warn!(
                            "No messages for {:?}, showing last known state",
                            self.settings.stale_after
                        );
                        self.stale = true;
                        self.publish();
                    }
                    if self.expire_order() {
                        self.publish();
                    }
                }
            }
        }

        receiver.abort();
        tracing::info!("Station '{}' stopped", self.settings.name);
        self.state
    }

    async fn on_message(&mut self, message: ShowcaseMessage) {
        if self.settings.drop_duplicates && !self.guard.admit(&message) {
            tracing::debug!("Duplicate {} ignored", message.msg_type);
            return;
        }

        if message.msg_type == MessageType::Heartbeat {
            tracing::debug!("Heartbeat from {}", message.description);
        } else {
            tracing::info!("Received {}", message.summary());
        }

        let previous = std::mem::take(&mut self.state);
        let Dispatch { state, outbound } = dispatch(self.role, &message, previous.clone());
        if state != previous {
            log_transition(&previous, &state);
        }
        if message.msg_type.is_balance_affecting() && state.balance == previous.balance {
            tracing::debug!("{} left the balance at {}", message.msg_type, state.balance);
        }
        self.state = state;
        self.send_all(outbound).await;
    }

    async fn on_trigger(&mut self, trigger: Trigger) -> Result<(), TriggerError> {
        let name = trigger.name();
        let Dispatch { state, outbound } =
            request(self.role, trigger, self.state.clone(), self.settings.reset_repeats).map_err(|e| {
                tracing::warn!("Trigger '{}' rejected: {}", name, e);
                e
            })?;

        log_transition(&self.state, &state);
        if matches!(state.last_event, StationEvent::OrderPlaced { .. }) {
            self.order_deadline = Some(Instant::now() + self.settings.order_timeout);
        }
        self.state = state;
        self.send_all(outbound).await;
        Ok(())
    }

    /// Release an order whose confirmation never arrived
    fn expire_order(&mut self) -> bool {
        match self.order_deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.order_deadline = None;
                if self.state.expire_order() {
                    tracing::warn!(
                        "No confirmation within {:?}, order released",
                        self.settings.order_timeout
                    );
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    async fn send_all(&mut self, outbound: Vec<Outbound>) {
        for out in outbound {
            let message = self.encoder.seal(out.message);
            let frame = message.to_bytes();
            let delivered =
                broadcast_repeated(self.transport.as_ref(), &frame, out.repeats, self.settings.repeat_gap)
                    .await;

            if delivered == 0 {
                tracing::error!("Could not broadcast {}", message.summary());
            } else {
                tracing::info!("Sent {} ({}/{})", message.summary(), delivered, out.repeats);
            }
        }
    }

    async fn send_heartbeat(&mut self) {
        let message = ShowcaseMessage::new(
            MessageType::Heartbeat,
            &self.state.username,
            self.state.balance,
            self.role.label(),
        );
        let frame = self.encoder.seal(message).to_bytes();
        if let Err(e) = self.transport.send(&frame).await {
            tracing::warn!("Heartbeat not sent: {}", e);
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(Snapshot {
            role: self.role,
            name: self.settings.name.clone(),
            state: self.state.clone(),
            stale: self.stale,
            received: self.stats.accepted.load(Ordering::Relaxed),
            dropped: self.stats.dropped() + self.guard.dropped(),
        });
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn log_transition(before: &StationState, after: &StationState) {
    tracing::info!(
        "{} -> user={} balance={} auth={} ({:?})",
        before.display_name(),
        after.display_name(),
        after.balance,
        after.authenticated,
        after.last_event
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LoopbackBus;
    use crate::protocol::{Encoder, FixedClock};

    fn quiet_settings(name: &str) -> RunnerSettings {
        RunnerSettings {
            name: name.to_string(),
            heartbeat_interval: None,
            repeat_gap: Duration::ZERO,
            ..RunnerSettings::default()
        }
    }

    async fn wait_until(handle: &StationHandle, check: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let mut rx = handle.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| check(s)))
            .await
            .expect("station did not reach the expected state")
            .expect("station stopped");
        snapshot.clone()
    }

    #[tokio::test]
    async fn test_wallet_applies_broadcast_earn() {
        let bus = LoopbackBus::default();
        let (runner, wallet) = StationRunner::new(
            StationRole::Wallet,
            Arc::new(bus.attach()),
            quiet_settings("wallet"),
        );
        let task = tokio::spawn(runner.run());

        let encoder = Encoder::with_clock(FixedClock(100));
        bus.inject(&encoder.encode(MessageType::IdentityAssign, "Alice", 0, ""));
        wait_until(&wallet, |s| s.state.username == "Alice").await;

        let encoder = Encoder::with_clock(FixedClock(200));
        bus.inject(&encoder.encode(MessageType::EarnCoin, "Alice", 50, "Quiz"));
        let snapshot = wait_until(&wallet, |s| s.state.balance == 50).await;
        assert_eq!(snapshot.received, 2);

        wallet.shutdown().await;
        let final_state = task.await.unwrap();
        assert_eq!(final_state.balance, 50);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_applied_once() {
        let bus = LoopbackBus::default();
        let (runner, wallet) = StationRunner::new(
            StationRole::Wallet,
            Arc::new(bus.attach()),
            quiet_settings("wallet"),
        );
        let task = tokio::spawn(runner.run());

        let earn = Encoder::with_clock(FixedClock(300)).encode(MessageType::EarnCoin, "Alice", 50, "Quiz");
        let marker = Encoder::with_clock(FixedClock(301)).encode(MessageType::EarnCoin, "Alice", 1, "Tip");
        bus.inject(&earn);
        bus.inject(&earn);
        bus.inject(&earn);
        bus.inject(&marker);

        // The marker is processed last, after both duplicates were filtered
        let snapshot = wait_until(&wallet, |s| s.state.balance >= 51).await;
        assert_eq!(snapshot.state.balance, 51);
        assert_eq!(snapshot.received, 4);
        assert_eq!(snapshot.dropped, 2);

        wallet.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_button_clears_other_stations() {
        let bus = LoopbackBus::default();
        let (wallet_runner, wallet) = StationRunner::new(
            StationRole::Wallet,
            Arc::new(bus.attach()),
            quiet_settings("wallet"),
        );
        let (reset_runner, reset) = StationRunner::new(
            StationRole::Reset,
            Arc::new(bus.attach()),
            quiet_settings("reset"),
        );
        let tasks = [tokio::spawn(wallet_runner.run()), tokio::spawn(reset_runner.run())];

        bus.inject(&Encoder::with_clock(FixedClock(1)).encode(MessageType::IdentityAssign, "Alice", 0, ""));
        bus.inject(&Encoder::with_clock(FixedClock(2)).encode(MessageType::EarnCoin, "Alice", 80, "Quiz"));
        wait_until(&wallet, |s| s.state.balance == 80).await;

        reset.trigger(Trigger::ResetAll).await.unwrap();
        let snapshot = wait_until(&wallet, |s| s.state == StationState::initial()).await;
        assert!(snapshot.state.is_guest());

        assert!(matches!(
            wallet.trigger(Trigger::ResetAll).await,
            Err(TriggerError::NotSupported { .. })
        ));

        wallet.shutdown().await;
        reset.shutdown().await;
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_silence_marks_station_stale() {
        let bus = LoopbackBus::default();
        let settings = RunnerSettings {
            stale_after: Duration::from_millis(40),
            ..quiet_settings("monitor")
        };
        let (runner, monitor) = StationRunner::new(StationRole::AuthMonitor, Arc::new(bus.attach()), settings);
        let task = tokio::spawn(runner.run());

        wait_until(&monitor, |s| s.stale).await;

        bus.inject(&Encoder::with_clock(FixedClock(5)).encode(MessageType::AuthRequest, "", 0, ""));
        let snapshot = wait_until(&monitor, |s| !s.stale).await;
        assert!(snapshot.state.auth_in_progress);

        monitor.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unconfirmed_order_is_released() {
        let bus = LoopbackBus::default();
        let settings = RunnerSettings {
            order_timeout: Duration::from_millis(60),
            ..quiet_settings("menu")
        };
        let (runner, menu) = StationRunner::new(StationRole::Menu, Arc::new(bus.attach()), settings);
        let task = tokio::spawn(runner.run());

        bus.inject(&Encoder::with_clock(FixedClock(1)).encode(MessageType::IdentityAssign, "Alice", 0, ""));
        bus.inject(&Encoder::with_clock(FixedClock(2)).encode(MessageType::BalanceUpdate, "Alice", 100, ""));
        wait_until(&menu, |s| s.state.balance == 100).await;

        let order = || Trigger::Order {
            item: "Latte".to_string(),
            amount: 30,
        };

        // No terminal on the bus, so no confirmation ever comes
        menu.trigger(order()).await.unwrap();
        assert_eq!(menu.trigger(order()).await, Err(TriggerError::InProgress));

        wait_until(&menu, |s| matches!(s.state.last_event, StationEvent::OrderExpired { .. })).await;
        assert_eq!(menu.trigger(order()).await, Ok(()));

        menu.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_own_heartbeats_do_not_keep_udp_station_alive() {
        use crate::network::{NetworkConfig, UdpBroadcastTransport};
        use std::net::Ipv4Addr;

        let transport = UdpBroadcastTransport::bind(&NetworkConfig {
            port: 0,
            bind_address: Ipv4Addr::LOCALHOST,
            broadcast_address: Ipv4Addr::LOCALHOST,
        })
        .unwrap();
        let settings = RunnerSettings {
            heartbeat_interval: Some(Duration::from_millis(20)),
            stale_after: Duration::from_millis(100),
            ..quiet_settings("monitor")
        };
        let (runner, monitor) = StationRunner::new(StationRole::AuthMonitor, Arc::new(transport), settings);
        let task = tokio::spawn(runner.run());

        let snapshot = wait_until(&monitor, |s| s.stale).await;
        assert_eq!(snapshot.received, 0);

        monitor.shutdown().await;
        task.await.unwrap();
    }
}
