//! Whole-exhibit simulation
//!
//! Runs one station per role on an in-process bus and walks a visitor through
//! the booth: identity, authentication, earning, two orders and a reset.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::network::LoopbackBus;
use crate::station::{
    RunnerSettings, Snapshot, StationEvent, StationHandle, StationRole, StationRunner, StationState,
    Trigger, TriggerError,
};

/// Simulation errors
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("No {0} station in the exhibit")]
    MissingStation(StationRole),

    #[error("Trigger failed: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Step '{step}': {role} station did not settle within {timeout:?}")]
    Timeout {
        step: String,
        role: StationRole,
        timeout: Duration,
    },
}

type Expectation = fn(&StationState) -> bool;

/// Outcome of one journey step
#[derive(Debug, Clone, Serialize)]
pub struct JourneyStep {
    pub step: String,
    pub station: StationRole,
    pub snapshots: Vec<Snapshot>,
}

/// Every station of the booth sharing one broadcast medium
pub struct Exhibit {
    stations: Vec<StationHandle>,
    tasks: Vec<JoinHandle<StationState>>,
}

impl Exhibit {
    /// Start one runner per role
    pub fn launch(settings: &RunnerSettings) -> Self {
        let bus = LoopbackBus::default();
        let mut stations = Vec::with_capacity(StationRole::ALL.len());
        let mut tasks = Vec::with_capacity(StationRole::ALL.len());

        for role in StationRole::ALL {
            let settings = RunnerSettings {
                name: role.name().to_string(),
                ..settings.clone()
            };
            let (runner, handle) = StationRunner::new(role, Arc::new(bus.attach()), settings);
            tasks.push(tokio::spawn(runner.run()));
            stations.push(handle);
        }

        tracing::info!("Exhibit running with {} stations", stations.len());
        Self { stations, tasks }
    }

    pub fn station(&self, role: StationRole) -> Result<&StationHandle, SimulationError> {
        self.stations
            .iter()
            .find(|s| s.role() == role)
            .ok_or(SimulationError::MissingStation(role))
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.stations.iter().map(StationHandle::snapshot).collect()
    }

    /// Stop every station and collect final states
    pub async fn shutdown(self) -> Vec<StationState> {
        for station in &self.stations {
            station.shutdown().await;
        }

        let mut states = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match task.await {
                Ok(state) => states.push(state),
                Err(e) => tracing::error!("Station task failed: {}", e),
            }
        }
        states
    }

    /// Trigger `trigger` on `role` and wait for every expectation to hold
    async fn step(
        &self,
        label: &str,
        role: StationRole,
        trigger: Trigger,
        expectations: &[(StationRole, Expectation)],
        timeout: Duration,
    ) -> Result<JourneyStep, SimulationError> {
        tracing::info!("Journey step: {}", label);
        self.station(role)?.trigger(trigger).await?;

        for (watched, expected) in expectations {
            let mut rx = self.station(*watched)?.subscribe();
            let settled = tokio::time::timeout(timeout, rx.wait_for(|s| expected(&s.state)))
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);
            if !settled {
                return Err(SimulationError::Timeout {
                    step: label.to_string(),
                    role: *watched,
                    timeout,
                });
            }
        }

        Ok(JourneyStep {
            step: label.to_string(),
            station: role,
            snapshots: self.snapshots(),
        })
    }
}

/// Walk one visitor through the exhibit
///
/// `pause` separates steps; it must be at least a couple of milliseconds so
/// repeated identical requests carry distinct timestamps.
pub async fn run_journey(
    exhibit: &Exhibit,
    timeout: Duration,
    pause: Duration,
) -> Result<Vec<JourneyStep>, SimulationError> {
    let pause = pause.max(Duration::from_millis(2));
    let mut steps = Vec::new();

    steps.push(
        exhibit
            .step(
                "assign Alice",
                StationRole::Identity,
                Trigger::AssignIdentity {
                    username: "Alice".to_string(),
                },
                &[
                    (StationRole::Wallet, |s| s.username == "Alice"),
                    (StationRole::AuthMonitor, |s| s.username == "Alice"),
                    (StationRole::Earn, |s| s.username == "Alice"),
                    (StationRole::Menu, |s| s.username == "Alice"),
                    (StationRole::PaymentTerminal, |s| s.username == "Alice"),
                ],
                timeout,
            )
            .await?,
    );
    tokio::time::sleep(pause).await;

    steps.push(
        exhibit
            .step(
                "auth",
                StationRole::AuthSensor,
                Trigger::Authenticate,
                &[
                    (StationRole::AuthSensor, |s| s.authenticated),
                    (StationRole::AuthMonitor, |s| s.authenticated),
                    (StationRole::Wallet, |s| s.authenticated),
                ],
                timeout,
            )
            .await?,
    );
    tokio::time::sleep(pause).await;

    steps.push(
        exhibit
            .step(
                "earn 50 Quiz",
                StationRole::Earn,
                Trigger::Earn {
                    amount: 50,
                    activity: "Quiz".to_string(),
                },
                &[
                    (StationRole::Wallet, |s| s.balance == 50),
                    (StationRole::Menu, |s| s.balance == 50),
                    (StationRole::PaymentTerminal, |s| s.balance == 50),
                ],
                timeout,
            )
            .await?,
    );
    tokio::time::sleep(pause).await;

    let order = || Trigger::Order {
        item: "Latte".to_string(),
        amount: 30,
    };

    steps.push(
        exhibit
            .step(
                "order 30 Latte",
                StationRole::Menu,
                order(),
                &[
                    (StationRole::Wallet, |s| {
                        s.balance == 20 && matches!(s.last_event, StationEvent::SpendApproved { .. })
                    }),
                    (StationRole::Menu, |s| {
                        s.balance == 20 && matches!(s.last_event, StationEvent::SpendApproved { .. })
                    }),
                    (StationRole::PaymentTerminal, |s| s.balance == 20),
                ],
                timeout,
            )
            .await?,
    );
    tokio::time::sleep(pause).await;

    steps.push(
        exhibit
            .step(
                "order 30 Latte (over budget)",
                StationRole::Menu,
                order(),
                &[
                    (StationRole::PaymentTerminal, |s| {
                        matches!(s.last_event, StationEvent::SpendRejected { .. })
                    }),
                    (StationRole::Menu, |s| {
                        matches!(s.last_event, StationEvent::SpendRejected { .. })
                    }),
                    (StationRole::Wallet, |s| {
                        s.balance == 20 && matches!(s.last_event, StationEvent::SpendRejected { .. })
                    }),
                ],
                timeout,
            )
            .await?,
    );
    tokio::time::sleep(pause).await;

    let reset_clears: Vec<(StationRole, Expectation)> = StationRole::ALL
        .iter()
        .map(|role| (*role, (|s: &StationState| *s == StationState::initial()) as Expectation))
        .collect();
    steps.push(
        exhibit
            .step("reset", StationRole::Reset, Trigger::ResetAll, &reset_clears, timeout)
            .await?,
    );

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> RunnerSettings {
        RunnerSettings {
            heartbeat_interval: None,
            repeat_gap: Duration::from_millis(1),
            ..RunnerSettings::default()
        }
    }

    fn balance_of(step: &JourneyStep, role: StationRole) -> i32 {
        step.snapshots
            .iter()
            .find(|s| s.role == role)
            .map(|s| s.state.balance)
            .unwrap()
    }

    #[tokio::test]
    async fn test_visitor_journey() {
        let exhibit = Exhibit::launch(&fast_settings());

        let steps = run_journey(&exhibit, Duration::from_secs(3), Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(steps.len(), 6);

        assert_eq!(balance_of(&steps[2], StationRole::Wallet), 50);
        assert_eq!(balance_of(&steps[3], StationRole::Wallet), 20);
        // The rejected order leaves the wallet untouched
        assert_eq!(balance_of(&steps[4], StationRole::Wallet), 20);

        let after_reset = &steps[5];
        assert!(after_reset
            .snapshots
            .iter()
            .all(|s| s.state == StationState::initial()));

        let final_states = exhibit.shutdown().await;
        assert_eq!(final_states.len(), StationRole::ALL.len());
    }

    #[tokio::test]
    async fn test_trigger_on_guest_station_fails() {
        let exhibit = Exhibit::launch(&fast_settings());

        let err = exhibit
            .station(StationRole::Menu)
            .unwrap()
            .trigger(Trigger::Order {
                item: "Latte".to_string(),
                amount: 30,
            })
            .await
            .unwrap_err();
        assert_eq!(err, TriggerError::NoIdentity);

        exhibit.shutdown().await;
    }
}
