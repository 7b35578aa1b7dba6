use crate::config::VmWatchConfig;
use crate::events::{EventBus, MonitorEvent};
use crate::probe::{ProbeOutcome, ServiceProbe};
use crate::recovery::{RecoveryController, RecoveryReport};
use crate::state::{Status, StatusStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

#[cfg(test)]
mod tests;

/// Delays driving the probe loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTimings {
    /// Wait before the first probe and after every recovery
    pub boot_grace: Duration,
    /// Wait between probes
    pub check_interval: Duration,
}

impl MonitorTimings {
    pub fn from_config(config: &VmWatchConfig) -> Self {
        Self {
            boot_grace: config.boot_grace(),
            check_interval: config.check_interval(),
        }
    }
}

/// Result of a single monitor iteration
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Shutdown was requested; nothing was done
    Stopped,
    /// Monitoring is paused; the probe was skipped
    Idle,
    /// The service answered
    Online,
    /// The probe failed and a recovery sequence ran
    Recovered(RecoveryReport),
}

/// The probe loop and its status state machine.
///
/// ```text
/// Unknown ──► Online ◄──────────────┐
///    │          │                   │
///    │          ▼                   │
///    └─────► Offline ──► Restarting ┘
///               ▲            │
///               └────────────┘
/// ```
///
/// A failed probe runs the whole recovery sequence before the next tick can
/// start, so recoveries never overlap.
pub struct HealthMonitor {
    store: Arc<StatusStore>,
    probe: Arc<dyn ServiceProbe>,
    recovery: RecoveryController,
    event_bus: Arc<EventBus>,
    timings: MonitorTimings,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<StatusStore>,
        probe: Arc<dyn ServiceProbe>,
        recovery: RecoveryController,
        event_bus: Arc<EventBus>,
        timings: MonitorTimings,
    ) -> Self {
        Self {
            store,
            probe,
            recovery,
            event_bus,
            timings,
        }
    }

    pub fn timings(&self) -> MonitorTimings {
        self.timings
    }

    /// Run the probe loop until the store's stop signal fires
    pub async fn run(&self) {
        info!(
            "Health monitor started for {}: first probe in {:?}, then every {:?}",
            self.recovery.vm_name(),
            self.timings.boot_grace,
            self.timings.check_interval
        );

        if self.wait(self.timings.boot_grace).await {
            loop {
                if let TickOutcome::Stopped = self.tick_and_settle().await {
                    break;
                }

                if !self.wait(self.timings.check_interval).await {
                    break;
                }
            }
        }

        info!("Health monitor stopped");
    }

    /// One tick followed by the boot-grace wait when a recovery ran
    async fn tick_and_settle(&self) -> TickOutcome {
        let outcome = self.tick().await;

        if let TickOutcome::Recovered(report) = &outcome {
            if !report.is_clean() {
                warn!(
                    "Recovery of {} finished with {} failed step(s)",
                    self.recovery.vm_name(),
                    report.failures.len()
                );
            }

            debug!("Waiting {:?} for the VM to boot", self.timings.boot_grace);
            if !self.wait(self.timings.boot_grace).await {
                return TickOutcome::Stopped;
            }
        }

        outcome
    }

    /// Execute a single monitor iteration.
    ///
    /// The pause flag is read once at the start; a pause requested while the
    /// probe or recovery is in flight applies from the next tick.
    pub async fn tick(&self) -> TickOutcome {
        let state = self.store.snapshot();

        if !state.running {
            return TickOutcome::Stopped;
        }

        if !state.checking_enabled {
            trace!("Monitoring paused, skipping probe");
            return TickOutcome::Idle;
        }

        debug!("Checking whether the service is online");
        match self.probe.check().await {
            ProbeOutcome::Success => {
                self.set_status(Status::Online);
                TickOutcome::Online
            }
            ProbeOutcome::Failure(reason) => {
                warn!("Probe for {} failed: {}", self.recovery.vm_name(), reason);

                self.set_status(Status::Offline);
                self.set_status(Status::Restarting);

                let report = self.recovery.recover().await;
                TickOutcome::Recovered(report)
            }
        }
    }

    /// Apply a transition and publish it if the status actually changed
    fn set_status(&self, next: Status) {
        match self.store.transition(next) {
            Ok(Some(previous)) => {
                info!("{} is now {} (was {})", self.recovery.vm_name(), next, previous);
                self.event_bus.emit(MonitorEvent::status_changed(
                    self.recovery.vm_name(),
                    previous,
                    next,
                ));
            }
            Ok(None) => trace!("{} still {}", self.recovery.vm_name(), next),
            Err(e) => error!("Status update rejected: {}", e),
        }
    }

    /// Sleep for `duration`; returns `false` if shutdown was requested first
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.store.stopped() => false,
            _ = sleep(duration) => self.store.is_running(),
        }
    }
}
