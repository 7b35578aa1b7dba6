use crate::error::VmError;
use crate::events::{EventBus, MonitorEvent};
use crate::vm::{StartMode, VmController};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Individual steps of the power-cycle sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    QueryState,
    PowerOff,
    Start,
}

impl fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecoveryStep::QueryState => "query_state",
            RecoveryStep::PowerOff => "power_off",
            RecoveryStep::Start => "start",
        })
    }
}

/// What happened during one recovery sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// VM state before the sequence; `None` when it could not be queried
    pub was_running: Option<bool>,
    pub power_off_attempted: bool,
    pub started: bool,
    pub failures: Vec<(RecoveryStep, VmError)>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Recovery timing and target configuration
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub vm_name: String,
    pub start_mode: StartMode,
    /// Pause before every start command
    pub power_off_grace: Duration,
}

/// Runs the deterministic power-cycle sequence against the VM
pub struct RecoveryController {
    config: RecoveryConfig,
    vm: Arc<dyn VmController>,
    event_bus: Arc<EventBus>,
}

impl RecoveryController {
    pub fn new(config: RecoveryConfig, vm: Arc<dyn VmController>, event_bus: Arc<EventBus>) -> Self {
        Self {
            config,
            vm,
            event_bus,
        }
    }

    pub fn vm_name(&self) -> &str {
        &self.config.vm_name
    }

    /// Power the VM off if it is (or may be) running, wait the grace period,
    /// then start it.
    ///
    /// Step failures are published and recorded in the report but never stop
    /// the sequence: `start` is always attempted.
    pub async fn recover(&self) -> RecoveryReport {
        let name = self.config.vm_name.as_str();
        let mut report = RecoveryReport::default();

        report.was_running = match self.vm.is_running(name).await {
            Ok(running) => {
                debug!("VM {} running before recovery: {}", name, running);
                Some(running)
            }
            Err(e) => {
                self.step_failed(&mut report, RecoveryStep::QueryState, e);
                None
            }
        };

        // An unknown state is treated as running
        if report.was_running != Some(false) {
            info!("Powering off VM {}", name);
            report.power_off_attempted = true;

            if let Err(e) = self.vm.power_off(name).await {
                self.step_failed(&mut report, RecoveryStep::PowerOff, e);
            }
        }

        sleep(self.config.power_off_grace).await;

        match self.vm.start(name, self.config.start_mode).await {
            Ok(()) => {
                report.started = true;
                self.event_bus.emit(MonitorEvent::vm_starting(name));
            }
            Err(e) => {
                error!("Failed to start VM {}: {}", name, e);
                self.step_failed(&mut report, RecoveryStep::Start, e);
            }
        }

        report
    }

    fn step_failed(&self, report: &mut RecoveryReport, step: RecoveryStep, error: VmError) {
        warn!(
            "Recovery step {} failed for {}: {}",
            step, self.config.vm_name, error
        );
        self.event_bus.emit(MonitorEvent::recovery_step_failed(
            &self.config.vm_name,
            step,
            error.to_string(),
        ));
        report.failures.push((step, error));
    }
}
