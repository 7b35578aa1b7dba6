use crate::error::EventBusError;
use crate::recovery::RecoveryStep;
use crate::state::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Operator actions coming from a control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
}

/// Events published by the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorEvent {
    /// The status value moved along the state machine
    StatusChanged {
        vm: String,
        from: Status,
        to: Status,
        timestamp: DateTime<Utc>,
    },
    /// A start command for the VM was accepted by the controller
    VmStarting {
        vm: String,
        timestamp: DateTime<Utc>,
    },
    /// One step of a recovery sequence failed; the sequence carried on
    RecoveryStepFailed {
        vm: String,
        step: RecoveryStep,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// An operator action was applied
    Control {
        vm: String,
        action: ControlAction,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    pub fn status_changed(vm: &str, from: Status, to: Status) -> Self {
        Self::StatusChanged {
            vm: vm.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        }
    }

    pub fn vm_starting(vm: &str) -> Self {
        Self::VmStarting {
            vm: vm.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn recovery_step_failed(vm: &str, step: RecoveryStep, error: String) -> Self {
        Self::RecoveryStepFailed {
            vm: vm.to_string(),
            step,
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn control(vm: &str, action: ControlAction) -> Self {
        Self::Control {
            vm: vm.to_string(),
            action,
            timestamp: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MonitorEvent::StatusChanged { timestamp, .. }
            | MonitorEvent::VmStarting { timestamp, .. }
            | MonitorEvent::RecoveryStepFailed { timestamp, .. }
            | MonitorEvent::Control { timestamp, .. } => *timestamp,
        }
    }

    pub fn vm(&self) -> &str {
        match self {
            MonitorEvent::StatusChanged { vm, .. }
            | MonitorEvent::VmStarting { vm, .. }
            | MonitorEvent::RecoveryStepFailed { vm, .. }
            | MonitorEvent::Control { vm, .. } => vm,
        }
    }

    /// Notification title
    pub fn title(&self) -> String {
        format!("{} Status", self.vm())
    }

    /// Notification body
    pub fn message(&self) -> String {
        match self {
            MonitorEvent::StatusChanged { to, .. } => match to {
                Status::Online => "The VM is online".to_string(),
                Status::Offline => "The VM is offline".to_string(),
                Status::Restarting => "Restarting VM".to_string(),
                Status::Unknown => "The VM status is unknown".to_string(),
            },
            MonitorEvent::VmStarting { .. } => "The VM is starting".to_string(),
            MonitorEvent::RecoveryStepFailed { step, error, .. } => {
                format!("Recovery step '{}' failed: {}", step, error)
            }
            MonitorEvent::Control { action, .. } => match action {
                ControlAction::Pause => "Pausing monitoring...".to_string(),
                ControlAction::Resume => "Resuming monitoring...".to_string(),
                ControlAction::Stop => "Stopping monitoring...".to_string(),
            },
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            MonitorEvent::StatusChanged { .. } => "status_changed",
            MonitorEvent::VmStarting { .. } => "vm_starting",
            MonitorEvent::RecoveryStepFailed { .. } => "recovery_step_failed",
            MonitorEvent::Control { .. } => "control",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: MonitorEvent) -> Result<usize, EventBusError> {
        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish without letting a delivery problem reach the caller
    pub fn emit(&self, event: MonitorEvent) {
        let kind = event.event_type();
        if let Err(e) = self.publish(event) {
            debug!("Dropped {} event: {}", kind, e);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Error returned by an [`EventSink`] that could not deliver a notification
#[derive(Debug, Clone, thiserror::Error)]
#[error("{sink}: {details}")]
pub struct SinkError {
    pub sink: &'static str,
    pub details: String,
}

/// Destination for `(title, message)` notifications
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn deliver(&self, title: &str, message: &str) -> Result<(), SinkError>;
}

/// Writes every notification to the tracing log
pub struct LogSink;

impl EventSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn deliver(&self, title: &str, message: &str) -> Result<(), SinkError> {
        info!(target: "vmwatch::events", "{}: {}", title, message);
        Ok(())
    }
}

/// Forwards bus events to a set of sinks until cancelled
pub struct EventDispatcher {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventDispatcher {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    /// Spawn the forwarding task.
    ///
    /// Events already queued when the token fires are still delivered.
    pub fn spawn(self, event_bus: &EventBus, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let mut receiver = event_bus.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    received = receiver.recv() => match received {
                        Ok(event) => self.dispatch(&event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Event dispatcher lagged, {} events skipped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = cancellation_token.cancelled() => {
                        while let Ok(event) = receiver.try_recv() {
                            self.dispatch(&event);
                        }
                        break;
                    }
                }
            }

            debug!("Event dispatcher exited");
        })
    }

    fn dispatch(&self, event: &MonitorEvent) {
        let title = event.title();
        let message = event.message();

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&title, &message) {
                warn!("Notification delivery via {} failed: {}", sink.name(), e);
            }
        }
    }
}
