use crate::error::VmError;
use crate::events::{EventSink, SinkError};
use crate::indicator::{Indicator, IndicatorRenderer};
use crate::probe::{ProbeFailure, ProbeOutcome, ServiceProbe};
use crate::vm::{StartMode, VmController};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Probe that replays a fixed script of outcomes
pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProbeOutcome>>,
    fallback: ProbeOutcome,
    latency: Duration,
    calls: Mutex<usize>,
}

impl ScriptedProbe {
    /// Replay `outcomes` in order, then keep repeating the last one
    pub fn new(outcomes: Vec<ProbeOutcome>) -> Self {
        let fallback = outcomes
            .last()
            .cloned()
            .unwrap_or(ProbeOutcome::Success);
        Self {
            script: Mutex::new(outcomes.into()),
            fallback,
            latency: Duration::ZERO,
            calls: Mutex::new(0),
        }
    }

    pub fn always(outcome: ProbeOutcome) -> Self {
        Self::new(vec![outcome])
    }

    pub fn always_failing() -> Self {
        Self::always(ProbeOutcome::Failure(ProbeFailure::Connection(
            "connection refused".to_string(),
        )))
    }

    /// Make every check take `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl ServiceProbe for ScriptedProbe {
    async fn check(&self) -> ProbeOutcome {
        *self.calls.lock() += 1;
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        outcome
    }
}

/// Calls observed by [`MockVmController`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmCall {
    IsRunning,
    PowerOff,
    Start(StartMode),
}

/// VM controller that records calls and tracks a simulated power state
pub struct MockVmController {
    running: Mutex<bool>,
    calls: Mutex<Vec<VmCall>>,
    failing: Mutex<Vec<VmCall>>,
}

impl MockVmController {
    pub fn new(running: bool) -> Self {
        Self {
            running: Mutex::new(running),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
        }
    }

    /// Make every future `call` fail
    pub fn fail_on(&self, call: VmCall) {
        self.failing.lock().push(call);
    }

    pub fn calls(&self) -> Vec<VmCall> {
        self.calls.lock().clone()
    }

    pub fn is_powered(&self) -> bool {
        *self.running.lock()
    }

    fn record(&self, call: VmCall) -> Result<(), VmError> {
        self.calls.lock().push(call);
        if self.failing.lock().contains(&call) {
            return Err(VmError::CommandFailed {
                command: format!("{:?}", call),
                code: Some(1),
                stderr: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VmController for MockVmController {
    async fn is_running(&self, _name: &str) -> Result<bool, VmError> {
        self.record(VmCall::IsRunning)?;
        Ok(*self.running.lock())
    }

    async fn power_off(&self, _name: &str) -> Result<(), VmError> {
        self.record(VmCall::PowerOff)?;
        *self.running.lock() = false;
        Ok(())
    }

    async fn start(&self, _name: &str, mode: StartMode) -> Result<(), VmError> {
        self.record(VmCall::Start(mode))?;
        *self.running.lock() = true;
        Ok(())
    }
}

/// Event sink that keeps every notification in memory
pub struct RecordingSink {
    notifications: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            notifications: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Sink that rejects every delivery
    pub fn failing() -> Self {
        Self {
            notifications: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().clone()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn deliver(&self, title: &str, message: &str) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError {
                sink: "recording",
                details: "delivery rejected".to_string(),
            });
        }
        self.notifications
            .lock()
            .push((title.to_string(), message.to_string()));
        Ok(())
    }
}

/// Indicator renderer that records every frame it is asked to draw
#[derive(Default)]
pub struct RecordingRenderer {
    frames: Mutex<Vec<Indicator>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Indicator> {
        self.frames.lock().clone()
    }
}

impl IndicatorRenderer for RecordingRenderer {
    fn render(&self, indicator: Indicator) {
        self.frames.lock().push(indicator);
    }
}
