#[cfg(feature = "http_control")]
pub mod http;
pub mod keyboard;

use crate::events::{ControlAction, EventBus, MonitorEvent};
use crate::indicator::Indicator;
use crate::state::{MonitorState, Status, StatusStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[cfg(feature = "http_control")]
pub use http::ControlServer;
pub use keyboard::KeyboardControl;

/// Which actions currently make sense to offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Affordances {
    pub pause: bool,
    pub resume: bool,
    pub stop: bool,
}

impl From<&MonitorState> for Affordances {
    fn from(state: &MonitorState) -> Self {
        Self {
            pause: state.running && state.checking_enabled,
            resume: state.running && !state.checking_enabled,
            stop: state.running,
        }
    }
}

/// Everything a control front-end shows about the monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub vm: String,
    pub status: Status,
    pub indicator: Indicator,
    pub checking_enabled: bool,
    pub running: bool,
    pub affordances: Affordances,
}

/// Applies operator actions from every front-end (keyboard, HTTP, signals).
///
/// Each action is a single store operation and never blocks on I/O.
pub struct ControlSurface {
    vm_name: String,
    store: Arc<StatusStore>,
    event_bus: Arc<EventBus>,
}

impl ControlSurface {
    pub fn new(vm_name: impl Into<String>, store: Arc<StatusStore>, event_bus: Arc<EventBus>) -> Self {
        Self {
            vm_name: vm_name.into(),
            store,
            event_bus,
        }
    }

    /// Stop probing until [`ControlSurface::resume`]; the status is frozen
    pub fn pause(&self) {
        if self.store.set_checking_enabled(false) {
            info!("Monitoring paused");
        }
        self.announce(ControlAction::Pause);
    }

    pub fn resume(&self) {
        if !self.store.set_checking_enabled(true) {
            info!("Monitoring resumed");
        }
        self.announce(ControlAction::Resume);
    }

    /// Request a cooperative shutdown of every task.
    ///
    /// An in-flight probe or recovery is left to finish.
    pub fn stop(&self) {
        if self.store.request_stop() {
            info!("Shutdown requested");
        }
        self.announce(ControlAction::Stop);
    }

    pub fn dispatch(&self, action: ControlAction) {
        match action {
            ControlAction::Pause => self.pause(),
            ControlAction::Resume => self.resume(),
            ControlAction::Stop => self.stop(),
        }
    }

    pub fn affordances(&self) -> Affordances {
        Affordances::from(&self.store.snapshot())
    }

    pub fn report(&self) -> StatusReport {
        let state = self.store.snapshot();
        StatusReport {
            vm: self.vm_name.clone(),
            status: state.status,
            indicator: Indicator::from(state.status),
            checking_enabled: state.checking_enabled,
            running: state.running,
            affordances: Affordances::from(&state),
        }
    }

    fn announce(&self, action: ControlAction) {
        self.event_bus.emit(MonitorEvent::control(&self.vm_name, action));
    }
}
