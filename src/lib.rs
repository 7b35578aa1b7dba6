pub mod app;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod indicator;
pub mod mock;
pub mod monitor;
pub mod probe;
pub mod recovery;
pub mod state;
pub mod vm;

pub use app::{ComponentState, MonitorApp, ShutdownReason};
pub use config::VmWatchConfig;
pub use control::{Affordances, ControlSurface, KeyboardControl, StatusReport};
pub use error::{Result, VmError, VmWatchError};
pub use events::{ControlAction, EventBus, EventDispatcher, EventSink, LogSink, MonitorEvent};
pub use indicator::{Indicator, IndicatorPresenter, IndicatorRenderer, RendererKind, StatusLineWriter};
pub use monitor::{HealthMonitor, MonitorTimings, TickOutcome};
pub use probe::{HttpProbe, ProbeFailure, ProbeOutcome, ServiceProbe};
pub use recovery::{RecoveryConfig, RecoveryController, RecoveryReport, RecoveryStep};
pub use state::{MonitorState, Status, StatusStore};
pub use vm::{StartMode, VBoxManageController, VmController};

#[cfg(feature = "http_control")]
pub use control::ControlServer;
