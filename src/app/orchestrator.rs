use super::types::ComponentState;
use crate::config::VmWatchConfig;
use crate::control::{ControlSurface, KeyboardControl};
use crate::error::Result;
use crate::events::{EventBus, EventSink, LogSink};
use crate::indicator::IndicatorPresenter;
use crate::monitor::{HealthMonitor, MonitorTimings};
use crate::probe::{HttpProbe, ServiceProbe};
use crate::recovery::{RecoveryConfig, RecoveryController};
use crate::state::StatusStore;
use crate::vm::{VBoxManageController, VmController};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the event bus between the monitor and the notification sinks
const EVENT_BUS_CAPACITY: usize = 128;

/// Wires the store, monitor, presenter and control front-ends together and
/// owns their tasks
pub struct MonitorApp {
    pub(super) config: VmWatchConfig,
    pub(super) store: Arc<StatusStore>,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) control: Arc<ControlSurface>,
    pub(super) vm: Arc<dyn VmController>,
    pub(super) monitor: Arc<HealthMonitor>,
    pub(super) presenter: Option<Arc<IndicatorPresenter>>,
    pub(super) keyboard: Option<KeyboardControl>,
    pub(super) sinks: Vec<Arc<dyn EventSink>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) tasks: Vec<(&'static str, JoinHandle<()>)>,
    /// Cancelled last so events emitted during shutdown still reach the sinks
    pub(super) dispatcher_token: CancellationToken,
}

impl MonitorApp {
    /// Create the application with the VBoxManage controller and HTTP probe
    pub fn new(config: VmWatchConfig) -> Result<Self> {
        let vm: Arc<dyn VmController> = Arc::new(VBoxManageController::new(config.vm.manager_path.clone()));
        let probe: Arc<dyn ServiceProbe> = Arc::new(HttpProbe::new(
            config.probe.url.clone(),
            config.probe_timeout(),
            config.probe.expected_status,
        )?);

        Ok(Self::with_collaborators(config, vm, probe))
    }

    /// Create the application around caller-supplied VM and probe implementations
    pub fn with_collaborators(
        config: VmWatchConfig,
        vm: Arc<dyn VmController>,
        probe: Arc<dyn ServiceProbe>,
    ) -> Self {
        let store = Arc::new(StatusStore::new());
        let event_bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
        let vm_name = config.vm.name.clone();

        let control = Arc::new(ControlSurface::new(
            vm_name.clone(),
            Arc::clone(&store),
            Arc::clone(&event_bus),
        ));

        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&store),
            probe,
            RecoveryController::new(
                Self::recovery_config(&config),
                Arc::clone(&vm),
                Arc::clone(&event_bus),
            ),
            Arc::clone(&event_bus),
            MonitorTimings::from_config(&config),
        ));

        let presenter = config.indicator.renderer.build(&vm_name).map(|renderer| {
            Arc::new(IndicatorPresenter::new(
                Arc::clone(&store),
                renderer,
                config.indicator_refresh(),
            ))
        });

        let keyboard = config
            .control
            .keyboard
            .then(|| KeyboardControl::new(Arc::clone(&control), store.stop_token()));

        Self {
            config,
            store,
            event_bus,
            control,
            vm,
            monitor,
            presenter,
            keyboard,
            sinks: vec![Arc::new(LogSink)],
            component_states: Arc::new(Mutex::new(HashMap::new())),
            tasks: Vec::new(),
            dispatcher_token: CancellationToken::new(),
        }
    }

    pub(super) fn recovery_config(config: &VmWatchConfig) -> RecoveryConfig {
        RecoveryConfig {
            vm_name: config.vm.name.clone(),
            start_mode: config.vm.start_mode,
            power_off_grace: config.power_off_grace(),
        }
    }

    /// Add a notification sink; must be called before [`MonitorApp::start`]
    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn control(&self) -> Arc<ControlSurface> {
        Arc::clone(&self.control)
    }

    pub fn store(&self) -> Arc<StatusStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &VmWatchConfig {
        &self.config
    }
}
