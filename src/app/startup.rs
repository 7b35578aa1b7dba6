use super::{ComponentState, MonitorApp};
use crate::error::Result;
#[cfg(not(feature = "http_control"))]
use crate::error::VmWatchError;
use crate::events::EventDispatcher;
use crate::recovery::RecoveryController;
use std::future::Future;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::{error, info, warn};

impl MonitorApp {
    /// Register every configured component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing vmwatch components for {}", self.config.vm.name);

        let mut states = self.component_states.lock().await;
        states.insert("events".to_string(), ComponentState::Stopped);
        states.insert("monitor".to_string(), ComponentState::Stopped);

        if self.presenter.is_some() {
            states.insert("indicator".to_string(), ComponentState::Stopped);
        }
        if self.keyboard.is_some() {
            states.insert("keyboard".to_string(), ComponentState::Stopped);
        }
        if self.config.control.http_bind.is_some() {
            states.insert("http_control".to_string(), ComponentState::Stopped);
        }

        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Launch the VM (when configured) and start every background task.
    ///
    /// The HTTP control address is bound first; if that fails nothing else
    /// is started and the VM is left alone.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting vmwatch");

        #[cfg(feature = "http_control")]
        let http_listener = self.bind_http_control().await?;

        #[cfg(not(feature = "http_control"))]
        if self.config.control.http_bind.is_some() {
            self.set_component_state("http_control", ComponentState::Failed)
                .await;
            return Err(VmWatchError::component(
                "http_control",
                "control.http_bind is set but vmwatch was built without the http_control feature",
            ));
        }

        self.set_component_state("events", ComponentState::Starting).await;
        let dispatcher = EventDispatcher::new(self.sinks.clone())
            .spawn(&self.event_bus, self.dispatcher_token.clone());
        self.tasks.push(("events", dispatcher));
        self.set_component_state("events", ComponentState::Running).await;

        if self.config.vm.start_on_launch {
            self.launch_vm().await;
        }

        let monitor = Arc::clone(&self.monitor);
        self.spawn_component("monitor", async move { monitor.run().await })
            .await;

        if let Some(presenter) = self.presenter.clone() {
            self.spawn_component("indicator", async move { presenter.run().await })
                .await;
        }

        self.start_keyboard().await;

        #[cfg(feature = "http_control")]
        if let Some((server, listener)) = http_listener {
            self.spawn_component("http_control", async move {
                if let Err(e) = server.serve(listener).await {
                    error!("HTTP control surface error: {}", e);
                }
            })
            .await;
        }

        info!("vmwatch started");
        Ok(())
    }

    /// Power-cycle the VM once before monitoring begins
    async fn launch_vm(&self) {
        info!("Launching VM {}", self.config.vm.name);

        let launcher = RecoveryController::new(
            Self::recovery_config(&self.config),
            Arc::clone(&self.vm),
            Arc::clone(&self.event_bus),
        );

        let report = launcher.recover().await;
        if !report.started {
            error!(
                "VM {} could not be started; monitoring will keep retrying",
                self.config.vm.name
            );
        }
    }

    async fn spawn_component<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.set_component_state(name, ComponentState::Starting).await;
        self.tasks.push((name, tokio::spawn(task)));
        self.set_component_state(name, ComponentState::Running).await;
        info!("{} component started", name);
    }

    async fn start_keyboard(&mut self) {
        let Some(keyboard) = &self.keyboard else {
            return;
        };

        if !std::io::stdin().is_terminal() {
            warn!("stdin is not a terminal, keyboard control disabled");
            self.set_component_state("keyboard", ComponentState::Stopped)
                .await;
            return;
        }

        self.set_component_state("keyboard", ComponentState::Starting)
            .await;
        match keyboard.start() {
            Ok(handle) => {
                self.tasks.push(("keyboard", handle));
                self.set_component_state("keyboard", ComponentState::Running)
                    .await;
            }
            Err(e) => {
                warn!("Keyboard control unavailable: {}", e);
                self.set_component_state("keyboard", ComponentState::Failed)
                    .await;
            }
        }
    }

    #[cfg(feature = "http_control")]
    async fn bind_http_control(
        &self,
    ) -> Result<Option<(crate::control::ControlServer, tokio::net::TcpListener)>> {
        use crate::control::ControlServer;

        let Some(bind) = self.config.control.http_bind.clone() else {
            return Ok(None);
        };

        let server = ControlServer::new(bind, Arc::clone(&self.control), self.store.stop_token());
        match server.bind().await {
            Ok(listener) => Ok(Some((server, listener))),
            Err(e) => {
                error!("HTTP control surface unavailable: {}", e);
                self.set_component_state("http_control", ComponentState::Failed)
                    .await;
                Err(e)
            }
        }
    }
}
