use super::{ComponentState, MonitorApp};
use crate::error::{Result, VmWatchError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info};

/// How long each task gets to wind down after the stop signal
fn stop_timeout(component: &str) -> Duration {
    match component {
        // An in-flight recovery is allowed to finish, and VBoxManage calls are slow
        "monitor" => Duration::from_secs(300),
        "keyboard" => Duration::from_secs(2),
        _ => Duration::from_secs(5),
    }
}

impl MonitorApp {
    /// Wait for every task to finish, stopping the event dispatcher last.
    ///
    /// Exits with 1 when a task times out or panics, or when any component
    /// ended up failed.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // No-op when the stop came through the control surface
        self.store.request_stop();

        if let Some(keyboard) = &self.keyboard {
            keyboard.stop();
        }

        let mut exit_code = 0;
        let mut dispatcher = None;

        for (component, handle) in std::mem::take(&mut self.tasks) {
            if component == "events" {
                dispatcher = Some(handle);
                continue;
            }
            if let Err(e) = self.stop_component(component, handle).await {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        self.dispatcher_token.cancel();
        if let Some(handle) = dispatcher {
            if let Err(e) = self.stop_component("events", handle).await {
                error!("Error stopping events: {}", e);
                exit_code = 1;
            }
        }

        let failed = self.failed_components().await;
        if !failed.is_empty() {
            error!("Components in failed state: {}", failed.join(", "));
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_component(&self, component: &str, handle: JoinHandle<()>) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match timeout(stop_timeout(component), handle).await {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(VmWatchError::component(
                    component.to_string(),
                    format!("task failed: {}", e),
                ))
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(VmWatchError::system(format!(
                    "{} component stop timeout",
                    component
                )))
            }
        }
    }
}
