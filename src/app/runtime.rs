use super::{MonitorApp, ShutdownReason};
use crate::error::Result;
use tracing::info;

impl MonitorApp {
    /// Run until the operator stops the monitor or a signal arrives, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("vmwatch is running for VM {}", self.config.vm.name);

        let reason = self.wait_for_shutdown().await;
        info!("Shutdown initiated: {:?}", reason);

        // Signals go through the control surface so they are reported like any other stop
        if let ShutdownReason::Signal(_) = reason {
            self.control.stop();
        }

        let exit_code = self.shutdown().await?;

        info!("vmwatch shutdown complete");
        Ok(exit_code)
    }

    async fn wait_for_shutdown(&self) -> ShutdownReason {
        tokio::select! {
            _ = self.store.stopped() => ShutdownReason::UserRequest,
            reason = wait_for_signal() => reason,
        }
    }
}

/// Resolve on SIGINT or, on Unix, SIGTERM
async fn wait_for_signal() -> ShutdownReason {
    let sigint = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT signal (Ctrl+C)"),
            Err(e) => {
                tracing::warn!("Unable to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        }
        ShutdownReason::Signal("SIGINT".to_string())
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                tracing::warn!("Unable to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
        ShutdownReason::Signal("SIGTERM".to_string())
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<ShutdownReason>();

    tokio::select! {
        reason = sigint => reason,
        reason = sigterm => reason,
    }
}
