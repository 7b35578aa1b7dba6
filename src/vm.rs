use crate::error::VmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Upper bound for a single VBoxManage invocation
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Marker VBoxManage prints in `showvminfo` for a running machine
const RUNNING_MARKER: &str = "running (since";

/// Front-end the VM is started with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    Headless,
    Gui,
    Separate,
}

impl StartMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StartMode::Headless => "headless",
            StartMode::Gui => "gui",
            StartMode::Separate => "separate",
        }
    }
}

impl fmt::Display for StartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issues power-state commands to a named VM.
///
/// Every call may block for a while and may fail; callers treat failures as
/// reportable, never fatal.
#[async_trait]
pub trait VmController: Send + Sync {
    async fn is_running(&self, name: &str) -> Result<bool, VmError>;

    async fn power_off(&self, name: &str) -> Result<(), VmError>;

    async fn start(&self, name: &str, mode: StartMode) -> Result<(), VmError>;
}

/// [`VmController`] backed by the VirtualBox `VBoxManage` CLI
pub struct VBoxManageController {
    program: String,
}

impl VBoxManageController {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run VBoxManage with `args`, returning stdout on a zero exit status
    async fn run(&self, args: &[&str]) -> Result<String, VmError> {
        let command_line = format!("{} {}", self.program, args.join(" "));
        debug!("Running {}", command_line);

        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(COMMAND_TIMEOUT, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(VmError::Spawn {
                    program: self.program.clone(),
                    details: e.to_string(),
                })
            }
            Err(_) => {
                return Err(VmError::Unavailable {
                    details: format!("'{}' did not finish within {:?}", command_line, COMMAND_TIMEOUT),
                })
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(VmError::CommandFailed {
                command: command_line,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl VmController for VBoxManageController {
    async fn is_running(&self, name: &str) -> Result<bool, VmError> {
        let info = self.run(&["showvminfo", name]).await?;
        Ok(info.contains(RUNNING_MARKER))
    }

    async fn power_off(&self, name: &str) -> Result<(), VmError> {
        self.run(&["controlvm", name, "poweroff"]).await?;
        info!("VM {} powered off", name);
        Ok(())
    }

    async fn start(&self, name: &str, mode: StartMode) -> Result<(), VmError> {
        self.run(&["startvm", name, "--type", mode.as_str()]).await?;
        info!("VM {} started ({})", name, mode);
        Ok(())
    }
}
