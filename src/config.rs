use crate::indicator::RendererKind;
use crate::vm::StartMode;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VmWatchConfig {
    pub vm: VmConfig,
    pub probe: ProbeConfig,
    pub monitor: MonitorConfig,
    pub indicator: IndicatorConfig,
    pub control: ControlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VmConfig {
    /// Name of the virtual machine as known to the VM manager
    #[serde(default = "default_vm_name")]
    pub name: String,

    /// Path to the VM manager executable (VBoxManage)
    #[serde(default = "default_manager_path")]
    pub manager_path: String,

    /// Front-end used when starting the VM
    #[serde(default = "default_start_mode")]
    pub start_mode: StartMode,

    /// Power-cycle the VM once before monitoring starts
    #[serde(default = "default_start_on_launch")]
    pub start_on_launch: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProbeConfig {
    /// URL of the monitored service
    #[serde(default = "default_probe_url")]
    pub url: String,

    /// Upper bound for a single probe, in seconds
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,

    /// HTTP status treated as "service available"
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    /// Wait after (re)starting the VM before probing, in seconds
    #[serde(default = "default_boot_grace")]
    pub boot_grace_seconds: u64,

    /// Interval between probes, in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,

    /// Pause before the start command of every recovery, in seconds
    #[serde(default = "default_power_off_grace")]
    pub power_off_grace_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndicatorConfig {
    /// Refresh period of the status indicator, in milliseconds
    #[serde(default = "default_refresh_millis")]
    pub refresh_millis: u64,

    /// Which renderer draws the indicator
    #[serde(default = "default_renderer")]
    pub renderer: RendererKind,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControlConfig {
    /// Accept p/r/q keys on the controlling terminal
    #[serde(default = "default_keyboard")]
    pub keyboard: bool,

    /// Bind address for the HTTP control surface; disabled when unset
    pub http_bind: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    /// Append-only log file; file logging is disabled when unset
    pub file: Option<String>,
}

impl VmWatchConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("vm.name", default_vm_name())?
            .set_default("vm.manager_path", default_manager_path())?
            .set_default("vm.start_mode", default_start_mode().as_str())?
            .set_default("vm.start_on_launch", default_start_on_launch())?
            .set_default("probe.url", default_probe_url())?
            .set_default("probe.timeout_seconds", default_probe_timeout())?
            .set_default("probe.expected_status", default_expected_status() as u64)?
            .set_default("monitor.boot_grace_seconds", default_boot_grace())?
            .set_default("monitor.check_interval_seconds", default_check_interval())?
            .set_default("monitor.power_off_grace_seconds", default_power_off_grace())?
            .set_default("indicator.refresh_millis", default_refresh_millis())?
            .set_default("indicator.renderer", default_renderer().as_str())?
            .set_default("control.keyboard", default_keyboard())?
            .add_source(File::with_name(&path_str).required(false))
            // VMWATCH_PROBE__URL, VMWATCH_MONITOR__CHECK_INTERVAL_SECONDS, ...
            .add_source(
                Environment::with_prefix("VMWATCH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: VmWatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vm.name.trim().is_empty() {
            return Err(ConfigError::Message("VM name must not be empty".to_string()));
        }

        if self.vm.manager_path.trim().is_empty() {
            return Err(ConfigError::Message(
                "VM manager path must not be empty".to_string(),
            ));
        }

        let url = reqwest::Url::parse(&self.probe.url)
            .map_err(|e| ConfigError::Message(format!("Invalid probe URL '{}': {}", self.probe.url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Message(format!(
                "Probe URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.probe.timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Probe timeout must be greater than 0".to_string(),
            ));
        }

        if !(100..=599).contains(&self.probe.expected_status) {
            return Err(ConfigError::Message(format!(
                "Expected status {} is not a valid HTTP status",
                self.probe.expected_status
            )));
        }

        if self.monitor.check_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Check interval must be greater than 0".to_string(),
            ));
        }

        if self.indicator.refresh_millis == 0 {
            return Err(ConfigError::Message(
                "Indicator refresh period must be greater than 0".to_string(),
            ));
        }

        if let Some(bind) = &self.control.http_bind {
            bind.parse::<SocketAddr>().map_err(|e| {
                ConfigError::Message(format!("Invalid control.http_bind '{}': {}", bind, e))
            })?;
        }

        Ok(())
    }

    /// Render the configuration as TOML, in the layout `load_from_file` reads
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Message(format!("Failed to serialize configuration: {}", e)))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_seconds)
    }

    pub fn boot_grace(&self) -> Duration {
        Duration::from_secs(self.monitor.boot_grace_seconds)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.check_interval_seconds)
    }

    pub fn power_off_grace(&self) -> Duration {
        Duration::from_secs(self.monitor.power_off_grace_seconds)
    }

    pub fn indicator_refresh(&self) -> Duration {
        Duration::from_millis(self.indicator.refresh_millis)
    }
}

impl Default for VmWatchConfig {
    fn default() -> Self {
        Self {
            vm: VmConfig {
                name: default_vm_name(),
                manager_path: default_manager_path(),
                start_mode: default_start_mode(),
                start_on_launch: default_start_on_launch(),
            },
            probe: ProbeConfig {
                url: default_probe_url(),
                timeout_seconds: default_probe_timeout(),
                expected_status: default_expected_status(),
            },
            monitor: MonitorConfig {
                boot_grace_seconds: default_boot_grace(),
                check_interval_seconds: default_check_interval(),
                power_off_grace_seconds: default_power_off_grace(),
            },
            indicator: IndicatorConfig {
                refresh_millis: default_refresh_millis(),
                renderer: default_renderer(),
            },
            control: ControlConfig {
                keyboard: default_keyboard(),
                http_bind: None,
            },
            logging: LoggingConfig::default(),
        }
    }
}

// Default value functions
fn default_vm_name() -> String {
    "HomeAssistant".to_string()
}
fn default_manager_path() -> String {
    "VBoxManage".to_string()
}
fn default_start_mode() -> StartMode {
    StartMode::Headless
}
fn default_start_on_launch() -> bool {
    true
}

fn default_probe_url() -> String {
    "http://127.0.0.1:8123/".to_string()
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_expected_status() -> u16 {
    200
}

fn default_boot_grace() -> u64 {
    60
}
fn default_check_interval() -> u64 {
    30
}
fn default_power_off_grace() -> u64 {
    5
}

fn default_refresh_millis() -> u64 {
    1000
}
fn default_renderer() -> RendererKind {
    RendererKind::Terminal
}

fn default_keyboard() -> bool {
    true
}
