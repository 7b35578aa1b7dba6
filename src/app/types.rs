/// Lifecycle of a background task owned by [`super::MonitorApp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Why the main loop returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM, by name
    Signal(String),
    /// Stop requested through a control front-end
    UserRequest,
}
