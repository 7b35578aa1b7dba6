use crate::error::{Result, VmWatchError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Current belief about the reachability of the monitored service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unknown,
    Online,
    Offline,
    Restarting,
}

impl Status {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Staying in the same state is not a transition and is handled by the
    /// caller.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Unknown, Status::Online)
                | (Status::Unknown, Status::Offline)
                | (Status::Online, Status::Offline)
                | (Status::Offline, Status::Restarting)
                | (Status::Restarting, Status::Online)
                | (Status::Restarting, Status::Offline)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Online => "online",
            Status::Offline => "offline",
            Status::Restarting => "restarting",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The monitor's mutable state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorState {
    pub status: Status,
    pub checking_enabled: bool,
    pub running: bool,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            status: Status::Unknown,
            checking_enabled: true,
            running: true,
        }
    }
}

/// Single synchronization boundary around [`MonitorState`].
///
/// Every read and write is one short critical section, so no caller sees a
/// half-applied update. The store also owns the stop signal that fires when
/// `running` is cleared, letting sleeping tasks wake without polling the flag.
pub struct StatusStore {
    state: Mutex<MonitorState>,
    stop_token: CancellationToken,
}

impl StatusStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            stop_token: CancellationToken::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    /// Consistent copy of all three fields
    pub fn snapshot(&self) -> MonitorState {
        *self.state.lock()
    }

    /// Move `status` to `next`.
    ///
    /// Returns the previous status when the value changed and `None` when it
    /// already equalled `next`. Edges outside the state machine are rejected
    /// and leave the state untouched.
    pub fn transition(&self, next: Status) -> Result<Option<Status>> {
        let mut state = self.state.lock();
        let current = state.status;

        if current == next {
            return Ok(None);
        }

        if !current.can_transition_to(next) {
            return Err(VmWatchError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        state.status = next;
        drop(state);

        debug!("Status {} -> {}", current, next);
        Ok(Some(current))
    }

    pub fn checking_enabled(&self) -> bool {
        self.state.lock().checking_enabled
    }

    /// Set `checking_enabled`, returning the previous value
    pub fn set_checking_enabled(&self, enabled: bool) -> bool {
        let mut state = self.state.lock();
        std::mem::replace(&mut state.checking_enabled, enabled)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Clear `running` and fire the stop signal.
    ///
    /// Returns `true` only for the call that actually performed the shutdown
    /// request; later calls are no-ops.
    pub fn request_stop(&self) -> bool {
        let was_running = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.running, false)
        };

        // Fired after the flag is cleared so a woken task never reads running == true
        self.stop_token.cancel();
        was_running
    }

    /// Resolves once [`StatusStore::request_stop`] has been called
    pub async fn stopped(&self) {
        self.stop_token.cancelled().await
    }

    /// Child token cancelled together with the store's stop signal
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.child_token()
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}
