use super::ControlSurface;
use crate::error::Result;
use crate::events::ControlAction;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Terminal key bindings for the control surface: `p` pause, `r` resume,
/// `q`, Esc or Ctrl+C stop.
pub struct KeyboardControl {
    control: Arc<ControlSurface>,
    cancellation_token: CancellationToken,
}

/// Map a key press to the control action it triggers
pub fn action_for_key(key: &KeyEvent) -> Option<ControlAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(ControlAction::Stop)
        }
        KeyCode::Char('p') | KeyCode::Char('P') => Some(ControlAction::Pause),
        KeyCode::Char('r') | KeyCode::Char('R') => Some(ControlAction::Resume),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(ControlAction::Stop),
        _ => None,
    }
}

impl KeyboardControl {
    pub fn new(control: Arc<ControlSurface>, cancellation_token: CancellationToken) -> Self {
        Self {
            control,
            cancellation_token,
        }
    }

    /// Start listening for key presses on a blocking thread
    pub fn start(&self) -> Result<JoinHandle<()>> {
        info!("Keyboard control active: [p]ause, [r]esume, [q]uit");

        let control = Arc::clone(&self.control);
        let cancellation_token = self.cancellation_token.clone();

        enable_raw_mode()?;

        let handle = task::spawn_blocking(move || {
            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard control stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        if let Ok(Event::Key(key_event)) = event::read() {
                            match action_for_key(&key_event) {
                                Some(action) => {
                                    info!("Key {:?} -> {:?}", key_event.code, action);
                                    control.dispatch(action);
                                    if action == ControlAction::Stop {
                                        break;
                                    }
                                }
                                None => debug!("Ignoring key {:?}", key_event.code),
                            }
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }

            debug!("Keyboard control task exited");
        });

        Ok(handle)
    }

    /// Stop the keyboard handler and restore the terminal
    pub fn stop(&self) {
        self.cancellation_token.cancel();
        let _ = disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::state::StatusStore;
    use crossterm::event::KeyEventState;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_key_bindings() {
        assert_eq!(action_for_key(&press(KeyCode::Char('p'))), Some(ControlAction::Pause));
        assert_eq!(action_for_key(&press(KeyCode::Char('R'))), Some(ControlAction::Resume));
        assert_eq!(action_for_key(&press(KeyCode::Char('q'))), Some(ControlAction::Stop));
        assert_eq!(action_for_key(&press(KeyCode::Esc)), Some(ControlAction::Stop));
        assert_eq!(action_for_key(&press(KeyCode::Char(' '))), None);
        assert_eq!(
            action_for_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(ControlAction::Stop)
        );
    }

    #[test]
    fn test_key_release_is_ignored() {
        let release = KeyEvent {
            code: KeyCode::Char('p'),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        };
        assert_eq!(action_for_key(&release), None);
    }

    #[test]
    fn test_stop_cancels_token() {
        let store = Arc::new(StatusStore::new());
        let control = Arc::new(ControlSurface::new(
            "vm",
            Arc::clone(&store),
            Arc::new(EventBus::new(4)),
        ));
        let handler = KeyboardControl::new(control, store.stop_token());

        handler.stop();
        assert!(handler.cancellation_token.is_cancelled());
        // Stopping the handler does not stop the monitor
        assert!(store.is_running());
    }
}
