use crate::state::{Status, StatusStore};
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};
use crossterm::{cursor, queue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Visual representation of a [`Status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    Neutral,
    Ok,
    Alert,
    Warning,
}

impl From<Status> for Indicator {
    fn from(status: Status) -> Self {
        match status {
            Status::Unknown => Indicator::Neutral,
            Status::Online => Indicator::Ok,
            Status::Offline => Indicator::Alert,
            Status::Restarting => Indicator::Warning,
        }
    }
}

impl Indicator {
    pub fn color(self) -> Color {
        match self {
            Indicator::Neutral => Color::DarkGrey,
            Indicator::Ok => Color::Green,
            Indicator::Alert => Color::Red,
            Indicator::Warning => Color::Yellow,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Indicator::Neutral => "unknown",
            Indicator::Ok => "online",
            Indicator::Alert => "offline",
            Indicator::Warning => "restarting",
        }
    }
}

/// Draws the indicator somewhere an operator can see it
pub trait IndicatorRenderer: Send + Sync {
    fn render(&self, indicator: Indicator);

    /// Remove whatever was drawn; called once when the presenter stops
    fn clear(&self) {}
}

/// Renderer selection from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    Terminal,
    Log,
    None,
}

impl RendererKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RendererKind::Terminal => "terminal",
            RendererKind::Log => "log",
            RendererKind::None => "none",
        }
    }

    pub fn build(self, vm_name: &str) -> Option<Arc<dyn IndicatorRenderer>> {
        match self {
            RendererKind::Terminal => Some(Arc::new(TerminalRenderer::new(vm_name))),
            RendererKind::Log => Some(Arc::new(LogRenderer::new(vm_name))),
            RendererKind::None => None,
        }
    }
}

/// Single colored status line redrawn in place on stderr
pub struct TerminalRenderer {
    vm_name: String,
}

impl TerminalRenderer {
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
        }
    }

    fn draw(&self, indicator: Indicator) -> std::io::Result<()> {
        let mut stderr = std::io::stderr().lock();
        queue!(
            stderr,
            cursor::MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            SetForegroundColor(indicator.color()),
            Print("●"),
            ResetColor,
            Print(format!(" {}: {}", self.vm_name, indicator.label())),
        )?;
        stderr.flush()
    }
}

impl IndicatorRenderer for TerminalRenderer {
    fn render(&self, indicator: Indicator) {
        if let Err(e) = self.draw(indicator) {
            debug!("Failed to draw status line: {}", e);
        }
    }

    fn clear(&self) {
        let mut stderr = std::io::stderr().lock();
        let _ = queue!(stderr, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine));
        let _ = stderr.flush();
    }
}

/// Writer for log output sharing the terminal with [`TerminalRenderer`] and
/// raw-mode keyboard input.
///
/// Each write first clears the status line, and every bare `\n` becomes
/// `\r\n` since raw mode does not return the cursor to column 0. The
/// status line is redrawn on the next refresh.
pub struct StatusLineWriter<W: Write> {
    inner: W,
}

impl<W: Write> StatusLineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for StatusLineWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut out = Vec::with_capacity(buf.len() + 16);
        queue!(out, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine))?;

        let mut previous = None;
        for &byte in buf {
            if byte == b'\n' && previous != Some(b'\r') {
                out.push(b'\r');
            }
            out.push(byte);
            previous = Some(byte);
        }

        self.inner.write_all(&out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Logs the indicator whenever the drawn representation changes
pub struct LogRenderer {
    vm_name: String,
    shown: Mutex<Option<Indicator>>,
}

impl LogRenderer {
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            shown: Mutex::new(None),
        }
    }
}

impl IndicatorRenderer for LogRenderer {
    fn render(&self, indicator: Indicator) {
        let mut shown = self.shown.lock();
        if *shown != Some(indicator) {
            *shown = Some(indicator);
            info!("Indicator for {}: {}", self.vm_name, indicator.label());
        }
    }
}

/// Periodically maps the current status to an [`Indicator`] and renders it.
///
/// Every tick re-reads the store; nothing from a previous tick is reused.
pub struct IndicatorPresenter {
    store: Arc<StatusStore>,
    renderer: Arc<dyn IndicatorRenderer>,
    refresh: Duration,
}

impl IndicatorPresenter {
    pub fn new(store: Arc<StatusStore>, renderer: Arc<dyn IndicatorRenderer>, refresh: Duration) -> Self {
        Self {
            store,
            renderer,
            refresh,
        }
    }

    pub fn current(&self) -> Indicator {
        Indicator::from(self.store.status())
    }

    /// Render on every refresh tick until the stop signal fires
    pub async fn run(&self) {
        if self.refresh.is_zero() {
            warn!("Indicator refresh period is zero, presenter disabled");
            return;
        }

        let mut ticker = interval(self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.store.stopped() => break,
                _ = ticker.tick() => self.renderer.render(self.current()),
            }
        }

        self.renderer.clear();
        debug!("Indicator presenter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingRenderer;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Indicator::from(Status::Unknown), Indicator::Neutral);
        assert_eq!(Indicator::from(Status::Online), Indicator::Ok);
        assert_eq!(Indicator::from(Status::Offline), Indicator::Alert);
        assert_eq!(Indicator::from(Status::Restarting), Indicator::Warning);
    }

    #[test]
    fn test_representations_are_distinct() {
        let all = [
            Indicator::Neutral,
            Indicator::Ok,
            Indicator::Alert,
            Indicator::Warning,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.color(), b.color());
                assert_ne!(a.label(), b.label());
            }
        }
    }

    #[test]
    fn test_renderer_kind_build() {
        assert!(RendererKind::Terminal.build("vm").is_some());
        assert!(RendererKind::Log.build("vm").is_some());
        assert!(RendererKind::None.build("vm").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presenter_rereads_status_every_tick() {
        let store = Arc::new(StatusStore::new());
        let renderer = Arc::new(RecordingRenderer::new());
        let presenter = Arc::new(IndicatorPresenter::new(
            Arc::clone(&store),
            renderer.clone(),
            Duration::from_secs(1),
        ));

        let task = {
            let presenter = Arc::clone(&presenter);
            tokio::spawn(async move { presenter.run().await })
        };

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(1500)).await;
        store.transition(Status::Online).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        store.transition(Status::Offline).unwrap();
        store.transition(Status::Restarting).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        store.request_stop();
        task.await.unwrap();

        assert_eq!(
            renderer.frames(),
            vec![Indicator::Neutral, Indicator::Neutral, Indicator::Ok, Indicator::Warning]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_presenter_exits_on_stop() {
        let store = Arc::new(StatusStore::new());
        let renderer = Arc::new(RecordingRenderer::new());
        let presenter = IndicatorPresenter::new(
            Arc::clone(&store),
            renderer.clone(),
            Duration::from_secs(1),
        );

        store.request_stop();
        presenter.run().await;

        assert!(renderer.frames().is_empty());
    }

    #[test]
    fn test_status_line_writer_returns_to_column_zero() {
        let mut writer = StatusLineWriter::new(Vec::new());
        writer
            .write_all(b"WARN service unreachable\nretrying\r\n")
            .unwrap();

        let out = String::from_utf8(writer.into_inner()).unwrap();
        // Status line is cleared before the record
        assert!(out.starts_with("\x1b["));
        assert!(out.ends_with("WARN service unreachable\r\nretrying\r\n"));
        assert_eq!(out.matches('\n').count(), out.matches("\r\n").count());
    }

    #[test]
    fn test_log_renderer_only_logs_changes() {
        let renderer = LogRenderer::new("vm");
        renderer.render(Indicator::Ok);
        renderer.render(Indicator::Ok);
        assert_eq!(*renderer.shown.lock(), Some(Indicator::Ok));
        renderer.render(Indicator::Alert);
        assert_eq!(*renderer.shown.lock(), Some(Indicator::Alert));
    }
}
