use std::time::Instant;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::settings::{Settings, ShellBackend};

mod dispatch;
mod display;
mod editor;
mod error;
mod filter;
mod input;
mod probe;
mod pty;
mod runtime;
mod session;
mod strategy;
#[cfg(test)]
mod tests;
mod types;
mod workdir;

pub(crate) use display::{CrosstermDisplay, TerminalDisplay};
pub(crate) use filter::FilterConfig;
pub(crate) use runtime::run_app;

use editor::{EditorSignal, LineEditor};
use error::ShellError;
use input::{tokenize, InputRouter, InputTarget, CTRL_C};
use probe::CommandLocator;
use pty::PtyShell;
use session::ProcessSession;
use strategy::LaunchSpec;
use types::{AppEvent, Deadline, DeadlineAction, SessionExit, SessionId, SessionState};
use workdir::WorkingDirectoryContext;

const BANNER: &str = "\u{1b}[1mpanelterm\u{1b}[0m built-in shell \u{1b}[2m(Ctrl+Q quits, F5 restarts)\u{1b}[0m\r\n";
const SLOW_START_HINT: &str = "claude is taking longer than expected to respond (Ctrl+C to stop)";
const GIVE_UP_NOTICE: &str = "no output from claude; stopping it";

/// The panel: owns the display, the single input binding and at most one session.
pub(crate) struct TerminalView<D: TerminalDisplay> {
    display: D,
    settings: Settings,
    locator: Box<dyn CommandLocator>,
    workdir: WorkingDirectoryContext,
    router: InputRouter,
    editor: LineEditor,
    session: Option<ProcessSession>,
    // Detached sessions still dying, with the instant they get SIGKILL.
    retired: Vec<(ProcessSession, Instant)>,
    pty: Option<PtyShell>,
    deadlines: Vec<Deadline>,
    next_id: u64,
    tx: Sender<AppEvent>,
    rx: Receiver<AppEvent>,
    pub(crate) should_quit: bool,
}

impl<D: TerminalDisplay> TerminalView<D> {
    pub(crate) fn new(
        display: D,
        settings: Settings,
        locator: Box<dyn CommandLocator>,
        workdir: WorkingDirectoryContext,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            display,
            settings,
            locator,
            workdir,
            router: InputRouter::new(),
            editor: LineEditor::new(),
            session: None,
            retired: Vec::new(),
            pty: None,
            deadlines: Vec::new(),
            next_id: 1,
            tx,
            rx,
            should_quit: false,
        }
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        self.display.focus()?;
        self.start_backend()
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.detach_session(Instant::now());
        let grace = self.settings.timings.kill_grace();
        for (session, _) in self.retired.drain(..) {
            session.shutdown(grace);
        }
        if let Some(pty) = self.pty.take() {
            pty.close();
        }
        self.deadlines.clear();
        self.router.bind(InputTarget::Detached);
        self.display.dispose()
    }

    pub(crate) fn restart(&mut self) -> Result<()> {
        tracing::info!("restarting terminal");
        self.detach_session(Instant::now());
        if let Some(pty) = self.pty.take() {
            pty.close();
        }
        self.deadlines.clear();
        self.editor.reset();
        self.display.clear()?;
        self.display.scroll_to_top()?;
        self.start_backend()
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.session.is_some() || self.pty.is_some()
    }

    pub(crate) fn session_state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(ProcessSession::state)
            .unwrap_or(SessionState::Idle)
    }

    pub(crate) fn resize(&mut self, cols: u16, rows: u16) {
        if let Some(pty) = self.pty.as_mut() {
            if let Err(err) = pty.resize(cols, rows) {
                tracing::warn!(error = %err, "pty resize failed");
            }
        }
    }

    fn start_backend(&mut self) -> Result<()> {
        match self.settings.backend {
            ShellBackend::Simulated => self.start_simulated_shell(),
            ShellBackend::Auto | ShellBackend::Pty => match self.start_pty_shell() {
                Ok(()) => Ok(()),
                Err(err) => {
                    tracing::warn!(error = %err, "pty shell unavailable; using built-in shell");
                    if self.settings.backend == ShellBackend::Pty {
                        self.display
                            .write_str(&format!("\u{1b}[31m{err}\u{1b}[0m\r\n"))?;
                    }
                    self.start_simulated_shell()
                }
            },
        }
    }

    fn start_pty_shell(&mut self) -> Result<(), ShellError> {
        let (cols, rows) = self.display.size();
        let generation = self.take_id();
        let shell = self.settings.shell_program();
        let mut pty = PtyShell::spawn(generation, &shell, &self.workdir, cols, rows, self.tx.clone())?;
        if self.settings.auto_run && !self.settings.default_command.trim().is_empty() {
            pty.write(format!("{}\r", self.settings.default_command.trim()).as_bytes())?;
        }
        self.pty = Some(pty);
        self.router.bind(InputTarget::Pty);
        Ok(())
    }

    fn start_simulated_shell(&mut self) -> Result<()> {
        self.router.bind(InputTarget::LineEditor);
        self.display.write_str(BANNER)?;
        self.show_prompt()?;
        let command = self.settings.default_command.trim().to_string();
        if self.settings.auto_run && !command.is_empty() {
            self.display.write_str(&format!("{command}\r\n"))?;
            self.dispatch_line(&command)?;
        }
        Ok(())
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(super) fn show_prompt(&mut self) -> Result<()> {
        let prompt = format!(
            "\u{1b}[36m{}\u{1b}[0m $ ",
            self.workdir.prompt_segment()
        );
        self.display.write_str(&prompt)
    }

    fn write_notice(&mut self, color: &str, text: &str) -> Result<()> {
        self.display
            .write_str(&format!("\u{1b}[{color}m{text}\u{1b}[0m\r\n"))
    }

    pub(crate) fn handle_input(&mut self, data: &[u8]) -> Result<()> {
        match self.router.target() {
            InputTarget::Detached => Ok(()),
            InputTarget::LineEditor => self.feed_editor(data),
            InputTarget::Session(id) => self.forward_to_session(id, data),
            InputTarget::Pty => {
                if let Some(pty) = self.pty.as_mut() {
                    if let Err(err) = pty.write(data) {
                        tracing::warn!(error = %err, "pty write failed");
                    }
                }
                Ok(())
            }
        }
    }

    fn feed_editor(&mut self, data: &[u8]) -> Result<()> {
        for token in tokenize(data) {
            if self.router.target() != InputTarget::LineEditor {
                // Keystrokes after a launching line are not replayed into the new session.
                tracing::debug!("dropping keystrokes typed ahead of a session start");
                break;
            }
            let outcome = self.editor.feed(token);
            if !outcome.echo.is_empty() {
                self.display.write_str(&outcome.echo)?;
            }
            match outcome.signal {
                Some(EditorSignal::CommandReady(line)) => self.dispatch_line(&line)?,
                Some(EditorSignal::ShowPrompt) => self.show_prompt()?,
                None => {}
            }
        }
        Ok(())
    }

    /// Delivers input in order, treating each interrupt byte on its own.
    fn forward_to_session(&mut self, id: SessionId, data: &[u8]) -> Result<()> {
        let mut parts = data.split(|byte| *byte == CTRL_C).peekable();
        while let Some(part) = parts.next() {
            if !part.is_empty() {
                self.send_to_session(id, part)?;
            }
            if parts.peek().is_some() {
                self.interrupt_session(id)?;
            }
        }
        Ok(())
    }

    fn interrupt_session(&mut self, id: SessionId) -> Result<()> {
        let Some(session) = self.session.as_mut().filter(|s| s.id() == id) else {
            return Ok(());
        };
        if !session.has_output() {
            self.display.write_str("^C\r\n")?;
            return self.escalate_kill(id, Instant::now());
        }
        if let Err(err) = session.interrupt() {
            tracing::debug!(id, error = %err, "interrupt not delivered");
        }
        Ok(())
    }

    fn send_to_session(&mut self, id: SessionId, data: &[u8]) -> Result<()> {
        let Some(session) = self.session.as_mut().filter(|s| s.id() == id) else {
            tracing::warn!(id, "input bound to a session that is gone");
            return Ok(());
        };
        match session.send_input(data) {
            Ok(echo) if !echo.is_empty() => self.display.write_str(&echo)?,
            Ok(_) => {}
            Err(err) => tracing::debug!(id, error = %err, "session input dropped"),
        }
        Ok(())
    }

    /// Graceful signal now, forceful after the grace period. A second request kills outright.
    fn escalate_kill(&mut self, id: SessionId, now: Instant) -> Result<()> {
        let Some(session) = self.session.as_mut().filter(|s| s.id() == id) else {
            return Ok(());
        };
        if session.is_terminating() {
            session.force_kill();
            return Ok(());
        }
        if session.terminate() {
            self.deadlines.push(Deadline {
                at: now + self.settings.timings.kill_grace(),
                session: id,
                action: DeadlineAction::ForceKill,
            });
        }
        Ok(())
    }

    pub(super) fn start_session(&mut self, spec: LaunchSpec) -> Result<()> {
        self.detach_session(Instant::now());
        let id = self.take_id();
        let filter = self.settings.timings.filter();
        match ProcessSession::spawn(id, &spec, &self.workdir, filter, &self.tx) {
            Ok(session) => {
                if spec.watchdog {
                    self.schedule_watchdog(id, Instant::now());
                }
                self.session = Some(session);
                self.router.bind(InputTarget::Session(id));
            }
            Err(err) => {
                tracing::warn!(program = %spec.program, error = %err, "spawn failed");
                self.display.write_str(&format!("{err}\r\n"))?;
                self.show_prompt()?;
            }
        }
        Ok(())
    }

    fn schedule_watchdog(&mut self, id: SessionId, now: Instant) {
        let timings = &self.settings.timings;
        let plan = [
            (timings.claude_nudge_ms, DeadlineAction::ClaudeNudge),
            (timings.claude_hint_ms, DeadlineAction::ClaudeSlowHint),
            (timings.claude_give_up_ms, DeadlineAction::ClaudeGiveUp),
        ];
        for (delay_ms, action) in plan {
            self.deadlines.push(Deadline {
                at: now + std::time::Duration::from_millis(delay_ms),
                session: id,
                action,
            });
        }
    }

    /// Signals the current session and leaves it for `tick` to reap.
    fn detach_session(&mut self, now: Instant) {
        if let Some(mut session) = self.session.take() {
            let id = session.id();
            self.deadlines.retain(|d| d.session != id);
            tracing::info!(id, pid = session.pid(), "detaching session");
            if session.terminate() {
                self.retired
                    .push((session, now + self.settings.timings.kill_grace()));
            }
        }
    }

    fn reap_retired(&mut self, now: Instant) {
        self.retired
            .retain_mut(|(session, force_at)| !session.reap(now >= *force_at));
    }

    fn finish_session(&mut self, exit: SessionExit) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let id = session.id();
        self.deadlines.retain(|d| d.session != id);
        self.router.bind(InputTarget::LineEditor);
        tracing::info!(id, interactive = session.is_interactive(), ?exit, "session ended");

        let clean = exit.code == Some(0) && exit.signal.is_none();
        let color = if clean { "2" } else { "33" };
        self.display.write_str("\r\n")?;
        self.write_notice(color, &exit.describe(session.label()))?;
        self.show_prompt()
    }

    pub(crate) fn handle_event(&mut self, event: AppEvent) -> Result<()> {
        match event {
            AppEvent::SessionOutput { id, stream, data } => {
                let Some(session) = self.session.as_mut().filter(|s| s.id() == id) else {
                    tracing::trace!(id, "dropping output from a detached session");
                    return Ok(());
                };
                tracing::trace!(id, ?stream, bytes = data.len(), "session output");
                let filtered = session.accept_output(stream, &data);
                if !filtered.is_empty() {
                    self.display.write(&filtered)?;
                    self.display.scroll_to_bottom()?;
                }
            }
            AppEvent::SessionStreamClosed { id, stream } => {
                if let Some(session) = self.session.as_mut().filter(|s| s.id() == id) {
                    tracing::debug!(id, ?stream, "session stream closed");
                    let held = session.stream_closed(stream);
                    if !held.is_empty() {
                        self.display.write(&held)?;
                    }
                }
            }
            AppEvent::PtyOutput { generation, data } => {
                if self.pty.as_ref().map(PtyShell::generation) == Some(generation) {
                    self.display.write(&data)?;
                }
            }
            AppEvent::PtyClosed { generation } => {
                if self.pty.as_ref().map(PtyShell::generation) == Some(generation) {
                    if let Some(pty) = self.pty.take() {
                        pty.close();
                    }
                    self.display.write_str("\r\n")?;
                    self.write_notice("2", "[shell exited; switching to the built-in shell]")?;
                    self.start_simulated_shell()?;
                }
            }
        }
        Ok(())
    }

    /// Drains queued process events. Returns true when anything was handled.
    pub(crate) fn pump_events(&mut self) -> Result<bool> {
        let mut handled = false;
        while let Ok(event) = self.rx.try_recv() {
            handled = true;
            self.handle_event(event)?;
        }
        Ok(handled)
    }

    pub(crate) fn tick(&mut self, now: Instant) -> Result<()> {
        let (due, pending): (Vec<Deadline>, Vec<Deadline>) =
            self.deadlines.drain(..).partition(|d| d.at <= now);
        self.deadlines = pending;
        for deadline in due {
            self.fire_deadline(deadline, now)?;
        }

        self.reap_retired(now);
        let exit = self.session.as_mut().and_then(|s| s.poll_exit(now));
        if let Some(exit) = exit {
            self.finish_session(exit)?;
        }
        Ok(())
    }

    fn fire_deadline(&mut self, deadline: Deadline, now: Instant) -> Result<()> {
        let id = deadline.session;
        let Some(session) = self.session.as_mut().filter(|s| s.id() == id) else {
            return Ok(());
        };
        match deadline.action {
            DeadlineAction::ForceKill => session.force_kill(),
            _ if session.has_output() => {}
            DeadlineAction::ClaudeNudge => {
                tracing::debug!(id, "no output yet; nudging with a newline");
                if let Err(err) = session.write(b"\n") {
                    tracing::debug!(id, error = %err, "nudge failed");
                }
            }
            DeadlineAction::ClaudeSlowHint => self.write_notice("33", SLOW_START_HINT)?,
            DeadlineAction::ClaudeGiveUp => {
                tracing::warn!(id, "no output before the give-up deadline");
                self.write_notice("31", GIVE_UP_NOTICE)?;
                self.escalate_kill(id, now)?;
            }
        }
        Ok(())
    }
}
