use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use super::editor::erase_sequence;
use super::error::ShellError;
use super::filter::{FilterConfig, OutputFilter};
use super::strategy::LaunchSpec;
use super::types::{AppEvent, OutputStream, SessionExit, SessionId, SessionState};
use super::workdir::WorkingDirectoryContext;

const READ_CHUNK: usize = 4096;
// Output may still be queued in the channel when the exit is observed.
const STREAM_DRAIN_GRACE: Duration = Duration::from_millis(250);

pub(crate) struct ProcessSession {
    id: SessionId,
    label: String,
    child: Child,
    stdin: Option<ChildStdin>,
    state: SessionState,
    interactive: bool,
    cooked: Option<CookedLine>,
    has_output: bool,
    filter: OutputFilter,
    open_streams: u8,
    exit: Option<(SessionExit, Instant)>,
    terminating: bool,
    killed: bool,
}

impl ProcessSession {
    pub(crate) fn spawn(
        id: SessionId,
        spec: &LaunchSpec,
        workdir: &WorkingDirectoryContext,
        filter: FilterConfig,
        tx: &Sender<AppEvent>,
    ) -> Result<Self, ShellError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(workdir.path())
            .env("PATH", workdir.augmented_path())
            .env("TERM", "xterm-256color")
            .env("FORCE_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so signals reach helper-spawned grandchildren.
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| ShellError::from_spawn(&spec.label, err))?;
        let mut session = Self {
            id,
            label: spec.label.clone(),
            stdin: child.stdin.take(),
            state: SessionState::Starting,
            interactive: spec.interactive,
            cooked: spec.cooked.then(CookedLine::default),
            has_output: false,
            filter: OutputFilter::new(filter),
            open_streams: 0,
            exit: None,
            terminating: false,
            killed: false,
            child,
        };

        if let Some(stdout) = session.child.stdout.take() {
            spawn_reader(stdout, id, OutputStream::Stdout, tx.clone());
            session.open_streams += 1;
        }
        if let Some(stderr) = session.child.stderr.take() {
            spawn_reader(stderr, id, OutputStream::Stderr, tx.clone());
            session.open_streams += 1;
        }
        session.state = SessionState::Running;
        tracing::info!(
            id,
            program = %spec.program,
            args = ?spec.args,
            pid = session.child.id(),
            "session started"
        );
        Ok(session)
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub(crate) fn has_output(&self) -> bool {
        self.has_output
    }

    pub(crate) fn pid(&self) -> u32 {
        self.child.id()
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> Result<(), ShellError> {
        let stdin = self.stdin.as_mut().ok_or(ShellError::InputClosed)?;
        let result = stdin.write_all(data).and_then(|_| stdin.flush());
        if let Err(err) = result {
            if err.kind() == ErrorKind::BrokenPipe {
                self.stdin = None;
                return Err(ShellError::InputClosed);
            }
            return Err(ShellError::Io(err));
        }
        Ok(())
    }

    /// Delivers keystrokes. Returns the text to echo locally, if any.
    pub(crate) fn send_input(&mut self, data: &[u8]) -> Result<String, ShellError> {
        let Some(cooked) = self.cooked.as_mut() else {
            self.write(data)?;
            return Ok(String::new());
        };
        let out = cooked.feed(data);
        if !out.send.is_empty() {
            self.write(&out.send)?;
        }
        if out.eof {
            self.stdin = None;
        }
        Ok(out.echo)
    }

    /// Forwards the raw interrupt byte. Without a pty nothing turns it into a
    /// signal, so cooked sessions also get SIGINT.
    pub(crate) fn interrupt(&mut self) -> Result<(), ShellError> {
        if let Some(cooked) = self.cooked.as_mut() {
            cooked.pending.clear();
            #[cfg(unix)]
            {
                crate::signal_process_group(self.child.id(), libc::SIGINT);
            }
        }
        self.write(&[0x03])
    }

    /// Runs a chunk through the session's output filter.
    pub(crate) fn accept_output(&mut self, stream: OutputStream, data: &[u8]) -> Vec<u8> {
        if !data.is_empty() {
            self.has_output = true;
        }
        self.filter.process(stream, data)
    }

    /// Marks a stream finished and returns any output the filter still held.
    pub(crate) fn stream_closed(&mut self, stream: OutputStream) -> Vec<u8> {
        self.open_streams = self.open_streams.saturating_sub(1);
        self.filter.flush(stream)
    }

    /// Sends the graceful signal. Returns false when the process is already gone.
    pub(crate) fn terminate(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        self.terminating = true;
        tracing::info!(id = self.id, pid = self.child.id(), "terminating session");
        #[cfg(unix)]
        {
            crate::signal_process_group(self.child.id(), libc::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
        true
    }

    pub(crate) fn force_kill(&mut self) {
        if self.exit.is_some() || self.killed {
            return;
        }
        self.killed = true;
        tracing::warn!(id = self.id, pid = self.child.id(), "force killing session");
        #[cfg(unix)]
        {
            crate::signal_process_group(self.child.id(), libc::SIGKILL);
        }
        let _ = self.child.kill();
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.terminating
    }

    /// Returns the exit once the process is gone and its streams drained.
    pub(crate) fn poll_exit(&mut self, now: Instant) -> Option<SessionExit> {
        if self.exit.is_none() {
            let observed = match self.child.try_wait() {
                Ok(Some(status)) => Some(exit_from_status(status)),
                Ok(None) => None,
                Err(err) => {
                    tracing::warn!(id = self.id, error = %err, "session wait failed");
                    Some(SessionExit {
                        code: None,
                        signal: None,
                        errored: true,
                    })
                }
            };
            if let Some(exit) = observed {
                self.state = if exit.errored {
                    SessionState::Errored
                } else {
                    SessionState::Exited
                };
                self.stdin = None;
                self.exit = Some((exit, now));
            }
        }

        let (exit, seen_at) = self.exit?;
        if self.open_streams == 0 || now.saturating_duration_since(seen_at) >= STREAM_DRAIN_GRACE {
            Some(exit)
        } else {
            None
        }
    }

    /// Non-blocking reap of a detached session. `force` escalates to SIGKILL.
    /// Returns true once the process is gone.
    pub(crate) fn reap(&mut self, force: bool) -> bool {
        if self.exit.is_some() {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(id = self.id, error = %err, "reap failed");
                return true;
            }
        }
        if force {
            self.force_kill();
        }
        false
    }

    /// Kills and waits, bounded by `grace`. Only used when the panel closes.
    pub(crate) fn shutdown(mut self, grace: Duration) {
        if !self.terminating && !self.terminate() {
            return;
        }
        let started = Instant::now();
        while started.elapsed() < grace {
            if self.reap(false) {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        self.force_kill();
        let _ = self.child.wait();
    }
}

#[derive(Debug, Default)]
struct CookedLine {
    pending: String,
}

#[derive(Debug, Default)]
struct CookedOutput {
    echo: String,
    send: Vec<u8>,
    eof: bool,
}

impl CookedLine {
    fn feed(&mut self, data: &[u8]) -> CookedOutput {
        let mut out = CookedOutput::default();
        let text = String::from_utf8_lossy(data);
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\r' | '\n' => {
                    out.send.extend_from_slice(self.pending.as_bytes());
                    out.send.push(b'\n');
                    out.echo.push_str("\r\n");
                    self.pending.clear();
                    // CR LF from a paste is one line end.
                    if ch == '\r' && chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                }
                '\u{7f}' | '\u{8}' => {
                    if let Some(removed) = self.pending.pop() {
                        out.echo.push_str(&erase_sequence(removed));
                    }
                }
                // Ctrl+D: flush a partial line, or end of input on an empty one.
                '\u{4}' => {
                    if self.pending.is_empty() {
                        out.eof = true;
                        break;
                    }
                    out.send.extend_from_slice(self.pending.as_bytes());
                    self.pending.clear();
                }
                '\u{1b}' => {
                    if matches!(chars.peek(), Some('[') | Some('O')) {
                        chars.next();
                        for c in chars.by_ref() {
                            if ('@'..='~').contains(&c) {
                                break;
                            }
                        }
                    } else {
                        chars.next();
                    }
                }
                c if c == '\t' || !c.is_control() => {
                    self.pending.push(c);
                    out.echo.push(c);
                }
                _ => {}
            }
        }
        out
    }
}

fn exit_from_status(status: ExitStatus) -> SessionExit {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;
    SessionExit {
        code: status.code(),
        signal,
        errored: false,
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    id: SessionId,
    stream: OutputStream,
    tx: Sender<AppEvent>,
) {
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let event = AppEvent::SessionOutput {
                        id,
                        stream,
                        data: buf[..n].to_vec(),
                    };
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(AppEvent::SessionStreamClosed { id, stream });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooked_backspace_erases_wide_chars_by_width() {
        let mut line = CookedLine::default();
        let out = line.feed("a日\u{7f}\u{7f}b\r".as_bytes());
        assert_eq!(out.echo, "a日\u{8} \u{8}\u{8} \u{8}\u{8} \u{8}b\r\n");
        assert_eq!(out.send, b"b\n");
    }

    #[test]
    fn cooked_ctrl_d_on_empty_line_ends_input() {
        let mut line = CookedLine::default();
        assert!(line.feed(b"\x04").eof);
        let out = line.feed(b"ab\x04");
        assert!(!out.eof);
        assert_eq!(out.send, b"ab");
    }
}
