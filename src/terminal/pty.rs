use std::io::{Read, Write};
use std::thread;

use crossbeam_channel::Sender;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use super::error::ShellError;
use super::types::AppEvent;
use super::workdir::WorkingDirectoryContext;

/// A login shell running inside a real pseudo-terminal.
pub(crate) struct PtyShell {
    generation: u64,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyShell {
    pub(crate) fn spawn(
        generation: u64,
        shell: &str,
        workdir: &WorkingDirectoryContext,
        cols: u16,
        rows: u16,
        tx: Sender<AppEvent>,
    ) -> Result<Self, ShellError> {
        let pair = native_pty_system()
            .openpty(pty_size(cols, rows))
            .map_err(|e| ShellError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(workdir.path());
        cmd.env("PATH", workdir.augmented_path());
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ShellError::Pty(format!("{shell}: {e}")))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ShellError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ShellError::Pty(e.to_string()))?;

        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let event = AppEvent::PtyOutput {
                            generation,
                            data: buf[..n].to_vec(),
                        };
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
            }
            let _ = tx.send(AppEvent::PtyClosed { generation });
        });

        tracing::info!(shell, pid = ?child.process_id(), "pty shell started");
        Ok(Self {
            generation,
            master: pair.master,
            writer,
            child,
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> Result<(), ShellError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    pub(crate) fn resize(&mut self, cols: u16, rows: u16) -> Result<(), ShellError> {
        self.master
            .resize(pty_size(cols, rows))
            .map_err(|e| ShellError::Pty(e.to_string()))
    }

    /// Kills the shell and everything it started.
    pub(crate) fn close(mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.process_id() {
                crate::signal_process_group(pid, libc::SIGTERM);
                thread::sleep(std::time::Duration::from_millis(100));
                crate::signal_process_group(pid, libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        tracing::info!("pty shell closed");
    }
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows: rows.max(1),
        cols: cols.max(1),
        pixel_width: 0,
        pixel_height: 0,
    }
}
