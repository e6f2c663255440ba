use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::workdir::WorkingDirectoryContext;

const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[cfg(windows)]
const LOOKUP_TOOL: &str = "where";
#[cfg(not(windows))]
const LOOKUP_TOOL: &str = "which";

/// Availability check for an executable, resolved against the panel's context.
pub(crate) trait CommandLocator {
    fn locate(&self, name: &str, workdir: &WorkingDirectoryContext) -> Option<PathBuf>;

    fn is_available(&self, name: &str, workdir: &WorkingDirectoryContext) -> bool {
        self.locate(name, workdir).is_some()
    }
}

/// Spawns the platform lookup tool with a hard deadline.
pub(crate) struct ProcessLocator {
    timeout: Duration,
}

impl ProcessLocator {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandLocator for ProcessLocator {
    fn locate(&self, name: &str, workdir: &WorkingDirectoryContext) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }
        if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
            let path = workdir.path().join(name);
            return crate::is_executable(&path).then_some(path);
        }

        let mut cmd = Command::new(LOOKUP_TOOL);
        cmd.arg(name)
            .current_dir(workdir.path())
            .env("PATH", workdir.augmented_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::debug!(tool = LOOKUP_TOOL, error = %err, "lookup tool unavailable; scanning PATH");
                return scan_path(name, workdir);
            }
        };

        let output = wait_with_deadline(child, self.timeout)?;
        output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from)
    }
}

/// Runs a short-lived command and returns its stdout, or `None` on failure or timeout.
pub(crate) fn run_captured(
    program: &Path,
    args: &[&str],
    workdir: &WorkingDirectoryContext,
    timeout: Duration,
) -> Option<String> {
    let child = Command::new(program)
        .args(args)
        .current_dir(workdir.path())
        .env("PATH", workdir.augmented_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;
    wait_with_deadline(child, timeout)
}

fn wait_with_deadline(mut child: Child, timeout: Duration) -> Option<String> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return None;
                }
                let mut out = String::new();
                child.stdout.take()?.read_to_string(&mut out).ok()?;
                return Some(out);
            }
            Ok(None) => {
                if started.elapsed() >= timeout {
                    tracing::warn!(pid = child.id(), "probe timed out; killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                thread::sleep(PROBE_POLL_INTERVAL);
            }
            Err(err) => {
                tracing::warn!(error = %err, "probe wait failed");
                let _ = child.kill();
                return None;
            }
        }
    }
}

fn scan_path(name: &str, workdir: &WorkingDirectoryContext) -> Option<PathBuf> {
    let path = workdir.augmented_path();
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|full| crate::is_executable(full))
}
