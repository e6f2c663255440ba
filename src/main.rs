use std::fs::{self, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use crossterm::event::{DisableBracketedPaste, EnableBracketedPaste};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod settings;
mod terminal;

use settings::{Settings, ShellBackend};

const APP_VERSION: &str = "0.1.0";
const LOG_ENV: &str = "PANELTERM_LOG";

#[derive(Debug, Default, PartialEq, Eq)]
struct CliOptions {
    simulated: bool,
    write_settings: bool,
}

enum CliAction {
    Version,
    Run(CliOptions),
}

fn parse_args(args: &[String]) -> std::result::Result<CliAction, String> {
    let mut options = CliOptions::default();
    for arg in args {
        match arg.as_str() {
            "--version" | "-v" => return Ok(CliAction::Version),
            "--simulated" => options.simulated = true,
            "--write-settings" => options.write_settings = true,
            unknown => return Err(unknown.to_string()),
        }
    }
    Ok(CliAction::Run(options))
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(CliAction::Version) => {
            println!("panelterm {}", APP_VERSION);
            return Ok(());
        }
        Ok(CliAction::Run(options)) => options,
        Err(unknown) => {
            eprintln!("unknown argument: {}", unknown);
            std::process::exit(2);
        }
    };

    if let Err(err) = init_logging() {
        eprintln!("logging disabled: {err:#}");
    }
    tracing::info!(version = APP_VERSION, "panelterm starting");

    let mut settings = Settings::load_default();
    if options.simulated {
        settings.backend = ShellBackend::Simulated;
    }
    if options.write_settings {
        let path = settings.save_default()?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    setup_terminal()?;
    let result = terminal::run_app(settings);
    restore_terminal()?;
    result
}

fn init_logging() -> Result<()> {
    let dir = app_dir();
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join("panelterm.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {}", path.display()))?;

    // The screen belongs to the panel; logs only go to the file.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| "panelterm=info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .try_init()
        .context("install log subscriber")
}

fn setup_terminal() -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    crossterm::execute!(std::io::stdout(), EnableBracketedPaste).ok();
    Ok(())
}

fn restore_terminal() -> Result<()> {
    crossterm::execute!(std::io::stdout(), DisableBracketedPaste).ok();
    disable_raw_mode().context("disable raw mode")?;
    println!();
    Ok(())
}

pub(crate) fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

pub(crate) fn app_dir() -> PathBuf {
    home_dir().join(".panelterm")
}

pub(crate) fn is_executable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    meta.permissions().mode() & 0o111 != 0
}

/// Signals the whole process group led by `pid`.
#[cfg(unix)]
pub(crate) fn signal_process_group(pid: u32, signal: i32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a stale group only yields ESRCH.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        tracing::debug!(pid, signal, error = %std::io::Error::last_os_error(), "kill failed");
    }
}

pub(crate) fn signal_name(signal: i32) -> String {
    let name = match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGABRT => "SIGABRT",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGTERM => "SIGTERM",
        _ => return format!("signal {signal}"),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_known_flags() {
        let Ok(CliAction::Run(options)) = parse_args(&args(&["--simulated", "--write-settings"]))
        else {
            panic!("expected run options");
        };
        assert!(options.simulated);
        assert!(options.write_settings);
        assert!(matches!(parse_args(&args(&["-v"])), Ok(CliAction::Version)));
    }

    #[test]
    fn rejects_unknown_arguments() {
        assert_eq!(parse_args(&args(&["--bogus"])).err().as_deref(), Some("--bogus"));
    }

    #[test]
    fn names_common_signals() {
        assert_eq!(signal_name(libc::SIGTERM), "SIGTERM");
        assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
        assert_eq!(signal_name(250), "signal 250");
    }
}
