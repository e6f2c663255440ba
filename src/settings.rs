use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::terminal::FilterConfig;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum WindowPlacement {
    /// Alternate screen, the panel owns the whole window.
    #[default]
    Tab,
    /// Stay on the main screen below the invoking prompt.
    Inline,
}

impl WindowPlacement {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "tab" | "fullscreen" | "alternate" => Some(WindowPlacement::Tab),
            "inline" | "main" => Some(WindowPlacement::Inline),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum ShellBackend {
    /// Real pty shell, falling back to the simulated shell.
    #[default]
    Auto,
    Pty,
    Simulated,
}

impl ShellBackend {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "auto" => Some(ShellBackend::Auto),
            "pty" => Some(ShellBackend::Pty),
            "simulated" | "sim" | "builtin" => Some(ShellBackend::Simulated),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Timings {
    pub(crate) probe_timeout_ms: u64,
    pub(crate) kill_grace_ms: u64,
    pub(crate) claude_nudge_ms: u64,
    pub(crate) claude_hint_ms: u64,
    pub(crate) claude_give_up_ms: u64,
    pub(crate) clear_threshold: usize,
    pub(crate) novelty_min_chars: usize,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 3000,
            kill_grace_ms: 1000,
            claude_nudge_ms: 2000,
            claude_hint_ms: 5000,
            claude_give_up_ms: 15000,
            clear_threshold: 2,
            novelty_min_chars: 50,
        }
    }
}

impl Timings {
    pub(crate) fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub(crate) fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub(crate) fn filter(&self) -> FilterConfig {
        FilterConfig {
            clear_threshold: self.clear_threshold,
            novelty_min_chars: self.novelty_min_chars,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub(crate) default_command: String,
    pub(crate) auto_run: bool,
    pub(crate) placement: WindowPlacement,
    pub(crate) backend: ShellBackend,
    pub(crate) shell: Option<String>,
    pub(crate) timings: Timings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_command: "claude".to_string(),
            auto_run: false,
            placement: WindowPlacement::default(),
            backend: ShellBackend::default(),
            shell: None,
            timings: Timings::default(),
        }
    }
}

impl Settings {
    pub(crate) fn load_default() -> Self {
        let mut settings = Self::load_or_default(&settings_file_path());
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    /// Like `load_from`, but an unreadable or malformed file only costs a warning.
    pub(crate) fn load_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "settings ignored; using defaults");
                Self::default()
            }
        }
    }

    pub(crate) fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse settings {}", path.display()))
    }

    pub(crate) fn save_default(&self) -> Result<PathBuf> {
        let path = settings_file_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub(crate) fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create settings dir {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(self).context("serialize settings")?;
        fs::write(path, serialized).with_context(|| format!("write settings {}", path.display()))
    }

    /// Applies `PANELTERM_*` overrides; `lookup` is `std::env::var` outside tests.
    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        if let Some(command) = value("PANELTERM_DEFAULT_COMMAND") {
            self.default_command = command;
        }
        if let Some(raw) = value("PANELTERM_AUTO_RUN") {
            self.auto_run = matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(raw) = value("PANELTERM_BACKEND") {
            match ShellBackend::parse(&raw) {
                Some(backend) => self.backend = backend,
                None => tracing::warn!(value = %raw, "ignoring unknown PANELTERM_BACKEND"),
            }
        }
        if let Some(raw) = value("PANELTERM_PLACEMENT") {
            match WindowPlacement::parse(&raw) {
                Some(placement) => self.placement = placement,
                None => tracing::warn!(value = %raw, "ignoring unknown PANELTERM_PLACEMENT"),
            }
        }
    }

    pub(crate) fn shell_program(&self) -> String {
        self.shell
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| "/bin/bash".to_string())
    }
}

fn settings_file_path() -> PathBuf {
    crate::app_dir().join("settings.json")
}
