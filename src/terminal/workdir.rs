use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use super::error::ShellError;

const EXTRA_SYSTEM_DIRS: &[&str] = &["/usr/local/bin", "/opt/homebrew/bin", "/usr/bin", "/bin"];
const EXTRA_HOME_DIRS: &[&str] = &[".local/bin", ".npm-global/bin", ".cargo/bin", "bin"];

/// Working directory shared by every spawn and probe of one panel. Only `cd` moves it.
#[derive(Clone, Debug)]
pub(crate) struct WorkingDirectoryContext {
    cwd: PathBuf,
    home: PathBuf,
}

impl WorkingDirectoryContext {
    pub(crate) fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            cwd: home.clone(),
            home,
        }
    }

    pub(crate) fn from_env() -> Self {
        Self::new(crate::home_dir())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.cwd
    }

    #[cfg(test)]
    pub(crate) fn home(&self) -> &Path {
        &self.home
    }

    pub(crate) fn change_dir(&mut self, target: Option<&str>) -> Result<&Path, ShellError> {
        let raw = target.unwrap_or("~");
        let resolved = self.resolve(raw);
        let canonical = resolved.canonicalize().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ShellError::NoSuchDirectory(raw.to_string()),
            io::ErrorKind::PermissionDenied => ShellError::PermissionDenied(raw.to_string()),
            _ => ShellError::Io(err),
        })?;
        if !canonical.is_dir() {
            return Err(ShellError::NotADirectory(raw.to_string()));
        }
        tracing::debug!(cwd = %canonical.display(), "working directory changed");
        self.cwd = canonical;
        Ok(&self.cwd)
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        if raw == "~" {
            return self.home.clone();
        }
        if let Some(rest) = raw.strip_prefix("~/") {
            return self.home.join(rest);
        }
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    /// Last path segment for the prompt; `~` at home.
    pub(crate) fn prompt_segment(&self) -> String {
        if self.cwd == self.home {
            return "~".to_string();
        }
        self.cwd
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.cwd.display().to_string())
    }

    /// `PATH` with common local and binary directories appended when missing.
    pub(crate) fn augmented_path(&self) -> OsString {
        let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default();
        let extras = EXTRA_SYSTEM_DIRS
            .iter()
            .map(PathBuf::from)
            .chain(EXTRA_HOME_DIRS.iter().map(|rel| self.home.join(rel)));
        for dir in extras {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        std::env::join_paths(dirs).unwrap_or_else(|_| std::env::var_os("PATH").unwrap_or_default())
    }
}
