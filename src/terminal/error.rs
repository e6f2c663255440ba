use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ShellError {
    #[error("{0}: command not found")]
    NotFound(String),
    #[error("{program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("no such file or directory: {0}")]
    NoSuchDirectory(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("process input is closed")]
    InputClosed,
    #[error("pty: {0}")]
    Pty(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ShellError {
    pub(crate) fn from_spawn(program: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            ShellError::NotFound(program.to_string())
        } else {
            ShellError::Spawn {
                program: program.to_string(),
                source,
            }
        }
    }
}
