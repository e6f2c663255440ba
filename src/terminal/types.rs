pub(crate) type SessionId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
pub(crate) enum AppEvent {
    SessionOutput {
        id: SessionId,
        stream: OutputStream,
        data: Vec<u8>,
    },
    SessionStreamClosed {
        id: SessionId,
        stream: OutputStream,
    },
    PtyOutput {
        generation: u64,
        data: Vec<u8>,
    },
    PtyClosed {
        generation: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionState {
    Idle,
    Starting,
    Running,
    Exited,
    Errored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeadlineAction {
    ClaudeNudge,
    ClaudeSlowHint,
    ClaudeGiveUp,
    ForceKill,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    pub(crate) at: std::time::Instant,
    pub(crate) session: SessionId,
    pub(crate) action: DeadlineAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SessionExit {
    pub(crate) code: Option<i32>,
    pub(crate) signal: Option<i32>,
    pub(crate) errored: bool,
}

impl SessionExit {
    pub(crate) fn describe(&self, label: &str) -> String {
        if self.errored {
            return format!("[{label} stopped: process state unavailable]");
        }
        if let Some(signal) = self.signal {
            return format!("[{label} terminated by {}]", crate::signal_name(signal));
        }
        match self.code {
            Some(0) | None => format!("[{label} exited]"),
            Some(code) => format!("[{label} exited with code {code}]"),
        }
    }
}
