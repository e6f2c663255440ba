use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::input::KeyToken;

const ERASE_ONE: &str = "\u{8} \u{8}";

/// Backspace-space-backspace once per column the removed character occupied.
pub(crate) fn erase_sequence(removed: char) -> String {
    ERASE_ONE.repeat(removed.width().unwrap_or(0))
}

#[derive(Debug, Default)]
pub(crate) struct History {
    entries: Vec<String>,
    index: usize,
}

impl History {
    pub(crate) fn push(&mut self, command: String) {
        self.entries.push(command);
        self.index = self.entries.len();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &[String] {
        &self.entries
    }

    fn older(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        self.index = self.index.saturating_sub(1);
        self.entries.get(self.index).map(String::as_str)
    }

    fn newer(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        self.index = (self.index + 1).min(self.entries.len());
        Some(self.entries.get(self.index).map(String::as_str).unwrap_or(""))
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.index = 0;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum EditorSignal {
    CommandReady(String),
    ShowPrompt,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct EditorOutcome {
    pub(crate) echo: String,
    pub(crate) signal: Option<EditorSignal>,
}

/// Fallback shell line discipline: buffer, echo and history, no cursor movement.
#[derive(Debug, Default)]
pub(crate) struct LineEditor {
    buffer: String,
    history: History,
}

impl LineEditor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn buffer(&self) -> &str {
        &self.buffer
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> &History {
        &self.history
    }

    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        self.history.clear();
    }

    pub(crate) fn feed(&mut self, token: KeyToken) -> EditorOutcome {
        let mut outcome = EditorOutcome::default();
        match token {
            KeyToken::Char(c) => {
                self.buffer.push(c);
                outcome.echo.push(c);
            }
            KeyToken::Backspace => {
                if let Some(removed) = self.buffer.pop() {
                    outcome.echo.push_str(&erase_sequence(removed));
                }
            }
            KeyToken::Enter => {
                outcome.echo.push_str("\r\n");
                let command = self.buffer.trim().to_string();
                self.buffer.clear();
                if command.is_empty() {
                    outcome.signal = Some(EditorSignal::ShowPrompt);
                } else {
                    self.history.push(command.clone());
                    outcome.signal = Some(EditorSignal::CommandReady(command));
                }
            }
            KeyToken::Interrupt => {
                if !self.buffer.is_empty() {
                    self.buffer.clear();
                    outcome.echo.push_str("^C\r\n");
                    outcome.signal = Some(EditorSignal::ShowPrompt);
                }
            }
            KeyToken::Up => {
                if let Some(entry) = self.history.older().map(str::to_string) {
                    outcome.echo = self.replace_buffer(entry);
                }
            }
            KeyToken::Down => {
                if let Some(entry) = self.history.newer().map(str::to_string) {
                    outcome.echo = self.replace_buffer(entry);
                }
            }
            KeyToken::Other => {}
        }
        outcome
    }

    fn replace_buffer(&mut self, next: String) -> String {
        let mut echo = ERASE_ONE.repeat(self.buffer.width());
        echo.push_str(&next);
        self.buffer = next;
        echo
    }
}
