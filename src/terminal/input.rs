use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use super::types::SessionId;

pub(crate) const CTRL_C: u8 = 0x03;

/// Where keystrokes currently go. Exactly one target is bound at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InputTarget {
    Detached,
    LineEditor,
    Session(SessionId),
    Pty,
}

#[derive(Debug)]
pub(crate) struct InputRouter {
    target: InputTarget,
    binds: usize,
}

impl InputRouter {
    pub(crate) fn new() -> Self {
        Self {
            target: InputTarget::Detached,
            binds: 0,
        }
    }

    /// Replaces the bound target and returns the previous one.
    pub(crate) fn bind(&mut self, target: InputTarget) -> InputTarget {
        let previous = std::mem::replace(&mut self.target, target);
        self.binds += 1;
        tracing::debug!(?previous, ?target, "input rebound");
        previous
    }

    pub(crate) fn target(&self) -> InputTarget {
        self.target
    }

    #[cfg(test)]
    pub(crate) fn bind_count(&self) -> usize {
        self.binds
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum KeyToken {
    Char(char),
    Enter,
    Backspace,
    Interrupt,
    Up,
    Down,
    Other,
}

/// Splits raw terminal input into keystroke tokens.
pub(crate) fn tokenize(data: &[u8]) -> Vec<KeyToken> {
    let text = String::from_utf8_lossy(data);
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut prev = None;

    while let Some(ch) = chars.next() {
        let token = match ch {
            '\r' => KeyToken::Enter,
            // Pasted CR LF is a single line end.
            '\n' if prev == Some('\r') => {
                prev = Some(ch);
                continue;
            }
            '\n' => KeyToken::Enter,
            '\u{7f}' | '\u{8}' => KeyToken::Backspace,
            '\u{3}' => KeyToken::Interrupt,
            '\u{1b}' => match chars.peek().copied() {
                Some('[') | Some('O') => {
                    chars.next();
                    let mut last = None;
                    // Parameters run until the final byte in 0x40..0x7E.
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            last = Some(c);
                            break;
                        }
                    }
                    match last {
                        Some('A') => KeyToken::Up,
                        Some('B') => KeyToken::Down,
                        _ => KeyToken::Other,
                    }
                }
                Some(_) => {
                    chars.next();
                    KeyToken::Other
                }
                None => KeyToken::Other,
            },
            c if !c.is_control() => KeyToken::Char(c),
            _ => KeyToken::Other,
        };
        prev = Some(ch);
        tokens.push(token);
    }

    tokens
}

/// Encodes a key event the way a terminal would send it over the wire.
pub(crate) fn key_event_to_bytes(key: KeyEvent) -> Option<Vec<u8>> {
    let alt = key.modifiers.contains(KeyModifiers::ALT);
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    let mut bytes = match key.code {
        KeyCode::Char(c) if ctrl => {
            let lower = c.to_ascii_lowercase();
            match lower {
                'a'..='z' => vec![(lower as u8) & 0x1f],
                ' ' | '@' => vec![0x00],
                '[' => vec![0x1b],
                '\\' => vec![0x1c],
                ']' => vec![0x1d],
                _ => return None,
            }
        }
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf).as_bytes().to_vec()
        }
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        _ => return None,
    };

    if alt {
        bytes.insert(0, 0x1b);
    }
    Some(bytes)
}
