use std::io::{Stdout, Write};

use anyhow::{Context, Result};
use crossterm::cursor::MoveTo;
use crossterm::terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};

use crate::settings::WindowPlacement;

pub(crate) trait TerminalDisplay {
    fn write(&mut self, data: &[u8]) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
    fn scroll_to_top(&mut self) -> Result<()>;
    fn scroll_to_bottom(&mut self) -> Result<()>;
    fn size(&self) -> (u16, u16);
    fn focus(&mut self) -> Result<()>;
    fn dispose(&mut self) -> Result<()>;

    fn write_str(&mut self, text: &str) -> Result<()> {
        self.write(text.as_bytes())
    }
}

/// The user's own terminal, already in raw mode, acting as the display widget.
pub(crate) struct CrosstermDisplay {
    out: Stdout,
    placement: WindowPlacement,
    alternate: bool,
}

impl CrosstermDisplay {
    pub(crate) fn new(placement: WindowPlacement) -> Self {
        Self {
            out: std::io::stdout(),
            placement,
            alternate: false,
        }
    }
}

impl TerminalDisplay for CrosstermDisplay {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.out.write_all(data).context("write to terminal")?;
        self.out.flush().context("flush terminal")
    }

    fn clear(&mut self) -> Result<()> {
        crossterm::execute!(
            self.out,
            Clear(ClearType::All),
            Clear(ClearType::Purge),
            MoveTo(0, 0)
        )
        .context("clear terminal")
    }

    fn scroll_to_top(&mut self) -> Result<()> {
        crossterm::execute!(self.out, MoveTo(0, 0)).context("move cursor home")
    }

    fn scroll_to_bottom(&mut self) -> Result<()> {
        // A real terminal follows the cursor; nothing to do.
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        crossterm::terminal::size().unwrap_or((80, 24))
    }

    fn focus(&mut self) -> Result<()> {
        if self.placement == WindowPlacement::Tab && !self.alternate {
            crossterm::execute!(self.out, EnterAlternateScreen, MoveTo(0, 0))
                .context("enter alternate screen")?;
            self.alternate = true;
        }
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        if self.alternate {
            crossterm::execute!(self.out, LeaveAlternateScreen)
                .context("leave alternate screen")?;
            self.alternate = false;
        }
        Ok(())
    }
}
